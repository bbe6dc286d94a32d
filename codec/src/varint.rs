//! Variable-length integer encoding and decoding
//!
//! Lengths, counts, reference tags and name indices are written as LEB128 varints:
//! each byte carries 7 bits of the value and a "continuation" bit signalling
//! that more bytes follow. Signed values (array lower bounds) are ZigZag'ed first
//! so that small negative numbers stay small.

use crate::{util::at_least, Error};
use bytes::{Buf, BufMut};

const DATA_BITS_PER_BYTE: u32 = 7;
const DATA_BITS_MASK: u8 = 0x7F;
const CONTINUATION_BIT_MASK: u8 = 0x80;

/// Maximum number of bytes a `u64` varint may occupy.
pub const MAX_LEN: usize = 10;

/// Encodes an unsigned integer as a varint.
pub fn write(value: u64, buf: &mut impl BufMut) {
    let mut val = value;
    while val >= u64::from(CONTINUATION_BIT_MASK) {
        buf.put_u8((val as u8) | CONTINUATION_BIT_MASK);
        val >>= DATA_BITS_PER_BYTE;
    }
    buf.put_u8(val as u8);
}

/// Decodes an unsigned integer from a varint.
///
/// Rejects encodings that set bits beyond 64 or that never terminate.
pub fn read(buf: &mut impl Buf) -> Result<u64, Error> {
    let mut result = 0u64;
    let mut shift = 0u32;
    loop {
        at_least(buf, 1)?;
        let byte = buf.get_u8();

        // The tenth byte may only carry the single remaining bit.
        if shift == 63 && byte > 1 {
            return Err(Error::InvalidVarint);
        }
        result |= u64::from(byte & DATA_BITS_MASK) << shift;
        if byte & CONTINUATION_BIT_MASK == 0 {
            return Ok(result);
        }
        shift += DATA_BITS_PER_BYTE;
    }
}

/// Encodes a signed integer as a ZigZag varint.
pub fn write_signed(value: i64, buf: &mut impl BufMut) {
    write(((value << 1) ^ (value >> 63)) as u64, buf);
}

/// Decodes a signed integer from a ZigZag varint.
pub fn read_signed(buf: &mut impl Buf) -> Result<i64, Error> {
    let value = read(buf)?;
    Ok(((value >> 1) as i64) ^ -((value & 1) as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_varint_encoding() {
        let test_cases = [
            0u64,
            1,
            127,
            128,
            0x3FFF,
            0x4000,
            0xFFFF_FFFF,
            0xFF_FFFF_FFFF_FFFF,
            u64::MAX,
        ];
        for value in test_cases {
            let mut buf = Vec::new();
            write(value, &mut buf);
            let bits = 64 - value.leading_zeros() as usize;
            assert_eq!(buf.len(), bits.div_ceil(7).max(1));
            assert!(buf.len() <= MAX_LEN);

            let mut read_buf = &buf[..];
            assert_eq!(read(&mut read_buf).unwrap(), value);
            assert!(read_buf.is_empty());
        }
    }

    #[test]
    fn test_zigzag_encoding() {
        for value in [0i64, 1, -1, 63, -64, 64, -65, i64::MIN, i64::MAX] {
            let mut buf = Vec::new();
            write_signed(value, &mut buf);
            assert_eq!(read_signed(&mut &buf[..]).unwrap(), value);
        }
        let mut buf = Vec::new();
        write_signed(-1, &mut buf);
        assert_eq!(buf, [0x01]);
    }

    #[test]
    fn test_varint_insufficient_buffer() {
        let mut buf = Bytes::from_static(&[0x80]);
        assert!(matches!(read(&mut buf), Err(Error::EndOfBuffer)));
    }

    #[test]
    fn test_varint_overflow() {
        let mut buf =
            Bytes::from_static(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x02]);
        assert!(matches!(read(&mut buf), Err(Error::InvalidVarint)));
    }
}
