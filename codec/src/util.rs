//! Buffer helpers shared by the encoder and decoder.

use crate::Error;
use bytes::{Buf, BufMut};

/// Checks that at least `len` bytes remain in the buffer.
#[inline]
pub fn at_least(buf: &impl Buf, len: usize) -> Result<(), Error> {
    if buf.remaining() < len {
        return Err(Error::EndOfBuffer);
    }
    Ok(())
}

/// Writes a UTF-8 string prefixed by its varint byte length.
pub fn write_name(name: &str, buf: &mut impl BufMut) {
    crate::varint::write(name.len() as u64, buf);
    buf.put_slice(name.as_bytes());
}

/// Reads a UTF-8 string written by [write_name].
pub fn read_name(buf: &mut impl Buf) -> Result<String, Error> {
    let len = crate::varint::read(buf)?;
    let len = usize::try_from(len).map_err(|_| Error::InvalidVarint)?;
    at_least(buf, len)?;
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    String::from_utf8(bytes).map_err(|e| Error::InvalidData("name", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_round_trip() {
        let mut buf = Vec::new();
        write_name("Node", &mut buf);
        assert_eq!(buf, b"\x04Node");
        assert_eq!(read_name(&mut &buf[..]).unwrap(), "Node");
    }

    #[test]
    fn test_name_truncated() {
        let mut buf: &[u8] = b"\x09Node";
        assert!(matches!(read_name(&mut buf), Err(Error::EndOfBuffer)));
    }
}
