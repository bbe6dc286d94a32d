//! String payloads and encoding-bound writers/readers.
//!
//! Strings are written as a varint byte length followed by the encoded bytes. The
//! encoding is not recorded in the stream: both sides must agree on it, and decoding
//! UTF-16 data as UTF-8 (or the reverse) fails or yields different text.

use crate::{util::at_least, varint, Error};
use bytes::{Buf, BufMut};
use std::io::{Read, Seek, Write};

/// Encoding of string payloads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TextEncoding {
    #[default]
    Utf8,
    Utf16Le,
}

impl TextEncoding {
    /// Writes `s` with its byte length prefix.
    pub fn encode(self, s: &str, buf: &mut impl BufMut) {
        match self {
            TextEncoding::Utf8 => {
                varint::write(s.len() as u64, buf);
                buf.put_slice(s.as_bytes());
            }
            TextEncoding::Utf16Le => {
                let units: Vec<u16> = s.encode_utf16().collect();
                varint::write(units.len() as u64 * 2, buf);
                for unit in units {
                    buf.put_u16_le(unit);
                }
            }
        }
    }

    /// Reads a string written by [TextEncoding::encode].
    pub fn decode(self, buf: &mut impl Buf) -> Result<String, Error> {
        let len = varint::read(buf)?;
        let len = usize::try_from(len).map_err(|_| Error::InvalidVarint)?;
        at_least(buf, len)?;
        match self {
            TextEncoding::Utf8 => {
                let mut bytes = vec![0u8; len];
                buf.copy_to_slice(&mut bytes);
                String::from_utf8(bytes).map_err(|e| Error::InvalidData("string", e.to_string()))
            }
            TextEncoding::Utf16Le => {
                if len % 2 != 0 {
                    return Err(Error::InvalidData("string", "odd UTF-16 byte length".into()));
                }
                let units: Vec<u16> = (0..len / 2).map(|_| buf.get_u16_le()).collect();
                String::from_utf16(&units).map_err(|e| Error::InvalidData("string", e.to_string()))
            }
        }
    }
}

/// A byte sink bound to a [TextEncoding].
///
/// The writer never closes the underlying sink; use [BinaryWriter::into_inner] to get it back.
#[derive(Debug)]
pub struct BinaryWriter<W: Write> {
    inner: W,
    encoding: TextEncoding,
}

impl<W: Write> BinaryWriter<W> {
    pub fn new(inner: W, encoding: TextEncoding) -> Self {
        Self { inner, encoding }
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// Writes a length-prefixed string in the writer's encoding.
    pub fn write_string(&mut self, s: &str) -> Result<(), Error> {
        let mut buf = Vec::new();
        self.encoding.encode(s, &mut buf);
        self.write_bytes(&buf)
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.inner.write_all(bytes)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), Error> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// A seekable byte source bound to a [TextEncoding].
#[derive(Debug)]
pub struct BinaryReader<R: Read + Seek> {
    inner: R,
    encoding: TextEncoding,
}

impl<R: Read + Seek> BinaryReader<R> {
    pub fn new(inner: R, encoding: TextEncoding) -> Self {
        Self { inner, encoding }
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// Reads a length-prefixed string in the reader's encoding.
    pub fn read_string(&mut self) -> Result<String, Error> {
        let mut prefix = Vec::with_capacity(varint::MAX_LEN);
        loop {
            let mut byte = [0u8; 1];
            self.inner.read_exact(&mut byte)?;
            prefix.push(byte[0]);
            if byte[0] & 0x80 == 0 || prefix.len() == varint::MAX_LEN {
                break;
            }
        }
        let len = varint::read(&mut &prefix[..])?;
        let len = usize::try_from(len).map_err(|_| Error::InvalidVarint)?;

        // Read through `take` so a hostile length cannot drive the allocation.
        let mut body = Vec::new();
        (&mut self.inner).take(len as u64).read_to_end(&mut body)?;
        if body.len() != len {
            return Err(Error::EndOfBuffer);
        }
        prefix.extend_from_slice(&body);
        self.encoding.decode(&mut &prefix[..])
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use test_case::test_case;

    #[test_case(TextEncoding::Utf8, 6; "utf8")]
    #[test_case(TextEncoding::Utf16Le, 10; "utf16")]
    fn test_round_trip(encoding: TextEncoding, body_len: usize) {
        let mut buf = Vec::new();
        encoding.encode("héllo", &mut buf);
        assert_eq!(buf[0] as usize, body_len);
        assert_eq!(buf.len(), body_len + 1);
        assert_eq!(encoding.decode(&mut &buf[..]).unwrap(), "héllo");
    }

    #[test]
    fn test_mixed_encodings_do_not_round_trip() {
        let mut buf = Vec::new();
        TextEncoding::Utf16Le.encode("é", &mut buf);
        let decoded = TextEncoding::Utf8.decode(&mut &buf[..]);
        assert!(decoded.map_or(true, |s| s != "é"));
    }

    #[test]
    fn test_odd_utf16_length() {
        let buf = [3u8, 0, 0, 0];
        assert!(matches!(
            TextEncoding::Utf16Le.decode(&mut &buf[..]),
            Err(Error::InvalidData("string", _))
        ));
    }

    #[test]
    fn test_writer_reader() {
        let mut writer = BinaryWriter::new(Vec::new(), TextEncoding::Utf16Le);
        writer.write_string("abc").unwrap();
        writer.write_string("").unwrap();
        let bytes = writer.into_inner();

        let mut reader = BinaryReader::new(Cursor::new(bytes), TextEncoding::Utf16Le);
        assert_eq!(reader.read_string().unwrap(), "abc");
        assert_eq!(reader.read_string().unwrap(), "");
        assert!(matches!(reader.read_string(), Err(Error::Io(_))));
    }

    #[test]
    fn test_reader_truncated_body() {
        let mut reader =
            BinaryReader::new(Cursor::new(vec![0x80, 0x80, 0x04, b'a']), TextEncoding::Utf8);
        assert!(matches!(reader.read_string(), Err(Error::EndOfBuffer)));
    }
}
