//! Deterministic binary encoding.
//!
//! Sequential, field-order-dependent framing: big-endian fixed-width
//! integers, u32 length-prefixed byte and string fields, raw 16-byte
//! uuids. Decoders must consume fields in exactly the order encoders
//! wrote them; nothing on the wire is self-describing.

use uuid::Uuid;

use crate::error::{CoreError, Result};

/// Append-only encoder.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Length-prefixed byte field.
    pub fn put_bytes(&mut self, v: &[u8]) {
        self.put_u32(v.len() as u32);
        self.buf.extend_from_slice(v);
    }

    /// Length-prefixed UTF-8 string field.
    pub fn put_string(&mut self, v: &str) {
        self.put_bytes(v.as_bytes());
    }

    /// Raw 16-byte uuid, no length prefix.
    pub fn put_uuid(&mut self, v: &Uuid) {
        self.buf.extend_from_slice(v.as_bytes());
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Positional decoder over a byte slice.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            return Err(CoreError::DecodingError(format!(
                "truncated input: need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.buf.len() - self.pos
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        let mut arr = [0u8; 4];
        arr.copy_from_slice(bytes);
        Ok(u32::from_be_bytes(arr))
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(arr))
    }

    pub fn get_i64(&mut self) -> Result<i64> {
        let bytes = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(i64::from_be_bytes(arr))
    }

    pub fn get_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.get_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    pub fn get_string(&mut self) -> Result<String> {
        let bytes = self.get_bytes()?;
        String::from_utf8(bytes)
            .map_err(|e| CoreError::DecodingError(format!("invalid utf-8 in string field: {e}")))
    }

    pub fn get_uuid(&mut self) -> Result<Uuid> {
        let bytes = self.take(16)?;
        let mut arr = [0u8; 16];
        arr.copy_from_slice(bytes);
        Ok(Uuid::from_bytes(arr))
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Error unless every byte was consumed.
    pub fn finish(self) -> Result<()> {
        if self.pos != self.buf.len() {
            return Err(CoreError::DecodingError(format!(
                "{} trailing bytes after last field",
                self.buf.len() - self.pos
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_roundtrip() {
        let mut w = Writer::new();
        w.put_u8(7);
        w.put_u32(0xdeadbeef);
        w.put_u64(u64::MAX);
        w.put_i64(-42);
        let bytes = w.into_bytes();

        let mut r = Reader::new(&bytes);
        assert_eq!(r.get_u8().unwrap(), 7);
        assert_eq!(r.get_u32().unwrap(), 0xdeadbeef);
        assert_eq!(r.get_u64().unwrap(), u64::MAX);
        assert_eq!(r.get_i64().unwrap(), -42);
        r.finish().unwrap();
    }

    #[test]
    fn test_variable_fields_roundtrip() {
        let uuid = Uuid::new_v4();
        let mut w = Writer::new();
        w.put_bytes(b"raw payload");
        w.put_string("a name");
        w.put_uuid(&uuid);
        let bytes = w.into_bytes();

        let mut r = Reader::new(&bytes);
        assert_eq!(r.get_bytes().unwrap(), b"raw payload");
        assert_eq!(r.get_string().unwrap(), "a name");
        assert_eq!(r.get_uuid().unwrap(), uuid);
        r.finish().unwrap();
    }

    #[test]
    fn test_empty_fields() {
        let mut w = Writer::new();
        w.put_bytes(b"");
        w.put_string("");
        let bytes = w.into_bytes();

        let mut r = Reader::new(&bytes);
        assert!(r.get_bytes().unwrap().is_empty());
        assert!(r.get_string().unwrap().is_empty());
        r.finish().unwrap();
    }

    #[test]
    fn test_truncated_input_errors() {
        let mut w = Writer::new();
        w.put_bytes(b"some bytes");
        let mut bytes = w.into_bytes();
        bytes.truncate(bytes.len() - 1);

        let mut r = Reader::new(&bytes);
        assert!(r.get_bytes().is_err());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut w = Writer::new();
        w.put_u8(1);
        let mut bytes = w.into_bytes();
        bytes.push(0);

        let mut r = Reader::new(&bytes);
        r.get_u8().unwrap();
        assert!(r.finish().is_err());
    }
}
