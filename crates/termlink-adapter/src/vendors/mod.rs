//! Vendor codec implementations.
//!
//! Each module implements [`VendorCodec`](crate::adapter::VendorCodec)
//! for one supported protocol: the message-type table, the payload
//! layouts, and the vendor error codes. Everything envelope-level is
//! shared (see `termlink-protocol`); only payload bytes differ here.

pub mod entropy;
pub mod realand;
pub mod zkteco;

pub use entropy::EntropyAccessCodec;
pub use realand::RealandAttendanceCodec;
pub use zkteco::ZktecoConsumeCodec;

use termlink_core::{CredentialId, Error, Result, constants::CREDENTIAL_WIRE_LEN};

/// Bounds-checked cursor over a vendor payload.
///
/// Every read either yields a value or a typed error; payloads shorter
/// than their declared layout never panic.
pub(crate) struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::TruncatedFrame {
                declared: self.pos + n,
                actual: self.data.len(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16_le(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn i16_le(&mut self) -> Result<i16> {
        let bytes = self.take(2)?;
        Ok(i16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn u32_le(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Fixed-width ASCII field, NUL padding stripped.
    pub(crate) fn ascii(&mut self, width: usize) -> Result<String> {
        let bytes = self.take(width)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        let text = std::str::from_utf8(&bytes[..end])
            .map_err(|_| Error::MalformedPayload("non-ASCII text field".to_string()))?;
        if !text.is_ascii() {
            return Err(Error::MalformedPayload("non-ASCII text field".to_string()));
        }
        Ok(text.trim().to_string())
    }

    /// Everything left in the payload, as ASCII text.
    pub(crate) fn remainder_ascii(&mut self) -> Result<String> {
        let width = self.remaining();
        self.ascii(width)
    }

    /// Fixed-width credential field, validated and normalized through
    /// [`CredentialId`]. Empty fields stay empty (password-only
    /// terminals send no credential).
    pub(crate) fn credential(&mut self) -> Result<String> {
        let raw = self.ascii(CREDENTIAL_WIRE_LEN)?;
        if raw.is_empty() {
            return Ok(raw);
        }
        let id = CredentialId::new(&raw)
            .map_err(|e| Error::MalformedPayload(format!("bad credential field: {e}")))?;
        Ok(id.as_str().to_string())
    }
}

/// Write a fixed-width NUL-padded ASCII field.
pub(crate) fn put_ascii_fixed(buf: &mut Vec<u8>, text: &str, width: usize) -> Result<()> {
    if !text.is_ascii() {
        return Err(Error::UnserializableField {
            name: "text".to_string(),
            reason: "non-ASCII content".to_string(),
        });
    }
    if text.len() > width {
        return Err(Error::UnserializableField {
            name: "text".to_string(),
            reason: format!("{} bytes exceeds field width {width}", text.len()),
        });
    }
    buf.extend_from_slice(text.as_bytes());
    buf.extend(std::iter::repeat_n(0u8, width - text.len()));
    Ok(())
}
