//! Hex transport helpers.
//!
//! Some integrations deliver device frames as hex text (serial bridges,
//! debugging relays) instead of raw bytes. Decoding is tolerant of
//! whitespace and line breaks; encoding produces uppercase pairs.

use termlink_core::{Error, Result};

/// Decode hex text into bytes.
///
/// Whitespace (spaces, tabs, newlines) is stripped before decoding.
///
/// # Errors
/// Returns `Error::InvalidHex` on empty input, odd digit count, or
/// non-hex characters.
pub fn decode(text: &str) -> Result<Vec<u8>> {
    let clean: String = text.chars().filter(|c| !c.is_whitespace()).collect();

    if clean.is_empty() {
        return Err(Error::InvalidHex("empty input".to_string()));
    }
    if clean.len() % 2 != 0 {
        return Err(Error::InvalidHex(format!(
            "odd number of hex digits: {}",
            clean.len()
        )));
    }

    let mut out = Vec::with_capacity(clean.len() / 2);
    let digits = clean.as_bytes();
    for pair in digits.chunks_exact(2) {
        let hi = hex_digit(pair[0])?;
        let lo = hex_digit(pair[1])?;
        out.push((hi << 4) | lo);
    }
    Ok(out)
}

/// Encode bytes as uppercase hex.
#[must_use]
pub fn encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

fn hex_digit(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(Error::InvalidHex(format!(
            "invalid hex character '{}'",
            c as char
        ))),
    }
}
