//! Length tagging for encrypted fields.
//!
//! A stream cipher keeps the plaintext length, but the decoder still has to
//! learn it from somewhere. Two layouts are supported:
//!
//! * inline marker: `prefix // <decimal length> // suffix`, spliced into the
//!   ciphertext at its midpoint. This is the legacy layout. Ciphertext that
//!   happens to contain `//<digits>//` ahead of the real marker is read
//!   wrongly; the layout is kept as-is for wire compatibility.
//! * length prefix: a big-endian `u16` before the ciphertext.

use crate::error::FrameError;

/// Two-character delimiter around an inline length marker.
pub const DELIMITER: &[u8] = b"//";

const PREFIX_LEN: usize = 2;

/// Inserts `//<original_length>//` at the midpoint of `ciphertext`.
pub fn hide_length(ciphertext: &[u8], original_length: usize) -> Vec<u8> {
    let mid = ciphertext.len() / 2;
    let length = original_length.to_string();
    let mut framed = Vec::with_capacity(ciphertext.len() + length.len() + 2 * DELIMITER.len());
    framed.extend_from_slice(&ciphertext[..mid]);
    framed.extend_from_slice(DELIMITER);
    framed.extend_from_slice(length.as_bytes());
    framed.extend_from_slice(DELIMITER);
    framed.extend_from_slice(&ciphertext[mid..]);
    framed
}

/// Returns the leftmost run matching `//[0-9]*//`, verbatim.
pub fn find_length(framed: &[u8]) -> Result<&[u8], FrameError> {
    let mut start = 0;
    while start + 2 * DELIMITER.len() <= framed.len() {
        if framed[start..].starts_with(DELIMITER) {
            let digits_start = start + DELIMITER.len();
            let digits = framed[digits_start..]
                .iter()
                .take_while(|b| b.is_ascii_digit())
                .count();
            let end = digits_start + digits;
            if framed[end..].starts_with(DELIMITER) {
                return Ok(&framed[start..end + DELIMITER.len()]);
            }
        }
        start += 1;
    }
    Err(FrameError::MissingMarker)
}

/// Strips the delimiters from a marker and parses the length it carries.
pub fn parse_length(marker: &[u8]) -> Result<usize, FrameError> {
    let invalid = || FrameError::InvalidLength(String::from_utf8_lossy(marker).into_owned());
    let digits = marker
        .strip_prefix(DELIMITER)
        .and_then(|rest| rest.strip_suffix(DELIMITER))
        .ok_or_else(invalid)?;
    std::str::from_utf8(digits)
        .ok()
        .and_then(|text| text.parse::<usize>().ok())
        .ok_or_else(invalid)
}

/// Removes the first occurrence of `marker`, restoring contiguous ciphertext.
pub fn strip_marker(framed: &[u8], marker: &[u8]) -> Vec<u8> {
    if marker.is_empty() {
        return framed.to_vec();
    }
    match framed.windows(marker.len()).position(|window| window == marker) {
        Some(at) => {
            let mut stripped = Vec::with_capacity(framed.len() - marker.len());
            stripped.extend_from_slice(&framed[..at]);
            stripped.extend_from_slice(&framed[at + marker.len()..]);
            stripped
        }
        None => framed.to_vec(),
    }
}

/// Prepends the big-endian length of `ciphertext`.
pub fn prefix_length(ciphertext: &[u8]) -> Result<Vec<u8>, FrameError> {
    let len = u16::try_from(ciphertext.len()).map_err(|_| FrameError::TooLong(ciphertext.len()))?;
    let mut framed = Vec::with_capacity(PREFIX_LEN + ciphertext.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(ciphertext);
    Ok(framed)
}

/// Reads the length prefix and returns the ciphertext it covers.
pub fn split_prefix(framed: &[u8]) -> Result<&[u8], FrameError> {
    if framed.len() < PREFIX_LEN {
        return Err(FrameError::MissingMarker);
    }
    let (prefix, body) = framed.split_at(PREFIX_LEN);
    let declared = u16::from_be_bytes([prefix[0], prefix[1]]) as usize;
    if declared != body.len() {
        return Err(FrameError::Truncated {
            declared,
            available: body.len(),
        });
    }
    Ok(body)
}
