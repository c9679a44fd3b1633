//! Legacy encrypted container decoder
//!
//! Containers carry a 12-byte header: a 4-byte little-endian XOR seed, a
//! 4-byte little-endian payload size, and 4 reserved bytes, followed by the
//! XOR-obfuscated, DEFLATE-compressed payload. The format is one-way and has
//! no version negotiation; steps here are bit-exact, not approximations:
//! a producer-side change shows up as garbage text, not as an error.

use std::io::Read;

use flate2::read::{DeflateDecoder, ZlibDecoder};
use thiserror::Error;

/// Header length: seed (4) + size (4) + reserved (4)
const HEADER_LEN: usize = 12;

/// The seed is folded down to a single repeating XOR byte with this constant.
const SEED_MASK: u32 = 0xFFFE_A4C8;

/// Fixed-size header/padding region discarded from the inflated payload.
const SCRIPT_OFFSET: usize = 512;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("container too small: {0} bytes, need at least {HEADER_LEN}")]
    TooShort(usize),

    #[error("declared payload size {declared} exceeds the {available} bytes present")]
    Truncated { declared: usize, available: usize },

    #[error("inflate failed: {0}")]
    Inflate(#[from] std::io::Error),

    #[error("decoded payload is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Decrypt and inflate one container into script text.
///
/// Deterministic: the same bytes always decode to the same text.
pub fn decode_container(content: &[u8]) -> Result<String, DecodeError> {
    if content.len() < HEADER_LEN {
        return Err(DecodeError::TooShort(content.len()));
    }

    let seed = u32::from_le_bytes([content[0], content[1], content[2], content[3]]);
    let size = u32::from_le_bytes([content[4], content[5], content[6], content[7]]) as usize;

    let mut data = content[HEADER_LEN..].to_vec();
    if size > data.len() {
        return Err(DecodeError::Truncated {
            declared: size,
            available: data.len(),
        });
    }

    // Single repeating key byte, not a rotating keystream
    let key = ((seed ^ SEED_MASK) & 0xFF) as u8;
    for byte in &mut data[..size] {
        *byte ^= key;
    }

    let inflated = inflate(&data)?;
    let script = inflated.get(SCRIPT_OFFSET..).unwrap_or_default();
    Ok(clean_script(String::from_utf8(script.to_vec())?))
}

/// Inflate the payload, autodetecting the zlib wrapper.
///
/// Producers historically emitted zlib-wrapped streams (0x78 lead byte);
/// raw DEFLATE is handled as the fallback.
fn inflate(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    if data[0] == 0x78 {
        ZlibDecoder::new(data).read_to_end(&mut out)?;
    } else {
        DeflateDecoder::new(data).read_to_end(&mut out)?;
    }
    Ok(out)
}

/// Strip non-printable characters (newlines, carriage returns, and tabs
/// survive) and drop leading blank lines.
fn clean_script(text: String) -> String {
    let cleaned: String = text
        .chars()
        .filter(|&c| c.is_ascii_graphic() || matches!(c, ' ' | '\t' | '\n' | '\r'))
        .collect();
    cleaned.trim_start_matches(['\n', '\r']).to_string()
}
