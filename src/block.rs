//! Definite-length binary blocks (`#<n><length><bytes>`).
//!
//! The header tells a line based receiver exactly how many raw bytes follow, so
//! payloads may contain `\n` or any other byte without ending the command early.

use tlc5955_panel_shared::BLOCK_MARKER;

use crate::{Error, Result};

const MAX_LENGTH_DIGITS: usize = 9;

/// Wraps `payload` into a block ready to be appended to a command.
///
/// The length field holds at most 9 digits, larger payloads are rejected.
pub fn wrap_block(payload: &[u8]) -> Result<Vec<u8>> {
	let length = length_field(payload.len())?;

	let mut block = Vec::with_capacity(2 + length.len() + payload.len());
	block.push(BLOCK_MARKER);
	block.push(b'0' + length.len() as u8);
	block.extend_from_slice(length.as_bytes());
	block.extend_from_slice(payload);
	Ok(block)
}

fn length_field(length: usize) -> Result<String> {
	let digits = length.to_string();
	if digits.len() > MAX_LENGTH_DIGITS {
		return Err(Error::InvalidParameter(format!(
			"{length} byte payload does not fit a {MAX_LENGTH_DIGITS} digit length field"
		)));
	}

	Ok(digits)
}

/// Unwraps a buffer holding exactly one block.
pub fn unwrap_block(block: &[u8]) -> Result<Vec<u8>> {
	let (payload, rest) = split_block(block)?;
	if !rest.is_empty() {
		return Err(Error::MalformedBlock(format!(
			"{} bytes after the declared payload",
			rest.len()
		)));
	}

	Ok(payload.to_vec())
}

/// Consumes one block from the start of `bytes`, returning the payload and whatever follows it.
pub fn split_block(bytes: &[u8]) -> Result<(&[u8], &[u8])> {
	let Some((&marker, bytes)) = bytes.split_first() else {
		return Err(Error::MalformedBlock("empty input".into()));
	};
	if marker != BLOCK_MARKER {
		return Err(Error::MalformedBlock(format!("expected '#', found {marker:#04x}")));
	}

	let width = match bytes.first() {
		Some(digit @ b'1'..=b'9') => (digit - b'0') as usize,
		Some(other) => {
			return Err(Error::MalformedBlock(format!("invalid length width {other:#04x}")))
		}
		None => return Err(Error::MalformedBlock("missing length width".into())),
	};
	let bytes = &bytes[1..];

	if bytes.len() < width {
		return Err(Error::MalformedBlock(format!(
			"length field needs {width} digits, only {} available",
			bytes.len()
		)));
	}
	let (digits, bytes) = bytes.split_at(width);
	if !digits.iter().all(u8::is_ascii_digit) {
		return Err(Error::MalformedBlock(format!(
			"non-digit in length field {:?}",
			String::from_utf8_lossy(digits)
		)));
	}
	// at most 9 ascii digits, always fits
	let length: usize = std::str::from_utf8(digits)
		.ok()
		.and_then(|digits| digits.parse().ok())
		.ok_or_else(|| Error::MalformedBlock("unparsable length field".into()))?;

	if bytes.len() < length {
		return Err(Error::MalformedBlock(format!(
			"declared {length} bytes, only {} available",
			bytes.len()
		)));
	}

	Ok(bytes.split_at(length))
}
