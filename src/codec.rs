//! Conversion between lighting parameters and TLC5955 register codes.
//!
//! Scalar settings (mode, max current, brightness) are validated strictly since they set absolute
//! electrical limits. Per-pixel tables are clamped into range instead, with NaN marking a dead pixel
//! that must never be driven.
//!
//! Per-pixel tables are serialized in the order the shift register chain expects: rows outermost,
//! then columns, then channels, i.e. cell `(row * COLUMNS + column) * CHANNELS + channel`. Every
//! [`CHANNELS_PER_CHIP`] cells form one chip segment which is padded to a whole byte. Codes are
//! written MSB first.

use bitflags::bitflags;
use bitvec::prelude::*;
use tlc5955_panel_shared::{
	CHANNELS,
	CHANNELS_PER_CHIP,
	CHIP_COUNT,
	COLUMNS,
	DOT_CORRECT_BITS,
	GROUPS,
	PWM_BITS,
	ROWS,
};

use crate::{Error, Result};

/// Per pixel, per channel values indexed `[row][column][channel]`.
pub type PanelImage = [[[f64; CHANNELS]; COLUMNS]; ROWS];

/// Max current settings in mA, the index is the register code.
pub const MAX_CURRENT_TABLE: [f64; 8] = [3.2, 8.0, 11.2, 15.9, 19.1, 23.9, 27.1, 31.9];
// only absorbs float representation noise, anything else is a different setting
const MAX_CURRENT_TOLERANCE: f64 = 1e-9;

pub const BRIGHTNESS_MIN: f64 = 0.1;
pub const BRIGHTNESS_MAX: f64 = 1.0;
pub const BRIGHTNESS_CODE_MAX: u8 = 127;

/// Dot correction multiplier that maps to the highest code.
pub const DOT_CORRECT_MAX: f64 = 1.71;
pub const DOT_CORRECT_CODE_MAX: u8 = 127;
pub const PWM_CODE_MAX: u16 = u16::MAX;

pub const DOT_CORRECT_PAYLOAD_LEN: usize = CHIP_COUNT * chip_segment_len(DOT_CORRECT_BITS);
pub const PWM_PAYLOAD_LEN: usize = CHIP_COUNT * chip_segment_len(PWM_BITS);

const fn chip_segment_len(bits_per_cell: usize) -> usize {
	(CHANNELS_PER_CHIP * bits_per_cell + 7) / 8
}

bitflags! {
	/// Function control register flags.
	#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
	pub struct ModeFlags: u8 {
		/// Auto display repeat.
		const DSPRPT = 1 << 0;
		/// Display timing reset.
		const TMGRST = 1 << 1;
		/// Auto data refresh.
		const RFRESH = 1 << 2;
		/// Enhanced spectrum PWM.
		const ESPWM = 1 << 3;
		/// LED short detection voltage.
		const LSDVLT = 1 << 4;
	}
}

impl ModeFlags {
	/// Builds the flags from `(name, value)` pairs, names are matched case-insensitively.
	pub fn from_names<'a>(flags: impl IntoIterator<Item = (&'a str, bool)>) -> Result<Self> {
		let mut mode = Self::empty();

		for (name, set) in flags {
			let Some((_, flag)) = Self::all()
				.iter_names()
				.find(|(known, _)| known.eq_ignore_ascii_case(name))
			else {
				let known: Vec<_> = Self::all().iter_names().map(|(known, _)| known).collect();
				return Err(Error::InvalidParameter(format!(
					"unknown mode flag \"{name}\", expected one of {known:?}"
				)));
			};
			mode.set(flag, set);
		}

		Ok(mode)
	}
}

/// Collapses named feature flags into the mode code, unnamed flags stay cleared.
pub fn encode_mode<'a>(flags: impl IntoIterator<Item = (&'a str, bool)>) -> Result<u8> {
	ModeFlags::from_names(flags).map(|mode| mode.bits())
}

pub fn encode_max_current(value: f64) -> Result<u8> {
	MAX_CURRENT_TABLE
		.iter()
		.position(|supported| (supported - value).abs() <= MAX_CURRENT_TOLERANCE)
		.map(|code| code as u8)
		.ok_or(Error::UnsupportedValue {
			name: "max_current",
			value,
		})
}

pub fn decode_max_current(code: u8) -> Result<f64> {
	MAX_CURRENT_TABLE
		.get(code as usize)
		.copied()
		.ok_or_else(|| Error::InvalidParameter(format!("max current code {code} exceeds 7")))
}

pub fn encode_brightness(value: f64) -> Result<u8> {
	if !(BRIGHTNESS_MIN..=BRIGHTNESS_MAX).contains(&value) {
		return Err(Error::OutOfRange {
			name: "brightness",
			value,
			min: BRIGHTNESS_MIN,
			max: BRIGHTNESS_MAX,
		});
	}

	let scaled = (value - BRIGHTNESS_MIN) / (BRIGHTNESS_MAX - BRIGHTNESS_MIN);
	Ok((scaled * BRIGHTNESS_CODE_MAX as f64).round() as u8)
}

pub fn decode_brightness(code: u8) -> Result<f64> {
	if code > BRIGHTNESS_CODE_MAX {
		return Err(Error::InvalidParameter(format!(
			"brightness code {code} exceeds {BRIGHTNESS_CODE_MAX}"
		)));
	}

	let scaled = code as f64 / BRIGHTNESS_CODE_MAX as f64;
	Ok(BRIGHTNESS_MIN + scaled * (BRIGHTNESS_MAX - BRIGHTNESS_MIN))
}

/// Encodes the per-group max current and brightness together.
///
/// A group whose `max_current * brightness` drops below 1 would run the LEDs under the usable PWM
/// resolution and is rejected.
pub fn encode_group_settings(
	max_current: &[f64; GROUPS],
	brightness: &[f64; GROUPS],
) -> Result<([u8; GROUPS], [u8; GROUPS])> {
	let mut current_codes = [0; GROUPS];
	let mut brightness_codes = [0; GROUPS];

	for group in 0..GROUPS {
		current_codes[group] = encode_max_current(max_current[group])?;
		brightness_codes[group] = encode_brightness(brightness[group])?;

		let product = max_current[group] * brightness[group];
		if product < 1.0 {
			return Err(Error::InvalidParameter(format!(
				"group {group}: max_current * brightness = {product} is below 1"
			)));
		}
	}

	Ok((current_codes, brightness_codes))
}

/// Index of a cell in the serialized tables.
pub const fn cell_index(row: usize, column: usize, channel: usize) -> usize {
	(row * COLUMNS + column) * CHANNELS + channel
}

fn cells(image: &PanelImage) -> impl Iterator<Item = f64> + '_ {
	image.iter().flatten().flatten().copied()
}

fn dot_correct_code(value: f64) -> u16 {
	if value.is_nan() {
		return 0;
	}

	let scaled = value.clamp(0.0, DOT_CORRECT_MAX) / DOT_CORRECT_MAX;
	(scaled * DOT_CORRECT_CODE_MAX as f64).round() as u16
}

fn pwm_code(value: f64) -> u16 {
	if value.is_nan() {
		return 0;
	}

	(value.clamp(0.0, 1.0) * PWM_CODE_MAX as f64).round() as u16
}

/// Packs the dot correction table, dead (NaN) cells encode to 0.
pub fn encode_dot_correct(correction: &PanelImage) -> Vec<u8> {
	pack(correction, DOT_CORRECT_BITS, dot_correct_code)
}

/// Packs a full-panel intensity image in `[0, 1]` into PWM codes.
pub fn encode_pwm(image: &PanelImage) -> Vec<u8> {
	pack(image, PWM_BITS, pwm_code)
}

pub fn decode_dot_correct_codes(payload: &[u8]) -> Result<Vec<u8>> {
	Ok(unpack(payload, DOT_CORRECT_BITS)?
		.into_iter()
		.map(|code| code as u8)
		.collect())
}

pub fn decode_pwm_codes(payload: &[u8]) -> Result<Vec<u16>> {
	unpack(payload, PWM_BITS)
}

fn pack(image: &PanelImage, width: usize, encode: impl Fn(f64) -> u16) -> Vec<u8> {
	let mut bits: BitVec<u8, Msb0> = BitVec::with_capacity(CHIP_COUNT * chip_segment_len(width) * 8);

	for (cell, value) in cells(image).enumerate() {
		let code = encode(value);
		bits.extend_from_bitslice(&code.view_bits::<Msb0>()[u16::BITS as usize - width..]);

		if (cell + 1) % CHANNELS_PER_CHIP == 0 {
			let padded = bits.len().div_ceil(8) * 8;
			bits.resize(padded, false);
		}
	}

	bits.into_vec()
}

fn unpack(payload: &[u8], width: usize) -> Result<Vec<u16>> {
	let expected = CHIP_COUNT * chip_segment_len(width);
	if payload.len() != expected {
		return Err(Error::MalformedBlock(format!(
			"expected {expected} bytes of {width} bit codes, got {}",
			payload.len()
		)));
	}

	Ok(payload
		.chunks(chip_segment_len(width))
		.flat_map(|segment| {
			segment
				.view_bits::<Msb0>()
				.chunks_exact(width)
				.take(CHANNELS_PER_CHIP)
				.map(|code| code.load_be::<u16>())
		})
		.collect())
}
