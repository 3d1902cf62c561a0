#![no_std]

/// Pixel rows on the panel.
pub const ROWS: usize = 8;
/// Pixel columns on the panel.
pub const COLUMNS: usize = 12;
/// Color channels per pixel position.
pub const CHANNELS: usize = 5;
pub const CELLS: usize = ROWS * COLUMNS * CHANNELS;

/// Each TLC5955 drives 16 RGB outputs, the chain is fed one chip after the other.
pub const CHANNELS_PER_CHIP: usize = 48;
pub const CHIP_COUNT: usize = CELLS / CHANNELS_PER_CHIP;

/// Independently configurable current / brightness groups.
pub const GROUPS: usize = 4;

pub const DOT_CORRECT_BITS: usize = 7;
pub const PWM_BITS: usize = 16;

pub const LINE_TERMINATOR: u8 = b'\n';
pub const BLOCK_MARKER: u8 = b'#';
/// Prefix of a reply line that reports a failed command.
pub const DEVICE_ERROR_PREFIX: &str = "ERROR";

pub const ECHO_COMMAND: &str = "syst:comm:echo";
pub const SERIAL_QUERY: &str = "syst:serial?";
pub const ERROR_QUERY: &str = "syst:err?";
pub const SPIF_COMMAND: &str = "disp:spif";
pub const MODE_COMMAND: &str = "disp:mode";
pub const MAX_CURRENT_COMMAND: &str = "disp:maxc";
pub const BRIGHTNESS_COMMAND: &str = "disp:bri";
pub const DOT_CORRECT_COMMAND: &str = "disp:dotc:all";
pub const PWM_COMMAND: &str = "disp:pwm:all";
pub const SAVE_COMMAND: &str = "disp:save";
pub const DISPLAY_COMMAND: &str = "disp";

// Teensy USB serial, https://pid.codes/16C0/0483/
pub const DEVICE_VENDOR_ID: u16 = 0x16C0;
pub const DEVICE_PRODUCT_ID: u16 = 0x0483;

/// USB CDC ignores the line rate, any value works.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
