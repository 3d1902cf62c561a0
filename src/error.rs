use std::{io, time::Duration};

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
	#[error("invalid parameter: {0}")]
	InvalidParameter(String),
	#[error("{name} = {value} is outside of [{min}, {max}]")]
	OutOfRange {
		name:  &'static str,
		value: f64,
		min:   f64,
		max:   f64,
	},
	#[error("{name} = {value} is not a supported setting")]
	UnsupportedValue { name: &'static str, value: f64 },
	#[error("malformed binary block: {0}")]
	MalformedBlock(String),

	#[error("no device found at \"{0}\"")]
	DeviceNotFound(String),
	#[error(transparent)]
	Io(#[from] io::Error),
	#[error(transparent)]
	Serial(#[from] serialport::Error),
	#[error("no response within {0:?}")]
	Timeout(Duration),

	#[error("device rejected \"{command}\": {message}")]
	DeviceError { command: String, message: String },
	#[error("unexpected response: {received:?} (expected {expected})")]
	UnexpectedResponse { expected: String, received: String },
	#[error("protocol violation: {0}")]
	ProtocolViolation(String),
	#[error("configuration stopped at \"{command}\" after {last_successful} successful commands")]
	PartialConfigurationFailure {
		/// Number of commands that completed before the failing one, these have taken effect.
		last_successful: usize,
		command:         String,
		#[source]
		source:          Box<Error>,
	},

	#[error("configuration file: {0}")]
	Config(String),
}

impl Error {
	/// Link-layer failures, reconnecting may help.
	pub fn is_transient(&self) -> bool {
		matches!(
			self,
			Error::Timeout(_) | Error::Io(_) | Error::Serial(_) | Error::DeviceNotFound(_)
		)
	}
}
