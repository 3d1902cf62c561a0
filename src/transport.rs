use std::{
	io,
	io::{Read, Write},
	time::{Duration, Instant},
};

use serialport::{ClearBuffer, SerialPort, SerialPortType};
use tlc5955_panel_shared::DEFAULT_BAUD_RATE;
use tracing::{debug, info};

use crate::{Error, Result};

/// A duplex byte stream to the panel.
pub trait Transport {
	fn write_all(&mut self, bytes: &[u8]) -> Result<()>;

	/// Reads up to and including `delimiter`, failing with [`Error::Timeout`] if it does not show up
	/// within `timeout`.
	fn read_until(&mut self, delimiter: u8, timeout: Duration) -> Result<Vec<u8>>;

	/// Drops any received but unread bytes.
	fn discard_input(&mut self) -> Result<()>;

	/// Releases the link, closing twice is not an error.
	fn close(&mut self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SerialOptions {
	pub baud_rate: u32,
	/// Applies to writes, reads take their budget per call.
	pub timeout:   Duration,
}

impl Default for SerialOptions {
	fn default() -> Self {
		Self {
			baud_rate: DEFAULT_BAUD_RATE,
			timeout:   Duration::from_secs(1),
		}
	}
}

pub struct SerialTransport {
	name:    String,
	port:    Option<Box<dyn SerialPort>>,
	timeout: Duration,

	buffer: LineBuffer,
}

impl SerialTransport {
	pub fn open(identifier: &str, options: &SerialOptions) -> Result<Self> {
		let builder = serialport::new(identifier, options.baud_rate).timeout(options.timeout);
		let port = builder.open().map_err(|e| match e.kind() {
			serialport::ErrorKind::NoDevice
			| serialport::ErrorKind::Io(io::ErrorKind::NotFound) => {
				Error::DeviceNotFound(identifier.to_string())
			}
			_ => Error::Serial(e),
		})?;

		info!("opened serial device \"{}\"", identifier);

		Ok(Self {
			name:    identifier.to_string(),
			port:    Some(port),
			timeout: options.timeout,

			buffer: LineBuffer::default(),
		})
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
		self.port.as_mut().ok_or_else(|| {
			Error::Io(io::Error::new(io::ErrorKind::NotConnected, "serial port is closed"))
		})
	}
}

impl Transport for SerialTransport {
	fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
		let timeout = self.timeout;
		let port = self.port()?;
		port.set_timeout(timeout)?;

		match port.write_all(bytes).and_then(|_| port.flush()) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == io::ErrorKind::TimedOut => Err(Error::Timeout(timeout)),
			Err(e) => Err(e.into()),
		}
	}

	fn read_until(&mut self, delimiter: u8, timeout: Duration) -> Result<Vec<u8>> {
		let port = self.port.as_mut().ok_or_else(|| {
			Error::Io(io::Error::new(io::ErrorKind::NotConnected, "serial port is closed"))
		})?;
		self.buffer.read_until(port, delimiter, timeout)
	}

	fn discard_input(&mut self) -> Result<()> {
		let stale = self.buffer.clear();
		if stale > 0 {
			debug!("discarding {} stale bytes", stale);
		}

		self.port()?.clear(ClearBuffer::Input)?;
		Ok(())
	}

	fn close(&mut self) -> Result<()> {
		if self.port.take().is_some() {
			info!("closed serial device \"{}\"", self.name);
		}
		self.buffer.clear();

		Ok(())
	}
}

/// A byte source whose blocking reads give up after a settable timeout.
trait TimedRead: Read {
	fn set_read_timeout(&mut self, timeout: Duration) -> Result<()>;
}

impl TimedRead for Box<dyn SerialPort> {
	fn set_read_timeout(&mut self, timeout: Duration) -> Result<()> {
		self.set_timeout(timeout)?;
		Ok(())
	}
}

/// Splits a byte stream into delimited chunks, keeping whatever follows a delimiter for the next
/// call.
#[derive(Debug, Default)]
struct LineBuffer {
	pending: Vec<u8>,
}

impl LineBuffer {
	fn read_until<R: TimedRead>(
		&mut self,
		source: &mut R,
		delimiter: u8,
		timeout: Duration,
	) -> Result<Vec<u8>> {
		let deadline = Instant::now() + timeout;
		let mut buffer = [0u8; 64];

		loop {
			if let Some(end) = self.pending.iter().position(|&byte| byte == delimiter) {
				return Ok(self.pending.drain(..=end).collect());
			}

			let remaining = deadline.saturating_duration_since(Instant::now());
			if remaining.is_zero() {
				return Err(Error::Timeout(timeout));
			}
			source.set_read_timeout(remaining)?;

			match source.read(&mut buffer) {
				Ok(0) => return Err(Error::Io(io::ErrorKind::UnexpectedEof.into())),
				Ok(n) => self.pending.extend_from_slice(&buffer[..n]),
				Err(e)
					if e.kind() == io::ErrorKind::TimedOut
						|| e.kind() == io::ErrorKind::Interrupted => {}
				Err(e) => return Err(e.into()),
			}
		}
	}

	/// Drops the buffered bytes, returning how many there were.
	fn clear(&mut self) -> usize {
		let stale = self.pending.len();
		self.pending.clear();
		stale
	}
}

/// Finds the first USB serial device with the given ids.
///
/// If more than one device is connected the returned device will be the first the OS lists.
pub fn find_device(vendor_id: u16, product_id: u16) -> Result<Option<String>> {
	let ports = serialport::available_ports()?;

	for p in ports {
		if let SerialPortType::UsbPort(usb) = p.port_type {
			if usb.vid == vendor_id && usb.pid == product_id {
				info!("found {:04X}:{:04X} on {}", vendor_id, product_id, p.port_name);
				return Ok(Some(p.port_name));
			}
		}
	}

	debug!("no {:04X}:{:04X} device connected", vendor_id, product_id);
	Ok(None)
}
