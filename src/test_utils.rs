use std::{collections::VecDeque, io, time::Duration};

use crate::{protocol::Command, transport::Transport, Error, Result};

enum Reply {
	Line(Vec<u8>),
	Timeout,
	Fail(io::ErrorKind),
}

/// Scripted transport, replies are handed out in order regardless of what was written.
#[derive(Default)]
pub struct MockTransport {
	written:     Vec<Vec<u8>>,
	replies:     VecDeque<Reply>,
	fail_writes: Vec<usize>,
	closed:      usize,
}

impl MockTransport {
	pub fn new() -> Self {
		Self::default()
	}

	/// A transport that acknowledges the echo-off step of `ProtocolClient::connect`.
	pub fn connected() -> Self {
		Self::new().reply("OK")
	}

	pub fn reply(mut self, line: &str) -> Self {
		self.replies.push_back(Reply::Line(format!("{line}\n").into_bytes()));
		self
	}

	/// Queues the verbatim repetition of `command`, one reply per line it spans.
	pub fn echo(mut self, command: &Command) -> Self {
		let bytes = command.to_bytes().unwrap();
		for line in bytes.split_inclusive(|&byte| byte == b'\n') {
			self.replies.push_back(Reply::Line(line.to_vec()));
		}
		self
	}

	/// Queues everything scripted on `other` after this transport's replies.
	pub fn append(mut self, other: MockTransport) -> Self {
		self.replies.extend(other.replies);
		self
	}

	pub fn timeout(mut self) -> Self {
		self.replies.push_back(Reply::Timeout);
		self
	}

	pub fn fail_read(mut self, kind: io::ErrorKind) -> Self {
		self.replies.push_back(Reply::Fail(kind));
		self
	}

	/// Makes the `index`-th write (counting from 0) fail.
	pub fn fail_write(mut self, index: usize) -> Self {
		self.fail_writes.push(index);
		self
	}

	pub fn written(&self) -> &[Vec<u8>] {
		&self.written
	}

	/// Written commands without their block and terminator.
	pub fn commands(&self) -> Vec<String> {
		self.written
			.iter()
			.map(|bytes| {
				let text = match bytes.iter().position(|&byte| byte == b'#') {
					Some(start) => &bytes[..start],
					None => &bytes[..],
				};
				String::from_utf8_lossy(text).trim().to_string()
			})
			.collect()
	}

	pub fn unread(&self) -> usize {
		self.replies.len()
	}

	pub fn closed(&self) -> usize {
		self.closed
	}
}

impl Transport for MockTransport {
	fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
		if self.closed > 0 {
			return Err(io::Error::from(io::ErrorKind::NotConnected).into());
		}

		let index = self.written.len();
		self.written.push(bytes.to_vec());
		if self.fail_writes.contains(&index) {
			return Err(io::Error::from(io::ErrorKind::BrokenPipe).into());
		}

		Ok(())
	}

	fn read_until(&mut self, delimiter: u8, timeout: Duration) -> Result<Vec<u8>> {
		match self.replies.pop_front() {
			Some(Reply::Line(line)) => {
				assert_eq!(line.last(), Some(&delimiter));
				Ok(line)
			}
			Some(Reply::Fail(kind)) => Err(io::Error::from(kind).into()),
			Some(Reply::Timeout) | None => Err(Error::Timeout(timeout)),
		}
	}

	fn discard_input(&mut self) -> Result<()> {
		Ok(())
	}

	fn close(&mut self) -> Result<()> {
		self.closed += 1;
		Ok(())
	}
}
