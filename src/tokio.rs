use std::{
	io,
	time::{Duration, Instant},
};

use tlc5955_panel_shared::LINE_TERMINATOR;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

use crate::{
	codec::{encode_pwm, PanelImage},
	config::PanelConfiguration,
	panel::{configuration_commands, ApplyPolicy, RegisterCodes},
	protocol::{
		best_effort,
		check_echo,
		echo_complete,
		parse_error_record,
		parse_response,
		Command,
		Echo,
		ErrorRecord,
		Session,
		State,
		DEFAULT_TIMEOUT,
	},
	transport::SerialOptions,
	Error,
	Result,
};

/// Opens the serial device for use with [`AsyncProtocolClient`].
pub fn open_serial(identifier: &str, options: &SerialOptions) -> Result<SerialStream> {
	let builder = tokio_serial::new(identifier, options.baud_rate).timeout(options.timeout);
	let port = builder.open_native_async().map_err(|e| match e.kind() {
		tokio_serial::ErrorKind::NoDevice
		| tokio_serial::ErrorKind::Io(io::ErrorKind::NotFound) => {
			Error::DeviceNotFound(identifier.to_string())
		}
		_ => Error::Serial(e),
	})?;

	info!("opened serial device \"{}\"", identifier);

	Ok(port)
}

/// Async counterpart of [`crate::ProtocolClient`] over any byte stream.
///
/// Dropping a command future after it started leaves the session busy, further commands fail with
/// [`Error::ProtocolViolation`] until [`Self::resync`] is called.
pub struct AsyncProtocolClient<S> {
	stream:  S,
	session: Session,
	timeout: Duration,

	pending: Vec<u8>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncProtocolClient<S> {
	/// Takes over the stream and tries to turn off command echo.
	pub async fn connect(stream: S) -> Result<Self> {
		let mut client = Self {
			stream,
			session: Session::new(),
			timeout: DEFAULT_TIMEOUT,

			pending: Vec::new(),
		};

		client.session.begin_connect()?;
		let echo_off = client.command(&Command::echo(false), true, DEFAULT_TIMEOUT).await;
		let echo_disabled = best_effort("disabling command echo", echo_off)?.is_some();
		client.session.connected(echo_disabled)?;

		info!("connected, echo: {:?}", client.session.echo());

		Ok(client)
	}

	pub fn set_timeout(&mut self, timeout: Duration) {
		self.timeout = timeout;
	}

	pub fn state(&self) -> State {
		self.session.state()
	}

	pub fn session(&self) -> &Session {
		&self.session
	}

	pub async fn command(
		&mut self,
		command: &Command,
		expect_response: bool,
		timeout: Duration,
	) -> Result<Option<String>> {
		self.session.begin_command(command)?;
		let result = self.exchange(command, expect_response, timeout).await;
		if matches!(result, Err(Error::Timeout(_))) {
			self.session.abandon_reply();
		}
		self.session.finish();

		if let Err(e) = &result {
			debug!("\"{}\" failed: {}", command, e);
		}
		result
	}

	pub async fn execute(&mut self, command: &Command) -> Result<Option<String>> {
		self.command(command, command.expects_reply(), self.timeout).await
	}

	pub async fn query(&mut self, command: &Command) -> Result<String> {
		self.command(command, true, self.timeout)
			.await?
			.ok_or_else(|| Error::UnexpectedResponse {
				expected: format!("a reply to \"{command}\""),
				received: String::new(),
			})
	}

	pub async fn query_error(&mut self) -> Result<Option<ErrorRecord>> {
		let reply = self.query(&Command::error_query()).await?;
		let record = parse_error_record(&reply)?;
		self.session.record_error(record.clone());

		Ok(record)
	}

	pub async fn query_serial(&mut self) -> Result<String> {
		self.query(&Command::serial_query()).await
	}

	/// Issues `commands` in order, see [`crate::apply_sequence`].
	pub async fn apply_sequence(&mut self, commands: &[Command], policy: ApplyPolicy) -> Result<()> {
		for (index, command) in commands.iter().enumerate() {
			info!("applying {}/{}: {}", index + 1, commands.len(), command);

			if let Err(e) = self.apply_one(command, policy).await {
				return Err(Error::PartialConfigurationFailure {
					last_successful: index,
					command:         command.to_string(),
					source:          Box::new(e),
				});
			}
		}

		Ok(())
	}

	/// Encodes `config` and sends it to the panel, see [`crate::Panel::configure`].
	pub async fn configure(
		&mut self,
		config: &PanelConfiguration,
		save: bool,
		policy: ApplyPolicy,
	) -> Result<()> {
		let codes = RegisterCodes::from_config(config)?;

		if let Some(expected) = &config.serial {
			let serial = self.query_serial().await?;
			if &serial != expected {
				return Err(Error::UnexpectedResponse {
					expected: format!("serial number \"{expected}\""),
					received: serial,
				});
			}
		}

		self.apply_sequence(&configuration_commands(&codes, save), policy)
			.await?;
		info!("panel configured");

		Ok(())
	}

	pub async fn show(&mut self, image: &PanelImage) -> Result<()> {
		self.execute(&Command::pwm(encode_pwm(image))).await.map(|_| ())
	}

	pub async fn display(&mut self, on: bool) -> Result<()> {
		self.execute(&Command::display(on)).await.map(|_| ())
	}

	/// Forgets a command whose future was dropped and makes the session usable again.
	pub fn resync(&mut self) {
		if matches!(self.session.state(), State::Sending | State::AwaitingResponse) {
			warn!("abandoning \"{}\"", self.session.last_command().unwrap_or_default());
			self.session.abandon_reply();
		}
		self.pending.clear();
		self.session.finish();
	}

	pub async fn disconnect(&mut self) -> Result<()> {
		if self.session.state() == State::Disconnected {
			return Ok(());
		}

		self.session.disconnect();
		self.pending.clear();
		self.stream.shutdown().await?;
		info!("disconnected");

		Ok(())
	}

	async fn apply_one(&mut self, command: &Command, policy: ApplyPolicy) -> Result<()> {
		self.execute(command).await?;

		if policy == ApplyPolicy::Strict {
			if let Some(record) = self.query_error().await? {
				return Err(Error::DeviceError {
					command: command.to_string(),
					message: format!("{},\"{}\"", record.code, record.message),
				});
			}
		}

		Ok(())
	}

	async fn exchange(
		&mut self,
		command: &Command,
		expect_response: bool,
		timeout: Duration,
	) -> Result<Option<String>> {
		let settle = if self.session.take_unanswered() {
			timeout
		} else {
			Duration::ZERO
		};
		self.discard_input(settle).await?;

		let bytes = command.to_bytes()?;
		debug!("sending \"{}\" ({} bytes)", command, bytes.len());
		self.stream.write_all(&bytes).await?;
		self.stream.flush().await?;
		self.session.sent()?;

		if self.session.echo() != Echo::On && !expect_response {
			return Ok(None);
		}

		let response = self.read_response(command, bytes.len(), expect_response);
		match tokio::time::timeout(timeout, response).await {
			Ok(response) => response,
			Err(_) => Err(Error::Timeout(timeout)),
		}
	}

	/// Drops everything the stream already holds.
	///
	/// With a non-zero `settle` it first waits that long for the line a late answer would end with.
	async fn discard_input(&mut self, settle: Duration) -> Result<()> {
		let mut discarded = self.pending.len();
		let mut awaiting_line = !settle.is_zero() && !self.pending.contains(&LINE_TERMINATOR);
		self.pending.clear();

		let deadline = Instant::now() + settle;
		let mut buffer = [0u8; 64];

		loop {
			let window = if awaiting_line {
				deadline.saturating_duration_since(Instant::now())
			} else {
				Duration::ZERO
			};

			match tokio::time::timeout(window, self.stream.read(&mut buffer)).await {
				Ok(Ok(0)) => return Err(Error::Io(io::ErrorKind::UnexpectedEof.into())),
				Ok(Ok(n)) => {
					discarded += n;
					if buffer[..n].contains(&LINE_TERMINATOR) {
						awaiting_line = false;
					}
				}
				Ok(Err(e)) => return Err(e.into()),
				Err(_) => break,
			}
		}

		if discarded > 0 {
			warn!("discarded {} stale bytes", discarded);
		}
		Ok(())
	}

	async fn read_response(
		&mut self,
		command: &Command,
		wire_len: usize,
		expect_response: bool,
	) -> Result<Option<String>> {
		if self.session.echo() == Echo::On {
			let mut received = Vec::with_capacity(wire_len + 1);
			loop {
				let line = self.read_line().await?;
				if received.is_empty() {
					// a rejected command may be answered instead of echoed
					parse_response(command, &line)?;
				}
				received.extend_from_slice(&line);

				if echo_complete(command, &received, wire_len) {
					check_echo(command, &received)?;
					break;
				}
			}
		}

		if !expect_response {
			return Ok(None);
		}

		loop {
			let line = self.read_line().await?;
			let response = parse_response(command, &line)?;

			if self.session.echo() == Echo::Unknown && response == command.text() {
				warn!("discarding echo of \"{}\"", command);
				self.session.observe_echo();
				continue;
			}

			debug!("\"{}\" answered {:?}", command, response);
			return Ok(Some(response));
		}
	}

	async fn read_line(&mut self) -> Result<Vec<u8>> {
		let mut buffer = [0u8; 64];

		loop {
			if let Some(end) = self.pending.iter().position(|&byte| byte == LINE_TERMINATOR) {
				return Ok(self.pending.drain(..=end).collect());
			}

			let n = self.stream.read(&mut buffer).await?;
			if n == 0 {
				return Err(Error::Io(io::ErrorKind::UnexpectedEof.into()));
			}
			self.pending.extend_from_slice(&buffer[..n]);
		}
	}
}

#[cfg(test)]
mod tests {
	use tokio::{
		io::{AsyncBufReadExt, BufReader, DuplexStream},
		task::JoinHandle,
	};

	use super::*;

	const TIMEOUT: Duration = Duration::from_millis(50);

	/// Answers each received line with the next scripted reply, `None` stays silent.
	fn device(stream: DuplexStream, replies: Vec<Option<&'static str>>) -> JoinHandle<Vec<String>> {
		tokio::spawn(async move {
			let (read, mut write) = tokio::io::split(stream);
			let mut read = BufReader::new(read);
			let mut received = Vec::new();

			for reply in replies {
				let mut line = Vec::new();
				if read.read_until(b'\n', &mut line).await.unwrap() == 0 {
					break;
				}
				received.push(String::from_utf8_lossy(&line).trim_end().to_string());

				if let Some(reply) = reply {
					write.write_all(format!("{reply}\r\n").as_bytes()).await.unwrap();
				}
			}

			received
		})
	}

	#[tokio::test]
	async fn command_round_trip() {
		let (host, panel) = tokio::io::duplex(4096);
		let device = device(panel, vec![Some("OK"), Some("3000000"), None, Some("0,\"No error\"")]);

		let mut client = AsyncProtocolClient::connect(host).await.unwrap();
		assert!(client.session().echo_suppressed());

		let reply = client.execute(&Command::spif(3_000_000)).await.unwrap();
		assert_eq!(reply.as_deref(), Some("3000000"));
		client.display(true).await.unwrap();
		assert_eq!(client.query_error().await.unwrap(), None);

		client.disconnect().await.unwrap();
		client.disconnect().await.unwrap();
		assert_eq!(
			device.await.unwrap(),
			["syst:comm:echo off", "disp:spif 3000000", "disp on", "syst:err?"]
		);
	}

	#[tokio::test]
	async fn timeout_returns_to_ready() {
		let (host, panel) = tokio::io::duplex(4096);
		let _device = device(panel, vec![Some("OK"), None, Some("OK")]);

		let mut client = AsyncProtocolClient::connect(host).await.unwrap();

		let result = client.command(&Command::display(false), true, TIMEOUT).await;
		assert!(matches!(result, Err(Error::Timeout(t)) if t == TIMEOUT));
		assert_eq!(client.state(), State::Ready);

		let reply = client.command(&Command::display(true), true, TIMEOUT).await.unwrap();
		assert_eq!(reply.as_deref(), Some("OK"));
	}

	#[tokio::test]
	async fn device_error_is_reported() {
		let (host, panel) = tokio::io::duplex(4096);
		let _device = device(panel, vec![Some("OK"), Some("ERROR: bad value")]);

		let mut client = AsyncProtocolClient::connect(host).await.unwrap();
		let result = client.command(&Command::mode(200), true, TIMEOUT).await;

		assert!(matches!(result, Err(Error::DeviceError { ref message, .. }) if message == "bad value"));
		assert_eq!(client.state(), State::Ready);
	}

	#[tokio::test]
	async fn cancelled_command_needs_resync() {
		let (host, panel) = tokio::io::duplex(4096);
		let _device = device(panel, vec![Some("OK"), None, None]);

		let mut client = AsyncProtocolClient::connect(host).await.unwrap();

		let cancelled = tokio::time::timeout(
			Duration::from_millis(20),
			client.command(&Command::display(true), true, Duration::from_secs(10)),
		)
		.await;
		assert!(cancelled.is_err());
		assert_eq!(client.state(), State::AwaitingResponse);

		let result = client.command(&Command::display(false), false, TIMEOUT).await;
		assert!(matches!(result, Err(Error::ProtocolViolation(_))));

		client.resync();
		assert_eq!(client.state(), State::Ready);
		client.command(&Command::display(false), false, TIMEOUT).await.unwrap();
	}

	#[tokio::test]
	async fn partial_configuration_is_reported() {
		let (host, panel) = tokio::io::duplex(8192);
		let _device = device(panel, vec![Some("OK"), Some("ERROR: spif too high")]);

		let mut client = AsyncProtocolClient::connect(host).await.unwrap();
		client.set_timeout(TIMEOUT);

		let err = client
			.configure(&PanelConfiguration::default(), false, ApplyPolicy::Relaxed)
			.await
			.unwrap_err();
		assert!(matches!(
			err,
			Error::PartialConfigurationFailure {
				last_successful: 0,
				..
			}
		));
	}

	#[tokio::test]
	async fn late_reply_is_not_taken_for_the_next_one() {
		let (host, panel) = tokio::io::duplex(4096);
		let _device = tokio::spawn(async move {
			let (read, mut write) = tokio::io::split(panel);
			let mut read = BufReader::new(read);
			let mut line = Vec::new();

			read.read_until(b'\n', &mut line).await.unwrap();
			write.write_all(b"OK\r\n").await.unwrap();

			read.read_until(b'\n', &mut line).await.unwrap();
			tokio::time::sleep(Duration::from_millis(80)).await;
			write.write_all(b"LATE\r\n").await.unwrap();

			read.read_until(b'\n', &mut line).await.unwrap();
			write.write_all(b"0,\"No error\"\r\n").await.unwrap();
		});

		let mut client = AsyncProtocolClient::connect(host).await.unwrap();
		client.set_timeout(Duration::from_millis(500));

		let result = client.command(&Command::display(false), true, TIMEOUT).await;
		assert!(matches!(result, Err(Error::Timeout(_))));

		assert_eq!(client.query_error().await.unwrap(), None);
	}

	#[tokio::test]
	async fn echoes_are_consumed_after_every_command() {
		let (host, panel) = tokio::io::duplex(4096);
		// repeats every line, rejects echo-off and answers error queries
		let _device = tokio::spawn(async move {
			let (read, mut write) = tokio::io::split(panel);
			let mut read = BufReader::new(read);

			loop {
				let mut line = Vec::new();
				if read.read_until(b'\n', &mut line).await.unwrap() == 0 {
					break;
				}
				write.write_all(&line).await.unwrap();

				let reply: &[u8] = match String::from_utf8_lossy(&line).trim_end() {
					"syst:comm:echo off" => b"ERROR: undefined header\r\n",
					"syst:err?" => b"0,\"No error\"\r\n",
					_ => continue,
				};
				write.write_all(reply).await.unwrap();
			}
		});

		let mut client = AsyncProtocolClient::connect(host).await.unwrap();
		client.set_timeout(Duration::from_millis(500));
		assert_eq!(client.session().echo(), Echo::On);

		client.execute(&Command::mode(9)).await.unwrap();
		client
			.execute(&Command::dot_correct(vec![b'\n', 7, b'\n', b'\n', 1]))
			.await
			.unwrap();
		assert_eq!(client.query_error().await.unwrap(), None);

		client.disconnect().await.unwrap();
	}
}
