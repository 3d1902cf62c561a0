//! Line based command / response protocol spoken by the panel controller.
//!
//! Every command is one ASCII line, optionally carrying a binary block after a space. Only one
//! command may be in flight, the [`Session`] state machine enforces that and is shared between the
//! blocking [`ProtocolClient`] and the async client behind the `tokio` feature.
//!
//! Nothing is ever retried: commands change hardware state and resending one after a timeout could
//! apply it twice.

use std::{
	fmt,
	time::{Duration, Instant},
};

use tlc5955_panel_shared::{
	BRIGHTNESS_COMMAND,
	DEVICE_ERROR_PREFIX,
	DISPLAY_COMMAND,
	DOT_CORRECT_COMMAND,
	ECHO_COMMAND,
	ERROR_QUERY,
	GROUPS,
	LINE_TERMINATOR,
	MAX_CURRENT_COMMAND,
	MODE_COMMAND,
	PWM_COMMAND,
	SAVE_COMMAND,
	SERIAL_QUERY,
	SPIF_COMMAND,
};
use tracing::{debug, info, warn};

use crate::{
	block::{split_block, wrap_block},
	transport::Transport,
	Error,
	Result,
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
	text:         String,
	block:        Option<Vec<u8>>,
	acknowledged: bool,
}

impl Command {
	pub fn new(text: impl Into<String>) -> Self {
		Self {
			text:         text.into(),
			block:        None,
			acknowledged: false,
		}
	}

	/// A command followed by `payload` wrapped into a binary block.
	pub fn with_block(text: impl Into<String>, payload: Vec<u8>) -> Self {
		Self {
			text:         text.into(),
			block:        Some(payload),
			acknowledged: false,
		}
	}

	/// Marks the command as one the controller answers with a reply line.
	pub fn acknowledged(mut self) -> Self {
		self.acknowledged = true;
		self
	}

	pub fn echo(on: bool) -> Self {
		Self::new(format!("{ECHO_COMMAND} {}", on_off(on))).acknowledged()
	}

	/// Shift clock frequency of the driver chain in Hz.
	pub fn spif(hz: u32) -> Self {
		Self::new(format!("{SPIF_COMMAND} {hz}")).acknowledged()
	}

	pub fn mode(code: u8) -> Self {
		Self::new(format!("{MODE_COMMAND} {code}"))
	}

	pub fn max_current(codes: [u8; GROUPS]) -> Self {
		Self::new(format!("{MAX_CURRENT_COMMAND} {}", join(&codes)))
	}

	pub fn brightness(codes: [u8; GROUPS]) -> Self {
		Self::new(format!("{BRIGHTNESS_COMMAND} {}", join(&codes)))
	}

	pub fn dot_correct(payload: Vec<u8>) -> Self {
		Self::with_block(DOT_CORRECT_COMMAND, payload)
	}

	pub fn pwm(payload: Vec<u8>) -> Self {
		Self::with_block(PWM_COMMAND, payload)
	}

	/// Persists the current settings to the controller's non-volatile memory.
	pub fn save() -> Self {
		Self::new(SAVE_COMMAND)
	}

	pub fn display(on: bool) -> Self {
		Self::new(format!("{DISPLAY_COMMAND} {}", on_off(on)))
	}

	pub fn error_query() -> Self {
		Self::new(ERROR_QUERY).acknowledged()
	}

	pub fn serial_query() -> Self {
		Self::new(SERIAL_QUERY).acknowledged()
	}

	pub fn text(&self) -> &str {
		&self.text
	}

	pub fn expects_reply(&self) -> bool {
		self.acknowledged
	}

	pub fn payload(&self) -> Option<&[u8]> {
		self.block.as_deref()
	}

	/// The bytes put on the wire, including the line terminator.
	pub fn to_bytes(&self) -> Result<Vec<u8>> {
		let mut bytes = self.text.as_bytes().to_vec();
		if let Some(payload) = &self.block {
			bytes.push(b' ');
			bytes.extend_from_slice(&wrap_block(payload)?);
		}
		bytes.push(LINE_TERMINATOR);
		Ok(bytes)
	}
}

impl fmt::Display for Command {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.block {
			Some(payload) => write!(f, "{} <{} byte block>", self.text, payload.len()),
			None => f.write_str(&self.text),
		}
	}
}

fn on_off(on: bool) -> &'static str {
	if on {
		"on"
	} else {
		"off"
	}
}

fn join(codes: &[u8]) -> String {
	codes.iter().map(u8::to_string).collect::<Vec<_>>().join(",")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
	Disconnected,
	Connecting,
	Ready,
	Sending,
	AwaitingResponse,
}

/// Whether the controller repeats every line it receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Echo {
	/// Still connecting, a line repeating the command is skipped and remembered.
	Unknown,
	/// Every command is followed by its echo, which is consumed before any reply.
	On,
	Off,
}

/// An entry of the controller's error queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
	pub code:    i32,
	pub message: String,
}

#[derive(Debug)]
pub struct Session {
	state:        State,
	// state to return to once the in-flight command finished
	resume:       State,
	echo:         Echo,
	echo_seen:    bool,
	unanswered:   bool,
	last_command: Option<String>,
	last_error:   Option<ErrorRecord>,
}

impl Default for Session {
	fn default() -> Self {
		Self::new()
	}
}

impl Session {
	pub fn new() -> Self {
		Self {
			state:        State::Disconnected,
			resume:       State::Disconnected,
			echo:         Echo::Unknown,
			echo_seen:    false,
			unanswered:   false,
			last_command: None,
			last_error:   None,
		}
	}

	pub fn state(&self) -> State {
		self.state
	}

	pub fn echo(&self) -> Echo {
		self.echo
	}

	/// `true` once connected to a controller that does not echo commands.
	pub fn echo_suppressed(&self) -> bool {
		self.echo == Echo::Off
	}

	pub fn last_command(&self) -> Option<&str> {
		self.last_command.as_deref()
	}

	pub fn last_error(&self) -> Option<&ErrorRecord> {
		self.last_error.as_ref()
	}

	pub fn begin_connect(&mut self) -> Result<()> {
		self.expect(&[State::Disconnected], "connect")?;
		self.state = State::Connecting;
		Ok(())
	}

	/// Finishes connecting, echo stays on only if it was seen and could not be disabled.
	pub fn connected(&mut self, echo_disabled: bool) -> Result<()> {
		self.expect(&[State::Connecting], "finish connecting")?;
		self.echo = if echo_disabled || !self.echo_seen {
			Echo::Off
		} else {
			Echo::On
		};
		self.state = State::Ready;
		Ok(())
	}

	/// Records that the controller repeated a command while echo was unknown.
	pub fn observe_echo(&mut self) {
		self.echo_seen = true;
	}

	/// Commands may be issued once ready, or while connecting for the setup steps.
	pub fn begin_command(&mut self, command: &Command) -> Result<()> {
		self.expect(&[State::Ready, State::Connecting], "send a command")?;
		self.resume = self.state;
		self.state = State::Sending;
		self.last_command = Some(command.to_string());
		Ok(())
	}

	pub fn sent(&mut self) -> Result<()> {
		self.expect(&[State::Sending], "await a response")?;
		self.state = State::AwaitingResponse;
		Ok(())
	}

	/// Ends the in-flight command, whatever its outcome was.
	pub fn finish(&mut self) {
		if matches!(self.state, State::Sending | State::AwaitingResponse) {
			self.state = self.resume;
		}
	}

	/// Notes that the controller may still answer a command that was given up on.
	pub fn abandon_reply(&mut self) {
		self.unanswered = true;
	}

	/// Whether a late answer has to be drained before the next command, clearing the flag.
	pub fn take_unanswered(&mut self) -> bool {
		std::mem::take(&mut self.unanswered)
	}

	pub fn record_error(&mut self, record: Option<ErrorRecord>) {
		self.last_error = record;
	}

	pub fn disconnect(&mut self) {
		self.state = State::Disconnected;
		self.resume = State::Disconnected;
		self.echo = Echo::Unknown;
		self.echo_seen = false;
		self.unanswered = false;
	}

	fn expect(&self, allowed: &[State], action: &str) -> Result<()> {
		if allowed.contains(&self.state) {
			Ok(())
		} else {
			Err(Error::ProtocolViolation(format!(
				"cannot {action} while {:?}{}",
				self.state,
				self.last_command
					.as_deref()
					.map(|command| format!(" (last command \"{command}\")"))
					.unwrap_or_default()
			)))
		}
	}
}

/// Turns a reply line into text, reporting lines starting with `ERROR` as device errors.
pub(crate) fn parse_response(command: &Command, line: &[u8]) -> Result<String> {
	let text = String::from_utf8_lossy(line);
	let text = text.trim_end_matches(['\r', '\n']).trim();

	let is_error = text
		.get(..DEVICE_ERROR_PREFIX.len())
		.is_some_and(|prefix| prefix.eq_ignore_ascii_case(DEVICE_ERROR_PREFIX));
	if is_error {
		let message = text[DEVICE_ERROR_PREFIX.len()..].trim_start_matches([':', ' ']);
		return Err(Error::DeviceError {
			command: command.to_string(),
			message: message.to_string(),
		});
	}

	Ok(text.to_string())
}

/// Parses an error queue reply like `-113,"Undefined header"`, code 0 means no error.
pub(crate) fn parse_error_record(reply: &str) -> Result<Option<ErrorRecord>> {
	let unexpected = || Error::UnexpectedResponse {
		expected: "<code>,\"<message>\"".into(),
		received: reply.to_string(),
	};

	let (code, message) = reply.split_once(',').ok_or_else(unexpected)?;
	let code: i32 = code.trim().parse().map_err(|_| unexpected())?;
	if code == 0 {
		return Ok(None);
	}

	Ok(Some(ErrorRecord {
		code,
		message: message.trim().trim_matches('"').to_string(),
	}))
}

/// Whether `received` holds the whole echo of a command that is `wire_len` bytes long.
///
/// Text commands echo as one line, a block may contain line terminators so its echo spans as many
/// lines as it takes to cover the command.
pub(crate) fn echo_complete(command: &Command, received: &[u8], wire_len: usize) -> bool {
	command.payload().is_none() || received.len() >= wire_len
}

/// Checks that `received` repeats `command` verbatim, up to the line terminator.
pub(crate) fn check_echo(command: &Command, received: &[u8]) -> Result<()> {
	let unexpected = || Error::UnexpectedResponse {
		expected: format!("echo of \"{command}\""),
		received: String::from_utf8_lossy(received).trim_end().to_string(),
	};

	let rest = received
		.strip_prefix(command.text().as_bytes())
		.ok_or_else(unexpected)?;
	let rest = match command.payload() {
		Some(payload) => {
			let rest = rest.strip_prefix(b" ").ok_or_else(unexpected)?;
			let (echoed, rest) = split_block(rest)?;
			if echoed != payload {
				return Err(unexpected());
			}
			rest
		}
		None => rest,
	};

	if !rest.iter().all(|&byte| byte == b'\r' || byte == LINE_TERMINATOR) {
		return Err(unexpected());
	}

	Ok(())
}

/// Runs a setup step that older firmware may not support.
///
/// Timeouts and device errors are logged and swallowed, anything else still fails.
pub fn best_effort<T>(step: &str, result: Result<T>) -> Result<Option<T>> {
	match result {
		Ok(value) => Ok(Some(value)),
		Err(e @ (Error::Timeout(_) | Error::DeviceError { .. })) => {
			warn!("{} failed, continuing: {}", step, e);
			Ok(None)
		}
		Err(e) => Err(e),
	}
}

/// Blocking protocol client, owns the transport for the whole session.
pub struct ProtocolClient<T: Transport> {
	transport: T,
	session:   Session,
	timeout:   Duration,
}

impl<T: Transport> ProtocolClient<T> {
	/// Takes over an opened transport and tries to turn off command echo.
	pub fn connect(transport: T) -> Result<Self> {
		let mut client = Self {
			transport,
			session: Session::new(),
			timeout: DEFAULT_TIMEOUT,
		};

		client.session.begin_connect()?;
		let echo_off = client.command(&Command::echo(false), true, DEFAULT_TIMEOUT);
		let echo_disabled = best_effort("disabling command echo", echo_off)?.is_some();
		client.session.connected(echo_disabled)?;

		info!("connected, echo: {:?}", client.session.echo());

		Ok(client)
	}

	/// Timeout used by [`Self::query`] and [`Self::query_error`].
	pub fn set_timeout(&mut self, timeout: Duration) {
		self.timeout = timeout;
	}

	pub fn timeout(&self) -> Duration {
		self.timeout
	}

	pub fn state(&self) -> State {
		self.session.state()
	}

	pub fn session(&self) -> &Session {
		&self.session
	}

	pub fn transport(&self) -> &T {
		&self.transport
	}

	/// Sends `command` and, if `expect_response` is set, waits up to `timeout` for the reply line.
	///
	/// The session is ready for the next command afterwards, also when this fails.
	pub fn command(
		&mut self,
		command: &Command,
		expect_response: bool,
		timeout: Duration,
	) -> Result<Option<String>> {
		self.session.begin_command(command)?;
		let result = self.exchange(command, expect_response, timeout);
		if matches!(result, Err(Error::Timeout(_))) {
			self.session.abandon_reply();
		}
		self.session.finish();

		if let Err(e) = &result {
			debug!("\"{}\" failed: {}", command, e);
		}
		result
	}

	/// Sends a command, waiting for a reply only if it is [acknowledged](Command::acknowledged).
	pub fn execute(&mut self, command: &Command) -> Result<Option<String>> {
		self.command(command, command.expects_reply(), self.timeout)
	}

	/// Sends a command without waiting for a reply.
	pub fn send(&mut self, command: &Command) -> Result<()> {
		self.command(command, false, self.timeout).map(|_| ())
	}

	/// Sends a command and returns its reply.
	pub fn query(&mut self, command: &Command) -> Result<String> {
		self.command(command, true, self.timeout)?
			.ok_or_else(|| Error::UnexpectedResponse {
				expected: format!("a reply to \"{command}\""),
				received: String::new(),
			})
	}

	/// Pops the controller's last internal error, `None` if there is none.
	pub fn query_error(&mut self) -> Result<Option<ErrorRecord>> {
		let reply = self.query(&Command::error_query())?;
		let record = parse_error_record(&reply)?;
		self.session.record_error(record.clone());

		Ok(record)
	}

	pub fn query_serial(&mut self) -> Result<String> {
		self.query(&Command::serial_query())
	}

	/// Closes the session and the transport, calling it again does nothing.
	pub fn disconnect(&mut self) -> Result<()> {
		if self.session.state() == State::Disconnected {
			return Ok(());
		}

		self.session.disconnect();
		self.transport.close()?;
		info!("disconnected");

		Ok(())
	}

	fn exchange(
		&mut self,
		command: &Command,
		expect_response: bool,
		timeout: Duration,
	) -> Result<Option<String>> {
		self.discard_input(timeout)?;

		let start = Instant::now();
		let deadline = start + timeout;

		let bytes = command.to_bytes()?;
		debug!("sending \"{}\" ({} bytes)", command, bytes.len());
		self.transport.write_all(&bytes)?;
		self.session.sent()?;

		if self.session.echo() == Echo::On {
			self.consume_echo(command, bytes.len(), deadline, timeout)?;
		}

		if !expect_response {
			return Ok(None);
		}

		loop {
			let line = self.read_line(deadline, timeout)?;
			let response = parse_response(command, &line)?;

			if self.session.echo() == Echo::Unknown && response == command.text() {
				warn!("discarding echo of \"{}\"", command);
				self.session.observe_echo();
				continue;
			}

			debug!("\"{}\" answered {:?} after {:?}", command, response, start.elapsed());
			return Ok(Some(response));
		}
	}

	/// Drops stale input, first waiting up to `timeout` for the late answer to an abandoned command.
	fn discard_input(&mut self, timeout: Duration) -> Result<()> {
		if self.session.take_unanswered() {
			match self.transport.read_until(LINE_TERMINATOR, timeout) {
				Ok(line) => {
					let line = String::from_utf8_lossy(&line);
					warn!("discarding late reply {:?}", line.trim_end());
				}
				Err(Error::Timeout(_)) => {}
				Err(e) => return Err(e),
			}
		}

		self.transport.discard_input()
	}

	fn consume_echo(
		&mut self,
		command: &Command,
		wire_len: usize,
		deadline: Instant,
		timeout: Duration,
	) -> Result<()> {
		let mut received = Vec::with_capacity(wire_len + 1);

		loop {
			let line = self.read_line(deadline, timeout)?;
			if received.is_empty() {
				// a rejected command may be answered instead of echoed
				parse_response(command, &line)?;
			}
			received.extend_from_slice(&line);

			if echo_complete(command, &received, wire_len) {
				return check_echo(command, &received);
			}
		}
	}

	fn read_line(&mut self, deadline: Instant, timeout: Duration) -> Result<Vec<u8>> {
		let remaining = deadline.saturating_duration_since(Instant::now());
		if remaining.is_zero() {
			return Err(Error::Timeout(timeout));
		}

		self.transport
			.read_until(LINE_TERMINATOR, remaining)
			.map_err(|e| match e {
				Error::Timeout(_) => Error::Timeout(timeout),
				e => e,
			})
	}
}

impl<T: Transport> Drop for ProtocolClient<T> {
	fn drop(&mut self) {
		if let Err(e) = self.disconnect() {
			warn!("failed to close transport: {}", e);
		}
	}
}

#[cfg(test)]
mod tests {
	use std::io;

	use super::*;
	use crate::test_utils::MockTransport;

	const TIMEOUT: Duration = Duration::from_millis(50);

	fn connect(transport: MockTransport) -> ProtocolClient<MockTransport> {
		ProtocolClient::connect(transport).unwrap()
	}

	#[test]
	fn commands_render_to_wire_format() {
		assert_eq!(Command::echo(false).to_bytes().unwrap(), b"syst:comm:echo off\n");
		assert_eq!(Command::spif(3_000_000).to_bytes().unwrap(), b"disp:spif 3000000\n");
		assert_eq!(Command::mode(9).to_bytes().unwrap(), b"disp:mode 9\n");
		assert_eq!(Command::max_current([1, 1, 0, 1]).to_bytes().unwrap(), b"disp:maxc 1,1,0,1\n");
		assert_eq!(Command::brightness([45, 68, 56, 56]).to_bytes().unwrap(), b"disp:bri 45,68,56,56\n");
		assert_eq!(Command::display(true).to_bytes().unwrap(), b"disp on\n");
		assert_eq!(Command::save().to_bytes().unwrap(), b"disp:save\n");
		assert_eq!(
			Command::pwm(vec![b'\n', 0]).to_bytes().unwrap(),
			b"disp:pwm:all #12\n\0\n"
		);
		assert_eq!(Command::dot_correct(vec![1, 2, 3]).to_string(), "disp:dotc:all <3 byte block>");
	}

	#[test]
	fn connect_disables_echo() {
		let client = connect(MockTransport::connected());

		assert_eq!(client.state(), State::Ready);
		assert!(client.session().echo_suppressed());
		assert_eq!(client.transport().commands(), ["syst:comm:echo off"]);
	}

	#[test]
	fn connect_survives_old_firmware() {
		// silent firmware, nothing to filter
		let client = ProtocolClient::connect(MockTransport::new().timeout()).unwrap();
		assert_eq!(client.state(), State::Ready);
		assert_eq!(client.session().echo(), Echo::Off);

		let client = ProtocolClient::connect(
			MockTransport::new()
				.reply("syst:comm:echo off")
				.reply("ERROR: undefined header"),
		)
		.unwrap();
		assert_eq!(client.state(), State::Ready);
		assert_eq!(client.session().echo(), Echo::On);
	}

	#[test]
	fn connect_fails_on_broken_link() {
		let result = ProtocolClient::connect(MockTransport::new().fail_write(0));
		assert!(matches!(result, Err(Error::Io(_))));
	}

	#[test]
	fn command_returns_reply() {
		let mut client = connect(MockTransport::connected().reply("3000000\r"));

		let reply = client.command(&Command::spif(3_000_000), true, TIMEOUT).unwrap();
		assert_eq!(reply.as_deref(), Some("3000000"));
		assert_eq!(client.session().last_command(), Some("disp:spif 3000000"));
	}

	#[test]
	fn command_without_response_does_not_read() {
		let mut client = connect(MockTransport::connected().reply("unrelated"));

		assert_eq!(client.command(&Command::display(true), false, TIMEOUT).unwrap(), None);
		assert_eq!(client.transport().unread(), 1);
	}

	#[test]
	fn timeout_returns_to_ready() {
		let mut client = connect(MockTransport::connected().timeout().timeout().reply("OK"));

		let result = client.command(&Command::display(false), true, TIMEOUT);
		assert!(matches!(result, Err(Error::Timeout(t)) if t == TIMEOUT));
		assert_eq!(client.state(), State::Ready);

		let reply = client.command(&Command::display(true), true, TIMEOUT).unwrap();
		assert_eq!(reply.as_deref(), Some("OK"));
	}

	#[test]
	fn device_errors_are_surfaced() {
		let mut client = connect(MockTransport::connected().reply("error: value out of range"));

		let err = client.command(&Command::mode(99), true, TIMEOUT).unwrap_err();
		match err {
			Error::DeviceError { command, message } => {
				assert_eq!(command, "disp:mode 99");
				assert_eq!(message, "value out of range");
			}
			other => panic!("unexpected error {other:?}"),
		}
		assert_eq!(client.state(), State::Ready);
	}

	#[test]
	fn transport_errors_propagate() {
		let mut client = connect(MockTransport::connected().fail_read(io::ErrorKind::BrokenPipe));

		let result = client.command(&Command::save(), true, TIMEOUT);
		assert!(matches!(result, Err(Error::Io(e)) if e.kind() == io::ErrorKind::BrokenPipe));
		assert_eq!(client.state(), State::Ready);
	}

	#[test]
	fn late_reply_is_not_taken_for_the_next_one() {
		let mut client = connect(
			MockTransport::connected()
				.timeout()
				.reply("LATE")
				.reply("0,\"No error\""),
		);

		let result = client.command(&Command::display(false), true, TIMEOUT);
		assert!(matches!(result, Err(Error::Timeout(_))));

		assert_eq!(client.query_error().unwrap(), None);
		assert_eq!(client.transport().unread(), 0);
	}

	fn echoing(transport: MockTransport) -> ProtocolClient<MockTransport> {
		let client = ProtocolClient::connect(
			MockTransport::new()
				.reply("syst:comm:echo off")
				.reply("ERROR: undefined header")
				.append(transport),
		)
		.unwrap();
		assert_eq!(client.session().echo(), Echo::On);
		client
	}

	#[test]
	fn echoes_are_consumed_after_every_command() {
		let payload = vec![b'\n', 7, b'\n', b'\n', 1];
		let mut client = echoing(
			MockTransport::new()
				.echo(&Command::mode(9))
				.echo(&Command::dot_correct(payload.clone()))
				.echo(&Command::spif(1000))
				.reply("1000")
				.echo(&Command::error_query())
				.reply("0,\"No error\""),
		);

		assert_eq!(client.execute(&Command::mode(9)).unwrap(), None);
		assert_eq!(client.execute(&Command::dot_correct(payload)).unwrap(), None);
		assert_eq!(client.execute(&Command::spif(1000)).unwrap().as_deref(), Some("1000"));
		assert_eq!(client.query_error().unwrap(), None);
		assert_eq!(client.transport().unread(), 0);
	}

	#[test]
	fn missing_echo_is_unexpected() {
		let mut client = echoing(MockTransport::new().reply("OK"));

		let result = client.execute(&Command::mode(9));
		assert!(matches!(result, Err(Error::UnexpectedResponse { received, .. }) if received == "OK"));
		assert_eq!(client.state(), State::Ready);
	}

	#[test]
	fn echo_checks_the_whole_block() {
		let mut echoed = Command::dot_correct(vec![1, 2, 3]).to_bytes().unwrap();
		assert!(check_echo(&Command::dot_correct(vec![1, 2, 3]), &echoed).is_ok());

		let idx = echoed.len() - 2;
		echoed[idx] = 4;
		assert!(matches!(
			check_echo(&Command::dot_correct(vec![1, 2, 3]), &echoed),
			Err(Error::UnexpectedResponse { .. })
		));
		assert!(check_echo(&Command::mode(9), b"disp:mode 9\r\n").is_ok());
		assert!(check_echo(&Command::mode(9), b"disp:mode 99\n").is_err());
	}

	#[test]
	fn error_queue_is_parsed() {
		let mut client = connect(
			MockTransport::connected()
				.reply("-113,\"Undefined header\"")
				.reply("0,\"No error\"")
				.reply("garbage"),
		);

		let record = client.query_error().unwrap();
		assert_eq!(
			record,
			Some(ErrorRecord {
				code:    -113,
				message: "Undefined header".into(),
			})
		);
		assert_eq!(client.session().last_error(), record.as_ref());

		assert_eq!(client.query_error().unwrap(), None);
		assert!(matches!(client.query_error(), Err(Error::UnexpectedResponse { .. })));
	}

	#[test]
	fn disconnect_is_idempotent() {
		let mut client = connect(MockTransport::connected());

		client.disconnect().unwrap();
		client.disconnect().unwrap();
		assert_eq!(client.state(), State::Disconnected);
		assert_eq!(client.transport().closed(), 1);

		let result = client.command(&Command::display(true), false, TIMEOUT);
		assert!(matches!(result, Err(Error::ProtocolViolation(_))));
	}

	#[test]
	fn session_allows_one_command_at_a_time() {
		let mut session = Session::new();
		let command = Command::display(true);

		assert!(matches!(session.begin_command(&command), Err(Error::ProtocolViolation(_))));

		session.begin_connect().unwrap();
		session.connected(true).unwrap();
		session.begin_command(&command).unwrap();
		session.sent().unwrap();
		assert_eq!(session.state(), State::AwaitingResponse);

		let err = session.begin_command(&Command::display(false)).unwrap_err();
		assert!(matches!(err, Error::ProtocolViolation(msg) if msg.contains("disp on")));

		session.finish();
		assert_eq!(session.state(), State::Ready);
	}

	#[test]
	fn setup_commands_return_to_connecting() {
		let mut session = Session::new();
		assert!(matches!(session.connected(true), Err(Error::ProtocolViolation(_))));

		session.begin_connect().unwrap();
		session.begin_command(&Command::echo(false)).unwrap();
		session.sent().unwrap();
		session.finish();
		assert_eq!(session.state(), State::Connecting);

		session.connected(true).unwrap();
		assert_eq!(session.state(), State::Ready);
		assert!(matches!(session.connected(true), Err(Error::ProtocolViolation(_))));
	}

	#[test]
	fn best_effort_only_swallows_expected_failures() {
		assert_eq!(best_effort("step", Ok(1)).unwrap(), Some(1));
		assert_eq!(
			best_effort::<()>("step", Err(Error::Timeout(TIMEOUT))).unwrap(),
			None
		);
		assert!(best_effort::<()>("step", Err(Error::MalformedBlock("x".into()))).is_err());
	}
}
