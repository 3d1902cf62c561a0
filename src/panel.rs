use tlc5955_panel_shared::GROUPS;
use tracing::info;

use crate::{
	codec::{encode_dot_correct, encode_group_settings, encode_mode, encode_pwm, PanelImage},
	config::{PanelConfiguration, SPIF_MAX},
	protocol::{Command, ProtocolClient},
	transport::{SerialOptions, SerialTransport, Transport},
	Error,
	Result,
};

/// Register contents derived from a [`PanelConfiguration`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterCodes {
	pub spif:        u32,
	pub mode:        u8,
	pub max_current: [u8; GROUPS],
	pub brightness:  [u8; GROUPS],
	pub dot_correct: Vec<u8>,
}

impl RegisterCodes {
	pub fn from_config(config: &PanelConfiguration) -> Result<Self> {
		if !(1..=SPIF_MAX).contains(&config.spif) {
			return Err(Error::OutOfRange {
				name:  "spif",
				value: config.spif as f64,
				min:   1.0,
				max:   SPIF_MAX as f64,
			});
		}

		let mode = encode_mode(config.mode.iter().map(|(name, &set)| (name.as_str(), set)))?;
		let (max_current, brightness) =
			encode_group_settings(&config.max_current, &config.brightness)?;

		Ok(Self {
			spif: config.spif,
			mode,
			max_current,
			brightness,
			dot_correct: encode_dot_correct(&config.dot_correct),
		})
	}
}

/// The configuration sequence, optionally persisting it on the controller at the end.
pub fn configuration_commands(codes: &RegisterCodes, save: bool) -> Vec<Command> {
	let mut commands = vec![
		Command::spif(codes.spif),
		Command::mode(codes.mode),
		Command::max_current(codes.max_current),
		Command::brightness(codes.brightness),
		Command::dot_correct(codes.dot_correct.clone()),
	];
	if save {
		commands.push(Command::save());
	}
	commands
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ApplyPolicy {
	/// Only failures reported by the command itself count.
	#[default]
	Relaxed,
	/// Every command is followed by an error queue query.
	Strict,
}

/// Issues `commands` in order and stops at the first failure.
///
/// Commands before the failing one have already changed the panel, so a failure is reported as
/// [`Error::PartialConfigurationFailure`] carrying how many of them succeeded.
pub fn apply_sequence<T: Transport>(
	client: &mut ProtocolClient<T>,
	commands: &[Command],
	policy: ApplyPolicy,
) -> Result<()> {
	for (index, command) in commands.iter().enumerate() {
		info!("applying {}/{}: {}", index + 1, commands.len(), command);

		if let Err(e) = apply_one(client, command, policy) {
			return Err(Error::PartialConfigurationFailure {
				last_successful: index,
				command:         command.to_string(),
				source:          Box::new(e),
			});
		}
	}

	Ok(())
}

fn apply_one<T: Transport>(
	client: &mut ProtocolClient<T>,
	command: &Command,
	policy: ApplyPolicy,
) -> Result<()> {
	client.execute(command)?;

	if policy == ApplyPolicy::Strict {
		if let Some(record) = client.query_error()? {
			return Err(Error::DeviceError {
				command: command.to_string(),
				message: format!("{},\"{}\"", record.code, record.message),
			});
		}
	}

	Ok(())
}

/// High level control of one panel.
pub struct Panel<T: Transport> {
	client: ProtocolClient<T>,
	policy: ApplyPolicy,
}

impl Panel<SerialTransport> {
	/// Opens the serial device and connects to the controller behind it.
	pub fn open(identifier: &str, options: &SerialOptions) -> Result<Self> {
		let transport = SerialTransport::open(identifier, options)?;
		Ok(Self::new(ProtocolClient::connect(transport)?))
	}
}

impl<T: Transport> Panel<T> {
	pub fn new(client: ProtocolClient<T>) -> Self {
		Self {
			client,
			policy: ApplyPolicy::default(),
		}
	}

	pub fn with_policy(mut self, policy: ApplyPolicy) -> Self {
		self.policy = policy;
		self
	}

	pub fn client(&mut self) -> &mut ProtocolClient<T> {
		&mut self.client
	}

	/// Fails unless the controller reports `expected` as its serial number.
	pub fn verify_serial(&mut self, expected: &str) -> Result<()> {
		let serial = self.client.query_serial()?;
		if serial != expected {
			return Err(Error::UnexpectedResponse {
				expected: format!("serial number \"{expected}\""),
				received: serial,
			});
		}

		Ok(())
	}

	/// Encodes `config` and sends it to the panel.
	///
	/// Encoding happens up front, an invalid configuration never reaches the panel.
	pub fn configure(&mut self, config: &PanelConfiguration, save: bool) -> Result<()> {
		let codes = RegisterCodes::from_config(config)?;

		if let Some(serial) = &config.serial {
			self.verify_serial(serial)?;
		}

		apply_sequence(&mut self.client, &configuration_commands(&codes, save), self.policy)?;
		info!("panel configured");

		Ok(())
	}

	/// Uploads a full frame of PWM intensities in `[0, 1]`.
	pub fn show(&mut self, image: &PanelImage) -> Result<()> {
		self.client.execute(&Command::pwm(encode_pwm(image))).map(|_| ())
	}

	pub fn display(&mut self, on: bool) -> Result<()> {
		self.client.execute(&Command::display(on)).map(|_| ())
	}

	pub fn disconnect(&mut self) -> Result<()> {
		self.client.disconnect()
	}
}
