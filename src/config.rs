use std::{
	collections::BTreeMap,
	fs,
	path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tlc5955_panel_shared::{CHANNELS, COLUMNS, GROUPS, ROWS};
use tracing::info;

use crate::{codec::PanelImage, panel::RegisterCodes, Error, Result};

/// Highest shift clock the driver chain accepts, in Hz.
pub const SPIF_MAX: u32 = 25_000_000;

/// Everything needed to bring the panel into a known state.
///
/// `dot_correct` uses NaN to mark dead pixels, those are never driven.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelConfiguration {
	/// Serial number the controller has to report, not checked when unset.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub serial:      Option<String>,
	/// Shift clock frequency in Hz.
	pub spif:        u32,
	/// Max current per group in mA, one of [`crate::codec::MAX_CURRENT_TABLE`].
	pub max_current: [f64; GROUPS],
	/// Global brightness per group in `[0.1, 1.0]`.
	pub brightness:  [f64; GROUPS],
	pub dot_correct: PanelImage,
	/// Named function control flags, see [`crate::codec::ModeFlags`].
	pub mode:        BTreeMap<String, bool>,
}

impl Default for PanelConfiguration {
	fn default() -> Self {
		Self {
			serial:      None,
			spif:        3_000_000,
			max_current: [8.0, 8.0, 3.2, 8.0],
			brightness:  [0.42, 0.58, 0.5, 0.5],
			dot_correct: [[[1.0; CHANNELS]; COLUMNS]; ROWS],
			mode:        BTreeMap::from([("dsprpt".to_string(), true), ("espwm".to_string(), true)]),
		}
	}
}

impl PanelConfiguration {
	/// Runs the full register encoding so bad settings are caught before talking to the panel.
	pub fn validate(&self) -> Result<()> {
		RegisterCodes::from_config(self).map(|_| ())
	}

	/// Pixels (`row * COLUMNS + column`) with at least one dead channel.
	pub fn dead_pixels(&self) -> Vec<usize> {
		self.dot_correct
			.iter()
			.flatten()
			.enumerate()
			.filter(|(_, channels)| channels.iter().any(|value| value.is_nan()))
			.map(|(pixel, _)| pixel)
			.collect()
	}
}

/// Persistent storage for a [`PanelConfiguration`].
pub trait ConfigStore {
	fn load(&self) -> Result<PanelConfiguration>;
	fn save(&self, config: &PanelConfiguration) -> Result<()>;
}

pub struct TomlConfigStore {
	path: PathBuf,
}

impl TomlConfigStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Loads the stored configuration, writing the defaults first if there is none yet.
	pub fn load_or_init(&self) -> Result<PanelConfiguration> {
		if self.path.exists() {
			return self.load();
		}

		let config = PanelConfiguration::default();
		self.save(&config)?;
		info!("wrote default configuration to {}", self.path.display());

		Ok(config)
	}
}

impl ConfigStore for TomlConfigStore {
	fn load(&self) -> Result<PanelConfiguration> {
		let text = fs::read_to_string(&self.path)?;
		let config: PanelConfiguration = toml::from_str(&text)
			.map_err(|e| Error::Config(format!("{}: {}", self.path.display(), e)))?;
		config.validate()?;

		info!(
			"loaded configuration from {} ({} dead pixels)",
			self.path.display(),
			config.dead_pixels().len()
		);

		Ok(config)
	}

	fn save(&self, config: &PanelConfiguration) -> Result<()> {
		config.validate()?;

		let text = toml::to_string(config)
			.map_err(|e| Error::Config(format!("{}: {}", self.path.display(), e)))?;
		if let Some(parent) = self.path.parent() {
			fs::create_dir_all(parent)?;
		}
		fs::write(&self.path, text)?;

		Ok(())
	}
}
