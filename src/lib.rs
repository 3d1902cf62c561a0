//! Host side control of a TLC5955 LED panel behind a SCPI-style USB serial controller.
//!
//! [`codec`] turns lighting parameters into register codes, [`ProtocolClient`] talks to the
//! controller over a [`Transport`] and [`Panel`] ties both together.

mod block;
pub mod codec;
pub mod config;
mod error;
pub mod panel;
pub mod protocol;
#[cfg(test)]
mod test_utils;
#[cfg(feature = "tokio")]
pub mod tokio;
pub mod transport;

pub use block::{split_block, unwrap_block, wrap_block};
pub use codec::ModeFlags;
pub use config::{ConfigStore, PanelConfiguration, TomlConfigStore};
pub use error::{Error, Result};
pub use panel::{apply_sequence, configuration_commands, ApplyPolicy, Panel, RegisterCodes};
pub use protocol::{best_effort, Command, Echo, ErrorRecord, ProtocolClient, Session, State};
pub use tlc5955_panel_shared as shared;
pub use transport::{find_device, SerialOptions, SerialTransport, Transport};
