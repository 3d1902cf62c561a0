use std::{env, process, thread::sleep, time::Duration};

use tlc5955_panel::{
	codec::PanelImage,
	find_device,
	shared::{CHANNELS, COLUMNS, DEVICE_PRODUCT_ID, DEVICE_VENDOR_ID, ROWS},
	Error,
	Panel,
	SerialOptions,
	TomlConfigStore,
};
use tracing::error;
use tracing_subscriber::EnvFilter;

const ON_TIME: Duration = Duration::from_millis(200);
const OFF_TIME: Duration = Duration::from_millis(200);

/// A small plus sign in the first channel.
fn pattern(level: f64) -> PanelImage {
	let mut image = [[[0.0; CHANNELS]; COLUMNS]; ROWS];
	for (row, column) in [(2, 5), (3, 4), (3, 5), (3, 6), (4, 4), (4, 5), (4, 6)] {
		image[row][column][0] = level;
	}
	image
}

fn main() -> eyre::Result<()> {
	color_eyre::install()?;
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	let args: Vec<String> = env::args().skip(1).collect();
	let save = args.iter().any(|arg| arg == "--save");
	let config_path = args
		.iter()
		.find(|arg| !arg.starts_with("--"))
		.cloned()
		.unwrap_or_else(|| "panel_config.toml".to_string());

	let config = TomlConfigStore::new(config_path).load_or_init()?;

	let Some(port) = find_device(DEVICE_VENDOR_ID, DEVICE_PRODUCT_ID)? else {
		error!("could not find the panel controller");
		process::exit(1);
	};

	let mut panel = Panel::open(&port, &SerialOptions::default())?;
	if let Err(e) = panel.configure(&config, save) {
		if let Error::PartialConfigurationFailure {
			last_successful,
			command,
			source,
		} = &e
		{
			error!("command {} \"{}\" failed: {}", last_successful + 1, command, source);
		} else {
			error!("configuration failed: {}", e);
		}
		panel.disconnect()?;
		process::exit(1);
	}

	let frame = pattern(1.0);
	loop {
		panel.show(&frame)?;
		panel.display(true)?;
		sleep(ON_TIME);
		panel.display(false)?;
		sleep(OFF_TIME);
	}
}
