use std::{env, process, time::Duration};

use tlc5955_panel::{
	codec::PanelImage,
	find_device,
	shared::{CHANNELS, COLUMNS, DEVICE_PRODUCT_ID, DEVICE_VENDOR_ID, ROWS},
	tokio::{open_serial, AsyncProtocolClient},
	ApplyPolicy,
	Error,
	SerialOptions,
	TomlConfigStore,
};
use tokio::time::sleep;
use tracing::error;
use tracing_subscriber::EnvFilter;

const ON_TIME: Duration = Duration::from_millis(200);
const OFF_TIME: Duration = Duration::from_millis(200);

fn pattern(level: f64) -> PanelImage {
	let mut image = [[[0.0; CHANNELS]; COLUMNS]; ROWS];
	for (row, column) in [(2, 5), (3, 4), (3, 5), (3, 6), (4, 4), (4, 5), (4, 6)] {
		image[row][column][0] = level;
	}
	image
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
	color_eyre::install()?;
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	let config_path = env::args().nth(1).unwrap_or_else(|| "panel_config.toml".to_string());
	let config = TomlConfigStore::new(config_path).load_or_init()?;

	let Some(port) = find_device(DEVICE_VENDOR_ID, DEVICE_PRODUCT_ID)? else {
		error!("could not find the panel controller");
		process::exit(1);
	};

	let stream = open_serial(&port, &SerialOptions::default())?;
	let mut client = AsyncProtocolClient::connect(stream).await?;
	if let Err(e) = client.configure(&config, false, ApplyPolicy::Strict).await {
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
		client.disconnect().await?;
		process::exit(1);
	}

	let frame = pattern(1.0);
	loop {
		client.show(&frame).await?;
		client.display(true).await?;
		sleep(ON_TIME).await;
		client.display(false).await?;
		sleep(OFF_TIME).await;
	}
}
