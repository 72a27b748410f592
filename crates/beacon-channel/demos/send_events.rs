// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Sends a handful of events.
//!
//! ```text
//! cargo run -p beacon-channel --example send_events -- [beacon.toml]
//! ```
//!
//! Without a config file the `BEACON_*` environment variables are used.

use beacon_channel::{logging, Beacon, BeaconConfig};
use beacon_core::{Properties, ANALYTICS_GROUP};
use std::path::Path;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let config = match std::env::args().nth(1) {
		Some(path) => BeaconConfig::load(Path::new(&path))?,
		None => BeaconConfig::from_env()?,
	};
	logging::init(&config.logging.level);

	let beacon = Beacon::start(config).await?;
	beacon.install_panic_hook();
	beacon.session().on_foreground().await?;

	for index in 0..5 {
		beacon
			.track_event("demo_event", Properties::new().insert("index", index))
			.await?;
	}
	beacon.channel().flush(ANALYTICS_GROUP).await;

	tokio::time::sleep(Duration::from_secs(2)).await;
	tracing::info!(
		pending = beacon.channel().persistence().count(ANALYTICS_GROUP).await,
		"stopping"
	);
	beacon.stop().await;
	Ok(())
}
