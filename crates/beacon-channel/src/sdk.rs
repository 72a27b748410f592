// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! SDK lifecycle: wiring storage, ingestion and the channel from a
//! [`BeaconConfig`].

use beacon_core::{Log, Properties, ANALYTICS_GROUP};
use beacon_ingestion::{default_ingestion, HttpIngestion, NetworkStateMonitor};
use beacon_persistence::{DocumentStore, Persistence};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::channel::Channel;
use crate::config::BeaconConfig;
use crate::crash::{self, CRASH_DIR};
use crate::error::Result;
use crate::session::SessionDecorator;

/// File under the storage path holding the install id.
pub const INSTALL_ID_FILE: &str = "install_id";

pub struct Beacon;

impl Beacon {
	/// Opens storage, builds the ingestion chain and starts the channel with
	/// every configured group. Crashes stored by a previous run are queued.
	#[instrument(skip(config), fields(storage = %config.storage.path.display()))]
	pub async fn start(config: BeaconConfig) -> Result<BeaconHandle> {
		config.validate()?;

		let persistence = Arc::new(Persistence::open(config.storage.storage_config()).await);
		for (group, section) in &config.groups {
			if let Some(capacity) = section.capacity {
				persistence.set_group_capacity(group, capacity).await;
			}
		}
		let install_id = load_or_create_install_id(&config.storage.path).await;

		let network = Arc::new(NetworkStateMonitor::default());
		let http = HttpIngestion::new(
			config.ingestion.base_url.clone(),
			config.ingestion.request_timeout(),
		)?;
		let ingestion = default_ingestion(http, &network, config.ingestion.retry_config());

		let channel = Channel::new(
			Arc::clone(&persistence),
			ingestion,
			config.ingestion.app_secret.clone(),
			install_id,
		);
		for (group, section) in &config.groups {
			channel.add_group(group, section.group_config(), None).await;
		}
		let session = SessionDecorator::new(channel.clone(), ANALYTICS_GROUP);

		let crash_dir = config.storage.path.join(CRASH_DIR);
		if let Err(e) = crash::process_pending(&crash_dir, &channel).await {
			warn!(error = %e, "failed to process stored crash reports");
		}

		info!(
			%install_id,
			groups = config.groups.len(),
			fallback = persistence.is_fallback().await,
			"beacon started"
		);
		Ok(BeaconHandle {
			channel,
			session,
			network,
			persistence,
			install_id,
			crash_dir,
		})
	}
}

/// A running SDK instance.
pub struct BeaconHandle {
	channel: Channel,
	session: SessionDecorator,
	network: Arc<NetworkStateMonitor>,
	persistence: Arc<Persistence>,
	install_id: Uuid,
	crash_dir: PathBuf,
}

impl BeaconHandle {
	/// Sends an `event` log with `name` in the analytics group.
	pub async fn track_event(&self, name: &str, properties: Properties) -> Result<()> {
		let log = Log::new("event")
			.with_properties(Properties::new().insert("name", name).merge(properties));
		self.session.enqueue(log, ANALYTICS_GROUP).await
	}

	/// Sends an arbitrary log through the session layer.
	pub async fn enqueue(&self, log: Log, group: &str) -> Result<()> {
		self.session.enqueue(log, group).await
	}

	pub fn channel(&self) -> &Channel {
		&self.channel
	}

	pub fn session(&self) -> &SessionDecorator {
		&self.session
	}

	/// Connectivity monitor; hosts feed their network callbacks into it.
	pub fn network(&self) -> &NetworkStateMonitor {
		&self.network
	}

	pub fn install_id(&self) -> Uuid {
		self.install_id
	}

	/// Offline document cache, when storage is on disk.
	pub async fn documents(&self) -> Option<DocumentStore> {
		self.persistence.document_store().await
	}

	/// Stores panics from now on so they are reported on the next start.
	pub fn install_panic_hook(&self) {
		crash::install_panic_hook(self.crash_dir.clone());
	}

	pub async fn set_enabled(&self, enabled: bool) {
		self.channel.set_enabled(enabled).await;
	}

	/// Stops sending and closes storage. Unsent logs stay on disk.
	#[instrument(skip(self))]
	pub async fn stop(self) {
		self.channel.shutdown().await;
		self.channel.wait_for_listeners().await;
		self.persistence.close().await;
		info!("beacon stopped");
	}
}

async fn load_or_create_install_id(dir: &Path) -> Uuid {
	let path = dir.join(INSTALL_ID_FILE);
	match tokio::fs::read_to_string(&path).await {
		Ok(content) => match Uuid::parse_str(content.trim()) {
			Ok(id) => return id,
			Err(e) => warn!(error = %e, "install id file is corrupt, generating a new id"),
		},
		Err(e) if e.kind() == io::ErrorKind::NotFound => {}
		Err(e) => warn!(error = %e, "failed to read install id"),
	}

	let id = Uuid::now_v7();
	let written = async {
		tokio::fs::create_dir_all(dir).await?;
		tokio::fs::write(&path, id.to_string()).await
	};
	if let Err(e) = written.await {
		warn!(error = %e, "failed to persist install id, it will change on next start");
	}
	id
}
