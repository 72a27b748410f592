// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! SDK configuration, loaded from TOML with environment overrides.

use beacon_common_http::RetryConfig;
use beacon_core::{GroupConfig, ANALYTICS_GROUP, ERRORS_GROUP};
use beacon_ingestion::{DEFAULT_BASE_URL, DEFAULT_REQUEST_TIMEOUT};
use beacon_persistence::{StorageConfig, DEFAULT_GROUP_CAPACITY, DEFAULT_LARGE_PAYLOAD_THRESHOLD};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub const ENV_APP_SECRET: &str = "BEACON_APP_SECRET";
pub const ENV_BASE_URL: &str = "BEACON_BASE_URL";
pub const ENV_STORAGE_PATH: &str = "BEACON_STORAGE_PATH";
pub const ENV_LOG_LEVEL: &str = "BEACON_LOG_LEVEL";

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("failed to read config file {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse config: {0}")]
	Parse(#[from] toml::de::Error),

	#[error("invalid value for {name}: {message}")]
	InvalidValue { name: String, message: String },
}

impl ConfigError {
	pub fn invalid_value(name: impl Into<String>, message: impl Into<String>) -> Self {
		Self::InvalidValue {
			name: name.into(),
			message: message.into(),
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
	pub ingestion: IngestionSection,
	pub storage: StorageSection,
	pub groups: BTreeMap<String, GroupSection>,
	pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionSection {
	pub base_url: String,
	pub app_secret: String,
	pub request_timeout_secs: u64,
	pub retry_intervals_ms: Vec<u64>,
}

impl Default for IngestionSection {
	fn default() -> Self {
		Self {
			base_url: DEFAULT_BASE_URL.to_string(),
			app_secret: String::new(),
			request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
			retry_intervals_ms: RetryConfig::default()
				.intervals
				.iter()
				.map(|d| d.as_millis() as u64)
				.collect(),
		}
	}
}

impl IngestionSection {
	pub fn request_timeout(&self) -> Duration {
		Duration::from_secs(self.request_timeout_secs)
	}

	pub fn retry_config(&self) -> RetryConfig {
		RetryConfig {
			intervals: self
				.retry_intervals_ms
				.iter()
				.copied()
				.map(Duration::from_millis)
				.collect(),
			jitter: true,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
	pub path: PathBuf,
	pub group_capacity: usize,
	pub large_payload_threshold: usize,
}

impl Default for StorageSection {
	fn default() -> Self {
		Self {
			path: default_storage_path(),
			group_capacity: DEFAULT_GROUP_CAPACITY,
			large_payload_threshold: DEFAULT_LARGE_PAYLOAD_THRESHOLD,
		}
	}
}

impl StorageSection {
	pub fn storage_config(&self) -> StorageConfig {
		StorageConfig::new(self.path.clone())
			.with_group_capacity(self.group_capacity)
			.with_large_payload_threshold(self.large_payload_threshold)
	}
}

/// `$XDG_DATA_HOME/beacon` or the platform equivalent.
pub fn default_storage_path() -> PathBuf {
	dirs::data_local_dir()
		.unwrap_or_else(std::env::temp_dir)
		.join("beacon")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSection {
	pub max_logs_per_batch: usize,
	pub batch_interval_ms: u64,
	pub max_parallel_batches: usize,
	/// Row limit for this group, overriding `storage.group_capacity`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub capacity: Option<usize>,
}

impl GroupSection {
	pub fn group_config(&self) -> GroupConfig {
		GroupConfig::new(
			self.max_logs_per_batch,
			Duration::from_millis(self.batch_interval_ms),
			self.max_parallel_batches,
		)
	}
}

impl From<GroupConfig> for GroupSection {
	fn from(config: GroupConfig) -> Self {
		Self {
			max_logs_per_batch: config.max_logs_per_batch,
			batch_interval_ms: config.batch_interval.as_millis() as u64,
			max_parallel_batches: config.max_parallel_batches,
			capacity: None,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
	pub level: String,
}

impl Default for LoggingSection {
	fn default() -> Self {
		Self {
			level: "info".to_string(),
		}
	}
}

impl BeaconConfig {
	/// Parses `content`, fills in the default groups and validates.
	/// Environment overrides are not applied.
	pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
		let mut config: BeaconConfig = toml::from_str(content)?;
		config.with_default_groups();
		config.validate()?;
		Ok(config)
	}

	/// Reads `path`, then applies `BEACON_*` environment overrides.
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
			path: path.to_path_buf(),
			source,
		})?;
		let mut config: BeaconConfig = toml::from_str(&content)?;
		config.with_default_groups();
		config.apply_env();
		config.validate()?;
		Ok(config)
	}

	/// Defaults plus environment overrides, for hosts without a config file.
	pub fn from_env() -> Result<Self, ConfigError> {
		let mut config = BeaconConfig::default();
		config.with_default_groups();
		config.apply_env();
		config.validate()?;
		Ok(config)
	}

	pub fn apply_env(&mut self) {
		self.apply_env_from(|name| std::env::var(name).ok());
	}

	/// Applies overrides looked up through `lookup`. Empty values are ignored.
	pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
		let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

		if let Some(secret) = get(ENV_APP_SECRET) {
			self.ingestion.app_secret = secret;
		}
		if let Some(url) = get(ENV_BASE_URL) {
			self.ingestion.base_url = url;
		}
		if let Some(path) = get(ENV_STORAGE_PATH) {
			self.storage.path = PathBuf::from(path);
		}
		if let Some(level) = get(ENV_LOG_LEVEL) {
			self.logging.level = level;
		}
	}

	fn with_default_groups(&mut self) {
		for name in [ANALYTICS_GROUP, ERRORS_GROUP] {
			self
				.groups
				.entry(name.to_string())
				.or_insert_with(|| GroupConfig::for_group(name).into());
		}
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		validate_ingestion(&self.ingestion)?;
		validate_storage(&self.storage)?;
		validate_groups(&self.groups)?;
		Ok(())
	}
}

fn validate_ingestion(ingestion: &IngestionSection) -> Result<(), ConfigError> {
	if ingestion.base_url.trim().is_empty() {
		return Err(ConfigError::invalid_value(
			"ingestion.base_url",
			"base_url cannot be empty",
		));
	}
	if ingestion.retry_intervals_ms.is_empty() {
		return Err(ConfigError::invalid_value(
			"ingestion.retry_intervals_ms",
			"at least one retry interval is required",
		));
	}
	if ingestion.request_timeout_secs == 0 {
		return Err(ConfigError::invalid_value(
			"ingestion.request_timeout_secs",
			"must be greater than 0",
		));
	}
	if ingestion.app_secret.is_empty() {
		warn!("ingestion.app_secret is empty, requests will be rejected");
	}
	Ok(())
}

fn validate_storage(storage: &StorageSection) -> Result<(), ConfigError> {
	if storage.group_capacity == 0 {
		return Err(ConfigError::invalid_value(
			"storage.group_capacity",
			"must be greater than 0",
		));
	}
	if storage.large_payload_threshold == 0 {
		return Err(ConfigError::invalid_value(
			"storage.large_payload_threshold",
			"must be greater than 0",
		));
	}
	Ok(())
}

fn validate_groups(groups: &BTreeMap<String, GroupSection>) -> Result<(), ConfigError> {
	for (name, group) in groups {
		if group.max_logs_per_batch == 0 {
			return Err(ConfigError::invalid_value(
				format!("groups.{name}.max_logs_per_batch"),
				"must be greater than 0",
			));
		}
		if group.max_parallel_batches == 0 {
			return Err(ConfigError::invalid_value(
				format!("groups.{name}.max_parallel_batches"),
				"must be greater than 0",
			));
		}
		if group.capacity == Some(0) {
			return Err(ConfigError::invalid_value(
				format!("groups.{name}.capacity"),
				"must be greater than 0",
			));
		}
		if group.batch_interval_ms == 0 {
			warn!(group = %name, "batch_interval_ms is 0, partial batches flush immediately");
		}
	}
	Ok(())
}
