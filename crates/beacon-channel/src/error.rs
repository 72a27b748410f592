// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use beacon_ingestion::IngestionError;
use beacon_persistence::PersistenceError;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum ChannelError {
	#[error("unknown group: {0}")]
	UnknownGroup(String),

	/// Logs are discarded while the channel is disabled.
	#[error("channel is disabled")]
	Disabled,

	/// Sending was stopped before the batch resolved.
	#[error("sending cancelled")]
	Cancelled,

	#[error("ingestion failed: {0}")]
	Ingestion(#[from] IngestionError),

	#[error("persistence error: {0}")]
	Persistence(#[from] PersistenceError),

	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
