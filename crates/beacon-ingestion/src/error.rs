// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Error types for ingestion transports.

use beacon_common_http::{is_recoverable_status, RetryableError};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestionError {
	/// Connection, timeout or other transport-level failure.
	#[error("HTTP request failed: {0}")]
	Network(#[from] reqwest::Error),

	/// Server answered with a non-success status.
	#[error("ingestion returned {status}: {body}")]
	Http {
		status: u16,
		body: String,
		retry_after: Option<Duration>,
	},

	/// The call was cancelled or the transport was closed.
	#[error("ingestion call cancelled")]
	Cancelled,

	#[error("invalid base URL: {0}")]
	InvalidBaseUrl(String),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

impl IngestionError {
	/// Recoverable errors are expected to clear up on their own; the
	/// channel keeps the batch and stops sending when one surfaces.
	pub fn is_recoverable(&self) -> bool {
		self.is_retryable()
	}

	pub fn status(&self) -> Option<u16> {
		match self {
			IngestionError::Http { status, .. } => Some(*status),
			IngestionError::Network(e) => e.status().map(|s| s.as_u16()),
			_ => None,
		}
	}
}

impl RetryableError for IngestionError {
	fn is_retryable(&self) -> bool {
		match self {
			IngestionError::Network(e) => e.is_retryable(),
			IngestionError::Http { status, .. } => is_recoverable_status(*status),
			_ => false,
		}
	}

	fn retry_after(&self) -> Option<Duration> {
		match self {
			IngestionError::Http { retry_after, .. } => *retry_after,
			_ => None,
		}
	}
}

pub type Result<T> = std::result::Result<T, IngestionError>;
