// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
	#[error("Database error: {0}")]
	Database(#[from] sqlx::Error),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("Failed to write large payload {path}: {source}")]
	LargePayload {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Invalid column value: {0}")]
	InvalidColumn(String),
}

impl PersistenceError {
	/// True when the error comes from the database itself rather than from
	/// the record being stored. Backend failures switch the store to memory.
	pub fn is_backend_failure(&self) -> bool {
		matches!(self, PersistenceError::Database(_))
	}
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_backend_failure_classification() {
		assert!(PersistenceError::Database(sqlx::Error::PoolClosed).is_backend_failure());

		let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
		assert!(!PersistenceError::Serialization(json).is_backend_failure());

		let io = PersistenceError::LargePayload {
			path: PathBuf::from("/tmp/x.json"),
			source: std::io::Error::other("disk full"),
		};
		assert!(!io.is_backend_failure());
		assert!(io.to_string().contains("/tmp/x.json"));
	}
}
