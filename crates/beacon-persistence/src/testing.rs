// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use beacon_core::{Log, Properties};
use tempfile::TempDir;

use crate::{Persistence, StorageConfig};

/// Opens a SQLite-backed store in a fresh temp directory.
///
/// The directory is removed when the returned [`TempDir`] is dropped.
pub async fn create_test_persistence(group_capacity: usize) -> (TempDir, Persistence) {
	let dir = tempfile::tempdir().unwrap();
	let store =
		Persistence::open(StorageConfig::new(dir.path()).with_group_capacity(group_capacity)).await;
	(dir, store)
}

/// An `event` log carrying a sequence number in its `n` property.
pub fn numbered_log(n: u64) -> Log {
	Log::new("event").with_properties(Properties::new().insert("n", n))
}

/// Sequence numbers of logs built by [`numbered_log`].
pub fn log_numbers(logs: &[Log]) -> Vec<u64> {
	logs
		.iter()
		.filter_map(|log| log.properties.get("n").and_then(|n| n.as_u64()))
		.collect()
}
