// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Crash capture.
//!
//! A panic hook writes each crash to disk synchronously, since nothing async
//! can be relied on while panicking. On the next start the stored records
//! are turned into `managed_error` logs in the errors group.

use beacon_core::{Log, Properties, ERRORS_GROUP};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::backtrace::Backtrace;
use std::io;
use std::panic::PanicHookInfo;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use crate::channel::Channel;
use crate::error::Result;

pub const MANAGED_ERROR_TYPE: &str = "managed_error";

/// Directory under the storage path holding pending crash records.
pub const CRASH_DIR: &str = "crashes";

const RECORD_EXTENSION: &str = "json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrashRecord {
	pub id: Uuid,
	pub message: String,
	pub location: Option<String>,
	pub thread: Option<String>,
	pub backtrace: String,
	pub timestamp: DateTime<Utc>,
}

impl CrashRecord {
	pub fn from_panic(info: &PanicHookInfo<'_>, backtrace: &Backtrace) -> Self {
		Self {
			id: Uuid::now_v7(),
			message: extract_panic_message(info),
			location: info
				.location()
				.map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column())),
			thread: std::thread::current().name().map(str::to_string),
			backtrace: backtrace.to_string(),
			timestamp: Utc::now(),
		}
	}

	/// The log sent for this crash. It keeps the crash time as its timestamp.
	pub fn to_log(&self) -> Log {
		Log::new(MANAGED_ERROR_TYPE)
			.with_timestamp(self.timestamp)
			.with_properties(
				Properties::new()
					.insert("crash_id", self.id.to_string())
					.insert("message", self.message.clone())
					.insert("location", self.location.clone())
					.insert("thread", self.thread.clone())
					.insert("backtrace", self.backtrace.clone()),
			)
	}

	/// Writes the record as `{id}.json` under `dir`.
	pub fn write_to(&self, dir: &Path) -> io::Result<PathBuf> {
		std::fs::create_dir_all(dir)?;
		let path = dir.join(format!("{}.{RECORD_EXTENSION}", self.id));
		let json = serde_json::to_vec(self).map_err(io::Error::other)?;
		std::fs::write(&path, json)?;
		Ok(path)
	}
}

/// Chains a hook in front of the current panic hook that stores a
/// [`CrashRecord`] in `dir`.
pub fn install_panic_hook(dir: impl Into<PathBuf>) {
	let dir = dir.into();
	let default_hook = std::panic::take_hook();

	std::panic::set_hook(Box::new(move |info| {
		let backtrace = Backtrace::force_capture();
		let record = CrashRecord::from_panic(info, &backtrace);
		if let Err(e) = record.write_to(&dir) {
			eprintln!("failed to store crash record: {e}");
		}
		default_hook(info);
	}));
}

fn extract_panic_message(info: &PanicHookInfo<'_>) -> String {
	if let Some(s) = info.payload().downcast_ref::<&str>() {
		s.to_string()
	} else if let Some(s) = info.payload().downcast_ref::<String>() {
		s.clone()
	} else {
		"Box<dyn Any>".to_string()
	}
}

/// Enqueues every stored crash record into the errors group, oldest first,
/// and removes the files. Unreadable records are dropped.
///
/// Returns the number of crashes queued.
pub async fn process_pending(dir: &Path, channel: &Channel) -> Result<usize> {
	let mut entries = match tokio::fs::read_dir(dir).await {
		Ok(entries) => entries,
		Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
		Err(e) => return Err(e.into()),
	};

	let mut paths = Vec::new();
	while let Some(entry) = entries.next_entry().await? {
		let path = entry.path();
		if path.extension().is_some_and(|ext| ext == RECORD_EXTENSION) {
			paths.push(path);
		}
	}
	// v7 ids sort by creation time.
	paths.sort();

	let mut queued = 0;
	for path in paths {
		let bytes = tokio::fs::read(&path).await?;
		match serde_json::from_slice::<CrashRecord>(&bytes) {
			Ok(record) => {
				channel.enqueue(record.to_log(), ERRORS_GROUP).await?;
				queued += 1;
			}
			Err(e) => {
				warn!(path = %path.display(), error = %e, "dropping unreadable crash record");
			}
		}
		tokio::fs::remove_file(&path).await?;
	}

	if queued > 0 {
		info!(count = queued, "queued crash reports from previous run");
	}
	Ok(queued)
}

#[cfg(test)]
mod tests {
	use super::*;
	use beacon_core::GroupConfig;
	use beacon_ingestion::testing::MockIngestion;
	use beacon_persistence::{Persistence, StorageConfig};
	use std::sync::Arc;
	use std::time::Duration;

	fn record(message: &str) -> CrashRecord {
		CrashRecord {
			id: Uuid::now_v7(),
			message: message.to_string(),
			location: Some("src/main.rs:10:5".to_string()),
			thread: Some("main".to_string()),
			backtrace: "0: main".to_string(),
			timestamp: Utc::now(),
		}
	}

	async fn paused_errors_channel() -> Channel {
		let store = Arc::new(Persistence::in_memory(StorageConfig::new("unused")));
		let channel = Channel::new(
			store,
			Arc::new(MockIngestion::new()),
			"secret",
			Uuid::nil(),
		);
		channel
			.add_group(ERRORS_GROUP, GroupConfig::new(10, Duration::from_secs(60), 1), None)
			.await;
		channel.pause_group(ERRORS_GROUP).await;
		channel
	}

	#[test]
	fn test_record_becomes_managed_error_log() {
		let record = record("boom");
		let log = record.to_log();

		assert_eq!(log.log_type, MANAGED_ERROR_TYPE);
		assert_eq!(log.timestamp, Some(record.timestamp));
		assert_eq!(log.properties["message"], "boom");
		assert_eq!(log.properties["location"], "src/main.rs:10:5");
		assert_eq!(log.properties["crash_id"], record.id.to_string());
	}

	#[tokio::test]
	async fn test_missing_directory_is_empty() {
		let dir = tempfile::tempdir().unwrap();
		let channel = paused_errors_channel().await;

		let queued = process_pending(&dir.path().join("nope"), &channel).await.unwrap();
		assert_eq!(queued, 0);
	}

	#[tokio::test]
	async fn test_pending_records_are_queued_and_removed() {
		let dir = tempfile::tempdir().unwrap();
		record("first").write_to(dir.path()).unwrap();
		record("second").write_to(dir.path()).unwrap();
		std::fs::write(dir.path().join("garbage.json"), b"{not json").unwrap();
		std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
		let channel = paused_errors_channel().await;

		let queued = process_pending(dir.path(), &channel).await.unwrap();

		assert_eq!(queued, 2);
		assert_eq!(channel.persistence().count(ERRORS_GROUP).await, 2);
		let remaining: Vec<_> = std::fs::read_dir(dir.path())
			.unwrap()
			.map(|e| e.unwrap().file_name())
			.collect();
		assert_eq!(remaining, vec![std::ffi::OsString::from("notes.txt")]);
	}

	#[test]
	fn test_panic_hook_writes_record() {
		let dir = tempfile::tempdir().unwrap();
		let previous = std::panic::take_hook();
		std::panic::set_hook(Box::new(|_| {}));
		install_panic_hook(dir.path());

		let result = std::thread::Builder::new()
			.name("crashing".to_string())
			.spawn(|| panic!("hook test"))
			.unwrap()
			.join();
		let _ = std::panic::take_hook();
		std::panic::set_hook(previous);

		assert!(result.is_err());
		let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
		assert_eq!(files.len(), 1);
		let path = files[0].as_ref().unwrap().path();
		let stored: CrashRecord =
			serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
		assert_eq!(stored.message, "hook test");
		assert_eq!(stored.thread.as_deref(), Some("crashing"));
		assert!(stored.location.is_some());
	}
}
