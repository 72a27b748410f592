// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

#![allow(dead_code)]

use beacon_channel::{Channel, ChannelError, GroupListener};
use beacon_core::Log;
use beacon_ingestion::testing::MockIngestion;
use beacon_persistence::testing::create_test_persistence;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;
use uuid::Uuid;

pub const TEST_SECRET: &str = "test-secret";

/// Fails the test if `future` takes longer than ten seconds.
pub async fn within<F: Future>(future: F) -> F::Output {
	tokio::time::timeout(Duration::from_secs(10), future)
		.await
		.expect("timed out waiting")
}

/// A channel over a SQLite store in a fresh temp directory.
pub async fn sqlite_channel(ingestion: &Arc<MockIngestion>, capacity: usize) -> (TempDir, Channel) {
	let (dir, store) = create_test_persistence(capacity).await;
	let channel = Channel::new(Arc::new(store), ingestion.clone(), TEST_SECRET, Uuid::nil());
	(dir, channel)
}

#[derive(Default)]
pub struct RecordingListener {
	before_sending: AtomicUsize,
	successes: Mutex<Vec<Log>>,
	failures: Mutex<Vec<(Log, String)>>,
	notify: Notify,
}

impl RecordingListener {
	pub fn before_sending(&self) -> usize {
		self.before_sending.load(Ordering::SeqCst)
	}

	pub fn successes(&self) -> Vec<Log> {
		self.successes.lock().unwrap().clone()
	}

	pub fn failures(&self) -> Vec<(Log, String)> {
		self.failures.lock().unwrap().clone()
	}

	pub fn outcomes(&self) -> usize {
		self.successes.lock().unwrap().len() + self.failures.lock().unwrap().len()
	}

	pub async fn wait_for_outcomes(&self, count: usize) {
		loop {
			let notified = self.notify.notified();
			if self.outcomes() >= count {
				return;
			}
			notified.await;
		}
	}
}

impl GroupListener for RecordingListener {
	fn on_before_sending(&self, _log: &Log) {
		self.before_sending.fetch_add(1, Ordering::SeqCst);
	}

	fn on_success(&self, log: &Log) {
		self.successes.lock().unwrap().push(log.clone());
		self.notify.notify_waiters();
	}

	fn on_failure(&self, log: &Log, error: &ChannelError) {
		self.failures
			.lock()
			.unwrap()
			.push((log.clone(), error.to_string()));
		self.notify.notify_waiters();
	}
}
