// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Scriptable transport and callback for tests.

use async_trait::async_trait;
use beacon_core::{Log, LogContainer};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::{IngestionError, Result};
use crate::ingestion::{Ingestion, IngestionRequest, IngestionResponse, ServiceCallback};

/// A request carrying `logs` empty `event` logs.
pub fn request(logs: usize) -> IngestionRequest {
	IngestionRequest {
		app_secret: "test-secret".to_string(),
		install_id: Uuid::nil(),
		logs: LogContainer::new((0..logs).map(|_| Log::new("event")).collect()),
	}
}

pub fn http_error(status: u16) -> IngestionError {
	IngestionError::Http {
		status,
		body: format!("status {status}"),
		retry_after: None,
	}
}

/// Transport that answers from a script, `200` once the script runs out.
#[derive(Default)]
pub struct MockIngestion {
	script: Mutex<VecDeque<Result<IngestionResponse>>>,
	sent: Mutex<Vec<IngestionRequest>>,
	delay: Mutex<Option<Duration>>,
	closes: AtomicUsize,
	reopens: AtomicUsize,
	notify: Notify,
}

impl MockIngestion {
	pub fn new() -> Self {
		Self::default()
	}

	/// Queues an answer with `status`; non-2xx statuses become errors.
	pub fn push_status(&self, status: u16) {
		let answer = if (200..300).contains(&status) {
			Ok(IngestionResponse {
				status,
				body: String::new(),
			})
		} else {
			Err(http_error(status))
		};
		self.script.lock().unwrap().push_back(answer);
	}

	pub fn push_error(&self, error: IngestionError) {
		self.script.lock().unwrap().push_back(Err(error));
	}

	/// Every send sleeps this long before answering.
	pub fn set_delay(&self, delay: Duration) {
		*self.delay.lock().unwrap() = Some(delay);
	}

	pub fn sent(&self) -> Vec<IngestionRequest> {
		self.sent.lock().unwrap().clone()
	}

	/// Total number of logs across all sends.
	pub fn sent_log_count(&self) -> usize {
		self.sent.lock().unwrap().iter().map(|r| r.logs.len()).sum()
	}

	pub fn closes(&self) -> usize {
		self.closes.load(Ordering::SeqCst)
	}

	pub fn reopens(&self) -> usize {
		self.reopens.load(Ordering::SeqCst)
	}

	pub async fn wait_for_sends(&self, count: usize) {
		loop {
			let notified = self.notify.notified();
			if self.sent.lock().unwrap().len() >= count {
				return;
			}
			notified.await;
		}
	}
}

#[async_trait]
impl Ingestion for MockIngestion {
	async fn send(&self, request: &IngestionRequest) -> Result<IngestionResponse> {
		self.sent.lock().unwrap().push(request.clone());
		self.notify.notify_waiters();

		let delay = *self.delay.lock().unwrap();
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}

		let answer = self.script.lock().unwrap().pop_front();
		answer.unwrap_or(Ok(IngestionResponse {
			status: 200,
			body: String::new(),
		}))
	}

	async fn close(&self) {
		self.closes.fetch_add(1, Ordering::SeqCst);
	}

	async fn reopen(&self) {
		self.reopens.fetch_add(1, Ordering::SeqCst);
	}
}

/// Callback that counts outcomes.
#[derive(Default)]
pub struct RecordingCallback {
	successes: AtomicUsize,
	failures: Mutex<Vec<Option<u16>>>,
	notify: Notify,
}

impl RecordingCallback {
	pub fn successes(&self) -> usize {
		self.successes.load(Ordering::SeqCst)
	}

	pub fn failures(&self) -> usize {
		self.failures.lock().unwrap().len()
	}

	pub fn failure_statuses(&self) -> Vec<Option<u16>> {
		self.failures.lock().unwrap().clone()
	}

	pub async fn wait_for_outcomes(&self, count: usize) {
		loop {
			let notified = self.notify.notified();
			if self.successes() + self.failures() >= count {
				return;
			}
			notified.await;
		}
	}
}

#[async_trait]
impl ServiceCallback for RecordingCallback {
	async fn on_call_succeeded(&self, _response: IngestionResponse) {
		self.successes.fetch_add(1, Ordering::SeqCst);
		self.notify.notify_waiters();
	}

	async fn on_call_failed(&self, error: IngestionError) {
		self.failures.lock().unwrap().push(error.status());
		self.notify.notify_waiters();
	}
}
