// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! The transport seam between the channel and the network.

use async_trait::async_trait;
use beacon_core::LogContainer;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::error::{IngestionError, Result};

/// One upload of a batch of logs.
#[derive(Debug, Clone)]
pub struct IngestionRequest {
	pub app_secret: String,
	pub install_id: Uuid,
	pub logs: LogContainer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionResponse {
	pub status: u16,
	pub body: String,
}

/// A transport that uploads log containers.
///
/// Implementations are composed as decorators: HTTP at the bottom, retry
/// around it, the network-state gate on top.
#[async_trait]
pub trait Ingestion: Send + Sync {
	async fn send(&self, request: &IngestionRequest) -> Result<IngestionResponse>;

	/// Stops accepting calls. Calls in progress fail with
	/// [`IngestionError::Cancelled`].
	async fn close(&self) {}

	async fn reopen(&self) {}
}

#[async_trait]
impl<I: Ingestion + ?Sized> Ingestion for Arc<I> {
	async fn send(&self, request: &IngestionRequest) -> Result<IngestionResponse> {
		(**self).send(request).await
	}

	async fn close(&self) {
		(**self).close().await
	}

	async fn reopen(&self) {
		(**self).reopen().await
	}
}

/// Completion of a call started with [`send_async`].
#[async_trait]
pub trait ServiceCallback: Send + Sync {
	async fn on_call_succeeded(&self, response: IngestionResponse);
	async fn on_call_failed(&self, error: IngestionError);
}

/// Handle to a call in progress.
#[derive(Debug)]
pub struct ServiceCall {
	token: CancellationToken,
	handle: JoinHandle<()>,
}

impl ServiceCall {
	/// Cancels the call without waiting. A callback that has not started yet
	/// will not run, but one that is already running completes. Callers that
	/// cannot tolerate that late completion must either discard it themselves
	/// (the channel tags each call with an epoch) or use
	/// [`ServiceCall::cancel_and_wait`].
	pub fn cancel(&self) {
		self.token.cancel();
	}

	/// Cancels the call and waits until its task is gone, so no callback
	/// can fire after this returns. A callback already running is awaited.
	pub async fn cancel_and_wait(self) {
		self.token.cancel();
		let _ = self.handle.await;
	}

	pub fn is_cancelled(&self) -> bool {
		self.token.is_cancelled()
	}

	pub fn is_finished(&self) -> bool {
		self.handle.is_finished()
	}
}

/// Spawns `request` on `ingestion` and reports the outcome to `callback`.
///
/// Exactly one of the callback methods runs unless the call is cancelled
/// first. [`IngestionError::Cancelled`] is never reported.
pub fn send_async(
	ingestion: Arc<dyn Ingestion>,
	request: IngestionRequest,
	callback: Arc<dyn ServiceCallback>,
) -> ServiceCall {
	let token = CancellationToken::new();
	let task_token = token.clone();

	let handle = tokio::spawn(async move {
		let result = tokio::select! {
			biased;
			_ = task_token.cancelled() => return,
			result = ingestion.send(&request) => result,
		};
		if task_token.is_cancelled() {
			return;
		}
		match result {
			Ok(response) => callback.on_call_succeeded(response).await,
			Err(IngestionError::Cancelled) => debug!("ingestion call cancelled"),
			Err(error) => callback.on_call_failed(error).await,
		}
	});

	ServiceCall { token, handle }
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{request, MockIngestion, RecordingCallback};
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;
	use tokio::sync::Notify;

	#[tokio::test]
	async fn test_success_is_reported_once() {
		let ingestion = Arc::new(MockIngestion::new());
		let callback = Arc::new(RecordingCallback::default());

		let call = send_async(ingestion.clone(), request(2), callback.clone());
		callback.wait_for_outcomes(1).await;
		assert!(!call.is_cancelled());

		assert_eq!(callback.successes(), 1);
		assert_eq!(callback.failures(), 0);
		assert_eq!(ingestion.sent().len(), 1);
	}

	#[tokio::test]
	async fn test_failure_is_reported_once() {
		let ingestion = Arc::new(MockIngestion::new());
		ingestion.push_status(400);
		let callback = Arc::new(RecordingCallback::default());

		send_async(ingestion, request(1), callback.clone());
		callback.wait_for_outcomes(1).await;

		assert_eq!(callback.successes(), 0);
		assert_eq!(callback.failure_statuses(), vec![Some(400)]);
	}

	#[tokio::test(start_paused = true)]
	async fn test_no_callback_after_cancel() {
		let ingestion = Arc::new(MockIngestion::new());
		ingestion.set_delay(Duration::from_secs(5));
		let callback = Arc::new(RecordingCallback::default());

		let call = send_async(ingestion, request(1), callback.clone());
		tokio::time::sleep(Duration::from_secs(1)).await;
		call.cancel_and_wait().await;

		tokio::time::sleep(Duration::from_secs(10)).await;
		assert_eq!(callback.successes() + callback.failures(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_cancel_and_wait_outlasts_running_callback() {
		#[derive(Default)]
		struct SlowCallback {
			started: Notify,
			finished: AtomicUsize,
		}

		#[async_trait]
		impl ServiceCallback for SlowCallback {
			async fn on_call_succeeded(&self, _response: IngestionResponse) {
				self.started.notify_one();
				tokio::time::sleep(Duration::from_secs(5)).await;
				self.finished.fetch_add(1, Ordering::SeqCst);
			}

			async fn on_call_failed(&self, _error: IngestionError) {}
		}

		let ingestion = Arc::new(MockIngestion::new());
		let callback = Arc::new(SlowCallback::default());

		let call = send_async(ingestion, request(1), callback.clone());
		callback.started.notified().await;
		call.cancel();
		assert_eq!(callback.finished.load(Ordering::SeqCst), 0);

		call.cancel_and_wait().await;
		assert_eq!(callback.finished.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_cancelled_error_is_swallowed() {
		let ingestion = Arc::new(MockIngestion::new());
		ingestion.push_error(IngestionError::Cancelled);
		let callback = Arc::new(RecordingCallback::default());

		let call = send_async(ingestion.clone(), request(1), callback.clone());
		while !call.is_finished() {
			tokio::task::yield_now().await;
		}
		assert_eq!(ingestion.sent().len(), 1);
		assert_eq!(callback.successes() + callback.failures(), 0);
	}
}
