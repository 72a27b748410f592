// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Connectivity tracking and the network-state gate.
//!
//! The host application reports connectivity to a [`NetworkStateMonitor`].
//! [`NetworkStateIngestion`] listens to it: while the network is down, calls
//! wait in a FIFO queue; when it comes back they are released in order. A
//! call that is in flight when the network drops is cancelled and queued
//! again.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{IngestionError, Result};
use crate::ingestion::{Ingestion, IngestionRequest, IngestionResponse};

pub trait NetworkStateListener: Send + Sync {
	fn on_network_state_updated(&self, connected: bool);
}

/// Current connectivity as reported by the host.
pub struct NetworkStateMonitor {
	connected: Mutex<bool>,
	listeners: Mutex<Vec<Weak<dyn NetworkStateListener>>>,
}

impl NetworkStateMonitor {
	pub fn new(connected: bool) -> Self {
		Self {
			connected: Mutex::new(connected),
			listeners: Mutex::new(Vec::new()),
		}
	}

	pub fn is_connected(&self) -> bool {
		*lock(&self.connected)
	}

	/// Records a connectivity change and notifies listeners. Repeating the
	/// current state is a no-op.
	pub fn set_connected(&self, connected: bool) {
		{
			let mut current = lock(&self.connected);
			if *current == connected {
				return;
			}
			*current = connected;
		}
		info!(connected, "network state changed");

		let listeners: Vec<Arc<dyn NetworkStateListener>> = {
			let mut listeners = lock(&self.listeners);
			listeners.retain(|l| l.strong_count() > 0);
			listeners.iter().filter_map(|l| l.upgrade()).collect()
		};
		for listener in listeners {
			listener.on_network_state_updated(connected);
		}
	}

	/// Registers `listener` without keeping it alive.
	pub fn add_listener(&self, listener: &Arc<dyn NetworkStateListener>) {
		lock(&self.listeners).push(Arc::downgrade(listener));
	}

	pub fn listener_count(&self) -> usize {
		lock(&self.listeners)
			.iter()
			.filter(|l| l.strong_count() > 0)
			.count()
	}
}

impl Default for NetworkStateMonitor {
	fn default() -> Self {
		Self::new(true)
	}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct GateState {
	connected: bool,
	queue: VecDeque<oneshot::Sender<()>>,
	closed: CancellationToken,
}

/// Holds calls back while the network is down.
pub struct NetworkStateIngestion<I> {
	inner: I,
	state: Mutex<GateState>,
	connectivity: watch::Sender<bool>,
}

impl<I: Ingestion + 'static> NetworkStateIngestion<I> {
	/// Wraps `inner` and subscribes to `monitor`.
	pub fn new(inner: I, monitor: &NetworkStateMonitor) -> Arc<Self> {
		let connected = monitor.is_connected();
		let (connectivity, _) = watch::channel(connected);
		let gate = Arc::new(Self {
			inner,
			state: Mutex::new(GateState {
				connected,
				queue: VecDeque::new(),
				closed: CancellationToken::new(),
			}),
			connectivity,
		});
		let listener: Arc<dyn NetworkStateListener> = gate.clone();
		monitor.add_listener(&listener);
		gate
	}

	pub fn inner(&self) -> &I {
		&self.inner
	}

	/// Number of calls waiting for the network.
	pub fn queued(&self) -> usize {
		lock(&self.state).queue.len()
	}
}

impl<I: Ingestion> NetworkStateListener for NetworkStateIngestion<I> {
	fn on_network_state_updated(&self, connected: bool) {
		let released = {
			let mut state = lock(&self.state);
			state.connected = connected;
			// Published under the lock so a released call never subscribes to a
			// stale `false` and abandons the send it is about to start.
			self.connectivity.send_replace(connected);
			if connected {
				std::mem::take(&mut state.queue)
			} else {
				VecDeque::new()
			}
		};
		if !released.is_empty() {
			debug!(count = released.len(), "network is back, releasing queued calls");
		}
		for waiter in released {
			let _ = waiter.send(());
		}
	}
}

enum Admission {
	Send(watch::Receiver<bool>),
	Wait(oneshot::Receiver<()>),
}

#[async_trait]
impl<I: Ingestion> Ingestion for NetworkStateIngestion<I> {
	async fn send(&self, request: &IngestionRequest) -> Result<IngestionResponse> {
		loop {
			let (closed, admission) = {
				let mut state = lock(&self.state);
				let closed = state.closed.clone();
				if closed.is_cancelled() {
					return Err(IngestionError::Cancelled);
				}
				if state.connected {
					(closed, Admission::Send(self.connectivity.subscribe()))
				} else {
					let (tx, rx) = oneshot::channel();
					state.queue.push_back(tx);
					(closed, Admission::Wait(rx))
				}
			};

			let mut connectivity = match admission {
				Admission::Send(connectivity) => connectivity,
				Admission::Wait(waiter) => {
					debug!("network is down, queueing call");
					tokio::select! {
						_ = closed.cancelled() => return Err(IngestionError::Cancelled),
						released = waiter => {
							if released.is_err() {
								return Err(IngestionError::Cancelled);
							}
						}
					}
					continue;
				}
			};

			tokio::select! {
				result = self.inner.send(request) => return result,
				_ = went_down(&mut connectivity) => {
					debug!("network went down during call, queueing it again");
				}
				_ = closed.cancelled() => return Err(IngestionError::Cancelled),
			}
		}
	}

	async fn close(&self) {
		let queued = {
			let mut state = lock(&self.state);
			state.closed.cancel();
			std::mem::take(&mut state.queue)
		};
		debug!(queued = queued.len(), "closing network gate");
		drop(queued);
		self.inner.close().await;
	}

	async fn reopen(&self) {
		{
			let mut state = lock(&self.state);
			if state.closed.is_cancelled() {
				state.closed = CancellationToken::new();
			}
		}
		self.inner.reopen().await;
	}
}

async fn went_down(connectivity: &mut watch::Receiver<bool>) {
	if connectivity.wait_for(|connected| !*connected).await.is_err() {
		std::future::pending::<()>().await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ingestion::send_async;
	use crate::testing::{request, MockIngestion, RecordingCallback};
	use std::time::Duration;

	#[test]
	fn test_monitor_ignores_repeated_state() {
		struct Counter(Mutex<Vec<bool>>);
		impl NetworkStateListener for Counter {
			fn on_network_state_updated(&self, connected: bool) {
				self.0.lock().unwrap().push(connected);
			}
		}

		let monitor = NetworkStateMonitor::new(true);
		let counter = Arc::new(Counter(Mutex::new(Vec::new())));
		let listener: Arc<dyn NetworkStateListener> = counter.clone();
		monitor.add_listener(&listener);

		monitor.set_connected(true);
		monitor.set_connected(false);
		monitor.set_connected(false);
		monitor.set_connected(true);

		assert_eq!(*counter.0.lock().unwrap(), vec![false, true]);
	}

	#[test]
	fn test_monitor_holds_listeners_weakly() {
		let monitor = NetworkStateMonitor::new(true);
		let gate = NetworkStateIngestion::new(MockIngestion::new(), &monitor);
		assert_eq!(monitor.listener_count(), 1);
		drop(gate);
		assert_eq!(monitor.listener_count(), 0);
		monitor.set_connected(false);
	}

	#[tokio::test]
	async fn test_sends_immediately_when_connected() {
		let monitor = NetworkStateMonitor::new(true);
		let mock = Arc::new(MockIngestion::new());
		let gate = NetworkStateIngestion::new(mock.clone(), &monitor);

		gate.send(&request(1)).await.unwrap();
		assert_eq!(mock.sent().len(), 1);
	}

	#[tokio::test]
	async fn test_queues_while_down_and_releases_in_order() {
		let monitor = NetworkStateMonitor::new(false);
		let mock = Arc::new(MockIngestion::new());
		let gate = NetworkStateIngestion::new(mock.clone(), &monitor);
		let callback = Arc::new(RecordingCallback::default());

		for size in 1..=3 {
			send_async(gate.clone(), request(size), callback.clone());
			while gate.queued() < size {
				tokio::task::yield_now().await;
			}
		}
		assert!(mock.sent().is_empty());

		monitor.set_connected(true);
		callback.wait_for_outcomes(3).await;

		let sizes: Vec<_> = mock.sent().iter().map(|r| r.logs.len()).collect();
		assert_eq!(sizes, vec![1, 2, 3]);
		assert_eq!(callback.successes(), 3);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn test_released_calls_send_exactly_once() {
		for _ in 0..50 {
			let monitor = NetworkStateMonitor::new(false);
			let mock = Arc::new(MockIngestion::new());
			mock.set_delay(Duration::from_millis(1));
			let gate = NetworkStateIngestion::new(mock.clone(), &monitor);

			let sends: Vec<_> = (1..=8)
				.map(|size| {
					let gate = gate.clone();
					tokio::spawn(async move { gate.send(&request(size)).await })
				})
				.collect();
			while gate.queued() < 8 {
				tokio::task::yield_now().await;
			}

			monitor.set_connected(true);
			for send in sends {
				send.await.unwrap().unwrap();
			}
			assert_eq!(mock.sent().len(), 8);
		}
	}

	#[tokio::test(start_paused = true)]
	async fn test_network_loss_requeues_in_flight_call() {
		let monitor = NetworkStateMonitor::new(true);
		let mock = Arc::new(MockIngestion::new());
		mock.set_delay(Duration::from_secs(5));
		let gate = NetworkStateIngestion::new(mock.clone(), &monitor);
		let callback = Arc::new(RecordingCallback::default());

		send_async(gate.clone(), request(1), callback.clone());
		mock.wait_for_sends(1).await;

		monitor.set_connected(false);
		while gate.queued() < 1 {
			tokio::task::yield_now().await;
		}
		assert_eq!(callback.successes() + callback.failures(), 0);

		monitor.set_connected(true);
		callback.wait_for_outcomes(1).await;
		assert_eq!(mock.sent().len(), 2);
		assert_eq!(callback.successes(), 1);
	}

	#[tokio::test]
	async fn test_close_cancels_queued_calls_silently() {
		let monitor = NetworkStateMonitor::new(false);
		let mock = Arc::new(MockIngestion::new());
		let gate = NetworkStateIngestion::new(mock.clone(), &monitor);
		let callback = Arc::new(RecordingCallback::default());

		let call = send_async(gate.clone(), request(1), callback.clone());
		while gate.queued() < 1 {
			tokio::task::yield_now().await;
		}

		gate.close().await;
		while !call.is_finished() {
			tokio::task::yield_now().await;
		}

		assert_eq!(gate.queued(), 0);
		assert_eq!(mock.closes(), 1);
		assert_eq!(callback.successes() + callback.failures(), 0);
		assert!(matches!(
			gate.send(&request(1)).await,
			Err(IngestionError::Cancelled)
		));

		gate.reopen().await;
		monitor.set_connected(true);
		gate.send(&request(1)).await.unwrap();
		assert_eq!(mock.reopens(), 1);
	}
}
