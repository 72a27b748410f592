// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! The channel: per-group counters and timers deciding when a batch is
//! pulled from storage and handed to ingestion.
//!
//! All state lives behind one async mutex. Producers, flush timers and
//! ingestion completions serialize through it. Completions carry the epoch
//! they were sent in; anything from before the last suspend is ignored.
//! Listener notifications are queued under the lock and delivered by a
//! dispatcher task after it is released.

use async_trait::async_trait;
use beacon_core::{BatchId, GroupConfig, Log, LogContainer};
use beacon_ingestion::{
	send_async, Ingestion, IngestionError, IngestionRequest, IngestionResponse, ServiceCall,
	ServiceCallback,
};
use beacon_persistence::Persistence;
use chrono::Utc;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{ChannelError, Result};
use crate::listener::{ChannelListener, GroupListener};

/// Page size used when draining a group on disable.
const CLEAR_BATCH_SIZE: usize = 100;

type ChannelListeners = Arc<StdMutex<Vec<Arc<dyn ChannelListener>>>>;

struct InFlight {
	logs: Vec<Log>,
	call: ServiceCall,
}

struct GroupState {
	config: GroupConfig,
	listener: Option<Arc<dyn GroupListener>>,
	/// Persisted logs not yet part of a batch.
	pending_log_count: usize,
	sending: HashMap<BatchId, InFlight>,
	timer: Option<JoinHandle<()>>,
	timer_generation: u64,
	paused: bool,
}

impl GroupState {
	fn new(
		config: GroupConfig,
		listener: Option<Arc<dyn GroupListener>>,
		pending_log_count: usize,
	) -> Self {
		Self {
			config,
			listener,
			pending_log_count,
			sending: HashMap::new(),
			timer: None,
			timer_generation: 0,
			paused: false,
		}
	}

	fn cancel_timer(&mut self) {
		if let Some(timer) = self.timer.take() {
			timer.abort();
		}
		self.timer_generation += 1;
	}
}

struct State {
	enabled: bool,
	/// Set by the user-level kill switch: new logs are dropped.
	discard_logs: bool,
	epoch: u64,
	groups: HashMap<String, GroupState>,
}

enum Notification {
	BeforeSending(Arc<dyn GroupListener>, Log),
	Success(Arc<dyn GroupListener>, Log),
	Failure(Arc<dyn GroupListener>, Log, Arc<ChannelError>),
	GroupAdded(String, GroupConfig),
	GroupRemoved(String),
	Clear(String),
	GloballyEnabled(bool),
	Barrier(oneshot::Sender<()>),
}

struct Inner {
	persistence: Arc<Persistence>,
	ingestion: Arc<dyn Ingestion>,
	app_secret: String,
	install_id: Uuid,
	state: Mutex<State>,
	listeners: ChannelListeners,
	notifications: mpsc::UnboundedSender<Notification>,
}

/// Batching channel. Cheap to clone; clones share state.
///
/// Must be created inside a tokio runtime.
#[derive(Clone)]
pub struct Channel {
	inner: Arc<Inner>,
}

impl Channel {
	pub fn new(
		persistence: Arc<Persistence>,
		ingestion: Arc<dyn Ingestion>,
		app_secret: impl Into<String>,
		install_id: Uuid,
	) -> Self {
		let (notifications, rx) = mpsc::unbounded_channel();
		let listeners: ChannelListeners = Arc::new(StdMutex::new(Vec::new()));
		tokio::spawn(dispatch_notifications(rx, Arc::clone(&listeners)));

		Self {
			inner: Arc::new(Inner {
				persistence,
				ingestion,
				app_secret: app_secret.into(),
				install_id,
				state: Mutex::new(State {
					enabled: true,
					discard_logs: false,
					epoch: 0,
					groups: HashMap::new(),
				}),
				listeners,
				notifications,
			}),
		}
	}

	pub fn persistence(&self) -> &Arc<Persistence> {
		&self.inner.persistence
	}

	pub fn install_id(&self) -> Uuid {
		self.inner.install_id
	}

	pub fn add_listener(&self, listener: Arc<dyn ChannelListener>) {
		self.listeners_guard().push(listener);
	}

	pub fn remove_listener(&self, listener: &Arc<dyn ChannelListener>) {
		self.listeners_guard().retain(|l| !Arc::ptr_eq(l, listener));
	}

	fn listeners_guard(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn ChannelListener>>> {
		self.inner.listeners.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn channel_listeners(&self) -> Vec<Arc<dyn ChannelListener>> {
		self.listeners_guard().clone()
	}

	fn notify(&self, notification: Notification) {
		// The dispatcher only stops once every channel handle is gone.
		let _ = self.inner.notifications.send(notification);
	}

	/// Resolves once every notification queued so far has been delivered.
	pub async fn wait_for_listeners(&self) {
		let (tx, rx) = oneshot::channel();
		self.notify(Notification::Barrier(tx));
		let _ = rx.await;
	}

	/// Registers a group. Logs left in storage by a previous run count as
	/// pending right away; rows still held by an in-flight batch do not.
	#[instrument(skip(self, config, listener))]
	pub async fn add_group(
		&self,
		group: &str,
		config: GroupConfig,
		listener: Option<Arc<dyn GroupListener>>,
	) {
		let mut guard = self.inner.state.lock().await;
		let state = &mut *guard;
		if state.groups.contains_key(group) {
			debug!(%group, "group already registered");
			return;
		}

		let pending = self
			.inner
			.persistence
			.count(group)
			.await
			.saturating_sub(self.inner.persistence.checked_out_count(group).await);
		info!(
			%group,
			pending,
			max_logs_per_batch = config.max_logs_per_batch,
			batch_interval_ms = config.batch_interval.as_millis() as u64,
			max_parallel_batches = config.max_parallel_batches,
			"adding group"
		);
		state
			.groups
			.insert(group.to_string(), GroupState::new(config, listener, pending));
		self.notify(Notification::GroupAdded(group.to_string(), config));

		if state.enabled {
			self.check_pending_logs(state, group).await;
		}
	}

	/// Unregisters a group. Stored logs stay; in-flight batches finish.
	#[instrument(skip(self))]
	pub async fn remove_group(&self, group: &str) {
		let mut guard = self.inner.state.lock().await;
		let Some(mut removed) = guard.groups.remove(group) else {
			return;
		};
		removed.cancel_timer();
		info!(%group, in_flight = removed.sending.len(), "removed group");
		self.notify(Notification::GroupRemoved(group.to_string()));
	}

	/// Persists `log` in `group` and flushes when the group's threshold is
	/// reached.
	#[instrument(skip(self, log), fields(log_type = %log.log_type))]
	pub async fn enqueue(&self, mut log: Log, group: &str) -> Result<()> {
		let listeners = self.channel_listeners();
		for listener in &listeners {
			listener.on_preparing_log(&mut log, group);
		}
		if listeners.iter().any(|l| l.should_filter(&log, group)) {
			debug!(%group, "log filtered out");
			return Ok(());
		}
		if log.timestamp.is_none() {
			log.timestamp = Some(Utc::now());
		}

		let mut guard = self.inner.state.lock().await;
		let state = &mut *guard;
		let Some(group_state) = state.groups.get(group) else {
			return Err(ChannelError::UnknownGroup(group.to_string()));
		};
		let listener = group_state.listener.clone();

		if state.discard_logs {
			warn!(%group, "channel disabled, discarding log");
			if let Some(listener) = listener {
				self.notify(Notification::BeforeSending(listener.clone(), log.clone()));
				self.notify(Notification::Failure(
					listener,
					log,
					Arc::new(ChannelError::Disabled),
				));
			}
			return Ok(());
		}

		match self.inner.persistence.insert(group, &log).await {
			Ok(id) => debug!(%group, %id, "log persisted"),
			Err(e) => {
				error!(%group, error = %e, "failed to persist log");
				if let Some(listener) = listener {
					self.notify(Notification::BeforeSending(listener.clone(), log.clone()));
					self.notify(Notification::Failure(listener, log, Arc::new(e.into())));
				}
				return Ok(());
			}
		}

		if !state.enabled {
			debug!(%group, "channel suspended, log kept for later");
			return Ok(());
		}
		if let Some(group_state) = state.groups.get_mut(group) {
			group_state.pending_log_count += 1;
		}
		self.check_pending_logs(state, group).await;
		Ok(())
	}

	/// Deletes every stored log of `group`.
	#[instrument(skip(self))]
	pub async fn clear(&self, group: &str) {
		let mut guard = self.inner.state.lock().await;
		if let Some(group_state) = guard.groups.get_mut(group) {
			group_state.cancel_timer();
			group_state.pending_log_count = 0;
		}
		self.inner.persistence.delete_group(group).await;
		self.notify(Notification::Clear(group.to_string()));
	}

	/// `false` is the kill switch: in-flight and stored logs are reported as
	/// failed and deleted, and new logs are discarded. `true` resumes
	/// sending, including after a recoverable ingestion failure.
	#[instrument(skip(self))]
	pub async fn set_enabled(&self, enabled: bool) {
		let mut guard = self.inner.state.lock().await;
		let state = &mut *guard;

		if enabled {
			if state.enabled {
				return;
			}
			info!("enabling channel");
			state.enabled = true;
			state.discard_logs = false;
			self.inner.ingestion.reopen().await;

			let groups: Vec<String> = state.groups.keys().cloned().collect();
			for group in &groups {
				let stored = self.inner.persistence.count(group).await;
				if let Some(group_state) = state.groups.get_mut(group) {
					group_state.pending_log_count = stored;
				}
				self.check_pending_logs(state, group).await;
			}
		} else {
			if !state.enabled && state.discard_logs {
				return;
			}
			info!("disabling channel, stored logs are discarded");
			self.suspend(state, true).await;
			state.discard_logs = true;
		}

		self.notify(Notification::GloballyEnabled(enabled));
	}

	/// Stops sending without touching stored logs. They are picked up on
	/// the next launch or after `set_enabled(true)`.
	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		let mut guard = self.inner.state.lock().await;
		info!("shutting down channel");
		self.suspend(&mut guard, false).await;
	}

	pub async fn pause_group(&self, group: &str) {
		let mut guard = self.inner.state.lock().await;
		if let Some(group_state) = guard.groups.get_mut(group) {
			debug!(%group, "pausing group");
			group_state.paused = true;
			group_state.cancel_timer();
		}
	}

	pub async fn resume_group(&self, group: &str) {
		let mut guard = self.inner.state.lock().await;
		let state = &mut *guard;
		let Some(group_state) = state.groups.get_mut(group) else {
			return;
		};
		debug!(%group, "resuming group");
		group_state.paused = false;
		self.check_pending_logs(state, group).await;
	}

	/// Sends a batch now if the group has pending logs and room for one.
	pub async fn flush(&self, group: &str) {
		let mut guard = self.inner.state.lock().await;
		let state = &mut *guard;
		self.trigger_ingestion(state, group).await;
		self.check_pending_logs(state, group).await;
	}

	pub async fn is_enabled(&self) -> bool {
		self.inner.state.lock().await.enabled
	}

	pub async fn pending_log_count(&self, group: &str) -> Option<usize> {
		let state = self.inner.state.lock().await;
		state.groups.get(group).map(|g| g.pending_log_count)
	}

	pub async fn in_flight_batches(&self, group: &str) -> usize {
		let state = self.inner.state.lock().await;
		state.groups.get(group).map(|g| g.sending.len()).unwrap_or(0)
	}

	pub async fn groups(&self) -> Vec<String> {
		let state = self.inner.state.lock().await;
		let mut groups: Vec<String> = state.groups.keys().cloned().collect();
		groups.sort();
		groups
	}

	/// Flushes every full batch, then arms the group timer for a partial one.
	async fn check_pending_logs(&self, state: &mut State, group: &str) {
		loop {
			let Some(group_state) = state.groups.get(group) else {
				return;
			};
			if group_state.pending_log_count < group_state.config.max_logs_per_batch {
				break;
			}
			if !self.trigger_ingestion(state, group).await {
				break;
			}
		}

		if !state.enabled {
			return;
		}
		let Some(group_state) = state.groups.get_mut(group) else {
			return;
		};
		let pending = group_state.pending_log_count;
		if pending == 0
			|| pending >= group_state.config.max_logs_per_batch
			|| group_state.timer.is_some()
			|| group_state.paused
		{
			return;
		}

		group_state.timer_generation += 1;
		let generation = group_state.timer_generation;
		let interval = group_state.config.batch_interval;
		debug!(%group, pending, delay_ms = interval.as_millis() as u64, "arming flush timer");

		let weak = Arc::downgrade(&self.inner);
		let group = group.to_string();
		group_state.timer = Some(tokio::spawn(async move {
			tokio::time::sleep(interval).await;
			if let Some(inner) = weak.upgrade() {
				Channel { inner }.timer_fired(group, generation).await;
			}
		}));
	}

	fn timer_fired(self, group: String, generation: u64) -> BoxFuture<'static, ()> {
		Box::pin(async move {
			let mut guard = self.inner.state.lock().await;
			let state = &mut *guard;
			let Some(group_state) = state.groups.get_mut(&group) else {
				return;
			};
			if group_state.timer_generation != generation {
				return;
			}
			group_state.timer = None;
			debug!(%group, "flush timer fired");
			self.trigger_ingestion(state, &group).await;
			self.check_pending_logs(state, &group).await;
		})
	}

	/// Checks out up to one batch and starts sending it. Returns true when a
	/// batch was sent.
	async fn trigger_ingestion(&self, state: &mut State, group: &str) -> bool {
		if !state.enabled {
			return false;
		}
		let epoch = state.epoch;
		let Some(group_state) = state.groups.get_mut(group) else {
			return false;
		};
		group_state.cancel_timer();

		if group_state.paused {
			debug!(%group, "group paused, not sending");
			return false;
		}
		if group_state.sending.len() >= group_state.config.max_parallel_batches {
			debug!(
				%group,
				in_flight = group_state.sending.len(),
				"too many batches in flight, waiting"
			);
			return false;
		}
		let limit = group_state
			.pending_log_count
			.min(group_state.config.max_logs_per_batch);
		if limit == 0 {
			return false;
		}
		group_state.pending_log_count -= limit;

		let mut logs = Vec::with_capacity(limit);
		let Some(batch_id) = self.inner.persistence.get_batch(group, limit, &mut logs).await else {
			debug!(%group, "nothing left in storage, resetting pending count");
			group_state.pending_log_count = 0;
			return false;
		};

		debug!(%group, batch_id = %batch_id, count = logs.len(), "sending batch");
		if let Some(listener) = &group_state.listener {
			for log in &logs {
				self.notify(Notification::BeforeSending(Arc::clone(listener), log.clone()));
			}
		}

		let request = IngestionRequest {
			app_secret: self.inner.app_secret.clone(),
			install_id: self.inner.install_id,
			logs: LogContainer::new(logs.clone()),
		};
		let callback = Arc::new(BatchCallback {
			inner: Arc::downgrade(&self.inner),
			group: group.to_string(),
			batch_id: batch_id.clone(),
			epoch,
		});
		let call = send_async(Arc::clone(&self.inner.ingestion), request, callback);
		group_state.sending.insert(batch_id, InFlight { logs, call });
		true
	}

	async fn handle_success(&self, group: &str, batch_id: &BatchId, epoch: u64) {
		let mut guard = self.inner.state.lock().await;
		let state = &mut *guard;
		if state.epoch != epoch {
			debug!(%group, %batch_id, "ignoring completion from before suspend");
			return;
		}
		let Some(in_flight) = state
			.groups
			.get_mut(group)
			.and_then(|g| g.sending.remove(batch_id))
		else {
			self.resolve_orphan(state, group, batch_id, true).await;
			return;
		};
		let Some(group_state) = state.groups.get(group) else {
			return;
		};
		let full = in_flight.logs.len() >= group_state.config.max_logs_per_batch;
		let listener = group_state.listener.clone();

		debug!(%group, %batch_id, count = in_flight.logs.len(), "batch delivered");
		self.inner.persistence.delete_batch(group, batch_id).await;
		if let Some(listener) = listener {
			for log in in_flight.logs {
				self.notify(Notification::Success(Arc::clone(&listener), log));
			}
		}
		self.drain(state, group, full).await;
	}

	async fn handle_failure(
		&self,
		group: &str,
		batch_id: &BatchId,
		epoch: u64,
		error: IngestionError,
	) {
		let mut guard = self.inner.state.lock().await;
		let state = &mut *guard;
		if state.epoch != epoch {
			debug!(%group, %batch_id, "ignoring completion from before suspend");
			return;
		}
		let recoverable = error.is_recoverable();
		let Some(in_flight) = state
			.groups
			.get_mut(group)
			.and_then(|g| g.sending.remove(batch_id))
		else {
			debug!(%group, %batch_id, error = %error, "batch of a removed group failed");
			self.resolve_orphan(state, group, batch_id, !recoverable).await;
			return;
		};

		if recoverable {
			warn!(
				%group,
				%batch_id,
				error = %error,
				"recoverable ingestion failure, suspending channel"
			);
			self.suspend(state, false).await;
			return;
		}

		error!(
			%group,
			%batch_id,
			count = in_flight.logs.len(),
			error = %error,
			"batch rejected by ingestion, dropping it"
		);
		let Some(group_state) = state.groups.get(group) else {
			return;
		};
		let full = in_flight.logs.len() >= group_state.config.max_logs_per_batch;
		let listener = group_state.listener.clone();
		self.inner.persistence.delete_batch(group, batch_id).await;
		if let Some(listener) = listener {
			let error = Arc::new(ChannelError::Ingestion(error));
			for log in in_flight.logs {
				self.notify(Notification::Failure(
					Arc::clone(&listener),
					log,
					Arc::clone(&error),
				));
			}
		}
		self.drain(state, group, full).await;
	}

	/// Settles a batch whose group was removed while it was in flight. The
	/// rows are deleted when `delete` is set. Otherwise they are released, and
	/// a group registered again under the same name picks them up.
	async fn resolve_orphan(
		&self,
		state: &mut State,
		group: &str,
		batch_id: &BatchId,
		delete: bool,
	) {
		if delete {
			self.inner.persistence.delete_batch(group, batch_id).await;
			return;
		}
		let released = self.inner.persistence.release_batch(group, batch_id).await;
		let Some(group_state) = state.groups.get_mut(group) else {
			return;
		};
		group_state.pending_log_count += released;
		debug!(%group, %batch_id, released, "released batch sent before the group was re-added");
		if state.enabled {
			self.check_pending_logs(state, group).await;
		}
	}

	/// Keeps a group moving after a batch resolved. A full batch suggests a
	/// backlog, so the next one goes out without waiting for the timer.
	async fn drain(&self, state: &mut State, group: &str, full_batch: bool) {
		let pending = state
			.groups
			.get(group)
			.map(|g| g.pending_log_count)
			.unwrap_or(0);
		if full_batch && pending > 0 {
			self.trigger_ingestion(state, group).await;
		}
		self.check_pending_logs(state, group).await;
	}

	/// Stops all sending: timers, in-flight calls and the transport.
	///
	/// With `delete_logs` every in-flight and stored log is reported failed
	/// and deleted. Otherwise stored logs are kept and their checkout state
	/// cleared so they can be sent again.
	async fn suspend(&self, state: &mut State, delete_logs: bool) {
		state.enabled = false;
		state.epoch += 1;
		let cancelled = Arc::new(ChannelError::Cancelled);

		for (group, group_state) in state.groups.iter_mut() {
			group_state.cancel_timer();
			group_state.pending_log_count = 0;
			for (batch_id, in_flight) in group_state.sending.drain() {
				in_flight.call.cancel();
				debug!(%group, %batch_id, "cancelled in-flight batch");
				if !delete_logs {
					continue;
				}
				if let Some(listener) = &group_state.listener {
					for log in in_flight.logs {
						self.notify(Notification::Failure(
							Arc::clone(listener),
							log,
							Arc::clone(&cancelled),
						));
					}
				}
			}
		}

		self.inner.ingestion.close().await;

		if delete_logs {
			let groups: Vec<(String, Option<Arc<dyn GroupListener>>)> = state
				.groups
				.iter()
				.map(|(name, g)| (name.clone(), g.listener.clone()))
				.collect();
			for (group, listener) in groups {
				self.discard_stored_logs(&group, listener, &cancelled).await;
			}
		} else {
			self.inner.persistence.clear_checkout_state().await;
		}
	}

	async fn discard_stored_logs(
		&self,
		group: &str,
		listener: Option<Arc<dyn GroupListener>>,
		error: &Arc<ChannelError>,
	) {
		if let Some(listener) = listener {
			loop {
				let mut logs = Vec::new();
				if self
					.inner
					.persistence
					.get_batch(group, CLEAR_BATCH_SIZE, &mut logs)
					.await
					.is_none()
				{
					break;
				}
				for log in logs {
					self.notify(Notification::BeforeSending(Arc::clone(&listener), log.clone()));
					self.notify(Notification::Failure(
						Arc::clone(&listener),
						log,
						Arc::clone(error),
					));
				}
			}
		}
		self.inner.persistence.delete_group(group).await;
	}
}

struct BatchCallback {
	inner: Weak<Inner>,
	group: String,
	batch_id: BatchId,
	epoch: u64,
}

#[async_trait]
impl ServiceCallback for BatchCallback {
	async fn on_call_succeeded(&self, _response: IngestionResponse) {
		if let Some(inner) = self.inner.upgrade() {
			Channel { inner }
				.handle_success(&self.group, &self.batch_id, self.epoch)
				.await;
		}
	}

	async fn on_call_failed(&self, error: IngestionError) {
		if let Some(inner) = self.inner.upgrade() {
			Channel { inner }
				.handle_failure(&self.group, &self.batch_id, self.epoch, error)
				.await;
		}
	}
}

async fn dispatch_notifications(
	mut rx: mpsc::UnboundedReceiver<Notification>,
	listeners: ChannelListeners,
) {
	let snapshot = |listeners: &ChannelListeners| -> Vec<Arc<dyn ChannelListener>> {
		listeners
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.clone()
	};

	while let Some(notification) = rx.recv().await {
		match notification {
			Notification::BeforeSending(listener, log) => listener.on_before_sending(&log),
			Notification::Success(listener, log) => listener.on_success(&log),
			Notification::Failure(listener, log, error) => listener.on_failure(&log, &error),
			Notification::GroupAdded(group, config) => {
				for listener in snapshot(&listeners) {
					listener.on_group_added(&group, &config);
				}
			}
			Notification::GroupRemoved(group) => {
				for listener in snapshot(&listeners) {
					listener.on_group_removed(&group);
				}
			}
			Notification::Clear(group) => {
				for listener in snapshot(&listeners) {
					listener.on_clear(&group);
				}
			}
			Notification::GloballyEnabled(enabled) => {
				for listener in snapshot(&listeners) {
					listener.on_globally_enabled(enabled);
				}
			}
			Notification::Barrier(done) => {
				let _ = done.send(());
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use beacon_ingestion::testing::{http_error, MockIngestion};
	use beacon_persistence::StorageConfig;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;
	use tokio::time::Instant;

	const GROUP: &str = "group_test";

	fn memory_store() -> Arc<Persistence> {
		Arc::new(Persistence::in_memory(StorageConfig::new("unused")))
	}

	async fn channel_with(ingestion: &Arc<MockIngestion>, config: GroupConfig) -> Channel {
		let channel = Channel::new(memory_store(), ingestion.clone(), "secret", Uuid::nil());
		channel.add_group(GROUP, config, None).await;
		channel
	}

	#[derive(Default)]
	struct CountingListener {
		added: AtomicUsize,
		enabled_changes: AtomicUsize,
	}

	impl ChannelListener for CountingListener {
		fn on_preparing_log(&self, log: &mut Log, _group: &str) {
			log.properties.insert("prepared".to_string(), true.into());
		}

		fn should_filter(&self, log: &Log, _group: &str) -> bool {
			log.log_type == "noise"
		}

		fn on_group_added(&self, _group: &str, _config: &GroupConfig) {
			self.added.fetch_add(1, Ordering::SeqCst);
		}

		fn on_globally_enabled(&self, _enabled: bool) {
			self.enabled_changes.fetch_add(1, Ordering::SeqCst);
		}
	}

	#[tokio::test]
	async fn test_enqueue_to_unknown_group_is_rejected() {
		let ingestion = Arc::new(MockIngestion::new());
		let channel = channel_with(&ingestion, GroupConfig::analytics()).await;

		let result = channel.enqueue(Log::new("event"), "group_missing").await;
		assert!(matches!(result, Err(ChannelError::UnknownGroup(g)) if g == "group_missing"));
	}

	#[tokio::test(start_paused = true)]
	async fn test_partial_batch_waits_for_interval() {
		let ingestion = Arc::new(MockIngestion::new());
		let channel = channel_with(
			&ingestion,
			GroupConfig::new(50, Duration::from_secs(3), 3),
		)
		.await;
		let started = Instant::now();

		for _ in 0..10 {
			channel.enqueue(Log::new("event"), GROUP).await.unwrap();
		}
		tokio::time::sleep(Duration::from_millis(2900)).await;
		assert!(ingestion.sent().is_empty());

		ingestion.wait_for_sends(1).await;
		assert!(started.elapsed() >= Duration::from_secs(3));
		let sent = ingestion.sent();
		assert_eq!(sent.len(), 1);
		assert_eq!(sent[0].logs.len(), 10);
		assert_eq!(sent[0].app_secret, "secret");
	}

	#[tokio::test(start_paused = true)]
	async fn test_full_batch_is_sent_without_waiting() {
		let ingestion = Arc::new(MockIngestion::new());
		let channel = channel_with(
			&ingestion,
			GroupConfig::new(3, Duration::from_secs(3), 3),
		)
		.await;
		let started = Instant::now();

		for _ in 0..3 {
			channel.enqueue(Log::new("event"), GROUP).await.unwrap();
		}
		ingestion.wait_for_sends(1).await;

		assert!(started.elapsed() < Duration::from_secs(3));
		assert_eq!(ingestion.sent()[0].logs.len(), 3);
	}

	#[tokio::test(start_paused = true)]
	async fn test_parallel_batches_are_capped() {
		let ingestion = Arc::new(MockIngestion::new());
		ingestion.set_delay(Duration::from_secs(10));
		let channel = channel_with(
			&ingestion,
			GroupConfig::new(1, Duration::from_secs(3), 2),
		)
		.await;

		for _ in 0..5 {
			channel.enqueue(Log::new("event"), GROUP).await.unwrap();
		}
		ingestion.wait_for_sends(2).await;
		assert_eq!(channel.in_flight_batches(GROUP).await, 2);
		assert_eq!(channel.pending_log_count(GROUP).await, Some(3));

		ingestion.wait_for_sends(5).await;
		assert_eq!(ingestion.sent_log_count(), 5);
	}

	#[tokio::test(start_paused = true)]
	async fn test_paused_group_holds_logs_until_resumed() {
		let ingestion = Arc::new(MockIngestion::new());
		let channel = channel_with(
			&ingestion,
			GroupConfig::new(2, Duration::from_secs(3), 3),
		)
		.await;

		channel.pause_group(GROUP).await;
		for _ in 0..4 {
			channel.enqueue(Log::new("event"), GROUP).await.unwrap();
		}
		tokio::time::sleep(Duration::from_secs(10)).await;
		assert!(ingestion.sent().is_empty());
		assert_eq!(channel.pending_log_count(GROUP).await, Some(4));

		channel.resume_group(GROUP).await;
		ingestion.wait_for_sends(2).await;
		assert_eq!(ingestion.sent_log_count(), 4);
	}

	#[tokio::test(start_paused = true)]
	async fn test_flush_sends_partial_batch_early() {
		let ingestion = Arc::new(MockIngestion::new());
		let channel = channel_with(&ingestion, GroupConfig::analytics()).await;

		channel.enqueue(Log::new("event"), GROUP).await.unwrap();
		channel.flush(GROUP).await;
		ingestion.wait_for_sends(1).await;

		assert_eq!(ingestion.sent()[0].logs.len(), 1);
		assert_eq!(channel.pending_log_count(GROUP).await, Some(0));
	}

	#[tokio::test(start_paused = true)]
	async fn test_shutdown_keeps_stored_logs() {
		let ingestion = Arc::new(MockIngestion::new());
		let channel = channel_with(&ingestion, GroupConfig::analytics()).await;

		channel.enqueue(Log::new("event"), GROUP).await.unwrap();
		channel.enqueue(Log::new("event"), GROUP).await.unwrap();
		channel.shutdown().await;
		tokio::time::sleep(Duration::from_secs(10)).await;

		assert!(ingestion.sent().is_empty());
		assert_eq!(ingestion.closes(), 1);
		assert!(!channel.is_enabled().await);
		assert_eq!(channel.persistence().count(GROUP).await, 2);
	}

	#[tokio::test(start_paused = true)]
	async fn test_recoverable_failure_suspends_then_resumes() {
		let ingestion = Arc::new(MockIngestion::new());
		ingestion.push_status(503);
		let channel = channel_with(
			&ingestion,
			GroupConfig::new(1, Duration::from_secs(3), 3),
		)
		.await;

		channel.enqueue(Log::new("event"), GROUP).await.unwrap();
		ingestion.wait_for_sends(1).await;
		while channel.is_enabled().await {
			tokio::task::yield_now().await;
		}
		assert_eq!(channel.persistence().count(GROUP).await, 1);

		channel.set_enabled(true).await;
		ingestion.wait_for_sends(2).await;
		assert_eq!(ingestion.reopens(), 1);
		assert_eq!(ingestion.sent()[1].logs.logs, ingestion.sent()[0].logs.logs);
	}

	#[tokio::test(start_paused = true)]
	async fn test_terminal_failure_drops_batch() {
		let ingestion = Arc::new(MockIngestion::new());
		ingestion.push_error(http_error(400));
		let channel = channel_with(
			&ingestion,
			GroupConfig::new(1, Duration::from_secs(3), 3),
		)
		.await;

		channel.enqueue(Log::new("event"), GROUP).await.unwrap();
		ingestion.wait_for_sends(1).await;
		while channel.persistence().count(GROUP).await > 0 {
			tokio::task::yield_now().await;
		}
		assert!(channel.is_enabled().await);
	}

	#[tokio::test]
	async fn test_channel_listener_hooks() {
		let ingestion = Arc::new(MockIngestion::new());
		let channel = Channel::new(memory_store(), ingestion.clone(), "secret", Uuid::nil());
		let listener = Arc::new(CountingListener::default());
		channel.add_listener(listener.clone());

		channel
			.add_group(GROUP, GroupConfig::analytics(), None)
			.await;
		channel.enqueue(Log::new("noise"), GROUP).await.unwrap();
		channel.enqueue(Log::new("event"), GROUP).await.unwrap();
		channel.set_enabled(false).await;
		channel.set_enabled(false).await;
		channel.wait_for_listeners().await;

		assert_eq!(listener.added.load(Ordering::SeqCst), 1);
		assert_eq!(listener.enabled_changes.load(Ordering::SeqCst), 1);
		assert_eq!(channel.persistence().count(GROUP).await, 0);
	}

	#[tokio::test]
	async fn test_add_group_counts_existing_logs() {
		let ingestion = Arc::new(MockIngestion::new());
		let store = memory_store();
		store.insert(GROUP, &Log::new("event")).await.unwrap();
		store.insert(GROUP, &Log::new("event")).await.unwrap();

		let channel = Channel::new(store, ingestion.clone(), "secret", Uuid::nil());
		channel
			.add_group(GROUP, GroupConfig::analytics(), None)
			.await;

		assert_eq!(channel.pending_log_count(GROUP).await, Some(2));
	}

	#[tokio::test]
	async fn test_remove_group_forgets_state_but_keeps_logs() {
		let ingestion = Arc::new(MockIngestion::new());
		let channel = channel_with(&ingestion, GroupConfig::analytics()).await;
		channel.enqueue(Log::new("event"), GROUP).await.unwrap();

		channel.remove_group(GROUP).await;

		assert_eq!(channel.pending_log_count(GROUP).await, None);
		assert!(channel.groups().await.is_empty());
		assert_eq!(channel.persistence().count(GROUP).await, 1);
	}

	#[tokio::test(start_paused = true)]
	async fn test_batch_delivered_after_group_re_added_is_deleted() {
		let ingestion = Arc::new(MockIngestion::new());
		ingestion.set_delay(Duration::from_secs(5));
		let config = GroupConfig::new(1, Duration::from_secs(3), 3);
		let channel = channel_with(&ingestion, config).await;

		channel.enqueue(Log::new("event"), GROUP).await.unwrap();
		ingestion.wait_for_sends(1).await;
		channel.remove_group(GROUP).await;
		channel.add_group(GROUP, config, None).await;
		assert_eq!(channel.pending_log_count(GROUP).await, Some(0));

		tokio::time::sleep(Duration::from_secs(60)).await;

		assert_eq!(ingestion.sent().len(), 1);
		assert_eq!(channel.persistence().count(GROUP).await, 0);
		assert_eq!(channel.persistence().pending_batch_count(GROUP).await, 0);
		assert_eq!(channel.pending_log_count(GROUP).await, Some(0));
	}

	#[tokio::test(start_paused = true)]
	async fn test_recoverable_failure_after_group_re_added_releases_batch() {
		let ingestion = Arc::new(MockIngestion::new());
		ingestion.set_delay(Duration::from_secs(5));
		ingestion.push_status(503);
		let config = GroupConfig::new(1, Duration::from_secs(3), 3);
		let channel = channel_with(&ingestion, config).await;

		channel.enqueue(Log::new("event"), GROUP).await.unwrap();
		ingestion.wait_for_sends(1).await;
		channel.remove_group(GROUP).await;
		channel.add_group(GROUP, config, None).await;

		ingestion.wait_for_sends(2).await;
		tokio::time::sleep(Duration::from_secs(60)).await;

		assert!(channel.is_enabled().await);
		assert_eq!(ingestion.sent()[1].logs.logs, ingestion.sent()[0].logs.logs);
		assert_eq!(channel.persistence().count(GROUP).await, 0);
		assert_eq!(channel.persistence().pending_batch_count(GROUP).await, 0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_recoverable_failure_of_removed_group_releases_batch() {
		let ingestion = Arc::new(MockIngestion::new());
		ingestion.set_delay(Duration::from_secs(5));
		ingestion.push_status(503);
		let channel = channel_with(
			&ingestion,
			GroupConfig::new(1, Duration::from_secs(3), 3),
		)
		.await;

		channel.enqueue(Log::new("event"), GROUP).await.unwrap();
		ingestion.wait_for_sends(1).await;
		channel.remove_group(GROUP).await;
		tokio::time::sleep(Duration::from_secs(60)).await;

		assert!(channel.is_enabled().await);
		assert_eq!(channel.persistence().count(GROUP).await, 1);
		assert_eq!(channel.persistence().pending_batch_count(GROUP).await, 0);
	}
}
