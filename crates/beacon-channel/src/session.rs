// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Session correlation layered on top of [`Channel`].

use beacon_core::Log;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::channel::Channel;
use crate::error::Result;

pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(20);

/// Type of the log that opens a session.
pub const START_SESSION_TYPE: &str = "start_session";

#[derive(Debug, Default)]
struct SessionState {
	sid: Option<Uuid>,
	last_queued: Option<Instant>,
	last_resumed: Option<Instant>,
	last_paused: Option<Instant>,
}

impl SessionState {
	/// A session expires once nothing was queued for `timeout` and the app
	/// spent at least `timeout` in the background, either right now or
	/// between the last pause and resume.
	fn has_timed_out(&self, now: Instant, timeout: Duration) -> bool {
		let Some(paused) = self.last_paused else {
			return false;
		};
		let last_queued = self.last_queued.unwrap_or(paused);
		let no_log_for_long = now.saturating_duration_since(last_queued) >= timeout;

		let went_quiet = paused.max(last_queued);
		let was_background_for_long = match self.last_resumed {
			Some(resumed) if resumed > paused => {
				resumed.saturating_duration_since(went_quiet) >= timeout
			}
			_ => false,
		};
		let is_background_for_long = match self.last_resumed {
			Some(resumed) if resumed > paused => false,
			_ => now.saturating_duration_since(went_quiet) >= timeout,
		};

		no_log_for_long && (was_background_for_long || is_background_for_long)
	}
}

/// Stamps every log with the current session id, opening a new session
/// with a `start_session` log when needed.
pub struct SessionDecorator {
	channel: Channel,
	group: String,
	timeout: Duration,
	state: Mutex<SessionState>,
}

impl SessionDecorator {
	/// `group` receives the generated `start_session` logs.
	pub fn new(channel: Channel, group: impl Into<String>) -> Self {
		Self {
			channel,
			group: group.into(),
			timeout: DEFAULT_SESSION_TIMEOUT,
			state: Mutex::new(SessionState::default()),
		}
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	pub fn channel(&self) -> &Channel {
		&self.channel
	}

	pub async fn session_id(&self) -> Option<Uuid> {
		self.state.lock().await.sid
	}

	/// Enqueues `log` into `group` tagged with the session id.
	///
	/// The session lock is held until the log is queued so a
	/// `start_session` log always lands before the logs of its session.
	pub async fn enqueue(&self, mut log: Log, group: &str) -> Result<()> {
		if log.log_type == START_SESSION_TYPE {
			return self.channel.enqueue(log, group).await;
		}

		let mut state = self.state.lock().await;
		self.start_session_if_needed(&mut state).await?;
		log.session_id = state.sid;
		state.last_queued = Some(Instant::now());
		self.channel.enqueue(log, group).await
	}

	/// Call when the host application comes to the foreground.
	pub async fn on_foreground(&self) -> Result<()> {
		let mut state = self.state.lock().await;
		debug!("application resumed");
		state.last_resumed = Some(Instant::now());
		self.start_session_if_needed(&mut state).await
	}

	/// Call when the host application goes to the background.
	pub async fn on_background(&self) {
		let mut state = self.state.lock().await;
		debug!("application paused");
		state.last_paused = Some(Instant::now());
	}

	async fn start_session_if_needed(&self, state: &mut SessionState) -> Result<()> {
		let now = Instant::now();
		if state.sid.is_some() && !state.has_timed_out(now, self.timeout) {
			return Ok(());
		}

		let sid = Uuid::now_v7();
		info!(session_id = %sid, "starting session");
		state.sid = Some(sid);
		state.last_queued = Some(now);

		let mut start = Log::new(START_SESSION_TYPE);
		start.session_id = Some(sid);
		self.channel.enqueue(start, &self.group).await
	}
}
