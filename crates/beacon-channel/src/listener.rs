// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Callbacks exposed to features built on the channel.
//!
//! Notifications are delivered in order from a dispatcher task, never while
//! the channel lock is held, so listeners may call back into the channel.

use beacon_core::{GroupConfig, Log};

use crate::error::ChannelError;

/// Per-group delivery callbacks, invoked once per log.
pub trait GroupListener: Send + Sync {
	fn on_before_sending(&self, _log: &Log) {}
	fn on_success(&self, _log: &Log) {}
	fn on_failure(&self, _log: &Log, _error: &ChannelError) {}
}

/// Channel-wide hooks.
///
/// `on_preparing_log` and `should_filter` run synchronously on the
/// enqueuing task before the log is persisted.
pub trait ChannelListener: Send + Sync {
	fn on_preparing_log(&self, _log: &mut Log, _group: &str) {}

	/// Returning true drops the log.
	fn should_filter(&self, _log: &Log, _group: &str) -> bool {
		false
	}

	fn on_group_added(&self, _group: &str, _config: &GroupConfig) {}
	fn on_group_removed(&self, _group: &str) {}
	fn on_clear(&self, _group: &str) {}
	fn on_globally_enabled(&self, _enabled: bool) {}
}
