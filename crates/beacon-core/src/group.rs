// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Group names and per-group batching defaults.

use std::time::Duration;

/// Group used by analytics events.
pub const ANALYTICS_GROUP: &str = "group_analytics";
/// Group used by crash and error reports.
pub const ERRORS_GROUP: &str = "group_errors";

/// Analytics logs are flushed once this many are pending.
pub const ANALYTICS_COUNT: usize = 50;
/// Error logs are flushed as soon as one is pending.
pub const ERROR_COUNT: usize = 1;
pub const ANALYTICS_INTERVAL: Duration = Duration::from_millis(3000);
pub const ERROR_INTERVAL: Duration = Duration::from_millis(3000);
/// Maximum number of unresolved batches per group.
pub const MAX_PENDING_COUNT: usize = 3;

/// Batching policy for one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupConfig {
	/// Pending-log threshold that triggers an immediate flush; also the batch size.
	pub max_logs_per_batch: usize,
	/// Delay after the first pending log before a flush happens regardless of count.
	pub batch_interval: Duration,
	/// Outstanding batch cap (back-pressure).
	pub max_parallel_batches: usize,
}

impl GroupConfig {
	pub fn new(
		max_logs_per_batch: usize,
		batch_interval: Duration,
		max_parallel_batches: usize,
	) -> Self {
		Self {
			max_logs_per_batch,
			batch_interval,
			max_parallel_batches,
		}
	}

	pub fn analytics() -> Self {
		Self::new(ANALYTICS_COUNT, ANALYTICS_INTERVAL, MAX_PENDING_COUNT)
	}

	pub fn errors() -> Self {
		Self::new(ERROR_COUNT, ERROR_INTERVAL, MAX_PENDING_COUNT)
	}

	/// Default policy for a well-known group name, analytics policy otherwise.
	pub fn for_group(name: &str) -> Self {
		match name {
			ERRORS_GROUP => Self::errors(),
			_ => Self::analytics(),
		}
	}
}

impl Default for GroupConfig {
	fn default() -> Self {
		Self::analytics()
	}
}
