// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Retry policy with a fixed ascending interval table and jitter.

use reqwest::StatusCode;
use std::time::Duration;
use tracing::warn;

/// Header a server may set to dictate the delay before the next attempt.
pub const RETRY_AFTER_MS_HEADER: &str = "x-ms-retry-after-ms";

/// Default intervals: 10 seconds, 5 minutes, 20 minutes.
pub const DEFAULT_RETRY_INTERVALS: [Duration; 3] = [
	Duration::from_secs(10),
	Duration::from_secs(5 * 60),
	Duration::from_secs(20 * 60),
];

/// Retry schedule. One retry is attempted per interval; once the table is
/// exhausted the last error is returned.
#[derive(Debug, Clone)]
pub struct RetryConfig {
	pub intervals: Vec<Duration>,
	pub jitter: bool,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			intervals: DEFAULT_RETRY_INTERVALS.to_vec(),
			jitter: true,
		}
	}
}

impl RetryConfig {
	/// Maximum number of retries after the first attempt.
	pub fn max_retries(&self) -> usize {
		self.intervals.len()
	}
}

pub trait RetryableError {
	fn is_retryable(&self) -> bool;

	/// Server-provided delay overriding the interval table.
	fn retry_after(&self) -> Option<Duration> {
		None
	}
}

/// Returns true for statuses that indicate a transient server-side condition.
pub fn is_recoverable_status(status: u16) -> bool {
	status >= 500 || status == 408 || status == 429
}

impl RetryableError for reqwest::Error {
	fn is_retryable(&self) -> bool {
		if self.is_timeout() || self.is_connect() || self.is_request() {
			return true;
		}

		if let Some(status) = self.status() {
			return is_recoverable_status(status.as_u16());
		}

		false
	}
}

impl RetryableError for StatusCode {
	fn is_retryable(&self) -> bool {
		is_recoverable_status(self.as_u16())
	}
}

/// Delay before retry number `attempt` (0-based): half the configured interval
/// plus up to another half of random jitter.
pub fn calculate_delay(cfg: &RetryConfig, attempt: usize) -> Duration {
	let Some(interval) = cfg
		.intervals
		.get(attempt)
		.or_else(|| cfg.intervals.last())
		.copied()
	else {
		return Duration::ZERO;
	};

	if !cfg.jitter {
		return interval;
	}

	let half = interval.as_secs_f64() / 2.0;
	Duration::from_secs_f64(half + half * fastrand::f64())
}

/// Runs `f` until it succeeds, fails with a non-retryable error, or the
/// interval table is exhausted.
///
/// Dropping the returned future cancels both the running attempt and any
/// pending backoff sleep.
pub async fn retry<F, Fut, T, E>(cfg: &RetryConfig, mut f: F) -> Result<T, E>
where
	F: FnMut() -> Fut,
	Fut: std::future::Future<Output = Result<T, E>>,
	E: RetryableError + std::fmt::Display,
{
	let mut attempt = 0;

	loop {
		match f().await {
			Ok(result) => return Ok(result),
			Err(err) => {
				if !err.is_retryable() {
					warn!(
							error = %err,
							attempt = attempt + 1,
							"non-retryable error encountered"
					);
					return Err(err);
				}

				if attempt >= cfg.max_retries() {
					warn!(
							error = %err,
							attempt = attempt + 1,
							max_retries = cfg.max_retries(),
							"max retry attempts exhausted"
					);
					return Err(err);
				}

				let delay = err
					.retry_after()
					.unwrap_or_else(|| calculate_delay(cfg, attempt));
				attempt += 1;
				warn!(
						error = %err,
						attempt = attempt,
						delay_ms = delay.as_millis() as u64,
						"try failed and will be retried"
				);

				tokio::time::sleep(delay).await;
			}
		}
	}
}
