// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Shared HTTP utilities for Beacon.
//!
//! This crate provides:
//! - A pre-configured HTTP client with consistent User-Agent header
//! - Retry primitives (intervals, jitter, recoverable-error classification)
//!   used by the ingestion retry wrapper

mod client;
mod retry;

pub use client::{builder, new_client_with_timeout, user_agent, SDK_NAME, SDK_VERSION};
pub use retry::{
	calculate_delay, is_recoverable_status, retry, RetryConfig, RetryableError,
	DEFAULT_RETRY_INTERVALS, RETRY_AFTER_MS_HEADER,
};
