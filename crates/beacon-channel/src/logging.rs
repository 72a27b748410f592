// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Opt-in `tracing` subscriber for host applications.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Installs a fmt subscriber filtered by `RUST_LOG`, or `level` when
/// `RUST_LOG` is unset.
///
/// Returns false when a global subscriber was already installed.
pub fn init(level: &str) -> bool {
	tracing_subscriber::registry()
		.with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
		.with(tracing_subscriber::fmt::layer())
		.try_init()
		.is_ok()
}
