// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Core types for the Beacon telemetry SDK.
//!
//! This crate provides the types shared by the persistence layer, the
//! ingestion transports and the channel:
//! - [`Log`] records and the [`LogContainer`] sent to ingestion
//! - store identifiers ([`LocalId`], [`BatchId`]) and [`SizeClass`]
//! - per-group batching configuration ([`GroupConfig`]) and its defaults
//! - a [`Properties`] builder for log payloads

pub mod group;
pub mod ids;
pub mod log;
pub mod properties;

pub use group::{
	GroupConfig, ANALYTICS_COUNT, ANALYTICS_GROUP, ANALYTICS_INTERVAL, ERRORS_GROUP, ERROR_COUNT,
	ERROR_INTERVAL, MAX_PENDING_COUNT,
};
pub use ids::{BatchId, LocalId, SizeClass, UnknownSizeClass};
pub use log::{Log, LogContainer};
pub use properties::Properties;
