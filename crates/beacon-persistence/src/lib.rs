// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Local storage for Beacon.
//!
//! - [`Persistence`]: the bounded per-group log store. SQLite backed, with a
//!   transparent in-memory fallback and sidecar files for large payloads.
//! - [`PendingBatches`]: which rows are checked out in which batch.
//! - [`DocumentStore`]: offline document cache with pending operations.

pub mod documents;
pub mod error;
mod memory;
pub mod pending;
pub mod pool;
mod sqlite;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use documents::{CachedDocument, DocumentStore, OperationKind, PendingOperation, TimeToLive};
pub use error::{PersistenceError, Result};
pub use pending::PendingBatches;
pub use store::{
	Persistence, StorageConfig, DATABASE_FILE, DEFAULT_GROUP_CAPACITY,
	DEFAULT_LARGE_PAYLOAD_THRESHOLD,
};
