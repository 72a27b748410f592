// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! The bounded local store.
//!
//! [`Persistence`] keeps every group's logs in SQLite until the database
//! fails. The first backend error switches the instance to a memory backend
//! for the rest of its lifetime, so callers never see storage errors. Only
//! record-level failures (serialization, large payload files) come back
//! from [`Persistence::insert`].

use beacon_core::{BatchId, LocalId, Log};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};

use crate::documents::DocumentStore;
use crate::error::{PersistenceError, Result};
use crate::memory::MemoryBackend;
use crate::pending::PendingBatches;
use crate::pool::{create_pool, last_log_id, migrate_logs};
use crate::sqlite::SqliteBackend;

/// Default maximum number of rows kept per group.
pub const DEFAULT_GROUP_CAPACITY: usize = 300;

/// Payloads larger than this are written to a sidecar file (1.9 MiB).
pub const DEFAULT_LARGE_PAYLOAD_THRESHOLD: usize = 1_992_294;

pub const DATABASE_FILE: &str = "beacon.db";
const LARGE_PAYLOAD_DIR: &str = "large";

#[derive(Debug, Clone)]
pub struct StorageConfig {
	/// Directory holding the database and large payload files.
	pub path: PathBuf,
	pub group_capacity: usize,
	pub large_payload_threshold: usize,
}

impl StorageConfig {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			group_capacity: DEFAULT_GROUP_CAPACITY,
			large_payload_threshold: DEFAULT_LARGE_PAYLOAD_THRESHOLD,
		}
	}

	pub fn with_group_capacity(mut self, capacity: usize) -> Self {
		self.group_capacity = capacity;
		self
	}

	pub fn with_large_payload_threshold(mut self, threshold: usize) -> Self {
		self.large_payload_threshold = threshold;
		self
	}
}

enum Backend {
	Sqlite(SqliteBackend),
	Memory(MemoryBackend),
}

struct State {
	backend: Backend,
	pending: PendingBatches,
	capacities: HashMap<String, usize>,
	/// Highest id handed out so far, by either backend.
	last_id: i64,
}

impl State {
	fn capacity(&self, group: &str, default: usize) -> usize {
		self.capacities.get(group).copied().unwrap_or(default)
	}

	fn fail_over(&mut self, operation: &'static str, err: PersistenceError) {
		if let Backend::Sqlite(_) = self.backend {
			error!(
				operation,
				error = %err,
				"storage backend failed, switching to in-memory store"
			);
			self.backend = Backend::Memory(MemoryBackend::starting_after(self.last_id));
		}
	}
}

pub struct Persistence {
	config: StorageConfig,
	state: Mutex<State>,
}

impl Persistence {
	/// Opens (or creates) the store under `config.path`.
	///
	/// If the database cannot be opened the store starts on the memory
	/// backend instead.
	#[instrument(skip(config), fields(path = %config.path.display()))]
	pub async fn open(config: StorageConfig) -> Self {
		match Self::open_sqlite(&config).await {
			Ok((backend, last_id)) => {
				debug!(last_id, "opened log store");
				Self::with_backend(config, Backend::Sqlite(backend), last_id)
			}
			Err(e) => {
				error!(error = %e, "failed to open log store, using in-memory store");
				Self::with_backend(config, Backend::Memory(MemoryBackend::default()), 0)
			}
		}
	}

	/// Store that never touches the disk.
	pub fn in_memory(config: StorageConfig) -> Self {
		Self::with_backend(config, Backend::Memory(MemoryBackend::default()), 0)
	}

	async fn open_sqlite(config: &StorageConfig) -> Result<(SqliteBackend, i64)> {
		tokio::fs::create_dir_all(&config.path).await?;
		let pool = create_pool(&config.path.join(DATABASE_FILE)).await?;
		migrate_logs(&pool).await?;
		DocumentStore::new(pool.clone()).migrate().await?;
		let last_id = last_log_id(&pool).await?;
		let backend = SqliteBackend::new(
			pool,
			config.path.join(LARGE_PAYLOAD_DIR),
			config.large_payload_threshold,
		);
		Ok((backend, last_id))
	}

	fn with_backend(config: StorageConfig, backend: Backend, last_id: i64) -> Self {
		Self {
			config,
			state: Mutex::new(State {
				backend,
				pending: PendingBatches::new(),
				capacities: HashMap::new(),
				last_id,
			}),
		}
	}

	pub fn config(&self) -> &StorageConfig {
		&self.config
	}

	/// Overrides the row limit for one group.
	pub async fn set_group_capacity(&self, group: &str, capacity: usize) {
		let mut state = self.state.lock().await;
		state.capacities.insert(group.to_string(), capacity);
	}

	/// Persists `log` and returns its id.
	///
	/// Inserting beyond the group's capacity silently evicts the oldest rows.
	#[instrument(skip(self, log), fields(log_type = %log.log_type))]
	pub async fn insert(&self, group: &str, log: &Log) -> Result<LocalId> {
		let payload = log.to_json()?;
		let mut guard = self.state.lock().await;
		let state = &mut *guard;
		let capacity = state.capacity(group, self.config.group_capacity);

		loop {
			let result = match &mut state.backend {
				Backend::Sqlite(db) => db.insert(group, &payload, capacity).await,
				Backend::Memory(mem) => {
					let out = mem.insert(group, log.clone(), capacity);
					state.last_id = mem.last_id();
					Ok(out)
				}
			};
			match result {
				Ok((id, evicted)) => {
					state.last_id = state.last_id.max(id.0);
					if !evicted.is_empty() {
						debug!(%group, evicted = evicted.len(), capacity, "evicted oldest logs");
					}
					return Ok(id);
				}
				Err(e) if e.is_backend_failure() => state.fail_over("insert", e),
				Err(e) => return Err(e),
			}
		}
	}

	/// Checks out up to `limit` of the oldest eligible logs of `group`,
	/// appending them to `out`. Returns `None` when nothing is eligible.
	#[instrument(skip(self, out))]
	pub async fn get_batch(&self, group: &str, limit: usize, out: &mut Vec<Log>) -> Option<BatchId> {
		if limit == 0 {
			return None;
		}
		let mut guard = self.state.lock().await;
		let state = &mut *guard;

		let rows = loop {
			let result = match &mut state.backend {
				Backend::Sqlite(db) => db.eligible(group, limit, &state.pending).await,
				Backend::Memory(mem) => Ok(mem.eligible(group, limit, &state.pending)),
			};
			match result {
				Ok(rows) => break rows,
				Err(e) => state.fail_over("get_batch", e),
			}
		};

		if rows.is_empty() {
			return None;
		}

		let batch_id = BatchId::new();
		let mut ids = Vec::with_capacity(rows.len());
		for (id, log) in rows {
			ids.push(id);
			out.push(log);
		}
		debug!(%group, batch_id = %batch_id, count = ids.len(), "checked out batch");
		state.pending.add(group, batch_id.clone(), ids);
		Some(batch_id)
	}

	/// Deletes exactly the rows of `batch_id` and returns how many there were.
	#[instrument(skip(self))]
	pub async fn delete_batch(&self, group: &str, batch_id: &BatchId) -> usize {
		let mut guard = self.state.lock().await;
		let state = &mut *guard;
		let Some(ids) = state.pending.remove(group, batch_id) else {
			debug!(%group, %batch_id, "unknown batch, nothing to delete");
			return 0;
		};

		loop {
			let result = match &mut state.backend {
				Backend::Sqlite(db) => db.delete(&ids).await,
				Backend::Memory(mem) => {
					mem.delete(group, &ids);
					Ok(())
				}
			};
			match result {
				Ok(()) => return ids.len(),
				Err(e) => state.fail_over("delete_batch", e),
			}
		}
	}

	/// Returns the rows of `batch_id` to the eligible set without deleting
	/// them. Returns how many rows were released, zero for an unknown batch.
	#[instrument(skip(self))]
	pub async fn release_batch(&self, group: &str, batch_id: &BatchId) -> usize {
		let Some(ids) = self.state.lock().await.pending.remove(group, batch_id) else {
			return 0;
		};
		debug!(%group, %batch_id, count = ids.len(), "released batch");
		ids.len()
	}

	/// Deletes every row of `group`, checked out or not.
	#[instrument(skip(self))]
	pub async fn delete_group(&self, group: &str) {
		let mut guard = self.state.lock().await;
		let state = &mut *guard;
		let dropped = state.pending.remove_group(group);

		loop {
			let result = match &mut state.backend {
				Backend::Sqlite(db) => db.delete_group(group).await,
				Backend::Memory(mem) => {
					mem.delete_group(group);
					Ok(())
				}
			};
			match result {
				Ok(()) => break,
				Err(e) => state.fail_over("delete_group", e),
			}
		}
		info!(%group, dropped_batches = dropped, "deleted group logs");
	}

	/// Makes every checked-out row eligible again without touching data.
	pub async fn clear_checkout_state(&self) {
		self.state.lock().await.pending.clear();
	}

	/// Number of stored rows of `group`, checked out ones included.
	#[instrument(skip(self))]
	pub async fn count(&self, group: &str) -> usize {
		let mut guard = self.state.lock().await;
		let state = &mut *guard;
		loop {
			let result = match &mut state.backend {
				Backend::Sqlite(db) => db.count(group).await,
				Backend::Memory(mem) => Ok(mem.count(group)),
			};
			match result {
				Ok(count) => return count,
				Err(e) => state.fail_over("count", e),
			}
		}
	}

	/// Number of rows of `group` held by unresolved batches.
	pub async fn checked_out_count(&self, group: &str) -> usize {
		self.state.lock().await.pending.checked_out_in_group(group)
	}

	/// Number of unresolved batches of `group`.
	pub async fn pending_batch_count(&self, group: &str) -> usize {
		self.state.lock().await.pending.batch_count(group)
	}

	/// True once the store has switched to the memory backend.
	pub async fn is_fallback(&self) -> bool {
		matches!(self.state.lock().await.backend, Backend::Memory(_))
	}

	/// Offline document cache sharing the log database, if it is available.
	pub async fn document_store(&self) -> Option<DocumentStore> {
		match &self.state.lock().await.backend {
			Backend::Sqlite(db) => Some(DocumentStore::new(db.pool().clone())),
			Backend::Memory(_) => None,
		}
	}

	/// Closes the database. Later calls run against the memory backend.
	pub async fn close(&self) {
		if let Backend::Sqlite(db) = &self.state.lock().await.backend {
			db.close().await;
		}
	}
}
