// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! SQLite backend. Large payloads live in sidecar files under
//! `{large_dir}/{group}/{id}.json`.

use beacon_core::{LocalId, Log, SizeClass};
use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{PersistenceError, Result};
use crate::pending::PendingBatches;

type LogRow = (i64, Option<String>, String, Option<String>);

pub(crate) struct SqliteBackend {
	pool: SqlitePool,
	large_dir: PathBuf,
	large_threshold: usize,
}

impl SqliteBackend {
	pub(crate) fn new(pool: SqlitePool, large_dir: PathBuf, large_threshold: usize) -> Self {
		Self {
			pool,
			large_dir,
			large_threshold,
		}
	}

	pub(crate) fn pool(&self) -> &SqlitePool {
		&self.pool
	}

	fn large_payload_path(&self, group: &str, id: LocalId) -> PathBuf {
		self.large_dir.join(group).join(format!("{id}.json"))
	}

	/// Stores `payload` and evicts the oldest rows of `group` beyond `capacity`.
	pub(crate) async fn insert(
		&self,
		group: &str,
		payload: &str,
		capacity: usize,
	) -> Result<(LocalId, Vec<LocalId>)> {
		let now = Utc::now().timestamp_millis();
		let size_class = if payload.len() > self.large_threshold {
			SizeClass::Large
		} else {
			SizeClass::Normal
		};
		let inline = match size_class {
			SizeClass::Normal => Some(payload),
			SizeClass::Large => None,
		};

		let (oid,) = sqlx::query_as::<_, (i64,)>(
			r#"
			INSERT INTO logs (persistence_group, log, size_class, timestamp)
			VALUES (?, ?, ?, ?)
			RETURNING oid
			"#,
		)
		.bind(group)
		.bind(inline)
		.bind(size_class.as_str())
		.bind(now)
		.fetch_one(&self.pool)
		.await?;
		let id = LocalId(oid);

		if size_class == SizeClass::Large {
			let path = self.large_payload_path(group, id);
			if let Err(source) = write_large_payload(&path, payload).await {
				sqlx::query("DELETE FROM logs WHERE oid = ?")
					.bind(oid)
					.execute(&self.pool)
					.await?;
				return Err(PersistenceError::LargePayload { path, source });
			}
			sqlx::query("UPDATE logs SET aux_file_path = ? WHERE oid = ?")
				.bind(path.to_string_lossy().into_owned())
				.bind(oid)
				.execute(&self.pool)
				.await?;
			debug!(%group, %id, bytes = payload.len(), "stored large payload");
		}

		let evicted = self.evict(group, capacity).await?;
		Ok((id, evicted))
	}

	async fn evict(&self, group: &str, capacity: usize) -> Result<Vec<LocalId>> {
		let count = self.count(group).await?;
		if count <= capacity {
			return Ok(Vec::new());
		}
		let excess = (count - capacity) as i64;

		let rows = sqlx::query_as::<_, (i64, Option<String>)>(
			r#"
			DELETE FROM logs WHERE oid IN (
				SELECT oid FROM logs WHERE persistence_group = ? ORDER BY oid LIMIT ?
			)
			RETURNING oid, aux_file_path
			"#,
		)
		.bind(group)
		.bind(excess)
		.fetch_all(&self.pool)
		.await?;

		let mut evicted = Vec::with_capacity(rows.len());
		for (oid, aux) in rows {
			if let Some(path) = aux {
				remove_aux_file(Path::new(&path)).await;
			}
			evicted.push(LocalId(oid));
		}
		evicted.sort();
		Ok(evicted)
	}

	/// Oldest rows of `group` that are not checked out, up to `limit`.
	///
	/// Rows whose payload is missing or unreadable are deleted and skipped.
	pub(crate) async fn eligible(
		&self,
		group: &str,
		limit: usize,
		pending: &PendingBatches,
	) -> Result<Vec<(LocalId, Log)>> {
		let mut batch = Vec::new();

		loop {
			let window = (limit + pending.checked_out_in_group(group)) as i64;
			let rows = sqlx::query_as::<_, LogRow>(
				r#"
				SELECT oid, log, size_class, aux_file_path
				FROM logs
				WHERE persistence_group = ?
				ORDER BY oid
				LIMIT ?
				"#,
			)
			.bind(group)
			.bind(window)
			.fetch_all(&self.pool)
			.await?;

			batch.clear();
			let mut corrupt = Vec::new();
			for (oid, inline, size_class, aux) in rows {
				let id = LocalId(oid);
				if pending.is_checked_out(id) {
					continue;
				}
				if batch.len() == limit {
					break;
				}
				match load_log(inline, &size_class, aux.as_deref()).await {
					Ok(log) => batch.push((id, log)),
					Err(reason) => {
						warn!(%group, %id, %reason, "dropping corrupt log");
						corrupt.push(id);
					}
				}
			}

			if corrupt.is_empty() {
				return Ok(batch);
			}
			self.delete(&corrupt).await?;
		}
	}

	pub(crate) async fn delete(&self, ids: &[LocalId]) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		let mut aux_files = Vec::new();
		for id in ids {
			let row = sqlx::query_as::<_, (Option<String>,)>(
				"DELETE FROM logs WHERE oid = ? RETURNING aux_file_path",
			)
			.bind(id.0)
			.fetch_optional(&mut *tx)
			.await?;
			if let Some((Some(path),)) = row {
				aux_files.push(path);
			}
		}
		tx.commit().await?;

		for path in aux_files {
			remove_aux_file(Path::new(&path)).await;
		}
		Ok(())
	}

	pub(crate) async fn delete_group(&self, group: &str) -> Result<()> {
		sqlx::query("DELETE FROM logs WHERE persistence_group = ?")
			.bind(group)
			.execute(&self.pool)
			.await?;

		let dir = self.large_dir.join(group);
		match tokio::fs::remove_dir_all(&dir).await {
			Ok(()) => {}
			Err(e) if e.kind() == ErrorKind::NotFound => {}
			Err(e) => warn!(path = %dir.display(), error = %e, "failed to remove large payload directory"),
		}
		Ok(())
	}

	pub(crate) async fn count(&self, group: &str) -> Result<usize> {
		let (count,) =
			sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM logs WHERE persistence_group = ?")
				.bind(group)
				.fetch_one(&self.pool)
				.await?;
		Ok(count.max(0) as usize)
	}

	pub(crate) async fn close(&self) {
		self.pool.close().await;
	}
}

async fn write_large_payload(path: &Path, payload: &str) -> std::io::Result<()> {
	if let Some(parent) = path.parent() {
		tokio::fs::create_dir_all(parent).await?;
	}
	tokio::fs::write(path, payload).await
}

async fn remove_aux_file(path: &Path) {
	match tokio::fs::remove_file(path).await {
		Ok(()) => {}
		Err(e) if e.kind() == ErrorKind::NotFound => {}
		Err(e) => warn!(path = %path.display(), error = %e, "failed to remove large payload"),
	}
}

async fn load_log(
	inline: Option<String>,
	size_class: &str,
	aux: Option<&str>,
) -> std::result::Result<Log, String> {
	let size_class: SizeClass = size_class.parse().map_err(|e| format!("{e}"))?;
	let payload = match size_class {
		SizeClass::Normal => inline.ok_or_else(|| "missing inline payload".to_string())?,
		SizeClass::Large => {
			let path = aux.ok_or_else(|| "missing large payload reference".to_string())?;
			tokio::fs::read_to_string(path)
				.await
				.map_err(|e| format!("large payload {path}: {e}"))?
		}
	};
	Log::from_json(&payload).map_err(|e| format!("invalid payload: {e}"))
}
