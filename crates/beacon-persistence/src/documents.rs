// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Offline document cache.
//!
//! Documents written while offline carry a pending operation marker until
//! the remote store confirms them. Rows expire according to their
//! [`TimeToLive`].

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::sqlite::SqlitePool;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, instrument};

use crate::error::{PersistenceError, Result};

type DocumentRow = (
	String,
	String,
	String,
	Option<String>,
	Option<String>,
	Option<i64>,
	Option<i64>,
	Option<i64>,
	Option<String>,
);

const SELECT_COLUMNS: &str = "SELECT table_name, partition, document_id, document, etag, \
	expiration_time, download_time, operation_time, pending_operation FROM documents";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeToLive {
	/// Nothing is cached.
	NoCache,
	Infinite,
	Seconds(u64),
}

impl TimeToLive {
	fn expiration(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
		match self {
			TimeToLive::Seconds(secs) => Some(now + Duration::seconds(*secs as i64)),
			TimeToLive::NoCache | TimeToLive::Infinite => None,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
	Create,
	Replace,
	Delete,
}

impl OperationKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			OperationKind::Create => "create",
			OperationKind::Replace => "replace",
			OperationKind::Delete => "delete",
		}
	}
}

impl fmt::Display for OperationKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for OperationKind {
	type Err = PersistenceError;

	fn from_str(s: &str) -> Result<Self> {
		match s {
			"create" => Ok(OperationKind::Create),
			"replace" => Ok(OperationKind::Replace),
			"delete" => Ok(OperationKind::Delete),
			other => Err(PersistenceError::InvalidColumn(format!(
				"unknown pending operation: {other}"
			))),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedDocument {
	pub table: String,
	pub partition: String,
	pub document_id: String,
	pub document: Option<Value>,
	pub etag: Option<String>,
	pub expiration_time: Option<DateTime<Utc>>,
	pub download_time: Option<DateTime<Utc>>,
	pub operation_time: Option<DateTime<Utc>>,
	pub pending_operation: Option<OperationKind>,
}

impl CachedDocument {
	fn is_expired(&self, now: DateTime<Utc>) -> bool {
		self.expiration_time.is_some_and(|at| at <= now)
	}
}

/// A local write that has not reached the remote store yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOperation {
	pub table: String,
	pub operation: OperationKind,
	pub partition: String,
	pub document_id: String,
	pub document: Option<Value>,
	pub etag: Option<String>,
	pub expiration_time: Option<DateTime<Utc>>,
	pub download_time: Option<DateTime<Utc>>,
	pub operation_time: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct DocumentStore {
	pool: SqlitePool,
}

impl DocumentStore {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	pub fn pool(&self) -> &SqlitePool {
		&self.pool
	}

	pub async fn migrate(&self) -> Result<()> {
		sqlx::query(
			r#"
			CREATE TABLE IF NOT EXISTS documents (
				table_name TEXT NOT NULL,
				partition TEXT NOT NULL,
				document_id TEXT NOT NULL,
				document TEXT NULL,
				etag TEXT NULL,
				expiration_time INTEGER NULL,
				download_time INTEGER NULL,
				operation_time INTEGER NULL,
				pending_operation TEXT NULL,
				PRIMARY KEY (table_name, partition, document_id)
			)
			"#,
		)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	/// Caches a document received from the remote store.
	#[instrument(skip(self, document))]
	pub async fn write_online(
		&self,
		table: &str,
		partition: &str,
		document_id: &str,
		document: &Value,
		etag: Option<&str>,
		ttl: TimeToLive,
	) -> Result<()> {
		if ttl == TimeToLive::NoCache {
			return self.delete_online(table, partition, document_id).await;
		}
		let now = Utc::now();
		self
			.upsert(&CachedDocument {
				table: table.to_string(),
				partition: partition.to_string(),
				document_id: document_id.to_string(),
				document: Some(document.clone()),
				etag: etag.map(str::to_string),
				expiration_time: ttl.expiration(now),
				download_time: Some(now),
				operation_time: Some(now),
				pending_operation: None,
			})
			.await
	}

	/// Writes a document locally and marks it for upload.
	///
	/// The marker is `create` when the remote store has never seen the
	/// document and `replace` otherwise. Offline writes are kept even with
	/// [`TimeToLive::NoCache`] until they are resolved.
	#[instrument(skip(self, document))]
	pub async fn create_or_update_offline(
		&self,
		table: &str,
		partition: &str,
		document_id: &str,
		document: &Value,
		ttl: TimeToLive,
	) -> Result<OperationKind> {
		let now = Utc::now();
		let existing = self.fetch(table, partition, document_id).await?;
		let operation = match &existing {
			None => OperationKind::Create,
			Some(doc) if doc.pending_operation == Some(OperationKind::Create) => OperationKind::Create,
			Some(_) => OperationKind::Replace,
		};

		self
			.upsert(&CachedDocument {
				table: table.to_string(),
				partition: partition.to_string(),
				document_id: document_id.to_string(),
				document: Some(document.clone()),
				etag: existing.as_ref().and_then(|d| d.etag.clone()),
				expiration_time: ttl.expiration(now),
				download_time: existing.as_ref().and_then(|d| d.download_time),
				operation_time: Some(now),
				pending_operation: Some(operation),
			})
			.await?;
		debug!(%operation, "recorded offline write");
		Ok(operation)
	}

	/// Marks a document for remote deletion, keeping its eTag.
	///
	/// A document that was only ever created offline is removed outright.
	#[instrument(skip(self))]
	pub async fn delete_offline(&self, table: &str, partition: &str, document_id: &str) -> Result<()> {
		let existing = self.fetch(table, partition, document_id).await?;
		if let Some(doc) = &existing {
			if doc.pending_operation == Some(OperationKind::Create) {
				return self.delete_online(table, partition, document_id).await;
			}
		}

		self
			.upsert(&CachedDocument {
				table: table.to_string(),
				partition: partition.to_string(),
				document_id: document_id.to_string(),
				document: None,
				etag: existing.as_ref().and_then(|d| d.etag.clone()),
				expiration_time: existing.as_ref().and_then(|d| d.expiration_time),
				download_time: existing.as_ref().and_then(|d| d.download_time),
				operation_time: Some(Utc::now()),
				pending_operation: Some(OperationKind::Delete),
			})
			.await
	}

	pub async fn delete_online(&self, table: &str, partition: &str, document_id: &str) -> Result<()> {
		sqlx::query(
			"DELETE FROM documents WHERE table_name = ? AND partition = ? AND document_id = ?",
		)
		.bind(table)
		.bind(partition)
		.bind(document_id)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	/// Reads a cached document. Expired rows are removed and reported as
	/// missing, as are documents with a pending delete.
	#[instrument(skip(self))]
	pub async fn read(
		&self,
		table: &str,
		partition: &str,
		document_id: &str,
	) -> Result<Option<CachedDocument>> {
		let Some(doc) = self.fetch(table, partition, document_id).await? else {
			return Ok(None);
		};
		if doc.is_expired(Utc::now()) {
			debug!("cached document expired");
			self.delete_online(table, partition, document_id).await?;
			return Ok(None);
		}
		if doc.pending_operation == Some(OperationKind::Delete) {
			return Ok(None);
		}
		Ok(Some(doc))
	}

	/// Live documents of a partition, ordered by id.
	#[instrument(skip(self))]
	pub async fn documents_by_partition(
		&self,
		table: &str,
		partition: &str,
	) -> Result<Vec<CachedDocument>> {
		let rows = sqlx::query_as::<_, DocumentRow>(&format!(
			"{SELECT_COLUMNS} WHERE table_name = ? AND partition = ? ORDER BY document_id"
		))
		.bind(table)
		.bind(partition)
		.fetch_all(&self.pool)
		.await?;

		let now = Utc::now();
		let mut live = Vec::with_capacity(rows.len());
		for row in rows {
			let doc = into_document(row)?;
			if doc.is_expired(now) {
				self.delete_online(table, partition, &doc.document_id).await?;
			} else if doc.pending_operation != Some(OperationKind::Delete) {
				live.push(doc);
			}
		}
		Ok(live)
	}

	/// Local writes of `table` awaiting upload, oldest first.
	pub async fn pending_operations(&self, table: &str) -> Result<Vec<PendingOperation>> {
		let rows = sqlx::query_as::<_, DocumentRow>(&format!(
			"{SELECT_COLUMNS} WHERE table_name = ? AND pending_operation IS NOT NULL ORDER BY operation_time"
		))
		.bind(table)
		.fetch_all(&self.pool)
		.await?;

		let mut pending = Vec::with_capacity(rows.len());
		for row in rows {
			let doc = into_document(row)?;
			if let Some(operation) = doc.pending_operation {
				pending.push(PendingOperation {
					table: doc.table,
					operation,
					partition: doc.partition,
					document_id: doc.document_id,
					document: doc.document,
					etag: doc.etag,
					expiration_time: doc.expiration_time,
					download_time: doc.download_time,
					operation_time: doc.operation_time,
				});
			}
		}
		Ok(pending)
	}

	/// Writes back a pending operation whose fields changed, e.g. a new eTag.
	pub async fn update_pending_operation(&self, operation: &PendingOperation) -> Result<()> {
		self
			.upsert(&CachedDocument {
				table: operation.table.clone(),
				partition: operation.partition.clone(),
				document_id: operation.document_id.clone(),
				document: operation.document.clone(),
				etag: operation.etag.clone(),
				expiration_time: operation.expiration_time,
				download_time: operation.download_time,
				operation_time: operation.operation_time,
				pending_operation: Some(operation.operation),
			})
			.await
	}

	/// Clears the pending marker after the remote store accepted the
	/// operation. A resolved delete removes the row.
	#[instrument(skip(self))]
	pub async fn resolve_pending_operation(
		&self,
		table: &str,
		partition: &str,
		document_id: &str,
		etag: Option<&str>,
	) -> Result<()> {
		let Some(doc) = self.fetch(table, partition, document_id).await? else {
			return Ok(());
		};
		match doc.pending_operation {
			None => Ok(()),
			Some(OperationKind::Delete) => self.delete_online(table, partition, document_id).await,
			Some(_) => {
				sqlx::query(
					r#"
					UPDATE documents
					SET pending_operation = NULL, etag = ?, download_time = ?
					WHERE table_name = ? AND partition = ? AND document_id = ?
					"#,
				)
				.bind(etag.map(str::to_string).or(doc.etag))
				.bind(Utc::now().timestamp_millis())
				.bind(table)
				.bind(partition)
				.bind(document_id)
				.execute(&self.pool)
				.await?;
				Ok(())
			}
		}
	}

	async fn fetch(
		&self,
		table: &str,
		partition: &str,
		document_id: &str,
	) -> Result<Option<CachedDocument>> {
		let row = sqlx::query_as::<_, DocumentRow>(&format!(
			"{SELECT_COLUMNS} WHERE table_name = ? AND partition = ? AND document_id = ?"
		))
		.bind(table)
		.bind(partition)
		.bind(document_id)
		.fetch_optional(&self.pool)
		.await?;
		row.map(into_document).transpose()
	}

	async fn upsert(&self, doc: &CachedDocument) -> Result<()> {
		let document = doc.document.as_ref().map(serde_json::to_string).transpose()?;
		sqlx::query(
			r#"
			INSERT INTO documents (
				table_name, partition, document_id, document, etag,
				expiration_time, download_time, operation_time, pending_operation
			)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
			ON CONFLICT(table_name, partition, document_id) DO UPDATE SET
				document = excluded.document,
				etag = excluded.etag,
				expiration_time = excluded.expiration_time,
				download_time = excluded.download_time,
				operation_time = excluded.operation_time,
				pending_operation = excluded.pending_operation
			"#,
		)
		.bind(&doc.table)
		.bind(&doc.partition)
		.bind(&doc.document_id)
		.bind(document)
		.bind(&doc.etag)
		.bind(doc.expiration_time.map(|t| t.timestamp_millis()))
		.bind(doc.download_time.map(|t| t.timestamp_millis()))
		.bind(doc.operation_time.map(|t| t.timestamp_millis()))
		.bind(doc.pending_operation.map(|op| op.as_str()))
		.execute(&self.pool)
		.await?;
		Ok(())
	}
}

fn millis(value: Option<i64>) -> Option<DateTime<Utc>> {
	value.and_then(DateTime::from_timestamp_millis)
}

fn into_document(row: DocumentRow) -> Result<CachedDocument> {
	let (table, partition, document_id, document, etag, expiration, download, operation, pending) =
		row;
	Ok(CachedDocument {
		table,
		partition,
		document_id,
		document: document
			.as_deref()
			.map(serde_json::from_str::<Value>)
			.transpose()?,
		etag,
		expiration_time: millis(expiration),
		download_time: millis(download),
		operation_time: millis(operation),
		pending_operation: pending.as_deref().map(OperationKind::from_str).transpose()?,
	})
}
