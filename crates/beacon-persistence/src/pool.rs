// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteSynchronous};
use std::path::Path;

use crate::error::Result;

/// Create a SqlitePool for the database file at `db_path` with WAL mode.
#[tracing::instrument(skip(db_path), fields(path = %db_path.display()))]
pub async fn create_pool(db_path: &Path) -> Result<SqlitePool> {
	let options = SqliteConnectOptions::new()
		.filename(db_path)
		.journal_mode(SqliteJournalMode::Wal)
		.synchronous(SqliteSynchronous::Normal)
		.create_if_missing(true);

	let pool = SqlitePool::connect_with(options).await?;

	tracing::debug!("database pool created");
	Ok(pool)
}

/// Creates the `logs` table and its group index.
///
/// `AUTOINCREMENT` keeps SQLite from reusing the id of a deleted row.
pub async fn migrate_logs(pool: &SqlitePool) -> Result<()> {
	sqlx::query(
		r#"
		CREATE TABLE IF NOT EXISTS logs (
			oid INTEGER PRIMARY KEY AUTOINCREMENT,
			persistence_group TEXT NOT NULL,
			log TEXT NULL,
			size_class TEXT NOT NULL DEFAULT 'normal',
			aux_file_path TEXT NULL,
			timestamp INTEGER NOT NULL
		)
		"#,
	)
	.execute(pool)
	.await?;

	sqlx::query(
		"CREATE INDEX IF NOT EXISTS idx_logs_group_oid ON logs (persistence_group, oid)",
	)
	.execute(pool)
	.await?;

	Ok(())
}

/// Highest id ever handed out by the `logs` table, 0 when none.
pub async fn last_log_id(pool: &SqlitePool) -> Result<i64> {
	let seq = sqlx::query_as::<_, (i64,)>("SELECT seq FROM sqlite_sequence WHERE name = 'logs'")
		.fetch_optional(pool)
		.await?;
	Ok(seq.map(|(seq,)| seq).unwrap_or(0))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_migrate_is_idempotent() {
		let dir = tempfile::tempdir().unwrap();
		let pool = create_pool(&dir.path().join("beacon.db")).await.unwrap();

		migrate_logs(&pool).await.unwrap();
		migrate_logs(&pool).await.unwrap();

		assert_eq!(last_log_id(&pool).await.unwrap(), 0);
	}

	#[tokio::test]
	async fn test_last_log_id_survives_deletes() {
		let dir = tempfile::tempdir().unwrap();
		let pool = create_pool(&dir.path().join("beacon.db")).await.unwrap();
		migrate_logs(&pool).await.unwrap();

		for _ in 0..3 {
			sqlx::query("INSERT INTO logs (persistence_group, log, timestamp) VALUES ('g', '{}', 0)")
				.execute(&pool)
				.await
				.unwrap();
		}
		sqlx::query("DELETE FROM logs").execute(&pool).await.unwrap();

		assert_eq!(last_log_id(&pool).await.unwrap(), 3);
	}
}
