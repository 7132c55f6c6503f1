//! Database schema creation for the result store.
//!
//! All CREATE TABLE statements live here - single source of truth.

use crate::error::Result;
use crate::PiiDb;
use tracing::info;

impl PiiDb {
    /// Ensure all tables exist.
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        // WAL with NORMAL sync: committed completions survive a process crash.
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(self.pool())
            .await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(self.pool())
            .await?;
        sqlx::query("PRAGMA foreign_keys=ON")
            .execute(self.pool())
            .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS jobs (
                job_id INTEGER PRIMARY KEY AUTOINCREMENT,
                directory TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                start_time TEXT NOT NULL,
                last_updated TEXT NOT NULL,
                total_files INTEGER NOT NULL DEFAULT 0,
                processed_files INTEGER NOT NULL DEFAULT 0,
                error_files INTEGER NOT NULL DEFAULT 0
            )"#,
        )
        .execute(self.pool())
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS files (
                file_id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id INTEGER NOT NULL REFERENCES jobs(job_id),
                file_path TEXT NOT NULL,
                file_type TEXT NOT NULL DEFAULT '',
                size_bytes INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'pending',
                processing_started_at TEXT,
                processing_time_seconds REAL,
                error_message TEXT,
                metadata TEXT,
                UNIQUE(job_id, file_path)
            )"#,
        )
        .execute(self.pool())
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS entities (
                entity_id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_id INTEGER NOT NULL REFERENCES files(file_id),
                entity_type TEXT NOT NULL,
                text TEXT NOT NULL,
                score REAL NOT NULL,
                start_pos INTEGER NOT NULL,
                end_pos INTEGER NOT NULL
            )"#,
        )
        .execute(self.pool())
        .await?;

        // (job_id, status) drives the pending-claim query; (file_id) drives
        // entity replacement on completion.
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_job_status ON files(job_id, status)")
            .execute(self.pool())
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entities_file ON entities(file_id)")
            .execute(self.pool())
            .await?;

        info!("Result store schema verified");
        Ok(())
    }
}
