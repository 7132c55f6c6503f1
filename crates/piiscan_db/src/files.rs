//! File table operations: registration, claim, completion, recovery.
//!
//! Every status transition is a conditional UPDATE keyed on the current
//! status, so concurrent callers race safely: at most one wins, the rest
//! observe zero affected rows.

use crate::error::{DbError, Result};
use crate::jobs::parse_timestamp;
use crate::types::*;
use crate::PiiDb;
use sqlx::Row;
use tracing::debug;

impl PiiDb {
    /// Bulk-register discovered files, skipping duplicates on
    /// `(job_id, file_path)`. Bumps the job's `total_files` by the number of
    /// rows actually inserted, in the same transaction. Returns that number.
    pub async fn register_files(&self, job_id: i64, files: &[DiscoveredFile]) -> Result<u64> {
        if files.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool().begin().await?;
        let mut added = 0u64;

        for file in files {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO files (job_id, file_path, file_type, size_bytes, status)
                VALUES (?, ?, ?, ?, 'pending')
                "#,
            )
            .bind(job_id)
            .bind(&file.path)
            .bind(&file.file_type)
            .bind(file.size_bytes)
            .execute(&mut *tx)
            .await?;

            added += result.rows_affected();
        }

        if added > 0 {
            sqlx::query(
                "UPDATE jobs SET total_files = total_files + ?, last_updated = ? WHERE job_id = ?",
            )
            .bind(added as i64)
            .bind(Self::now_rfc3339())
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(job_id, added, "registered files");
        Ok(added)
    }

    /// Up to `limit` pending files, FIFO by `file_id`.
    pub async fn pending_files(&self, job_id: i64, limit: i64) -> Result<Vec<PendingFile>> {
        let rows = sqlx::query(
            r#"
            SELECT file_id, file_path FROM files
            WHERE job_id = ? AND status = 'pending'
            ORDER BY file_id ASC
            LIMIT ?
            "#,
        )
        .bind(job_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .iter()
            .map(|row| PendingFile {
                file_id: row.get("file_id"),
                file_path: row.get("file_path"),
            })
            .collect())
    }

    /// The claim primitive: conditional `pending -> processing`. Returns true
    /// iff exactly one row was updated. Concurrent callers for the same file
    /// see at most one success.
    pub async fn mark_file_processing(&self, file_id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE files SET status = 'processing', processing_started_at = ?
            WHERE file_id = ? AND status = 'pending'
            "#,
        )
        .bind(Self::now_rfc3339())
        .bind(file_id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Completion transaction: conditional `processing -> completed`, entity
    /// rows, metadata, processing time and the job's `processed_files` bump
    /// all commit together. Returns false (no side effects) when the guard
    /// missed, e.g. because a recovery reset won the race; callers must treat
    /// that as an error, not a success.
    ///
    /// Any previous entity set for the file is replaced, so a reprocessed
    /// file ends up with exactly one set of entity rows.
    pub async fn complete_file(
        &self,
        file_id: i64,
        job_id: i64,
        processing_time: f64,
        entities: &[NewEntity],
        metadata: &serde_json::Value,
    ) -> Result<bool> {
        let metadata_json = serde_json::to_string(metadata)?;
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE files SET
                status = 'completed',
                processing_time_seconds = ?,
                metadata = ?,
                error_message = NULL
            WHERE file_id = ? AND status = 'processing'
            "#,
        )
        .bind(processing_time)
        .bind(&metadata_json)
        .bind(file_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM entities WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;

        for entity in entities {
            sqlx::query(
                r#"
                INSERT INTO entities (file_id, entity_type, text, score, start_pos, end_pos)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(file_id)
            .bind(&entity.entity_type)
            .bind(&entity.text)
            .bind(entity.score)
            .bind(entity.start_pos)
            .bind(entity.end_pos)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "UPDATE jobs SET processed_files = processed_files + 1, last_updated = ? WHERE job_id = ?",
        )
        .bind(Self::now_rfc3339())
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Conditional `processing -> error` with the job's `error_files` bump in
    /// the same transaction. Returns true iff the transition happened.
    pub async fn mark_file_error(&self, file_id: i64, job_id: i64, message: &str) -> Result<bool> {
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE files SET status = 'error', error_message = ?
            WHERE file_id = ? AND status = 'processing'
            "#,
        )
        .bind(message)
        .bind(file_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "UPDATE jobs SET error_files = error_files + 1, last_updated = ? WHERE job_id = ?",
        )
        .bind(Self::now_rfc3339())
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Per-status counts for a job, as one consistent snapshot.
    pub async fn file_statistics(&self, job_id: i64) -> Result<FileStatistics> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) as total,
                SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END) as pending,
                SUM(CASE WHEN status = 'processing' THEN 1 ELSE 0 END) as processing,
                SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END) as completed,
                SUM(CASE WHEN status = 'error' THEN 1 ELSE 0 END) as error
            FROM files WHERE job_id = ?
            "#,
        )
        .bind(job_id)
        .fetch_one(self.pool())
        .await?;

        Ok(FileStatistics {
            total: row.get::<i64, _>("total"),
            pending: row.get::<Option<i64>, _>("pending").unwrap_or(0),
            processing: row.get::<Option<i64>, _>("processing").unwrap_or(0),
            completed: row.get::<Option<i64>, _>("completed").unwrap_or(0),
            error: row.get::<Option<i64>, _>("error").unwrap_or(0),
        })
    }

    /// Recovery: bulk `processing -> pending` for rows stranded by an
    /// interrupted or crashed run. Returns the number of rows reset. The next
    /// pass over the job reclaims them (at-least-once).
    pub async fn reset_stalled_files(&self, job_id: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE files SET status = 'pending', processing_started_at = NULL
            WHERE job_id = ? AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Get a single file record.
    pub async fn get_file(&self, file_id: i64) -> Result<Option<FileRecord>> {
        let row = sqlx::query("SELECT * FROM files WHERE file_id = ?")
            .bind(file_id)
            .fetch_optional(self.pool())
            .await?;

        match row {
            Some(row) => Ok(Some(row_to_file(&row)?)),
            None => Ok(None),
        }
    }

    /// Entities recorded for a file, in insertion order.
    pub async fn entities_for_file(&self, file_id: i64) -> Result<Vec<Entity>> {
        let rows = sqlx::query("SELECT * FROM entities WHERE file_id = ? ORDER BY entity_id ASC")
            .bind(file_id)
            .fetch_all(self.pool())
            .await?;

        rows.iter().map(row_to_entity).collect()
    }
}

pub(crate) fn row_to_file(row: &sqlx::sqlite::SqliteRow) -> Result<FileRecord> {
    let status_str: String = row.get("status");
    let status = FileStatus::parse(&status_str)
        .ok_or_else(|| DbError::invalid_state(format!("Unknown file status: {}", status_str)))?;

    let metadata = match row.get::<Option<String>, _>("metadata") {
        Some(json) => Some(serde_json::from_str(&json)?),
        None => None,
    };

    Ok(FileRecord {
        file_id: row.get("file_id"),
        job_id: row.get("job_id"),
        file_path: row.get("file_path"),
        file_type: row.get("file_type"),
        size_bytes: row.get("size_bytes"),
        status,
        processing_started_at: row
            .get::<Option<String>, _>("processing_started_at")
            .map(|s| parse_timestamp(&s))
            .transpose()?,
        processing_time_seconds: row.get("processing_time_seconds"),
        error_message: row.get("error_message"),
        metadata,
    })
}

pub(crate) fn row_to_entity(row: &sqlx::sqlite::SqliteRow) -> Result<Entity> {
    Ok(Entity {
        entity_id: row.get("entity_id"),
        file_id: row.get("file_id"),
        entity_type: row.get("entity_type"),
        text: row.get("text"),
        score: row.get("score"),
        start_pos: row.get("start_pos"),
        end_pos: row.get("end_pos"),
    })
}
