//! Job table operations.

use crate::error::{DbError, Result};
use crate::types::*;
use crate::PiiDb;
use chrono::{DateTime, Utc};
use sqlx::Row;

impl PiiDb {
    /// Create a new job for `directory` with status `pending`.
    pub async fn create_job(&self, directory: &str) -> Result<i64> {
        let now = Self::now_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (directory, status, start_time, last_updated)
            VALUES (?, 'pending', ?, ?)
            "#,
        )
        .bind(directory)
        .bind(&now)
        .bind(&now)
        .execute(self.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Unconditional status write, stamping `last_updated`.
    pub async fn update_job_status(&self, job_id: i64, status: JobStatus) -> Result<()> {
        sqlx::query("UPDATE jobs SET status = ?, last_updated = ? WHERE job_id = ?")
            .bind(status.as_str())
            .bind(Self::now_rfc3339())
            .bind(job_id)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    /// Get a job by ID.
    pub async fn get_job(&self, job_id: i64) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(self.pool())
            .await?;

        match row {
            Some(row) => Ok(Some(row_to_job(&row)?)),
            None => Ok(None),
        }
    }

    /// Most recently created job, if any.
    pub async fn latest_job(&self) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs ORDER BY job_id DESC LIMIT 1")
            .fetch_optional(self.pool())
            .await?;

        match row {
            Some(row) => Ok(Some(row_to_job(&row)?)),
            None => Ok(None),
        }
    }

    /// List all jobs, newest first.
    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query("SELECT * FROM jobs ORDER BY job_id DESC")
            .fetch_all(self.pool())
            .await?;

        rows.iter().map(row_to_job).collect()
    }
}

pub(crate) fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<Job> {
    let status_str: String = row.get("status");
    let status = JobStatus::parse(&status_str)
        .ok_or_else(|| DbError::invalid_state(format!("Unknown job status: {}", status_str)))?;

    Ok(Job {
        job_id: row.get("job_id"),
        directory: row.get("directory"),
        status,
        start_time: parse_timestamp(&row.get::<String, _>("start_time"))?,
        last_updated: parse_timestamp(&row.get::<String, _>("last_updated"))?,
        total_files: row.get("total_files"),
        processed_files: row.get("processed_files"),
        error_files: row.get("error_files"),
    })
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::invalid_state(format!("Bad timestamp '{}': {}", s, e)))
}
