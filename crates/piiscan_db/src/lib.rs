//! SQLite result store for PII Scan.
//!
//! Owns all persisted state: analysis jobs, per-file records and detected
//! entities. File rows move through a one-way state machine
//! (`pending -> processing -> completed | error`) driven by conditional
//! updates, so concurrent claim attempts are safe without external locking.
//! The only backwards edge is the recovery reset (`processing -> pending`),
//! reserved for [`PiiDb::reset_stalled_files`].

mod error;
mod export;
mod files;
mod jobs;
mod schema;
mod types;

pub use error::{DbError, Result};
pub use types::*;

use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::info;

/// Handle to the result store. Clone is cheap; the pool is shared.
#[derive(Clone)]
pub struct PiiDb {
    pool: SqlitePool,
}

impl PiiDb {
    /// Open (creating if necessary) the store at `path` and ensure the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        let url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;
        info!("Result store opened at {}", path.display());
        Ok(db)
    }

    /// Open an in-memory store (single connection, for tests).
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    /// Close the underlying pool. Required before deleting the database file.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Current UTC timestamp in the text format used by every table.
    pub(crate) fn now_rfc3339() -> String {
        Utc::now().to_rfc3339()
    }
}
