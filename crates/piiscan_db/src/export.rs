//! Read-only JSON snapshot of a job with its files and entities.

use crate::error::{DbError, Result};
use crate::files::{row_to_entity, row_to_file};
use crate::PiiDb;
use serde_json::json;

impl PiiDb {
    /// Export a job, its file records and their entities as one JSON value.
    pub async fn export_job(&self, job_id: i64) -> Result<serde_json::Value> {
        let job = self
            .get_job(job_id)
            .await?
            .ok_or_else(|| DbError::not_found(format!("job {}", job_id)))?;

        let file_rows = sqlx::query("SELECT * FROM files WHERE job_id = ? ORDER BY file_id ASC")
            .bind(job_id)
            .fetch_all(self.pool())
            .await?;

        let mut files = Vec::with_capacity(file_rows.len());
        for row in &file_rows {
            let file = row_to_file(row)?;

            let entity_rows =
                sqlx::query("SELECT * FROM entities WHERE file_id = ? ORDER BY entity_id ASC")
                    .bind(file.file_id)
                    .fetch_all(self.pool())
                    .await?;
            let entities = entity_rows
                .iter()
                .map(row_to_entity)
                .collect::<Result<Vec<_>>>()?;

            let mut value = serde_json::to_value(&file)?;
            if let Some(obj) = value.as_object_mut() {
                obj.insert("entities".to_string(), serde_json::to_value(&entities)?);
            }
            files.push(value);
        }

        Ok(json!({
            "job": job,
            "files": files,
        }))
    }
}
