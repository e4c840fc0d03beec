//! Checkpoint repository for `SQLite` persistence.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::models::checkpoint::Checkpoint;
use crate::{AppError, Result};

use super::db::Database;
use super::CheckpointStore;

/// Repository wrapper around `SQLite` for the checkpoint owned by one slot.
///
/// Each slot holds at most one checkpoint, so independent sessions can
/// share a database file without interfering.
#[derive(Clone)]
pub struct CheckpointRepo {
    db: Arc<Database>,
    slot: String,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct CheckpointRow {
    task_id: String,
    pending_message: String,
    last_seen_index: i64,
    words: String,
    updated_at: String,
}

impl CheckpointRow {
    /// Convert a database row into the domain model.
    fn into_checkpoint(self) -> Result<Checkpoint> {
        let last_seen_index = index_from_column(self.last_seen_index);
        let words: Vec<String> = serde_json::from_str(&self.words)
            .map_err(|e| AppError::Db(format!("invalid words: {e}")))?;
        let updated_at = chrono::DateTime::parse_from_rfc3339(&self.updated_at)
            .map_err(|e| AppError::Db(format!("invalid updated_at: {e}")))?
            .with_timezone(&Utc);

        Ok(Checkpoint {
            task_id: self.task_id,
            pending_message: self.pending_message,
            last_seen_index,
            words,
            updated_at,
        })
    }
}

// SQLite integers are signed 64-bit; indices keep their full u64 range by
// storing the two's-complement bit pattern.
#[allow(clippy::cast_possible_wrap)]
fn index_to_column(index: u64) -> i64 {
    index as i64
}

#[allow(clippy::cast_sign_loss)]
fn index_from_column(value: i64) -> u64 {
    value as u64
}

impl CheckpointRepo {
    /// Create a repository bound to `slot`.
    #[must_use]
    pub fn new(db: Arc<Database>, slot: impl Into<String>) -> Self {
        Self {
            db,
            slot: slot.into(),
        }
    }

    /// Slot this repository reads and writes.
    #[must_use]
    pub fn slot(&self) -> &str {
        &self.slot
    }

    /// Upsert the slot's checkpoint.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if serialization or the write fails.
    pub async fn upsert(&self, checkpoint: &Checkpoint) -> Result<()> {
        let last_seen_index = index_to_column(checkpoint.last_seen_index);
        let words = serde_json::to_string(&checkpoint.words)
            .map_err(|e| AppError::Db(format!("serialize words: {e}")))?;
        let updated_at = checkpoint.updated_at.to_rfc3339();

        sqlx::query(
            "INSERT INTO checkpoint (slot, task_id, pending_message, last_seen_index, words, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(slot) DO UPDATE SET
                task_id = excluded.task_id,
                pending_message = excluded.pending_message,
                last_seen_index = excluded.last_seen_index,
                words = excluded.words,
                updated_at = excluded.updated_at",
        )
        .bind(&self.slot)
        .bind(&checkpoint.task_id)
        .bind(&checkpoint.pending_message)
        .bind(last_seen_index)
        .bind(&words)
        .bind(&updated_at)
        .execute(self.db.as_ref())
        .await?;

        debug!(
            slot = self.slot,
            task_id = checkpoint.task_id,
            last_seen_index = checkpoint.last_seen_index,
            word_count = checkpoint.words.len(),
            "checkpoint saved"
        );
        Ok(())
    }

    /// Retrieve the slot's checkpoint.
    ///
    /// Returns `Ok(None)` if the slot is empty.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails or the row is corrupt.
    pub async fn get(&self) -> Result<Option<Checkpoint>> {
        let row: Option<CheckpointRow> = sqlx::query_as(
            "SELECT task_id, pending_message, last_seen_index, words, updated_at
             FROM checkpoint WHERE slot = ?1",
        )
        .bind(&self.slot)
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(CheckpointRow::into_checkpoint).transpose()
    }

    /// Delete the slot's checkpoint.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete(&self) -> Result<()> {
        sqlx::query("DELETE FROM checkpoint WHERE slot = ?1")
            .bind(&self.slot)
            .execute(self.db.as_ref())
            .await?;
        debug!(slot = self.slot, "checkpoint cleared");
        Ok(())
    }
}

impl CheckpointStore for CheckpointRepo {
    fn save<'a>(
        &'a self,
        checkpoint: &'a Checkpoint,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.upsert(checkpoint))
    }

    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Option<Checkpoint>>> + Send + '_>> {
        Box::pin(self.get())
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.delete())
    }
}
