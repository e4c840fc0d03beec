//! Checkpoint persistence.
//!
//! The [`CheckpointStore`] trait is the seam between the session
//! controller and durable storage. [`checkpoint_repo::CheckpointRepo`]
//! persists to `SQLite`; [`memory::MemoryCheckpointStore`] keeps the
//! checkpoint in process.

pub mod checkpoint_repo;
pub mod db;
pub mod memory;
pub mod schema;

use std::future::Future;
use std::pin::Pin;

use crate::models::checkpoint::Checkpoint;
use crate::Result;

/// Re-export the database pool type for convenience.
pub use sqlx::SqlitePool;

/// Durable home of the single live checkpoint owned by a session.
///
/// Implementations must survive a process restart if resumption after a
/// restart is expected; the in-memory store only covers network blips.
pub trait CheckpointStore: Send + Sync {
    /// Replace the stored checkpoint with `checkpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Db`](crate::AppError::Db) if the write fails.
    fn save<'a>(
        &'a self,
        checkpoint: &'a Checkpoint,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Load the stored checkpoint, if any.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Db`](crate::AppError::Db) if the read fails or
    /// the stored record is corrupt.
    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Option<Checkpoint>>> + Send + '_>>;

    /// Remove the stored checkpoint. Clearing an empty store is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Db`](crate::AppError::Db) if the delete fails.
    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}
