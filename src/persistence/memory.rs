//! In-process checkpoint store.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::Mutex;

use crate::models::checkpoint::Checkpoint;
use crate::Result;

use super::CheckpointStore;

/// Checkpoint store backed by process memory.
///
/// Survives reconnects within one process but not a restart.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    slot: Mutex<Option<Checkpoint>>,
}

impl MemoryCheckpointStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `checkpoint`.
    #[must_use]
    pub fn with_checkpoint(checkpoint: Checkpoint) -> Self {
        Self {
            slot: Mutex::new(Some(checkpoint)),
        }
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save<'a>(
        &'a self,
        checkpoint: &'a Checkpoint,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            *self.slot.lock().await = Some(checkpoint.clone());
            Ok(())
        })
    }

    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Option<Checkpoint>>> + Send + '_>> {
        Box::pin(async move { Ok(self.slot.lock().await.clone()) })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.slot.lock().await.take();
            Ok(())
        })
    }
}
