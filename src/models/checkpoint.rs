//! Resumption checkpoint for the task a session is streaming.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a checkpoint decides whether an incoming word was already applied.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Suppress a word whose text was already applied to this checkpoint.
    ///
    /// Legitimately repeated tokens are dropped under this policy.
    #[default]
    Word,
    /// Suppress a word whose index is not beyond `last_seen_index`.
    Index,
}

/// Durable record of streaming progress for one task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Checkpoint {
    /// Task (chat) the stream belongs to.
    pub task_id: String,
    /// Message that initiated generation; resent on resume.
    pub pending_message: String,
    /// Highest index applied so far; `0` means none.
    pub last_seen_index: u64,
    /// Words applied so far, in application order.
    pub words: Vec<String>,
    /// Last time the checkpoint changed.
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Fresh checkpoint for a newly started task.
    #[must_use]
    pub fn new(task_id: String, pending_message: String) -> Self {
        Self {
            task_id,
            pending_message,
            last_seen_index: 0,
            words: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Apply a streamed word unless `policy` marks it as already applied.
    ///
    /// Returns `true` when the word was appended. `last_seen_index` only
    /// moves forward.
    pub fn apply_word(&mut self, word: &str, index: u64, policy: DedupPolicy) -> bool {
        let duplicate = match policy {
            DedupPolicy::Word => self.words.iter().any(|applied| applied == word),
            DedupPolicy::Index => !self.words.is_empty() && index <= self.last_seen_index,
        };
        if duplicate {
            return false;
        }

        self.words.push(word.to_owned());
        self.last_seen_index = self.last_seen_index.max(index);
        self.updated_at = Utc::now();
        true
    }

    /// Whether enough progress was recorded to resume without user action.
    #[must_use]
    pub fn is_resumable(&self) -> bool {
        self.last_seen_index > 0
    }

    /// Whether the checkpoint was last touched before `now - ttl`.
    #[must_use]
    pub fn is_stale(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.updated_at > ttl
    }
}
