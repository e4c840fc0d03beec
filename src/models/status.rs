//! Session lifecycle states and the updates delivered to observers.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a streaming session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No active task.
    Idle,
    /// Start request issued, waiting for the stream to open.
    Connecting,
    /// Receiving and applying events.
    Streaming,
    /// A resume attempt is pending or in flight after a failure.
    Reconnecting,
    /// Server signalled completion; checkpoint cleared.
    Completed,
    /// Consumer cancelled; checkpoint cleared.
    Stopped,
    /// Resume attempts exhausted; checkpoint retained for manual retry.
    Failed,
}

impl SessionState {
    /// Whether no further transitions happen without a new command.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }

    /// Whether a transport is (or is about to be) live for this state.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Streaming | Self::Reconnecting)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Reconnecting => "reconnecting",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Observer-visible status, carrying the detail needed to tell
/// "stopped by user" from "lost connection, retrying" from "completed"
/// from "failed".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// No active task.
    Idle,
    /// Start request issued.
    Connecting,
    /// Stream is open.
    Streaming,
    /// Lost the stream; resuming transparently.
    Reconnecting {
        /// Consecutive attempt number (1-based).
        attempt: u32,
        /// Index the resume request carries.
        last_seen_index: u64,
        /// Why the previous stream was abandoned.
        reason: String,
    },
    /// Server finished generation.
    Completed {
        /// Word count reported by the server.
        total_words: u64,
    },
    /// Consumer cancelled the task.
    Stopped,
    /// Gave up resuming; a manual retry is possible.
    Failed {
        /// Last failure observed.
        reason: String,
    },
}

impl SessionStatus {
    /// Lifecycle state this status belongs to.
    #[must_use]
    pub fn state(&self) -> SessionState {
        match self {
            Self::Idle => SessionState::Idle,
            Self::Connecting => SessionState::Connecting,
            Self::Streaming => SessionState::Streaming,
            Self::Reconnecting { .. } => SessionState::Reconnecting,
            Self::Completed { .. } => SessionState::Completed,
            Self::Stopped => SessionState::Stopped,
            Self::Failed { .. } => SessionState::Failed,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Connecting => f.write_str("connecting"),
            Self::Streaming => f.write_str("streaming"),
            Self::Reconnecting {
                attempt,
                last_seen_index,
                reason,
            } => write!(
                f,
                "connection lost ({reason}); reconnecting from word {last_seen_index} (attempt {attempt})"
            ),
            Self::Completed { total_words } => write!(f, "completed: {total_words} words"),
            Self::Stopped => f.write_str("stopped by user"),
            Self::Failed { reason } => write!(f, "failed to resume: {reason}"),
        }
    }
}

/// Notification delivered to the session observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// A persisted checkpoint was loaded on startup.
    Restored {
        /// Task the checkpoint belongs to.
        task_id: String,
        /// Words applied before the restart.
        words: Vec<String>,
    },
    /// The server acknowledged the task.
    Started {
        /// Task identifier reported by the server.
        task_id: String,
    },
    /// A new word was applied and persisted.
    Word {
        /// Token text.
        word: String,
        /// Server-assigned index.
        index: u64,
    },
    /// The session changed status.
    Status(SessionStatus),
}
