//! Typed protocol events produced by the frame decoder.

/// One decoded frame of a generation stream.
///
/// Malformed or unrecognised frames never become a `StreamEvent`; the
/// decoder drops them before they reach the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The server accepted the task and began generating.
    Start {
        /// Task (chat) identifier echoed by the server.
        task_id: String,
    },
    /// One generated token.
    Word {
        /// Token text.
        word: String,
        /// Server-assigned position; non-decreasing within a task.
        index: u64,
    },
    /// Generation finished.
    Complete {
        /// Number of words the server produced for the task.
        total_words: u64,
    },
}

impl StreamEvent {
    /// Wire name of the event (`start`, `word`, `complete`).
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Word { .. } => "word",
            Self::Complete { .. } => "complete",
        }
    }
}
