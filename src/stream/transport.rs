//! Transport abstraction for generation streams.
//!
//! The [`StreamTransport`] trait decouples the session controller from
//! the network. A transport opens one long-lived request per call and
//! hands back the response body as a [`ByteStream`]; it never touches
//! checkpoint state.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::Result;

/// Response body of an opened stream.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Future returned by [`StreamTransport::open`].
pub type OpenFuture = Pin<Box<dyn Future<Output = Result<ByteStream>> + Send>>;

/// Which request to issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenRequest {
    /// Begin generation for a task.
    Start {
        /// Task (chat) identifier.
        task_id: String,
        /// Input that initiates generation.
        message: String,
    },
    /// Re-establish a stream after the last applied index.
    Resume {
        /// Task (chat) identifier.
        task_id: String,
        /// Original input, resent so the server can regenerate.
        message: String,
        /// Highest index already applied by the consumer.
        last_seen_index: u64,
    },
}

/// JSON body of a start request.
#[derive(Debug, Serialize)]
pub struct StartBody<'a> {
    /// Input that initiates generation.
    pub message: &'a str,
}

/// JSON body of a resume request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeBody<'a> {
    /// Highest index already applied by the consumer.
    pub last_seen_index: u64,
    /// Original input.
    pub message: &'a str,
}

/// Request body for either endpoint.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RequestBody<'a> {
    /// `POST /chat/{id}/message`.
    Start(StartBody<'a>),
    /// `POST /chat/{id}/resume`.
    Resume(ResumeBody<'a>),
}

impl OpenRequest {
    /// Task the request targets.
    #[must_use]
    pub fn task_id(&self) -> &str {
        match self {
            Self::Start { task_id, .. } | Self::Resume { task_id, .. } => task_id,
        }
    }

    /// Short name for logs and error messages.
    #[must_use]
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Resume { .. } => "resume",
        }
    }

    /// Endpoint path relative to the API root.
    #[must_use]
    pub fn path(&self) -> String {
        match self {
            Self::Start { task_id, .. } => format!("/chat/{task_id}/message"),
            Self::Resume { task_id, .. } => format!("/chat/{task_id}/resume"),
        }
    }

    /// JSON request body.
    #[must_use]
    pub fn body(&self) -> RequestBody<'_> {
        match self {
            Self::Start { message, .. } => RequestBody::Start(StartBody { message }),
            Self::Resume {
                message,
                last_seen_index,
                ..
            } => RequestBody::Resume(ResumeBody {
                last_seen_index: *last_seen_index,
                message,
            }),
        }
    }
}

/// Opens cancellable generation streams.
pub trait StreamTransport: Send + Sync {
    /// Issue `request` and resolve once the response is open.
    ///
    /// The returned future owns everything it needs, so the caller may
    /// poll it across `select!` iterations. Cancelling `cancel` must make
    /// a pending open resolve promptly with
    /// [`AppError::Cancelled`](crate::AppError::Cancelled).
    ///
    /// # Errors
    ///
    /// Resolves to [`AppError::Transport`](crate::AppError::Transport) on
    /// network failure or a non-success status.
    fn open(&self, request: OpenRequest, cancel: CancellationToken) -> OpenFuture;
}
