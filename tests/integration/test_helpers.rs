//! Shared fixtures for session integration tests.
//!
//! [`ScriptedTransport`] serves one pre-recorded response per `open`
//! call and records every request it receives.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use brambles_stream::models::checkpoint::DedupPolicy;
use brambles_stream::models::status::{SessionStatus, SessionUpdate};
use brambles_stream::orchestrator::retry::RetryPolicy;
use brambles_stream::orchestrator::session::{Session, SessionOptions};
use brambles_stream::persistence::CheckpointStore;
use brambles_stream::stream::{ByteStream, OpenFuture, OpenRequest, StreamTransport};
use brambles_stream::AppError;

/// How a scripted body ends after its chunks.
pub enum Ending {
    /// Clean end of body.
    Close,
    /// Read error with this message.
    Fail(&'static str),
    /// Never yields again.
    Hang,
}

/// One scripted response.
pub enum Scripted {
    /// The request itself fails (non-2xx, refused connection).
    Reject(&'static str),
    /// The request never resolves until cancelled.
    NeverOpens,
    /// The request opens and the body yields `chunks`, then `ending`.
    Body {
        chunks: Vec<String>,
        ending: Ending,
    },
}

pub fn body(chunks: Vec<String>, ending: Ending) -> Scripted {
    Scripted::Body { chunks, ending }
}

pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<OpenRequest>>,
}

impl ScriptedTransport {
    pub fn new(scripts: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Every request opened so far, in order.
    pub fn requests(&self) -> Vec<OpenRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl StreamTransport for ScriptedTransport {
    fn open(&self, request: OpenRequest, cancel: CancellationToken) -> OpenFuture {
        self.requests.lock().unwrap().push(request);
        // Unscripted requests hang so tests notice unexpected retries.
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or(Scripted::Body {
            chunks: Vec::new(),
            ending: Ending::Hang,
        });

        Box::pin(async move {
            match script {
                Scripted::Reject(msg) => Err(AppError::Transport(msg.into())),
                Scripted::NeverOpens => {
                    cancel.cancelled().await;
                    Err(AppError::Cancelled)
                }
                Scripted::Body { chunks, ending } => {
                    let head = stream::iter(
                        chunks
                            .into_iter()
                            .map(|c| Ok::<_, std::io::Error>(Bytes::from(c))),
                    );
                    let tail: ByteStream = match ending {
                        Ending::Close => stream::empty().boxed(),
                        Ending::Fail(msg) => {
                            stream::once(async move { Err(std::io::Error::other(msg)) }).boxed()
                        }
                        Ending::Hang => stream::pending().boxed(),
                    };
                    let body: ByteStream = head.chain(tail).boxed();
                    Ok(body)
                }
            }
        })
    }
}

pub fn start_frame(task_id: &str) -> String {
    format!("event: start\ndata: {{\"chatId\": \"{task_id}\", \"status\": \"streaming\"}}\n\n")
}

pub fn word_frame(word: &str, index: u64) -> String {
    format!("event: word\ndata: {{\"word\": \"{word}\", \"index\": {index}, \"chatId\": \"t1\"}}\n\n")
}

pub fn complete_frame(total_words: u64) -> String {
    format!(
        "event: complete\ndata: {{\"chatId\": \"t1\", \"status\": \"completed\", \"totalWords\": {total_words}}}\n\n"
    )
}

/// Short timeouts and no backoff so failure paths run quickly.
pub fn fast_options() -> SessionOptions {
    SessionOptions {
        inactivity_timeout: Duration::from_secs(2),
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
        },
        dedup: DedupPolicy::Word,
        checkpoint_ttl: Some(chrono::Duration::hours(24)),
    }
}

pub fn new_session(
    options: SessionOptions,
    transport: Arc<ScriptedTransport>,
    store: Arc<dyn CheckpointStore>,
) -> (Session, mpsc::Receiver<SessionUpdate>) {
    let (tx, rx) = mpsc::channel(256);
    (Session::new(options, transport, store, tx), rx)
}

/// Step the session until it reaches a terminal state.
pub async fn drive_until_terminal(session: &mut Session) {
    drive_until(session, |s| s.state().is_terminal()).await;
}

/// Step the session until `done` holds.
pub async fn drive_until(session: &mut Session, done: impl Fn(&Session) -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !done(session) {
            let input = session.next_input().await;
            session.handle(input).await.expect("transition");
        }
    })
    .await
    .expect("session should reach the expected point before timeout");
}

/// Everything buffered on the observer channel right now.
pub fn drain(updates: &mut mpsc::Receiver<SessionUpdate>) -> Vec<SessionUpdate> {
    let mut seen = Vec::new();
    while let Ok(update) = updates.try_recv() {
        seen.push(update);
    }
    seen
}

/// Receive updates until a terminal status arrives.
pub async fn collect_until_terminal(updates: &mut mpsc::Receiver<SessionUpdate>) -> Vec<SessionUpdate> {
    let mut seen = Vec::new();
    loop {
        let update = tokio::time::timeout(Duration::from_secs(10), updates.recv())
            .await
            .expect("update before timeout")
            .expect("observer channel open");
        let terminal = matches!(&update, SessionUpdate::Status(s) if s.state().is_terminal());
        seen.push(update);
        if terminal {
            return seen;
        }
    }
}

pub fn words(updates: &[SessionUpdate]) -> Vec<String> {
    updates
        .iter()
        .filter_map(|u| match u {
            SessionUpdate::Word { word, .. } => Some(word.clone()),
            _ => None,
        })
        .collect()
}

pub fn statuses(updates: &[SessionUpdate]) -> Vec<SessionStatus> {
    updates
        .iter()
        .filter_map(|u| match u {
            SessionUpdate::Status(status) => Some(status.clone()),
            _ => None,
        })
        .collect()
}
