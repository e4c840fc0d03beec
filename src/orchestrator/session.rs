//! Session controller: the resumable streaming state machine.
//!
//! A [`Session`] owns the live checkpoint, at most one in-flight stream,
//! and its inactivity watchdog. Every input (consumer commands, decoded
//! frames, transport failures and watchdog expiry) is funnelled through
//! [`Session::handle`] on a single task, so checkpoint writes never race.
//!
//! ```text
//! Idle ─begin─▶ Connecting ─opened─▶ Streaming ─complete─▶ Completed
//!                   │                  │  ▲
//!                   └─failure/stall──▶ Reconnecting ──attempts exhausted──▶ Failed
//! Reconnecting ─begin─▶ Connecting (pending resume abandoned)
//! any non-terminal ─cancel─▶ Stopped
//! ```
//!
//! [`Session::spawn`] runs the machine as a background task and returns a
//! [`SessionHandle`]; tests can instead call [`Session::next_input`] and
//! [`Session::handle`] directly to drive it step by step.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::GlobalConfig;
use crate::models::checkpoint::{Checkpoint, DedupPolicy};
use crate::models::event::StreamEvent;
use crate::models::status::{SessionState, SessionStatus, SessionUpdate};
use crate::persistence::CheckpointStore;
use crate::stream::codec::FrameCodec;
use crate::stream::transport::{ByteStream, OpenFuture, OpenRequest, StreamTransport};
use crate::{AppError, Result};

use super::retry::RetryPolicy;
use super::watchdog::{Watchdog, WatchdogExpired, WatchdogHandle};

/// Capacity of the command channel behind a [`SessionHandle`].
const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// Tunables for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Silence tolerated on an open stream.
    pub inactivity_timeout: Duration,
    /// Resume attempt policy.
    pub retry: RetryPolicy,
    /// Duplicate suppression rule.
    pub dedup: DedupPolicy,
    /// Checkpoints older than this are discarded on recovery.
    pub checkpoint_ttl: Option<chrono::Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            inactivity_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            dedup: DedupPolicy::default(),
            checkpoint_ttl: Some(chrono::Duration::hours(24)),
        }
    }
}

impl SessionOptions {
    /// Options derived from loaded configuration.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            inactivity_timeout: config.inactivity_timeout(),
            retry: RetryPolicy::from(&config.retry),
            dedup: config.stream.dedup,
            checkpoint_ttl: config.checkpoint_ttl(),
        }
    }
}

/// Commands a consumer sends through a [`SessionHandle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Start a new task, replacing any previous checkpoint.
    Begin {
        /// Task (chat) identifier.
        task_id: String,
        /// Input that initiates generation.
        message: String,
    },
    /// Stop the current task and clear its checkpoint.
    Cancel,
    /// Resume a failed (or restored) task from its checkpoint.
    Retry,
    /// Stop the session loop, keeping the checkpoint for a later restart.
    Shutdown,
}

/// Everything that can move the state machine.
#[derive(Debug)]
pub enum SessionInput {
    /// Consumer asked to start a task.
    Begin {
        /// Task (chat) identifier.
        task_id: String,
        /// Input that initiates generation.
        message: String,
    },
    /// Consumer cancelled.
    Cancel,
    /// Consumer asked for a manual resume.
    Retry,
    /// The transport request resolved and the body is readable.
    Opened,
    /// A decoded frame arrived.
    Frame(StreamEvent),
    /// Opening or reading the stream failed.
    TransportFailed(AppError),
    /// The body ended without a `complete` frame.
    TransportEnded,
    /// The watchdog deadline for `generation` elapsed.
    WatchdogExpired {
        /// Arming generation carried by the expiry.
        generation: u64,
    },
}

type FrameStream = FramedRead<StreamReader<ByteStream, Bytes>, FrameCodec>;

enum StreamPhase {
    Opening(OpenFuture),
    Reading(FrameStream),
}

/// The one outstanding transport of a session.
struct ActiveStream {
    request: OpenRequest,
    phase: StreamPhase,
    cancel: CancellationToken,
}

impl ActiveStream {
    /// Wait for the next input this stream produces.
    ///
    /// Cancel-safe: the open future and frame reader live in `self`, so
    /// dropping this future between polls loses nothing.
    async fn next_input(&mut self) -> SessionInput {
        let body = match &mut self.phase {
            StreamPhase::Opening(open) => {
                let result = tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => Err(AppError::Cancelled),
                    result = open => result,
                };
                match result {
                    Ok(body) => body,
                    Err(err) => return SessionInput::TransportFailed(err),
                }
            }
            StreamPhase::Reading(frames) => {
                let item = tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => {
                        return SessionInput::TransportFailed(AppError::Cancelled);
                    }
                    item = frames.next() => item,
                };
                return match item {
                    Some(Ok(event)) => SessionInput::Frame(event),
                    Some(Err(AppError::Io(msg))) => {
                        SessionInput::TransportFailed(AppError::Transport(msg))
                    }
                    Some(Err(err)) => SessionInput::TransportFailed(err),
                    None => SessionInput::TransportEnded,
                };
            }
        };

        self.phase = StreamPhase::Reading(FramedRead::new(StreamReader::new(body), FrameCodec::new()));
        SessionInput::Opened
    }
}

/// Resumable streaming session.
pub struct Session {
    session_id: String,
    options: SessionOptions,
    transport: Arc<dyn StreamTransport>,
    store: Arc<dyn CheckpointStore>,
    updates: mpsc::Sender<SessionUpdate>,
    state: SessionState,
    checkpoint: Option<Checkpoint>,
    attempts: u32,
    active: Option<ActiveStream>,
    watchdog: WatchdogHandle,
    expirations: mpsc::Receiver<WatchdogExpired>,
    cancel: CancellationToken,
}

impl Drop for Session {
    /// Abort the in-flight stream and the watchdog task.
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Session {
    /// Create an idle session and start its watchdog task.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(
        options: SessionOptions,
        transport: Arc<dyn StreamTransport>,
        store: Arc<dyn CheckpointStore>,
        updates: mpsc::Sender<SessionUpdate>,
    ) -> Self {
        let session_id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let (expired_tx, expirations) = mpsc::channel(4);
        let watchdog = Watchdog::new(session_id.clone(), expired_tx, cancel.child_token()).spawn();

        Self {
            session_id,
            options,
            transport,
            store,
            updates,
            state: SessionState::Idle,
            checkpoint: None,
            attempts: 0,
            active: None,
            watchdog,
            expirations,
            cancel,
        }
    }

    /// Identifier used to correlate this session's logs.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Live checkpoint, if a task is in progress or failed.
    #[must_use]
    pub fn checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoint.as_ref()
    }

    /// Consecutive failed attempts since the last progress.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether the inactivity watchdog is counting down.
    #[must_use]
    pub fn is_watchdog_armed(&self) -> bool {
        self.watchdog.is_armed()
    }

    /// Whether a transport is outstanding.
    #[must_use]
    pub fn has_active_stream(&self) -> bool {
        self.active.is_some()
    }

    /// Run the session on a background task.
    #[must_use]
    pub fn spawn(self) -> SessionHandle {
        let (commands, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let span = info_span!("session", session_id = %self.session_id);
        let task = tokio::spawn(self.run(rx).instrument(span));
        SessionHandle { commands, task }
    }

    /// Recover any persisted checkpoint, then process commands and stream
    /// inputs until [`SessionCommand::Shutdown`] or the command channel closes.
    ///
    /// Returns the state the session was in when the loop exited.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) -> SessionState {
        if let Err(err) = self.recover().await {
            self.fail(format!("checkpoint recovery failed: {err}")).await;
        }

        loop {
            let input = tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(SessionCommand::Begin { task_id, message }) => {
                        SessionInput::Begin { task_id, message }
                    }
                    Some(SessionCommand::Cancel) => SessionInput::Cancel,
                    Some(SessionCommand::Retry) => SessionInput::Retry,
                    Some(SessionCommand::Shutdown) | None => break,
                },
                input = self.next_input() => input,
            };

            if let Err(err) = self.handle(input).await {
                self.fail(err.to_string()).await;
            }
        }

        self.drop_active();
        self.watchdog.disarm();
        info!(session_id = %self.session_id, state = %self.state, "session loop exited");
        self.state
    }

    /// Wait for the next input from the active stream or the watchdog.
    ///
    /// Pends forever when there is neither.
    pub async fn next_input(&mut self) -> SessionInput {
        let active = self.active.as_mut();
        tokio::select! {
            biased;
            input = async move {
                match active {
                    Some(stream) => stream.next_input().await,
                    None => std::future::pending().await,
                }
            } => input,
            Some(expired) = self.expirations.recv() => SessionInput::WatchdogExpired {
                generation: expired.generation,
            },
        }
    }

    /// Apply one input to the state machine.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the checkpoint store fails; the caller
    /// should treat the session as failed.
    pub async fn handle(&mut self, input: SessionInput) -> Result<()> {
        match input {
            SessionInput::Begin { task_id, message } => self.begin(task_id, message).await,
            SessionInput::Cancel => self.cancel().await,
            SessionInput::Retry => self.retry().await,
            SessionInput::Opened => {
                self.on_opened().await;
                Ok(())
            }
            SessionInput::Frame(event) => self.on_event(event).await,
            SessionInput::TransportFailed(err) => {
                self.on_failure(err).await;
                Ok(())
            }
            SessionInput::TransportEnded => {
                self.on_failure(AppError::Transport("stream ended before completion".into()))
                    .await;
                Ok(())
            }
            SessionInput::WatchdogExpired { generation } => {
                self.on_watchdog(generation).await;
                Ok(())
            }
        }
    }

    /// Load a persisted checkpoint and resume it if it recorded progress.
    ///
    /// Only acts while idle. A checkpoint older than the configured TTL is
    /// discarded instead.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the store cannot be read or cleared.
    pub async fn recover(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Ok(());
        }

        let Some(checkpoint) = self.store.load().await? else {
            debug!(session_id = %self.session_id, "no checkpoint to recover");
            return Ok(());
        };

        if let Some(ttl) = self.options.checkpoint_ttl {
            if checkpoint.is_stale(ttl, Utc::now()) {
                info!(
                    session_id = %self.session_id,
                    task_id = checkpoint.task_id,
                    updated_at = %checkpoint.updated_at,
                    "discarding stale checkpoint"
                );
                self.store.clear().await?;
                return Ok(());
            }
        }

        info!(
            session_id = %self.session_id,
            task_id = checkpoint.task_id,
            last_seen_index = checkpoint.last_seen_index,
            word_count = checkpoint.words.len(),
            "checkpoint restored"
        );
        self.notify(SessionUpdate::Restored {
            task_id: checkpoint.task_id.clone(),
            words: checkpoint.words.clone(),
        })
        .await;

        let resumable = checkpoint.is_resumable();
        self.checkpoint = Some(checkpoint);
        if resumable {
            self.attempts = 0;
            self.schedule_resume("resuming after restart".into()).await;
        }
        Ok(())
    }

    // ── Transitions ─────────────────────────────────────────

    async fn begin(&mut self, task_id: String, message: String) -> Result<()> {
        if matches!(
            self.state,
            SessionState::Connecting | SessionState::Streaming
        ) {
            debug!(session_id = %self.session_id, state = %self.state, "begin ignored: stream already live");
            return Ok(());
        }
        if task_id.trim().is_empty() || message.trim().is_empty() {
            warn!(session_id = %self.session_id, "begin ignored: empty task id or message");
            return Ok(());
        }

        if let Some(previous) = self.checkpoint.take() {
            info!(
                session_id = %self.session_id,
                task_id = previous.task_id,
                "replacing pending task"
            );
        }
        self.drop_active();
        self.watchdog.disarm();

        self.store.clear().await?;
        let checkpoint = Checkpoint::new(task_id.clone(), message.clone());
        self.store.save(&checkpoint).await?;
        self.checkpoint = Some(checkpoint);
        self.attempts = 0;

        info!(session_id = %self.session_id, task_id, "starting task");
        self.set_status(SessionStatus::Connecting).await;
        self.open_stream(OpenRequest::Start { task_id, message }, Duration::ZERO);
        Ok(())
    }

    async fn on_opened(&mut self) {
        if !self.state.is_live() {
            return;
        }
        self.watchdog.arm(self.options.inactivity_timeout);
        if self.state != SessionState::Streaming {
            self.set_status(SessionStatus::Streaming).await;
        }
    }

    async fn on_event(&mut self, event: StreamEvent) -> Result<()> {
        if !matches!(
            self.state,
            SessionState::Connecting | SessionState::Streaming
        ) {
            debug!(
                session_id = %self.session_id,
                state = %self.state,
                event = event.name(),
                "frame ignored outside an open stream"
            );
            return Ok(());
        }

        match event {
            StreamEvent::Start { task_id } => {
                let expected = self.checkpoint.as_ref().map(|c| c.task_id.as_str());
                if expected != Some(task_id.as_str()) {
                    warn!(
                        session_id = %self.session_id,
                        expected,
                        task_id,
                        "server acknowledged a different task"
                    );
                }
                self.attempts = 0;
                if self.state != SessionState::Streaming {
                    self.set_status(SessionStatus::Streaming).await;
                }
                self.notify(SessionUpdate::Started { task_id }).await;
                Ok(())
            }
            StreamEvent::Word { word, index } => self.on_word(word, index).await,
            StreamEvent::Complete { total_words } => self.on_complete(total_words).await,
        }
    }

    async fn on_word(&mut self, word: String, index: u64) -> Result<()> {
        let Some(current) = self.checkpoint.as_ref() else {
            warn!(session_id = %self.session_id, index, "word received without a checkpoint");
            return Ok(());
        };

        let mut next = current.clone();
        if !next.apply_word(&word, index, self.options.dedup) {
            debug!(session_id = %self.session_id, index, word, "duplicate word suppressed");
            return Ok(());
        }

        // Persist before anyone sees the word.
        self.store.save(&next).await?;
        self.checkpoint = Some(next);

        self.watchdog.arm(self.options.inactivity_timeout);
        self.attempts = 0;
        if self.state != SessionState::Streaming {
            self.set_status(SessionStatus::Streaming).await;
        }
        self.notify(SessionUpdate::Word { word, index }).await;
        Ok(())
    }

    async fn on_complete(&mut self, total_words: u64) -> Result<()> {
        self.drop_active();
        self.store.clear().await?;
        let applied = self.checkpoint.take().map_or(0, |c| c.words.len());
        self.watchdog.disarm();
        self.attempts = 0;

        info!(
            session_id = %self.session_id,
            total_words,
            applied,
            "task completed"
        );
        self.set_status(SessionStatus::Completed { total_words }).await;
        Ok(())
    }

    async fn on_failure(&mut self, err: AppError) {
        if err.is_cancelled() {
            debug!(session_id = %self.session_id, "cancelled read ignored");
            return;
        }
        if !self.state.is_live() {
            debug!(
                session_id = %self.session_id,
                state = %self.state,
                %err,
                "transport failure ignored"
            );
            return;
        }
        self.schedule_resume(err.to_string()).await;
    }

    async fn on_watchdog(&mut self, generation: u64) {
        if !self.watchdog.is_current(generation) {
            debug!(session_id = %self.session_id, generation, "stale watchdog expiry ignored");
            return;
        }
        if !self.state.is_live() {
            return;
        }
        let timeout_ms =
            u64::try_from(self.options.inactivity_timeout.as_millis()).unwrap_or(u64::MAX);
        warn!(session_id = %self.session_id, timeout_ms, "stream inactive, abandoning");
        self.schedule_resume(format!("no activity for {timeout_ms} ms"))
            .await;
    }

    async fn cancel(&mut self) -> Result<()> {
        if self.state.is_terminal() {
            debug!(session_id = %self.session_id, state = %self.state, "cancel ignored");
            return Ok(());
        }

        self.drop_active();
        self.watchdog.disarm();
        self.attempts = 0;
        self.store.clear().await?;
        self.checkpoint = None;

        info!(session_id = %self.session_id, "stopped by user");
        self.set_status(SessionStatus::Stopped).await;
        Ok(())
    }

    async fn retry(&mut self) -> Result<()> {
        if !matches!(self.state, SessionState::Failed | SessionState::Idle) {
            debug!(session_id = %self.session_id, state = %self.state, "retry ignored");
            return Ok(());
        }
        if self.checkpoint.is_none() {
            self.checkpoint = self.store.load().await?;
        }
        if self.checkpoint.is_none() {
            info!(session_id = %self.session_id, "retry ignored: no checkpoint");
            return Ok(());
        }

        self.attempts = 0;
        self.schedule_resume("manual retry".into()).await;
        Ok(())
    }

    // ── Helpers ─────────────────────────────────────────────

    /// Count a failed attempt and open a resume, or give up.
    async fn schedule_resume(&mut self, reason: String) {
        self.drop_active();
        self.attempts = self.attempts.saturating_add(1);
        let attempt = self.attempts;

        if !self.options.retry.allows(attempt) {
            self.fail(format!("{reason} (gave up after {} attempts)", attempt - 1))
                .await;
            return;
        }

        let Some(checkpoint) = self.checkpoint.as_ref() else {
            self.fail(format!("{reason}; no checkpoint to resume from"))
                .await;
            return;
        };

        let last_seen_index = checkpoint.last_seen_index;
        let request = OpenRequest::Resume {
            task_id: checkpoint.task_id.clone(),
            message: checkpoint.pending_message.clone(),
            last_seen_index,
        };
        let delay = self.options.retry.delay_for(attempt);

        warn!(
            session_id = %self.session_id,
            attempt,
            last_seen_index,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            reason,
            "resuming stream"
        );
        self.set_status(SessionStatus::Reconnecting {
            attempt,
            last_seen_index,
            reason,
        })
        .await;
        self.open_stream(request, delay);
    }

    /// Replace the outstanding transport with a new request.
    fn open_stream(&mut self, request: OpenRequest, delay: Duration) {
        self.drop_active();

        let cancel = self.cancel.child_token();
        let open = self.transport.open(request.clone(), cancel.clone());
        let phase = if delay.is_zero() {
            StreamPhase::Opening(open)
        } else {
            StreamPhase::Opening(Box::pin(async move {
                tokio::time::sleep(delay).await;
                open.await
            }))
        };

        self.watchdog.arm(delay + self.options.inactivity_timeout);
        debug!(
            session_id = %self.session_id,
            mode = request.mode(),
            task_id = request.task_id(),
            "transport request issued"
        );
        self.active = Some(ActiveStream {
            request,
            phase,
            cancel,
        });
    }

    /// Cancel and forget the outstanding transport, if any.
    fn drop_active(&mut self) {
        if let Some(active) = self.active.take() {
            debug!(
                session_id = %self.session_id,
                mode = active.request.mode(),
                "closing transport"
            );
            active.cancel.cancel();
        }
    }

    async fn fail(&mut self, reason: String) {
        self.drop_active();
        self.watchdog.disarm();
        error!(session_id = %self.session_id, reason, "session failed");
        self.set_status(SessionStatus::Failed { reason }).await;
    }

    async fn set_status(&mut self, status: SessionStatus) {
        self.state = status.state();
        info!(session_id = %self.session_id, state = %self.state, "session state changed");
        self.notify(SessionUpdate::Status(status)).await;
    }

    async fn notify(&mut self, update: SessionUpdate) {
        if self.updates.send(update).await.is_err() {
            debug!(session_id = %self.session_id, "observer gone, update dropped");
        }
    }
}

/// Handle returned from [`Session::spawn`] for commanding the session.
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    task: JoinHandle<SessionState>,
}

impl SessionHandle {
    /// Start a new task.
    ///
    /// Ignored by the session while connecting or streaming. A pending
    /// resume is abandoned and its checkpoint replaced.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidRequest` if `task_id` or `message` is
    /// blank, or `AppError::Session` if the session task has exited.
    pub async fn begin(
        &self,
        task_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<()> {
        let task_id = task_id.into();
        let message = message.into();
        if task_id.trim().is_empty() {
            return Err(AppError::InvalidRequest("task id must not be empty".into()));
        }
        if message.trim().is_empty() {
            return Err(AppError::InvalidRequest("message must not be empty".into()));
        }
        self.send(SessionCommand::Begin { task_id, message }).await
    }

    /// Stop the current task and clear its checkpoint.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Session` if the session task has exited.
    pub async fn cancel(&self) -> Result<()> {
        self.send(SessionCommand::Cancel).await
    }

    /// Resume from the retained checkpoint after a failure.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Session` if the session task has exited.
    pub async fn retry(&self) -> Result<()> {
        self.send(SessionCommand::Retry).await
    }

    /// Stop the session loop without clearing the checkpoint.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Session` if the session task panicked.
    pub async fn shutdown(self) -> Result<SessionState> {
        // The loop may already be gone; joining below reports its outcome.
        let _ = self.commands.send(SessionCommand::Shutdown).await;
        self.task
            .await
            .map_err(|err| AppError::Session(format!("session task failed: {err}")))
    }

    /// Whether the session loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    async fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| AppError::Session("session task has exited".into()))
    }
}
