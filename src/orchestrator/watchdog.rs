//! Per-session inactivity watchdog.
//!
//! Each session owns one [`Watchdog`] running as a background task. The
//! session [`arm`](WatchdogHandle::arm)s it whenever it issues a request,
//! opens a stream, or applies a word; if no re-arm or
//! [`disarm`](WatchdogHandle::disarm) arrives before the deadline, the task
//! sends a [`WatchdogExpired`] through a `tokio::sync::mpsc` channel.
//!
//! Expiry is only a signal. The session's own task receives it and decides
//! whether to abandon the stream, so the timer never mutates session state
//! from another task. Each arming carries a generation number; an expiry
//! whose generation is no longer current was superseded and must be ignored.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

/// Sent when an armed deadline elapses without being superseded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogExpired {
    /// Generation of the arming that expired.
    pub generation: u64,
    /// Deadline that elapsed.
    pub after: Duration,
}

#[derive(Debug, Clone, Copy)]
struct Armed {
    generation: u64,
    after: Duration,
    deadline: Instant,
}

/// Builder for a per-session watchdog.
///
/// Call [`spawn`](Self::spawn) to start the background timer task.
pub struct Watchdog {
    session_id: String,
    expired_tx: mpsc::Sender<WatchdogExpired>,
    cancel: CancellationToken,
}

impl Watchdog {
    /// Construct a new watchdog (does not start the timer task yet).
    #[must_use]
    pub fn new(
        session_id: String,
        expired_tx: mpsc::Sender<WatchdogExpired>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session_id,
            expired_tx,
            cancel,
        }
    }

    /// Spawn the timer task, initially disarmed, and return its handle.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(self) -> WatchdogHandle {
        let (armed_tx, armed_rx) = watch::channel(None);
        let cancel_for_handle = self.cancel.clone();

        let join_handle = tokio::spawn(
            Self::run(self.session_id, self.expired_tx, self.cancel, armed_rx)
                .instrument(info_span!("watchdog")),
        );

        WatchdogHandle {
            armed_tx,
            generation: 0,
            join_handle: Some(join_handle),
            cancel: cancel_for_handle,
        }
    }

    /// Core timer loop.
    async fn run(
        session_id: String,
        expired_tx: mpsc::Sender<WatchdogExpired>,
        cancel: CancellationToken,
        mut armed_rx: watch::Receiver<Option<Armed>>,
    ) {
        loop {
            let armed = *armed_rx.borrow_and_update();

            let fired = match armed {
                None => None,
                Some(armed) => tokio::select! {
                    () = cancel.cancelled() => return,
                    changed = armed_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        continue;
                    }
                    () = tokio::time::sleep_until(armed.deadline) => Some(armed),
                },
            };

            if let Some(armed) = fired {
                warn!(
                    session_id,
                    generation = armed.generation,
                    after_ms = u64::try_from(armed.after.as_millis()).unwrap_or(u64::MAX),
                    "inactivity deadline elapsed"
                );
                let expired = WatchdogExpired {
                    generation: armed.generation,
                    after: armed.after,
                };
                if expired_tx.send(expired).await.is_err() {
                    debug!(session_id, "watchdog receiver closed, stopping");
                    return;
                }
            }

            // Disarmed or already fired: wait for the next arm/disarm.
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!(session_id, "watchdog cancelled");
                    return;
                }
                changed = armed_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// Handle returned from [`Watchdog::spawn`] for controlling the timer.
pub struct WatchdogHandle {
    armed_tx: watch::Sender<Option<Armed>>,
    /// Bumped on every arm and disarm; only the owning session touches it.
    generation: u64,
    /// Task handle for the background timer loop.
    join_handle: Option<JoinHandle<()>>,
    /// Cancelled when the handle is dropped.
    cancel: CancellationToken,
}

impl Drop for WatchdogHandle {
    /// Cancel the background timer task when the handle is dropped.
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl WatchdogHandle {
    /// (Re)start the countdown; supersedes any earlier arming.
    pub fn arm(&mut self, after: Duration) {
        self.generation += 1;
        self.armed_tx.send_replace(Some(Armed {
            generation: self.generation,
            after,
            deadline: Instant::now() + after,
        }));
    }

    /// Stop the countdown. Idempotent.
    pub fn disarm(&mut self) {
        self.generation += 1;
        self.armed_tx.send_replace(None);
    }

    /// Generation an expiry of the current arming will carry.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether an expiry with `generation` belongs to the current arming.
    #[must_use]
    pub fn is_current(&self, generation: u64) -> bool {
        self.is_armed() && self.generation == generation
    }

    /// Whether a countdown is running.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed_tx.borrow().is_some()
    }

    /// Signal the timer task to stop and wait for it to exit.
    pub async fn await_completion(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.await;
        }
    }
}
