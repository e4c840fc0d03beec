//! Session orchestration.
//!
//! Covers the resumable session state machine, its inactivity watchdog,
//! and the retry policy that paces resume attempts.

pub mod retry;
pub mod session;
pub mod watchdog;
