#![forbid(unsafe_code)]

pub mod config;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod stream;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
