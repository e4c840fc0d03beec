//! Domain model module declarations.

pub mod checkpoint;
pub mod event;
pub mod status;
