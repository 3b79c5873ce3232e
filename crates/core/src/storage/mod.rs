//! SQLite storage layer for Sensorlog
//!
//! The [`StorageActor`] owns the single connection; the [`catalog`] holds
//! every statement it is allowed to run.

mod actor;
pub mod catalog;
mod migrations;

pub use actor::StorageActor;
pub use catalog::{Command, Query};
pub use rusqlite::types::Value;
