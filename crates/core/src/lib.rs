//! Sensorlog Core Library
//!
//! Storage actor, knowledge base, token lifecycle and background jobs for the
//! Sensorlog telemetry service.

pub mod config;
pub mod credentials;
pub mod error;
pub mod knowledge;
pub mod models;
pub mod storage;
pub mod tokens;
pub mod weather;

pub use config::{Config, ConfigError, StorageConfig, TokenConfig, WeatherConfig};
pub use error::{Error, Result};
pub use knowledge::KnowledgeBase;
pub use models::*;
pub use storage::StorageActor;
pub use tokens::{spawn_purge_sweep, TokenService};
pub use weather::{spawn_weather_fetch, WeatherSource};
