//! Error types for Sensorlog Core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Statement preparation or execution failed
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// The storage actor has been stopped
    #[error("Storage closed")]
    StorageClosed,

    /// A storage operation reported failure at the facade
    #[error("Storage operation failed: {0}")]
    StorageFailed(&'static str),

    /// A request panicked inside the storage worker
    #[error("Storage request aborted: {0}")]
    StorageAborted(String),

    /// Presented token is unknown, expired or malformed
    #[error("Invalid or expired token")]
    AuthInvalid,

    /// Entropy source unavailable while generating a token
    #[error("Randomness unavailable: {0}")]
    Randomness(String),

    /// Third-party weather source failed
    #[error("Weather fetch failed: {0}")]
    WeatherFetch(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Password hashing error: {0}")]
    Hashing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
