//! Network error types

use std::io;

use crate::protocol::Status;

/// Network result type
pub type Result<T> = std::result::Result<T, Error>;

/// Network errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server answered with a failure response
    #[error("Request rejected ({status:?}): {reason}")]
    Rejected { status: Status, reason: String },

    /// Operation needs a session token and none is held
    #[error("Not authenticated")]
    NotAuthenticated,
}
