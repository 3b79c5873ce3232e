//! Network protocol message types
//!
//! All messages are JSON-serialized and length-prefixed on the wire. Every
//! request gets exactly one response, in the order requests were sent.

use serde::{Deserialize, Serialize};

use sensorlog_core::ReadingPoint;

/// Client requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Exchange credentials for a session token
    Auth { user: String, password: String },

    /// Store readings for one sensor. With no `points`, the single
    /// `timestamp`/`value` pair is stored instead.
    Upload {
        token: String,
        sensor: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<f64>,
        #[serde(default)]
        points: Vec<ReadingPoint>,
    },

    /// Fetch readings in `[start, end]`, for one sensor or all of them
    Query {
        token: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sensor: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end: Option<f64>,
    },
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Auth { .. } => "auth",
            Request::Upload { .. } => "upload",
            Request::Query { .. } => "query",
        }
    }
}

/// Why a request failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    BadRequest,
    NotFound,
    Forbidden,
    Internal,
}

/// Readings for one sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSeries {
    pub name: String,
    pub values: Vec<ReadingPoint>,
}

/// Server responses. Successful responses carry the caller's next token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    Auth {
        success: bool,
        token: String,
    },

    Upload {
        success: bool,
        token: String,
    },

    Query {
        success: bool,
        token: String,
        sensors: Vec<SensorSeries>,
    },

    Failed {
        status: Status,
        reason: String,
    },
}

impl Response {
    pub fn failed(status: Status, reason: impl Into<String>) -> Self {
        Response::Failed {
            status,
            reason: reason.into(),
        }
    }

    /// Token carried by a successful response
    pub fn token(&self) -> Option<&str> {
        match self {
            Response::Auth { token, .. }
            | Response::Upload { token, .. }
            | Response::Query { token, .. } => Some(token),
            Response::Failed { .. } => None,
        }
    }
}
