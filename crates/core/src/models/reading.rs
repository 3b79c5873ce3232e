//! Sensor reading models

use serde::{Deserialize, Serialize};

/// A timestamp/value pair from a range query
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReadingPoint {
    pub timestamp: f64,
    pub value: f64,
}
