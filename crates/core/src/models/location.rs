//! Location and weather models

use serde::{Deserialize, Serialize};

/// A named place owned by a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: i64,
    pub username: String,
    pub place_name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Coordinates of a location, as consumed by the weather fetcher
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SiteCoordinates {
    pub location_id: i64,
    pub latitude: f64,
    pub longitude: f64,
}

/// One weather observation for a location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSample {
    pub location_id: i64,
    /// Epoch seconds
    pub timestamp: i64,
    pub sun_up: bool,
    pub temperature: f64,
    pub apparent_temperature: f64,
    pub cloud_cover: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub precip_probability: f64,
}
