//! Data models for Sensorlog

mod location;
mod reading;
mod user;

pub use location::*;
pub use reading::*;
pub use user::*;
