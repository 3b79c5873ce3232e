//! Sensorlog Network Library
//!
//! TCP request surface for the Sensorlog service.
//!
//! # Architecture
//!
//! - **Server**: accepts connections and answers requests against the knowledge base
//! - **Client**: authenticates, uploads readings and queries them back
//! - **Protocol**: length-prefixed JSON requests and responses
//!
//! # Usage
//!
//! ```ignore
//! let server = Server::start(addr, tokens).await?;
//!
//! let mut client = Client::connect(server.addr()).await?;
//! client.auth("alice", "secret").await?;
//! client.upload("kitchen", &[ReadingPoint { timestamp: 1.0, value: 21.5 }]).await?;
//! let series = client.query(Some("kitchen"), None, None).await?;
//! ```

pub mod client;
pub mod error;
mod frame;
mod handler;
pub mod protocol;
pub mod server;

pub use client::Client;
pub use error::{Error, Result};
pub use protocol::{Request, Response, SensorSeries, Status};
pub use server::Server;
