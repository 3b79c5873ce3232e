//! TCP client for a Sensorlog server
//!
//! Holds one connection and the current session token. Every authenticated
//! call replaces the token with the one the server sends back.

use std::net::SocketAddr;

use sensorlog_core::ReadingPoint;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::protocol::{Request, Response, SensorSeries};

/// Client handle for network operations
pub struct Client {
    reader: ReadHalf<TcpStream>,
    writer: WriteHalf<TcpStream>,
    token: Option<String>,
}

impl Client {
    /// Connect to a server
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        info!(addr = %addr, "Connecting to server");

        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = tokio::io::split(stream);

        Ok(Self {
            reader,
            writer,
            token: None,
        })
    }

    /// Current session token, if authenticated
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Send a raw request and wait for its response
    pub async fn request(&mut self, request: &Request) -> Result<Response> {
        write_frame(&mut self.writer, request).await?;
        let response: Response = read_frame(&mut self.reader).await?;

        match response {
            Response::Failed { status, reason } => Err(Error::Rejected { status, reason }),
            response => Ok(response),
        }
    }

    fn session_token(&self) -> Result<String> {
        self.token.clone().ok_or(Error::NotAuthenticated)
    }

    /// Log in and keep the issued token
    pub async fn auth(&mut self, user: &str, password: &str) -> Result<()> {
        let response = self
            .request(&Request::Auth {
                user: user.into(),
                password: password.into(),
            })
            .await?;

        match response {
            Response::Auth { token, .. } => {
                debug!(user, "Authenticated");
                self.token = Some(token);
                Ok(())
            }
            other => Err(unexpected(&other)),
        }
    }

    /// Upload readings for `sensor`. Returns whether every reading was stored.
    pub async fn upload(&mut self, sensor: &str, points: &[ReadingPoint]) -> Result<bool> {
        let request = Request::Upload {
            token: self.session_token()?,
            sensor: sensor.into(),
            value: None,
            timestamp: None,
            points: points.to_vec(),
        };
        self.upload_request(request).await
    }

    /// Upload a single reading
    pub async fn upload_one(&mut self, sensor: &str, timestamp: f64, value: f64) -> Result<bool> {
        let request = Request::Upload {
            token: self.session_token()?,
            sensor: sensor.into(),
            value: Some(value),
            timestamp: Some(timestamp),
            points: Vec::new(),
        };
        self.upload_request(request).await
    }

    async fn upload_request(&mut self, request: Request) -> Result<bool> {
        let response = self.request(&request).await;
        self.forget_token_on_rejection(&response);

        match response? {
            Response::Upload { success, token } => {
                self.token = Some(token);
                Ok(success)
            }
            other => Err(unexpected(&other)),
        }
    }

    /// Query readings in `[start, end]`, for one sensor or all of them
    pub async fn query(
        &mut self,
        sensor: Option<&str>,
        start: Option<f64>,
        end: Option<f64>,
    ) -> Result<Vec<SensorSeries>> {
        let request = Request::Query {
            token: self.session_token()?,
            sensor: sensor.map(str::to_owned),
            start,
            end,
        };
        let response = self.request(&request).await;
        self.forget_token_on_rejection(&response);

        match response? {
            Response::Query { token, sensors, .. } => {
                self.token = Some(token);
                Ok(sensors)
            }
            other => Err(unexpected(&other)),
        }
    }

    /// A forbidden token will never be accepted again
    fn forget_token_on_rejection(&mut self, response: &Result<Response>) {
        if let Err(Error::Rejected {
            status: crate::protocol::Status::Forbidden,
            ..
        }) = response
        {
            self.token = None;
        }
    }
}

fn unexpected(response: &Response) -> Error {
    Error::Protocol(format!("Unexpected response: {:?}", response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Status;
    use crate::server::Server;
    use sensorlog_core::credentials::hash_password;
    use sensorlog_core::{KnowledgeBase, TokenConfig, TokenService};

    async fn start() -> Server {
        let kb = KnowledgeBase::open_in_memory().unwrap();
        assert!(kb.add_user("alice", &hash_password("secret").unwrap()).await);
        let tokens = TokenService::new(kb, TokenConfig { ttl_secs: 3600 });
        Server::start(SocketAddr::from(([127, 0, 0, 1], 0)), tokens)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_upload_and_query() {
        let server = start().await;
        let mut client = Client::connect(server.addr()).await.unwrap();

        client.auth("alice", "secret").await.unwrap();
        let first = client.token().unwrap().to_string();

        let points = [
            ReadingPoint {
                timestamp: 100.0,
                value: 21.5,
            },
            ReadingPoint {
                timestamp: 200.0,
                value: 22.0,
            },
        ];
        assert!(client.upload("kitchen", &points).await.unwrap());
        assert!(client.upload_one("garage", 150.0, 9.0).await.unwrap());
        assert_ne!(client.token().unwrap(), first);

        let series = client.query(None, None, None).await.unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[1].name, "kitchen");
        assert_eq!(series[1].values, points.to_vec());

        let series = client.query(Some("kitchen"), Some(150.0), None).await.unwrap();
        assert_eq!(series[0].values.len(), 1);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_duplicate_reading_keeps_first_value() {
        let server = start().await;
        let mut client = Client::connect(server.addr()).await.unwrap();
        client.auth("alice", "secret").await.unwrap();

        assert!(client.upload_one("kitchen", 100.0, 21.5).await.unwrap());
        assert!(client.upload_one("kitchen", 100.0, 99.0).await.unwrap());

        let series = client.query(Some("kitchen"), None, None).await.unwrap();
        assert_eq!(
            series[0].values,
            vec![ReadingPoint {
                timestamp: 100.0,
                value: 21.5
            }]
        );

        server.shutdown();
    }

    #[tokio::test]
    async fn test_requires_auth() {
        let server = start().await;
        let mut client = Client::connect(server.addr()).await.unwrap();

        let result = client.query(None, None, None).await;
        assert!(matches!(result, Err(Error::NotAuthenticated)));

        let result = client.auth("alice", "nope").await;
        assert!(matches!(
            result,
            Err(Error::Rejected {
                status: Status::Forbidden,
                ..
            })
        ));

        server.shutdown();
    }

    #[tokio::test]
    async fn test_replayed_token_rejected() {
        let server = start().await;
        let mut client = Client::connect(server.addr()).await.unwrap();
        client.auth("alice", "secret").await.unwrap();
        let stale = client.token().unwrap().to_string();

        client.upload_one("kitchen", 1.0, 1.0).await.unwrap();

        let response = client
            .request(&Request::Query {
                token: stale,
                sensor: None,
                start: None,
                end: None,
            })
            .await;
        assert!(matches!(
            response,
            Err(Error::Rejected {
                status: Status::Forbidden,
                ..
            })
        ));

        server.shutdown();
    }
}
