//! TCP server for the request surface
//!
//! Each connection is served by its own task: requests are read, answered
//! and written back one at a time, so responses arrive in request order.

use std::net::SocketAddr;

use sensorlog_core::TokenService;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::frame::{read_payload, write_frame};
use crate::handler;
use crate::protocol::{Request, Response, Status};

/// Request server handle
pub struct Server {
    addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    accept_handle: JoinHandle<()>,
}

impl Server {
    /// Bind `addr` and start serving requests
    pub async fn start(addr: SocketAddr, tokens: TokenService) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, "Server started");

        let (shutdown_tx, _) = broadcast::channel(1);

        let shutdown_rx = shutdown_tx.subscribe();
        let accept_handle = tokio::spawn(accept_loop(
            listener,
            tokens,
            shutdown_tx.clone(),
            shutdown_rx,
        ));

        Ok(Server {
            addr: bound_addr,
            shutdown_tx,
            accept_handle,
        })
    }

    /// Get the server's bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Receiver that fires when the server shuts down.
    ///
    /// Background jobs subscribe here so one signal stops everything.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Stop accepting and close open connections
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        info!("Server shutdown initiated");
    }

    /// Wait for the accept loop to exit
    pub async fn join(self) {
        if let Err(e) = self.accept_handle.await {
            error!(error = %e, "Accept loop panicked");
        }
    }
}

/// Accept incoming connections
async fn accept_loop(
    listener: TcpListener,
    tokens: TokenService,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let conn_id = Uuid::new_v4();
                        let span = info_span!("connection", %conn_id, %addr);
                        let tokens = tokens.clone();
                        let shutdown_rx = shutdown_tx.subscribe();
                        tokio::spawn(
                            handle_connection(stream, tokens, shutdown_rx).instrument(span),
                        );
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }
        }
    }
}

/// Serve requests on one connection until it closes or the server stops
async fn handle_connection(
    stream: TcpStream,
    tokens: TokenService,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    debug!("New connection");
    let (mut reader, mut writer) = tokio::io::split(stream);

    loop {
        let served = tokio::select! {
            result = serve_one(&mut reader, &mut writer, &tokens) => result,
            _ = shutdown_rx.recv() => {
                debug!("Closing connection for shutdown");
                break;
            }
        };

        match served {
            Ok(()) => {}
            Err(Error::ConnectionClosed) => {
                debug!("Connection closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Connection error");
                break;
            }
        }
    }
}

/// Read one request and write its response
async fn serve_one(
    reader: &mut ReadHalf<TcpStream>,
    writer: &mut WriteHalf<TcpStream>,
    tokens: &TokenService,
) -> Result<()> {
    let payload = read_payload(reader).await?;

    let response = match serde_json::from_slice::<Request>(&payload) {
        Ok(request) => {
            let kind = request.kind();
            debug!(kind, "Request received");
            let response = handler::handle(request, tokens).await;
            if let Response::Failed { status, reason } = &response {
                debug!(kind, ?status, %reason, "Request failed");
            }
            response
        }
        Err(e) => {
            warn!(error = %e, "Malformed request");
            Response::failed(Status::BadRequest, format!("Malformed request: {}", e))
        }
    };

    write_frame(writer, &response).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::read_frame;
    use sensorlog_core::credentials::hash_password;
    use sensorlog_core::{KnowledgeBase, TokenConfig};
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    async fn start() -> Server {
        let kb = KnowledgeBase::open_in_memory().unwrap();
        assert!(kb.add_user("alice", &hash_password("secret").unwrap()).await);
        let tokens = TokenService::new(kb, TokenConfig { ttl_secs: 3600 });
        Server::start(SocketAddr::from(([127, 0, 0, 1], 0)), tokens)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_server_start() {
        let server = start().await;
        assert!(server.addr().port() > 0);
        server.shutdown();
        tokio::time::timeout(Duration::from_secs(5), server.join())
            .await
            .expect("accept loop did not stop");
    }

    #[tokio::test]
    async fn test_malformed_request_keeps_connection() {
        let server = start().await;
        let mut stream = TcpStream::connect(server.addr()).await.unwrap();

        let garbage = b"not json";
        stream
            .write_all(&(garbage.len() as u32).to_be_bytes())
            .await
            .unwrap();
        stream.write_all(garbage).await.unwrap();

        let response: Response = read_frame(&mut stream).await.unwrap();
        assert!(matches!(
            response,
            Response::Failed {
                status: Status::BadRequest,
                ..
            }
        ));

        write_frame(
            &mut stream,
            &Request::Auth {
                user: "alice".into(),
                password: "secret".into(),
            },
        )
        .await
        .unwrap();
        let response: Response = read_frame(&mut stream).await.unwrap();
        assert!(matches!(response, Response::Auth { success: true, .. }));

        server.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_closes_open_connections() {
        let server = start().await;
        let mut stream = TcpStream::connect(server.addr()).await.unwrap();

        // Let the accept loop pick the connection up
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.shutdown();

        let result: Result<Response> =
            tokio::time::timeout(Duration::from_secs(5), read_frame(&mut stream))
                .await
                .expect("connection was not closed");
        assert!(matches!(result, Err(Error::ConnectionClosed)));
    }
}
