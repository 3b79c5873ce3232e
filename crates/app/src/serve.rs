//! The `server` command

use std::net::{IpAddr, SocketAddr};

use anyhow::Context;
use sensorlog_core::{spawn_purge_sweep, Config, KnowledgeBase, TokenService};
use sensorlog_net::Server;
use tracing::{info, warn};

/// Serve until Ctrl-C or SIGTERM, then shut everything down
pub async fn run(config: Config) -> anyhow::Result<()> {
    let kb = KnowledgeBase::open(&config.storage).with_context(|| {
        format!(
            "Failed to open storage at {}",
            config.storage.file.display()
        )
    })?;

    let ip: IpAddr = config
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address '{}'", config.bind))?;
    let addr = SocketAddr::new(ip, config.port);

    let tokens = TokenService::new(kb.clone(), config.tokens);
    let server = Server::start(addr, tokens)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let sweep = spawn_purge_sweep(kb.clone(), config.tokens.ttl(), server.subscribe());

    if config.weather.enabled {
        warn!("Weather collection enabled but no weather provider is configured");
    }

    info!(addr = %server.addr(), "Sensorlog ready");
    wait_for_signal().await?;

    server.shutdown();
    if let Err(e) = sweep.await {
        warn!(error = %e, "Purge sweep ended abnormally");
    }
    server.join().await;
    kb.shutdown().await;

    info!("Sensorlog stopped");
    Ok(())
}

async fn wait_for_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
    }
    Ok(())
}
