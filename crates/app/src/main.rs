//! Sensorlog - telemetry upload service
//!
//! Runs the upload server, or manages accounts in its database.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sensorlog_core::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod serve;
mod useradd;

#[derive(Parser, Debug)]
#[command(name = "sensorlog")]
#[command(version, about = "Sensor telemetry upload server")]
struct Cli {
    /// Config file (default: ./sensorlog.toml, then the user config dir)
    #[arg(long, global = true, env = "SENSORLOG_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the upload server
    Server,

    /// Add a user to the database
    Useradd {
        /// Name of the new user
        username: String,

        /// Password; prompted for when omitted
        password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Server => serve::run(config).await,
        Command::Useradd { username, password } => {
            let password = match password {
                Some(password) => password,
                None => useradd::prompt_password()?,
            };
            let added = useradd::run(&config, &username, &password).await?;
            println!("useradd:\n\tuser: {}\n\tsuccess: {}", username, added);
            if added {
                Ok(())
            } else {
                anyhow::bail!("Could not add user '{}'", username)
            }
        }
    }
}
