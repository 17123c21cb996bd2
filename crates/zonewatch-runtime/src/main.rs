//! zonewatch: geofence monitor runtime binary.
//! One process embeds the poll loop, the violation tracker and the UDS
//! status server; the other subcommands are thin clients.

use std::path::{Path, PathBuf};

use clap::Parser;

mod alerts;
mod cli;
mod client;
mod cmd_zones;
mod config;
mod poll_loop;
mod server;
mod status;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(config::DEFAULT_CONFIG_FILE));

    match args.command {
        cli::Command::Daemon(opts) => {
            let filter = std::env::var("ZONEWATCH_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .init();

            tracing::info!("zonewatch daemon starting");

            let config = config::Config::load(&config_path)?;
            let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);
            poll_loop::run_daemon(config, opts, &socket_path).await?;
        }
        cli::Command::Status => {
            let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);
            client::cmd_status(&socket_path).await?;
        }
        cli::Command::Violations(opts) => {
            let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);
            client::cmd_violations(&socket_path, opts.level.as_deref(), opts.hours, opts.json)
                .await?;
        }
        cli::Command::Summary(opts) => {
            let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);
            client::cmd_summary(&socket_path, opts.hours, opts.json).await?;
        }
        cli::Command::Zones { action } => {
            let config = config::Config::load(&config_path)?;
            let database = Path::new(&config.database_path);
            match action {
                cli::ZonesAction::List => cmd_zones::cmd_list(database)?,
                cli::ZonesAction::Add { file } => cmd_zones::cmd_add(database, &file)?,
                cli::ZonesAction::Delete { id } => cmd_zones::cmd_delete(database, &id)?,
            }
        }
    }

    Ok(())
}
