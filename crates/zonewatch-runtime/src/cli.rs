//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "zonewatch", about = "geofence monitor for tracked devices")]
pub struct Cli {
    /// UDS socket path (default: /tmp/zonewatch-$USER/zonewatchd.sock)
    #[arg(long, short = 's', global = true)]
    pub socket_path: Option<String>,

    /// Config file (default: ./zonewatch.toml)
    #[arg(long, short = 'c', global = true, env = "ZONEWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the daemon (poll loop + UDS server)
    Daemon(DaemonOpts),
    /// Show the latest cycle: devices, danger/alert lists, gas zones
    Status,
    /// List recorded violations, newest first
    Violations(ViolationsOpts),
    /// Violation and battery summary over a time window
    Summary(SummaryOpts),
    /// Manage machine zones and gas sources in the local database
    Zones {
        #[command(subcommand)]
        action: ZonesAction,
    },
}

#[derive(clap::Args)]
pub struct DaemonOpts {
    /// Poll interval in seconds (overrides the config file)
    #[arg(long)]
    pub poll_interval_secs: Option<u64>,
}

#[derive(clap::Args)]
pub struct ViolationsOpts {
    /// Only this level: danger | alert
    #[arg(long)]
    pub level: Option<String>,

    /// Only violations entered in the last N hours
    #[arg(long)]
    pub hours: Option<u32>,

    /// Raw JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args)]
pub struct SummaryOpts {
    /// Window size in hours (default: everything recorded)
    #[arg(long)]
    pub hours: Option<u32>,

    /// Raw JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum ZonesAction {
    /// List stored zones, newest first
    List,
    /// Add a zone described in a TOML file
    Add { file: PathBuf },
    /// Delete a zone by id
    Delete { id: String },
}

/// Default socket path using $USER for per-user isolation.
pub fn default_socket_path() -> String {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return format!("{dir}/zonewatch/zonewatchd.sock");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    format!("/tmp/zonewatch-{user}/zonewatchd.sock")
}
