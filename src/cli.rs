//! Shared CLI helpers and small reusable Clap fragments

use clap::Parser;
use std::path::PathBuf;

use crate::protocol::DEFAULT_PORT;

/// Daemon options for fexd
#[derive(Clone, Debug, Parser)]
#[command(name = "fexd", about = "fex file exchange daemon")]
pub struct DaemonOpts {
    /// Bind address (host:port)
    #[arg(long, default_value = "0.0.0.0:12345")]
    pub bind: String,

    /// Root directory for stored files (created if missing)
    #[arg(long, default_value = "uploads")]
    pub root: PathBuf,

    /// Idle read deadline per connection in seconds (0 = wait forever)
    #[arg(long, default_value_t = 0)]
    pub idle_timeout_secs: u64,
}

/// Client options for fex
#[derive(Clone, Debug, Parser)]
#[command(name = "fex", about = "fex file exchange client")]
pub struct ClientOpts {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Server port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,
}
