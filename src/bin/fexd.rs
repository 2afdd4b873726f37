use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;

use fex::cli::DaemonOpts;
use fex::server::{self, ServerConfig};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let opts = DaemonOpts::parse();

    std::fs::create_dir_all(&opts.root)
        .with_context(|| format!("Failed to create root directory: {}", opts.root.display()))?;
    let canonical_root = std::fs::canonicalize(&opts.root)
        .with_context(|| format!("Failed to canonicalize root path: {}", opts.root.display()))?;

    println!("Starting fex daemon:");
    println!("  Root: {}", canonical_root.display());
    println!("  Bind: {}", opts.bind);

    // Security warning for 0.0.0.0 binding; the protocol has no auth or
    // encryption at all.
    if opts.bind.starts_with("0.0.0.0") {
        eprintln!("WARNING: Binding to 0.0.0.0 exposes the daemon to all network interfaces");
        eprintln!("   This protocol is UNENCRYPTED and UNAUTHENTICATED");
        eprintln!("   Only use on trusted networks (LAN)");
    }

    let config = ServerConfig {
        idle_timeout: match opts.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        },
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    rt.block_on(server::serve(&opts.bind, &canonical_root, config))
}
