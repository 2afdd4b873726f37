//! TCP accept loop for the fex daemon
//!
//! One tokio task per accepted connection. The Registry, Storage root, and
//! upload log are built once here and shared by reference; workers hold no
//! other cross-connection state.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use crate::dispatch::{self, Shared};
use crate::framing::Framed;
use crate::registry::Registry;
use crate::storage::Storage;
use crate::translog::UploadLog;

/// Per-server tuning knobs beyond bind/root.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Idle read deadline per connection. `None` blocks forever, which is
    /// the protocol's stated default.
    pub idle_timeout: Option<Duration>,
}

pub async fn serve(bind: &str, root: &Path, config: ServerConfig) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("bind {}", bind))?;
    let shared = Shared::new(
        Registry::new(),
        Storage::new(root),
        UploadLog::new(root),
    );
    info!(bind, root = %root.display(), "fex daemon listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        let _ = stream.set_nodelay(true);
        info!(%peer, "client connected");
        let shared = Arc::clone(&shared);
        let idle = config.idle_timeout;
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, &shared, peer, idle).await {
                warn!(%peer, error = %e, "connection ended with error");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    shared: &Shared,
    peer: std::net::SocketAddr,
    idle_timeout: Option<Duration>,
) -> Result<()> {
    let (reader, writer) = stream.into_split();
    let mut framed = Framed::new(reader, writer).with_read_deadline(idle_timeout);
    dispatch::serve_connection(&mut framed, shared, peer).await
}
