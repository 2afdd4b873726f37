//! Command parsing and per-connection dispatch loop
//!
//! The dispatcher owns the connection: it reads one line per turn, parses
//! it, checks arity and session preconditions, runs the handler, and writes
//! the response framing. Recoverable failures become a single error line and
//! the loop continues; only stream-level failures propagate and end the
//! worker.

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use crate::error::CommandError;
use crate::framing::Framed;
use crate::protocol::PROMPT;
use crate::registry::Registry;
use crate::session::Session;
use crate::storage::{validate_name, Storage};
use crate::transfer;
use crate::translog::UploadLog;

/// Help text, one line so every command has a single-line response.
const HELP_LINE: &str =
    "Available commands: /register <handle> | /store <filename> | /get <filename> | /dir | /leave | /?";

/// Resources shared by every connection worker. Built once at startup.
pub struct Shared {
    pub registry: Registry,
    pub storage: Storage,
    pub upload_log: UploadLog,
}

impl Shared {
    pub fn new(registry: Registry, storage: Storage, upload_log: UploadLog) -> Arc<Self> {
        Arc::new(Self {
            registry,
            storage,
            upload_log,
        })
    }
}

/// One parsed command line. Keyword matching is case-insensitive; arguments
/// keep their case. Lives for one dispatch cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub keyword: String,
    pub args: Vec<String>,
}

/// Split on single spaces: consecutive spaces produce empty arguments, which
/// fail arity checks rather than being silently collapsed.
pub fn parse(line: &str) -> Command {
    let mut parts = line.split(' ');
    let keyword = parts.next().unwrap_or("").to_lowercase();
    let args = parts.map(str::to_string).collect();
    Command { keyword, args }
}

enum Flow {
    Continue,
    Disconnect,
}

/// Serve one connection until `/leave` or stream closure. Registry cleanup
/// runs unconditionally, including on transport errors.
pub async fn serve_connection<R, W>(
    framed: &mut Framed<R, W>,
    shared: &Shared,
    peer: SocketAddr,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut session = Session::default();
    let result = connection_loop(framed, shared, &mut session, peer).await;
    if let Some(handle) = session.handle() {
        shared.registry.unregister(handle);
        info!(%peer, handle, "client disconnected");
    } else {
        debug!(%peer, "unregistered client disconnected");
    }
    result
}

async fn connection_loop<R, W>(
    framed: &mut Framed<R, W>,
    shared: &Shared,
    session: &mut Session,
    peer: SocketAddr,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    while let Some(line) = framed.read_line().await? {
        match dispatch(framed, shared, session, peer, &line).await? {
            Flow::Continue => {}
            Flow::Disconnect => break,
        }
    }
    Ok(())
}

async fn dispatch<R, W>(
    framed: &mut Framed<R, W>,
    shared: &Shared,
    session: &mut Session,
    peer: SocketAddr,
    line: &str,
) -> Result<Flow>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let cmd = parse(line);
    debug!(%peer, keyword = %cmd.keyword, "dispatch");
    match cmd.keyword.as_str() {
        "/register" => {
            if let Err(e) = handle_register(shared, session, peer, &cmd) {
                framed.write_line(&e.to_string()).await?;
            } else {
                let handle = session.handle().unwrap_or_default().to_string();
                framed.write_line(&format!("Welcome {handle}!")).await?;
            }
        }
        "/store" => {
            // The client commits to one frame for every /store line, so the
            // frame is consumed even when the command is rejected.
            match handle_store(framed, shared, session, &cmd).await? {
                Ok(status_line) => framed.write_line(&status_line).await?,
                Err(e) => framed.write_line(&e.to_string()).await?,
            }
        }
        "/get" => {
            if cmd.args.len() != 1 {
                // A malformed /get never put the client into frame-reading
                // mode, so a bare error line keeps both sides in step.
                framed
                    .write_line(&CommandError::Syntax("/get".into()).to_string())
                    .await?;
            } else {
                match handle_get(framed, shared, session, &cmd).await? {
                    Ok(_bytes) => framed.write_line(PROMPT).await?,
                    Err(e) => {
                        // Error line still travels inside a complete frame
                        // so the client's until-sentinel read terminates.
                        framed.write_line(&e.to_string()).await?;
                        framed.write_sentinel().await?;
                        framed.write_line(PROMPT).await?;
                    }
                }
            }
        }
        "/dir" => {
            let reply = handle_dir(shared, session, &cmd).await;
            match reply {
                Ok(listing) => framed.write_line(&listing).await?,
                Err(e) => framed.write_line(&e.to_string()).await?,
            }
        }
        "/leave" => {
            if !cmd.args.is_empty() {
                framed
                    .write_line(&CommandError::Syntax("/leave".into()).to_string())
                    .await?;
            } else {
                framed.write_line("Connection closed. Thank you!").await?;
                return Ok(Flow::Disconnect);
            }
        }
        "/?" => {
            if !cmd.args.is_empty() {
                framed
                    .write_line(&CommandError::Syntax("/?".into()).to_string())
                    .await?;
            } else {
                framed.write_line(HELP_LINE).await?;
            }
        }
        _ => {
            framed.write_line(&CommandError::Unknown.to_string()).await?;
        }
    }
    Ok(Flow::Continue)
}

fn handle_register(
    shared: &Shared,
    session: &mut Session,
    peer: SocketAddr,
    cmd: &Command,
) -> Result<(), CommandError> {
    if cmd.args.len() != 1 {
        return Err(CommandError::Syntax("/register".into()));
    }
    let handle = &cmd.args[0];
    if session.is_registered() {
        return session.register(handle.clone());
    }
    if validate_name(handle).is_err() {
        return Err(CommandError::BadHandle);
    }
    if !shared.registry.register(handle, peer) {
        return Err(CommandError::HandleTaken);
    }
    // The session is unregistered at this point, so the transition succeeds
    session.register(handle.clone())?;
    info!(%peer, handle, "client registered");
    Ok(())
}

async fn handle_store<R, W>(
    framed: &mut Framed<R, W>,
    shared: &Shared,
    session: &Session,
    cmd: &Command,
) -> Result<transfer::Outcome<String>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if cmd.args.len() != 1 {
        framed.discard_frame().await?;
        return Ok(Err(CommandError::Syntax("/store".into())));
    }
    let handle = match session.require_handle("/store") {
        Ok(h) => h.to_string(),
        Err(e) => {
            framed.discard_frame().await?;
            return Ok(Err(e));
        }
    };
    let receipt = transfer::upload(
        framed,
        &shared.storage,
        &shared.upload_log,
        &handle,
        &cmd.args[0],
    )
    .await?;
    Ok(receipt.map(|r| r.status_line))
}

async fn handle_get<R, W>(
    framed: &mut Framed<R, W>,
    shared: &Shared,
    session: &Session,
    cmd: &Command,
) -> Result<transfer::Outcome<u64>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let handle = match session.require_handle("/get") {
        Ok(h) => h.to_string(),
        Err(e) => return Ok(Err(e)),
    };
    transfer::download(framed, &shared.storage, &handle, &cmd.args[0]).await
}

/// Per-handle directory listing as a single line. An unregistered client
/// owns no files, so it sees the empty listing.
async fn handle_dir(
    shared: &Shared,
    session: &Session,
    cmd: &Command,
) -> Result<String, CommandError> {
    if !cmd.args.is_empty() {
        return Err(CommandError::Syntax("/dir".into()));
    }
    let Some(handle) = session.handle() else {
        return Ok("Server Directory is empty.".to_string());
    };
    let names = shared
        .storage
        .list(handle)
        .await
        .map_err(|_| CommandError::ListFailed)?;
    if names.is_empty() {
        Ok("Server Directory is empty.".to_string())
    } else {
        Ok(format!("Server Directory: {}", names.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_lowercases_keyword_only() {
        let cmd = parse("/REGISTER Alice");
        assert_eq!(cmd.keyword, "/register");
        assert_eq!(cmd.args, vec!["Alice"]);
    }

    #[test]
    fn parse_splits_on_single_spaces() {
        let cmd = parse("/store my notes.txt");
        assert_eq!(cmd.keyword, "/store");
        assert_eq!(cmd.args, vec!["my", "notes.txt"]);

        // Double space yields an empty argument, which later fails arity
        let cmd = parse("/store  notes.txt");
        assert_eq!(cmd.args, vec!["", "notes.txt"]);
    }

    #[test]
    fn parse_empty_line() {
        let cmd = parse("");
        assert_eq!(cmd.keyword, "");
        assert!(cmd.args.is_empty());
    }
}
