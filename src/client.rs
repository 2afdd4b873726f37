//! Interactive fex client
//!
//! Reads commands from stdin, speaks the wire protocol, and prints server
//! responses. The client mirrors the server's framing rules: every `/store`
//! line is followed by exactly one transfer frame (an empty one when the
//! command was malformed or the local file vanished between check and send),
//! and every well-formed `/get` reads a full frame plus the prompt line.

use anyhow::{Context as _, Result};
use std::io::Write as _;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::dispatch::parse;
use crate::framing::Framed;
use crate::protocol::DISCONNECT_MARKER;

pub async fn run(host: &str, port: u16) -> Result<()> {
    let stream = TcpStream::connect((host, port))
        .await
        .with_context(|| format!("connect {}:{}", host, port))?;
    let _ = stream.set_nodelay(true);
    println!("Connected to {}:{}. Type /? for available commands.", host, port);

    let (reader, writer) = stream.into_split();
    let mut framed = Framed::new(reader, writer);
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("Enter command: ");
        std::io::stdout().flush().ok();
        let Some(line) = stdin.next_line().await? else {
            break;
        };
        let line = line.trim_end().to_string();
        if line.is_empty() {
            continue;
        }

        let cmd = parse(&line);
        match cmd.keyword.as_str() {
            "/store" => {
                if !store(&mut framed, &line, &cmd.args).await? {
                    continue;
                }
            }
            "/get" if cmd.args.len() == 1 => {
                framed.write_line(&line).await?;
                get(&mut framed, &cmd.args[0]).await?;
                continue;
            }
            _ => {
                framed.write_line(&line).await?;
            }
        }

        let Some(response) = framed.read_line().await? else {
            println!("Server closed the connection.");
            break;
        };
        println!("{response}");
        if response.starts_with(DISCONNECT_MARKER) {
            break;
        }
    }
    Ok(())
}

/// Send the `/store` line and its frame. The local file is checked before
/// the command goes out, so a typo never commits us to a frame we cannot
/// fill. Returns false if nothing was sent (caller skips the response read).
async fn store<R, W>(framed: &mut Framed<R, W>, line: &str, args: &[String]) -> Result<bool>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    if args.len() != 1 {
        // Malformed /store still carries an (empty) frame so the server's
        // drain stays in step with us.
        framed.write_line(line).await?;
        framed.write_sentinel().await?;
        return Ok(true);
    }
    let mut file = match File::open(&args[0]).await {
        Ok(f) => f,
        Err(e) => {
            println!("Error: Cannot read local file {}: {e}", args[0]);
            return Ok(false);
        }
    };
    framed.write_line(line).await?;
    framed.write_frame_from(&mut file).await?;
    Ok(true)
}

/// Receive a `/get` response: one frame, then the server prompt line. A
/// frame consisting of a single `Error: …` line is the server's failure
/// response, not file content.
async fn get<R, W>(framed: &mut Framed<R, W>, filename: &str) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let result = receive_file(framed, filename).await;
    // The prompt line closes the response even on failure
    let _ = framed.read_line().await?;
    if let Some(bytes) = result? {
        println!("File received: {filename} ({bytes} bytes)");
    }
    Ok(())
}

async fn receive_file<R, W>(framed: &mut Framed<R, W>, filename: &str) -> Result<Option<u64>>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let Some(first) = framed.next_frame_line().await? else {
        // Empty frame: the stored file was empty
        File::create(filename).await?;
        return Ok(Some(0));
    };

    if first.starts_with(b"Error: ") {
        // Peek one more line: a lone error line followed by the sentinel is
        // a failure response. Anything else was real content after all.
        // This heuristic misreads a one-line stored file whose only line
        // starts with "Error: "; a multi-line file with the same first line
        // is fine. Both branches share the ambiguity, so neither can be
        // tightened without a typed status channel on the wire.
        match framed.next_frame_line().await? {
            None => {
                println!("{}", String::from_utf8_lossy(&first));
                return Ok(None);
            }
            Some(second) => {
                let mut file = File::create(filename).await?;
                file.write_all(&first).await?;
                file.write_all(b"\n").await?;
                file.write_all(&second).await?;
                file.write_all(b"\n").await?;
                let mut bytes = (first.len() + second.len() + 2) as u64;
                bytes += drain_into(framed, &mut file).await?;
                file.flush().await?;
                return Ok(Some(bytes));
            }
        }
    }

    let mut file = File::create(filename).await?;
    file.write_all(&first).await?;
    file.write_all(b"\n").await?;
    let mut bytes = first.len() as u64 + 1;
    bytes += drain_into(framed, &mut file).await?;
    file.flush().await?;
    Ok(Some(bytes))
}

async fn drain_into<R, W>(framed: &mut Framed<R, W>, file: &mut File) -> Result<u64>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut bytes = 0u64;
    while let Some(line) = framed.next_frame_line().await? {
        file.write_all(&line).await?;
        file.write_all(b"\n").await?;
        bytes += line.len() as u64 + 1;
    }
    Ok(bytes)
}
