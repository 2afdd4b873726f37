//! Transfer engine: the byte-level upload/download loops
//!
//! Uploads stream the inbound frame straight into storage, chunk by chunk,
//! so memory stays bounded regardless of file size. A storage failure
//! mid-frame must not desynchronize the command stream, so the remainder of
//! the frame is still consumed before the error line goes out; the partial
//! file is discarded. Downloads stream stored bytes back and let the codec
//! terminate the frame.
//!
//! Recoverable failures come back as `Ok(Err(CommandError))`; only a dead or
//! stalled stream is a hard `Err`, which tears down the worker.

use anyhow::Result;
use chrono::Local;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::{info, warn};

use crate::error::CommandError;
use crate::framing::Framed;
use crate::protocol::TIMESTAMP_FORMAT;
use crate::storage::{validate_name, Storage};
use crate::translog::UploadLog;

/// Recoverable-or-not split for transfer operations.
pub type Outcome<T> = std::result::Result<T, CommandError>;

/// Receipt for a completed upload; `status_line` is the exact line sent back
/// to the client.
#[derive(Debug)]
pub struct UploadReceipt {
    pub status_line: String,
    pub bytes: u64,
}

/// Run the `/store` upload loop. Always consumes exactly one transfer frame
/// from the stream, even when the upload is rejected, because the client has
/// already committed to sending one.
pub async fn upload<R, W>(
    framed: &mut Framed<R, W>,
    storage: &Storage,
    log: &UploadLog,
    handle: &str,
    filename: &str,
) -> Result<Outcome<UploadReceipt>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if validate_name(filename).is_err() {
        framed.discard_frame().await?;
        return Ok(Err(CommandError::BadFilename));
    }
    if let Err(e) = storage.ensure_container(handle).await {
        warn!(handle, error = %e, "upload container creation failed");
        framed.discard_frame().await?;
        return Ok(Err(CommandError::SaveFailed));
    }
    let file = match storage.create(handle, filename).await {
        Ok(f) => f,
        Err(e) => {
            warn!(handle, filename, error = %e, "upload open failed");
            framed.discard_frame().await?;
            return Ok(Err(CommandError::SaveFailed));
        }
    };

    // Keep draining the frame even if the file write dies partway through;
    // only stream errors may abort the loop.
    let mut dst = DrainOnError::new(file);
    let bytes = framed.copy_frame_to(&mut dst).await?;

    if let Some(e) = dst.take_failure() {
        warn!(handle, filename, error = %e, "upload write failed");
        if let Err(e) = storage.remove(handle, filename).await {
            warn!(handle, filename, error = %e, "partial upload cleanup failed");
        }
        return Ok(Err(CommandError::SaveFailed));
    }
    let file = dst.into_inner();
    if let Err(e) = file.sync_all().await {
        warn!(handle, filename, error = %e, "upload sync failed");
        // The client is told the store failed, so the file must not be
        // served by a later /dir or /get
        if let Err(e) = storage.remove(handle, filename).await {
            warn!(handle, filename, error = %e, "unsynced upload cleanup failed");
        }
        return Ok(Err(CommandError::SaveFailed));
    }

    let timestamp = Local::now().format(TIMESTAMP_FORMAT);
    let status_line = format!("{handle}<{timestamp}>: Uploaded {filename}");
    if let Err(e) = log.record(handle, filename, bytes) {
        warn!(handle, filename, error = %e, "upload audit log append failed");
    }
    info!(handle, filename, bytes, "stored file");
    Ok(Ok(UploadReceipt { status_line, bytes }))
}

/// Run the `/get` download loop. On success the whole frame (bytes plus
/// sentinel) has been written; the caller appends the prompt line. On a
/// recoverable error the caller owns the error-line-plus-sentinel response;
/// any content bytes already streamed before a mid-transfer read failure
/// stay in the frame, newline-terminated, so the error line lands on its
/// own line.
pub async fn download<R, W>(
    framed: &mut Framed<R, W>,
    storage: &Storage,
    handle: &str,
    filename: &str,
) -> Result<Outcome<u64>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if validate_name(filename).is_err() {
        return Ok(Err(CommandError::BadFilename));
    }
    let (mut file, len) = match storage.open(handle, filename).await {
        Ok(Some(found)) => found,
        Ok(None) => return Ok(Err(CommandError::FileNotFound)),
        Err(e) => {
            warn!(handle, filename, error = %e, "download open failed");
            return Ok(Err(CommandError::ReadFailed));
        }
    };

    // Stream the file ourselves rather than through the codec's frame
    // writer: a storage read failure here is recoverable and must not be
    // conflated with a dead stream, which stays worker-fatal.
    let mut buf = vec![0u8; 64 * 1024];
    let mut bytes: u64 = 0;
    let mut last = 0u8;
    loop {
        match file.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                framed.write_chunk(&buf[..n]).await?;
                last = buf[n - 1];
                bytes += n as u64;
            }
            Err(e) => {
                warn!(handle, filename, bytes, error = %e, "download read failed");
                if bytes > 0 && last != b'\n' {
                    framed.write_chunk(b"\n").await?;
                }
                return Ok(Err(CommandError::ReadFailed));
            }
        }
    }
    if bytes > 0 && last != b'\n' {
        framed.write_chunk(b"\n").await?;
    }
    framed.write_sentinel().await?;
    info!(handle, filename, bytes, size = len, "sent file");
    Ok(Ok(bytes))
}

/// `AsyncWrite` adapter that records the first write failure and then
/// swallows all further data, letting the frame drain to completion.
struct DrainOnError<W> {
    inner: W,
    failure: Option<std::io::Error>,
}

impl<W> DrainOnError<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            failure: None,
        }
    }

    fn take_failure(&mut self) -> Option<std::io::Error> {
        self.failure.take()
    }

    fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for DrainOnError<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        if this.failure.is_some() {
            return Poll::Ready(Ok(buf.len()));
        }
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Err(e)) => {
                this.failure = Some(e);
                Poll::Ready(Ok(buf.len()))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if this.failure.is_some() {
            return Poll::Ready(Ok(()));
        }
        match Pin::new(&mut this.inner).poll_flush(cx) {
            Poll::Ready(Err(e)) => {
                this.failure = Some(e);
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
