//! Line/frame codec for the fex wire protocol
//!
//! One bidirectional byte stream carries both newline-terminated command
//! lines and raw file-transfer segments terminated by the `EOF` sentinel
//! line. Nothing is length-prefixed; the codec's job is to pull whole lines
//! off the stream, spot the sentinel boundary, and flush every write
//! immediately because the peer blocks reading synchronously.

use anyhow::{bail, Context, Result};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::timeout;

use crate::protocol::{self, timeouts, SENTINEL};

const COPY_CHUNK: usize = 64 * 1024;

/// Buffered line codec over one connection's read/write halves.
pub struct Framed<R, W> {
    reader: BufReader<R>,
    writer: W,
    /// Optional idle deadline applied to every read. `None` blocks forever,
    /// which is the protocol default.
    read_deadline: Option<Duration>,
}

impl<R, W> Framed<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
            read_deadline: None,
        }
    }

    pub fn with_read_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.read_deadline = deadline;
        self
    }

    /// Read one raw line (without the trailing `\n`), bounded by `cap`.
    /// Returns `None` on a clean end of stream between lines; a stream that
    /// ends mid-line yields the partial line first.
    async fn read_line_raw(&mut self, cap: usize) -> Result<Option<Vec<u8>>> {
        let deadline = self.read_deadline;
        let fut = async {
            let mut line: Vec<u8> = Vec::new();
            loop {
                let chunk = self.reader.fill_buf().await?;
                if chunk.is_empty() {
                    if line.is_empty() {
                        return Ok(None);
                    }
                    return Ok(Some(line));
                }
                if let Some(pos) = chunk.iter().position(|&b| b == b'\n') {
                    line.extend_from_slice(&chunk[..pos]);
                    self.reader.consume(pos + 1);
                    return Ok(Some(line));
                }
                line.extend_from_slice(chunk);
                let n = chunk.len();
                self.reader.consume(n);
                if line.len() > cap {
                    bail!("line exceeds {} bytes", cap);
                }
            }
        };
        match deadline {
            Some(d) => match timeout(d, fut).await {
                Ok(res) => res,
                Err(_) => bail!("read timeout ({} ms)", d.as_millis()),
            },
            None => fut.await,
        }
    }

    /// Read one command line as text. Strips a trailing `\r` so clients on
    /// CRLF platforms still parse.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        let raw = self.read_line_raw(protocol::MAX_COMMAND_LINE).await?;
        Ok(raw.map(|mut bytes| {
            if bytes.last() == Some(&b'\r') {
                bytes.pop();
            }
            String::from_utf8_lossy(&bytes).into_owned()
        }))
    }

    /// Write one line and flush. The write carries a size-scaled deadline so
    /// a stalled peer cannot wedge the worker.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        let ms = timeouts::write_deadline_ms(line.len() + 1);
        let fut = async {
            self.writer.write_all(line.as_bytes()).await?;
            self.writer.write_all(b"\n").await?;
            self.writer.flush().await?;
            Ok::<(), std::io::Error>(())
        };
        match timeout(Duration::from_millis(ms), fut).await {
            Ok(res) => res.context("line write"),
            Err(_) => bail!("write timeout ({} ms)", ms),
        }
    }

    /// Read the next content line inside a transfer frame, without its
    /// trailing `\n`. `Ok(None)` means the sentinel closed the frame; a
    /// stream that dies before the sentinel is an error.
    pub async fn next_frame_line(&mut self) -> Result<Option<Vec<u8>>> {
        let line = self
            .read_line_raw(protocol::MAX_CONTENT_LINE)
            .await?
            .context("stream closed mid-transfer")?;
        if is_sentinel(&line) {
            Ok(None)
        } else {
            Ok(Some(line))
        }
    }

    /// Consume one transfer frame, streaming each content line (plus `\n`)
    /// into `dst` until the sentinel line. The sentinel itself is not
    /// forwarded. Returns the number of bytes written to `dst`.
    pub async fn copy_frame_to<D>(&mut self, dst: &mut D) -> Result<u64>
    where
        D: AsyncWrite + Unpin,
    {
        let mut bytes: u64 = 0;
        while let Some(line) = self.next_frame_line().await? {
            dst.write_all(&line).await.context("write transfer chunk")?;
            dst.write_all(b"\n").await.context("write transfer chunk")?;
            bytes += line.len() as u64 + 1;
        }
        dst.flush().await.context("flush transfer destination")?;
        Ok(bytes)
    }

    /// Consume and throw away one transfer frame. Used to keep the command
    /// stream in sync when a `/store` is rejected but the peer has already
    /// committed to sending a frame.
    pub async fn discard_frame(&mut self) -> Result<u64> {
        self.copy_frame_to(&mut tokio::io::sink()).await
    }

    /// Stream `src` verbatim into the connection, then terminate the frame:
    /// a `\n` is added only if the content did not end with one (the
    /// sentinel must sit on its own line), then the sentinel line. Flushes
    /// per chunk. Returns the number of content bytes sent.
    pub async fn write_frame_from<S>(&mut self, src: &mut S) -> Result<u64>
    where
        S: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; COPY_CHUNK];
        let mut bytes: u64 = 0;
        let mut last = 0u8;
        loop {
            let n = src.read(&mut buf).await.context("read transfer source")?;
            if n == 0 {
                break;
            }
            self.write_chunk(&buf[..n]).await?;
            last = buf[n - 1];
            bytes += n as u64;
        }
        if bytes > 0 && last != b'\n' {
            self.write_chunk(b"\n").await?;
        }
        self.write_sentinel().await?;
        Ok(bytes)
    }

    /// Terminate (or stand in for) a frame with the sentinel line. Error
    /// responses to `/get` still call this so client-side framing stays
    /// consistent.
    pub async fn write_sentinel(&mut self) -> Result<()> {
        self.write_line(SENTINEL).await
    }

    /// Write one raw chunk inside a frame and flush, under a size-scaled
    /// deadline. Callers that stream from a fallible source use this
    /// directly so a source read error is never conflated with a dead
    /// stream.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let ms = timeouts::write_deadline_ms(chunk.len());
        let fut = async {
            self.writer.write_all(chunk).await?;
            self.writer.flush().await?;
            Ok::<(), std::io::Error>(())
        };
        match timeout(Duration::from_millis(ms), fut).await {
            Ok(res) => res.context("chunk write"),
            Err(_) => bail!("write timeout ({} ms)", ms),
        }
    }
}

fn is_sentinel(line: &[u8]) -> bool {
    // Tolerate a CRLF-terminated sentinel from CRLF clients
    line == SENTINEL.as_bytes() || line == b"EOF\r"
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, split, AsyncWriteExt};

    fn framed_pair() -> (
        Framed<tokio::io::ReadHalf<tokio::io::DuplexStream>, tokio::io::WriteHalf<tokio::io::DuplexStream>>,
        Framed<tokio::io::ReadHalf<tokio::io::DuplexStream>, tokio::io::WriteHalf<tokio::io::DuplexStream>>,
    ) {
        let (a, b) = duplex(256 * 1024);
        let (ar, aw) = split(a);
        let (br, bw) = split(b);
        (Framed::new(ar, aw), Framed::new(br, bw))
    }

    #[tokio::test]
    async fn line_round_trip_strips_terminators() {
        let (mut a, mut b) = framed_pair();
        a.write_line("/register alice").await.unwrap();
        assert_eq!(b.read_line().await.unwrap().unwrap(), "/register alice");

        // CRLF from the peer is normalized away
        a.write_line("/dir\r").await.unwrap();
        assert_eq!(b.read_line().await.unwrap().unwrap(), "/dir");
    }

    #[tokio::test]
    async fn read_line_reports_end_of_stream() {
        let (a, mut b) = framed_pair();
        drop(a);
        assert!(b.read_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_command_line_is_rejected() {
        let (a, mut b) = framed_pair();
        let (_ar, mut aw) = (a.reader, a.writer);
        let long = vec![b'x'; protocol::MAX_COMMAND_LINE + 2];
        tokio::spawn(async move {
            let _ = aw.write_all(&long).await;
            let _ = aw.flush().await;
        });
        assert!(b.read_line().await.is_err());
    }

    #[tokio::test]
    async fn copy_frame_stops_at_sentinel_only() {
        let (mut a, mut b) = framed_pair();
        a.write_line("hello").await.unwrap();
        a.write_line("").await.unwrap(); // blank line is content, not a terminator
        a.write_line("world").await.unwrap();
        a.write_line("EOF").await.unwrap();
        a.write_line("/dir").await.unwrap();

        let mut out = Vec::new();
        let n = b.copy_frame_to(&mut out).await.unwrap();
        assert_eq!(out, b"hello\n\nworld\n");
        assert_eq!(n, out.len() as u64);

        // The line after the sentinel is the next command, untouched
        assert_eq!(b.read_line().await.unwrap().unwrap(), "/dir");
    }

    #[tokio::test]
    async fn copy_frame_fails_if_stream_dies_before_sentinel() {
        let (mut a, mut b) = framed_pair();
        a.write_line("partial").await.unwrap();
        drop(a);
        let mut out = Vec::new();
        assert!(b.copy_frame_to(&mut out).await.is_err());
    }

    #[tokio::test]
    async fn write_frame_appends_missing_newline_before_sentinel() {
        let (mut a, mut b) = framed_pair();
        let mut src = std::io::Cursor::new(b"no trailing newline".to_vec());
        tokio::spawn(async move {
            a.write_frame_from(&mut src).await.unwrap();
        });
        let mut out = Vec::new();
        b.copy_frame_to(&mut out).await.unwrap();
        assert_eq!(out, b"no trailing newline\n");
    }

    #[tokio::test]
    async fn frame_round_trip_is_byte_identical_for_text() {
        let content = b"hello\nworld\n".to_vec();
        let (mut a, mut b) = framed_pair();
        let mut src = std::io::Cursor::new(content.clone());
        tokio::spawn(async move {
            a.write_frame_from(&mut src).await.unwrap();
        });
        let mut out = Vec::new();
        b.copy_frame_to(&mut out).await.unwrap();
        assert_eq!(out, content);
    }

    #[tokio::test]
    async fn empty_frame_is_just_the_sentinel() {
        let (mut a, mut b) = framed_pair();
        let mut src = std::io::Cursor::new(Vec::new());
        tokio::spawn(async move {
            let n = a.write_frame_from(&mut src).await.unwrap();
            assert_eq!(n, 0);
        });
        let mut out = Vec::new();
        let n = b.copy_frame_to(&mut out).await.unwrap();
        assert_eq!(n, 0);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn idle_deadline_fires_when_peer_is_silent() {
        let (_a, b) = framed_pair();
        let mut b = b.with_read_deadline(Some(Duration::from_millis(30)));
        assert!(b.read_line().await.is_err());
    }
}
