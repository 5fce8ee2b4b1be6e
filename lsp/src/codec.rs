//! JSON-RPC framing codec for LSP communication.
//!
//! LSP uses `Content-Length: N\r\n\r\n{json}` framing over stdin/stdout.
//! This module provides [`FrameReader`] and [`FrameWriter`] for async
//! reading and writing of framed [`Message`]s.
//!
//! A single malformed frame is reported as [`ReadError::Malformed`] and the
//! reader stays usable; only I/O failures (including EOF in the middle of a
//! frame) are fatal.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::message::Message;

/// Maximum frame size (64 MiB) to prevent unbounded memory allocation.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// A single frame could not be decoded. The stream itself is still intact.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("missing Content-Length header")]
    MissingContentLength,
    #[error("invalid Content-Length value: {0:?}")]
    InvalidContentLength(String),
    #[error("Content-Length {length} exceeds maximum {max}")]
    FrameTooLarge { length: usize, max: usize },
    #[error("frame body is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("frame is not a JSON-RPC message: {0}")]
    InvalidMessage(String),
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error(transparent)]
    Malformed(#[from] ProtocolError),
    #[error("reading from language server: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("writing to language server: {0}")]
    Io(#[from] io::Error),
    #[error("encoding message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("writer task has stopped")]
    WriterClosed,
}

/// Reads framed JSON-RPC messages from an async reader.
///
/// Parses `Content-Length` headers and reads exactly that many bytes,
/// then decodes the body into a [`Message`].
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next message.
    ///
    /// Returns `Ok(None)` on EOF between frames (clean shutdown).
    pub async fn read_message(&mut self) -> Result<Option<Message>, ReadError> {
        let Some(body) = self.read_frame().await? else {
            return Ok(None);
        };
        let value = serde_json::from_slice(&body).map_err(ProtocolError::InvalidJson)?;
        Ok(Some(Message::from_value(value)?))
    }

    /// Read one raw frame body.
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, ReadError> {
        let content_length = match self.read_headers().await? {
            Some(len) => len,
            None => return Ok(None), // EOF
        };

        if content_length > MAX_FRAME_BYTES {
            // Skip the body so the next read starts on a frame boundary.
            let skipped = tokio::io::copy(
                &mut (&mut self.reader).take(content_length as u64),
                &mut tokio::io::sink(),
            )
            .await?;
            if skipped < content_length as u64 {
                return Err(unexpected_eof("frame body").into());
            }
            return Err(ProtocolError::FrameTooLarge {
                length: content_length,
                max: MAX_FRAME_BYTES,
            }
            .into());
        }

        let mut body = vec![0u8; content_length];
        self.reader.read_exact(&mut body).await?;
        Ok(Some(body))
    }

    /// Parse headers until the empty line separator.
    ///
    /// Returns the `Content-Length` value, or `None` on EOF.
    async fn read_headers(&mut self) -> Result<Option<usize>, ReadError> {
        let mut content_length: Option<Result<usize, String>> = None;
        let mut line = Vec::new();
        let mut saw_any_header_bytes = false;

        loop {
            line.clear();
            let bytes_read = self.reader.read_until(b'\n', &mut line).await?;

            if bytes_read == 0 {
                // EOF is only clean before the first header byte of a frame.
                if !saw_any_header_bytes {
                    return Ok(None);
                }
                return Err(unexpected_eof("headers").into());
            }
            saw_any_header_bytes = true;

            let text = String::from_utf8_lossy(&line);
            let trimmed = text.trim();
            if trimmed.is_empty() {
                break;
            }

            if let Some(value) = content_length_field(trimmed) {
                content_length = Some(value.parse().map_err(|_| value.to_string()));
            }
            // Ignore other headers (e.g. Content-Type)
        }

        match content_length {
            Some(Ok(len)) => Ok(Some(len)),
            Some(Err(raw)) => Err(ProtocolError::InvalidContentLength(raw).into()),
            None => Err(ProtocolError::MissingContentLength.into()),
        }
    }
}

/// Value of a `Content-Length` header in `line`, matched case-insensitively.
///
/// The last occurrence wins. After a frame whose headers lacked a usable
/// length, its body is still in the stream and gets read as the start of the
/// next header line, so the real header can sit behind arbitrary bytes.
fn content_length_field(line: &str) -> Option<&str> {
    const NAME: &str = "content-length:";
    let start = line.to_ascii_lowercase().rfind(NAME)?;
    let preceded_by_name_char = line[..start]
        .bytes()
        .next_back()
        .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'-');
    if preceded_by_name_char {
        return None;
    }
    Some(line[start + NAME.len()..].trim())
}

fn unexpected_eof(during: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("stream closed while reading {during}"),
    )
}

/// Writes framed JSON-RPC messages to an async writer.
///
/// Serializes the message and prepends the `Content-Length` header. Header
/// and body are written back to back and flushed, so a message is never
/// interleaved with another as long as there is a single writer.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_message(&mut self, message: &Message) -> Result<(), TransportError> {
        let body = serde_json::to_vec(&message.to_value())?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(&body).await?;
        self.writer.flush().await?;

        Ok(())
    }

    /// Flush and close the underlying stream (the server sees EOF on stdin).
    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
