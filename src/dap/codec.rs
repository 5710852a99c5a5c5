//! DAP wire protocol codec
//!
//! The DAP protocol uses HTTP-style headers followed by JSON body:
//! ```text
//! Content-Length: <byte-length>\r\n
//! \r\n
//! <JSON body>
//! ```
//!
//! The codec knows nothing about message semantics beyond the envelope.

use futures_util::stream::{self, Stream};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::types::ProtocolMessage;
use crate::common::{Error, Result};

/// Sanity cap; 100MB is plenty for any DAP message
const MAX_CONTENT_LENGTH: usize = 100 * 1024 * 1024;

/// Encode a message into one complete frame
pub fn encode(message: &ProtocolMessage) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(message)?;
    let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode one frame body into a message
///
/// Bytes that are not JSON at all are a framing error, since the stream can
/// no longer be trusted. Valid JSON that is not a DAP message is a protocol
/// violation that only affects the request it answers, if any.
pub fn parse_message(body: &[u8]) -> Result<ProtocolMessage> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| Error::Framing(format!("body is not valid JSON: {}", e)))?;

    let request_seq = value.get("request_seq").and_then(Value::as_i64);
    serde_json::from_value(value)
        .map_err(|e| Error::protocol_violation(request_seq, format!("malformed message: {}", e)))
}

/// Read the raw body of the next frame
///
/// Returns `Ok(None)` when the stream ends cleanly between frames. A stream
/// that ends inside a header block or a body is a framing error.
pub async fn read_frame<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut content_length: Option<usize> = None;
    let mut saw_header = false;

    loop {
        let mut line = Vec::new();
        let bytes_read = reader.read_until(b'\n', &mut line).await?;

        if bytes_read == 0 {
            if saw_header {
                return Err(Error::Framing("stream ended inside frame header".into()));
            }
            return Ok(None);
        }
        if line.last() != Some(&b'\n') {
            return Err(Error::Framing("stream ended inside frame header".into()));
        }

        // Empty line (just \r\n) signals end of headers
        if line == b"\r\n" || line == b"\n" {
            if !saw_header {
                // stray blank line between frames
                continue;
            }
            break;
        }
        saw_header = true;

        let line = std::str::from_utf8(&line)
            .map_err(|_| Error::Framing("header is not valid UTF-8".into()))?
            .trim();

        // Ignore other headers (like Content-Type)
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("Content-Length") {
                let len = value.trim().parse().map_err(|_| {
                    Error::Framing(format!("invalid Content-Length: {}", value.trim()))
                })?;
                content_length = Some(len);
            }
        } else {
            return Err(Error::Framing(format!("malformed header line: {:?}", line)));
        }
    }

    let len = content_length.ok_or_else(|| Error::Framing("missing Content-Length header".into()))?;

    if len > MAX_CONTENT_LENGTH {
        return Err(Error::Framing(format!("Content-Length too large: {} bytes", len)));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::Framing(format!("stream ended before {} body bytes were read", len))
        } else {
            Error::Io(e)
        }
    })?;

    Ok(Some(body))
}

/// Read and decode the next message
pub async fn read_message<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<ProtocolMessage>> {
    match read_frame(reader).await? {
        Some(body) => parse_message(&body).map(Some),
        None => Ok(None),
    }
}

/// Write a DAP message to the stream
///
/// Adds the Content-Length header, writes the JSON body and flushes.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &ProtocolMessage,
) -> Result<()> {
    let frame = encode(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Lazily decode every message from a byte stream
///
/// The stream yields protocol violations and keeps going, but ends right
/// after the first fatal error (framing or I/O). It cannot be restarted.
pub fn decode<R>(reader: R) -> impl Stream<Item = Result<ProtocolMessage>>
where
    R: AsyncBufRead + Unpin,
{
    stream::unfold(Some(reader), |state| async move {
        let Some(mut reader) = state else {
            return None;
        };
        match read_message(&mut reader).await {
            Ok(Some(message)) => Some((Ok(message), Some(reader))),
            Ok(None) => None,
            Err(e) if e.is_fatal() => Some((Err(e), None)),
            Err(e) => Some((Err(e), Some(reader))),
        }
    })
}
