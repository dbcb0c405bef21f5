//! Wire framing.
//!
//! ```text
//! ┌───────────────────────┬──────────────────────────────┐
//! │ length: i32 (LE)      │ body: `length` bytes of JSON │
//! └───────────────────────┴──────────────────────────────┘
//! ```
//!
//! The body is a [`WireMessage`]. A length of zero, a negative length or one
//! above the configured maximum is a protocol violation; the payload is never
//! read in that case.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::bus::{BusError, Result};
use crate::envelope::Envelope;

/// Size of the length prefix.
pub const HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireType {
    /// Client → server: register a pattern.
    Subscribe,
    /// Server → client: pattern registered.
    Subscribed,
    /// Client → server: route an envelope.
    Publish,
    /// Server → client: delivery for a matching pattern.
    Envelope,
}

/// One framed message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: WireType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envelope: Option<Arc<Envelope>>,
}

impl WireMessage {
    pub fn subscribe(pattern: impl Into<String>) -> Self {
        Self {
            kind: WireType::Subscribe,
            pattern: Some(pattern.into()),
            envelope: None,
        }
    }

    pub fn subscribed(pattern: impl Into<String>) -> Self {
        Self {
            kind: WireType::Subscribed,
            pattern: Some(pattern.into()),
            envelope: None,
        }
    }

    pub fn publish(envelope: Arc<Envelope>) -> Self {
        Self {
            kind: WireType::Publish,
            pattern: None,
            envelope: Some(envelope),
        }
    }

    pub fn deliver(envelope: Arc<Envelope>) -> Self {
        Self {
            kind: WireType::Envelope,
            pattern: None,
            envelope: Some(envelope),
        }
    }

    /// Pattern field, required for subscribe frames.
    pub fn require_pattern(&self) -> Result<&str> {
        self.pattern
            .as_deref()
            .ok_or_else(|| BusError::Protocol(format!("{:?} frame without pattern", self.kind)))
    }

    /// Envelope field, required for publish and envelope frames.
    pub fn require_envelope(&self) -> Result<&Arc<Envelope>> {
        self.envelope
            .as_ref()
            .ok_or_else(|| BusError::Protocol(format!("{:?} frame without envelope", self.kind)))
    }
}

/// Encode `message` into a complete frame.
///
/// Fails without producing any bytes when the body exceeds `max_frame_bytes`.
pub fn encode(message: &WireMessage, max_frame_bytes: usize) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(message)?;
    if body.is_empty() || body.len() > max_frame_bytes {
        return Err(BusError::Protocol(format!(
            "Frame size {} outside 1..={}",
            body.len(),
            max_frame_bytes
        )));
    }
    let length = i32::try_from(body.len())
        .map_err(|_| BusError::Protocol("Frame too large for i32 length".to_string()))?;

    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Write an already-encoded frame and flush it.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

fn eof_to_closed(e: std::io::Error) -> BusError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        BusError::ConnectionClosed
    } else {
        BusError::Io(e)
    }
}

/// Read the next message.
///
/// Returns `Ok(None)` when the peer closed cleanly between frames. A stream
/// ending inside a frame is [`BusError::ConnectionClosed`].
pub async fn read_message<R>(reader: &mut R, max_frame_bytes: usize) -> Result<Option<WireMessage>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let first = reader.read(&mut header).await?;
    if first == 0 {
        return Ok(None);
    }
    if first < HEADER_LEN {
        reader
            .read_exact(&mut header[first..])
            .await
            .map_err(eof_to_closed)?;
    }

    let length = i32::from_le_bytes(header);
    if length <= 0 || length as usize > max_frame_bytes {
        return Err(BusError::Protocol(format!(
            "Frame length {length} outside 1..={max_frame_bytes}"
        )));
    }

    let mut body = vec![0u8; length as usize];
    reader.read_exact(&mut body).await.map_err(eof_to_closed)?;

    let message = serde_json::from_slice(&body)
        .map_err(|e| BusError::Protocol(format!("Malformed frame body: {e}")))?;
    Ok(Some(message))
}
