//! Tokio codec for the push protocol's legacy transport.
//!
//! [`PushCodec`] plugs the [`FrameBuffer`] state machine into
//! `tokio_util::codec::Framed` so a connection task can treat the raw TCP
//! stream as a stream of [`FrameEvent`]s and a sink of [`Outbound`]
//! documents.
//!
//! # Decode failures are data
//!
//! A frame whose body is not valid JSON, or whose JSON carries neither
//! `"cmd"` nor `"ret"`, is yielded as [`FrameEvent::Invalid`] — the
//! dispatcher answers with a protocol-level error and the connection stays
//! up. The codec's `Err` path is reserved for conditions that must close
//! the connection: I/O failure and oversized frames.
//!
//! # Message-oriented transport
//!
//! WebSocket delivery already provides message boundaries; [`decode_text`]
//! covers that path with a single structured decode, no accumulation.

use crate::frame::FrameBuffer;
use crate::message::{Inbound, Outbound};
use bytes::{BufMut, BytesMut};
use facegate_core::Error;
use facegate_core::constants::MAX_FRAME_BYTES;
use tokio_util::codec::{Decoder, Encoder};

/// Maximum bytes of a rejected payload kept for the audit trail.
const MAX_RAW_AUDIT_BYTES: usize = 1024;

/// One decoded unit from a device connection.
#[derive(Debug, Clone)]
pub enum FrameEvent {
    /// A structurally classified message.
    Message(Inbound),
    /// A frame that arrived intact but did not decode; `raw` is a bounded
    /// lossy excerpt for the audit trail.
    Invalid { reason: String, raw: String },
}

/// Decode one discrete text message (message-oriented transport).
#[must_use]
pub fn decode_text(text: &str) -> FrameEvent {
    decode_body(text.as_bytes())
}

fn decode_body(body: &[u8]) -> FrameEvent {
    let value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) => {
            return FrameEvent::Invalid {
                reason: format!("invalid JSON: {e}"),
                raw: audit_excerpt(body),
            };
        }
    };
    match Inbound::classify(value) {
        Ok(inbound) => FrameEvent::Message(inbound),
        Err(e) => FrameEvent::Invalid {
            reason: e.to_string(),
            raw: audit_excerpt(body),
        },
    }
}

fn audit_excerpt(body: &[u8]) -> String {
    let end = body.len().min(MAX_RAW_AUDIT_BYTES);
    String::from_utf8_lossy(&body[..end]).into_owned()
}

/// Codec pairing legacy-frame decoding with HTTP-style ack encoding.
#[derive(Debug)]
pub struct PushCodec {
    frames: FrameBuffer,
}

impl PushCodec {
    /// Codec with the default frame cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame(MAX_FRAME_BYTES)
    }

    /// Codec with an explicit frame cap.
    #[must_use]
    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            frames: FrameBuffer::with_max_frame(max_frame),
        }
    }
}

impl Default for PushCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PushCodec {
    type Item = FrameEvent;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<FrameEvent>, Error> {
        if !src.is_empty() {
            let chunk = src.split();
            self.frames.feed(&chunk)?;
        }
        Ok(self.frames.next_body().map(|body| decode_body(&body)))
    }
}

impl Encoder<Outbound> for PushCodec {
    type Error = Error;

    /// Encode a reply in the legacy transport's fixed acknowledgment
    /// framing: status line, length header, blank line, JSON body.
    fn encode(&mut self, item: Outbound, dst: &mut BytesMut) -> Result<(), Error> {
        let body = item.to_wire();
        dst.reserve(body.len() + 96);
        dst.put_slice(b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: ");
        dst.put_slice(body.len().to_string().as_bytes());
        dst.put_slice(b"\r\n\r\n");
        dst.put_slice(body.as_bytes());
        Ok(())
    }
}
