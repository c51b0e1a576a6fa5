//! Incremental framing for the legacy text transport.
//!
//! Legacy terminals speak an HTTP-shaped framing over a raw TCP stream: a
//! request line plus headers, a blank line (CRLF CRLF), then a body whose
//! length is given by a numeric `Content-Length` header. TCP gives no
//! message boundaries, so a single read may contain a fragment of a frame,
//! several frames, or a header block split anywhere — including inside the
//! terminator itself.
//!
//! # State Machine
//!
//! ```text
//! ┌─────────────────┐  CRLF CRLF found   ┌──────────────────┐  body_len bytes  ┌──────────────┐
//! │ AwaitingHeaders │───────────────────>│ AwaitingBody{n}  │─────────────────>│ body queued  │
//! └─────────────────┘                    └──────────────────┘                  └──────────────┘
//!         ^                                                                          │
//!         └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The parser operates on byte slices in an accumulating [`BytesMut`]; it
//! never re-stringifies the whole buffer, so non-ASCII body bytes cannot
//! confuse header scanning.
//!
//! # Malformed Headers
//!
//! A header block without a parseable length header yields a zero-length
//! body — a best-effort empty frame, never a parse fault. The only fatal
//! condition is an oversized frame (header block or declared body beyond
//! the configured cap), which the caller must answer by closing the
//! connection.

use bytes::{Bytes, BytesMut};
use facegate_core::constants::{HEADER_TERMINATOR, LENGTH_HEADER, MAX_FRAME_BYTES};
use facegate_core::{Error, Result};
use std::collections::VecDeque;

const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;

/// Parser states for legacy frame extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Scanning buffered bytes for the CRLF CRLF header terminator.
    AwaitingHeaders,
    /// Header block consumed; waiting for `body_len` body bytes.
    AwaitingBody { body_len: usize },
}

/// Stateful frame extractor for the legacy transport.
///
/// Feed arbitrary chunks with [`feed`](FrameBuffer::feed); pull complete
/// bodies with [`next_body`](FrameBuffer::next_body). Leftover bytes stay
/// buffered for the next read. Feeding never loses data across chunk
/// boundaries: three arbitrary splits of one frame decode identically to
/// the unsplit frame.
#[derive(Debug)]
pub struct FrameBuffer {
    buffer: BytesMut,
    state: FrameState,
    bodies: VecDeque<Bytes>,
    max_frame: usize,
}

impl FrameBuffer {
    /// Create a frame buffer with the default frame cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame(MAX_FRAME_BYTES)
    }

    /// Create a frame buffer with an explicit frame cap.
    #[must_use]
    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            state: FrameState::AwaitingHeaders,
            bodies: VecDeque::new(),
            max_frame,
        }
    }

    /// Append stream bytes and extract every frame that completes.
    ///
    /// # Errors
    /// Returns `Error::FrameTooLarge` when the header block or the declared
    /// body exceeds the frame cap. This is fatal for the connection; the
    /// buffer is cleared and the parser reset.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(bytes);
        while self.try_extract()? {}
        Ok(())
    }

    /// Pop the next complete frame body, if any.
    pub fn next_body(&mut self) -> Option<Bytes> {
        self.bodies.pop_front()
    }

    /// Number of complete bodies ready for extraction.
    #[must_use]
    pub fn bodies_available(&self) -> usize {
        self.bodies.len()
    }

    /// Current parser state.
    #[must_use]
    pub fn state(&self) -> FrameState {
        self.state
    }

    fn try_extract(&mut self) -> Result<bool> {
        match self.state {
            FrameState::AwaitingHeaders => self.take_headers(),
            FrameState::AwaitingBody { body_len } => Ok(self.take_body(body_len)),
        }
    }

    /// Consume the header block if its terminator has arrived.
    fn take_headers(&mut self) -> Result<bool> {
        let Some(pos) = find_subsequence(&self.buffer, HEADER_TERMINATOR) else {
            if self.buffer.len() > self.max_frame {
                self.reset();
                return Err(Error::FrameTooLarge {
                    size: self.max_frame + 1,
                    max: self.max_frame,
                });
            }
            return Ok(false);
        };

        let header_len = pos + HEADER_TERMINATOR.len();
        if header_len > self.max_frame {
            self.reset();
            return Err(Error::FrameTooLarge {
                size: header_len,
                max: self.max_frame,
            });
        }

        let header_block = self.buffer.split_to(header_len);
        let body_len = parse_body_length(&header_block[..pos]);

        if body_len > self.max_frame {
            self.reset();
            return Err(Error::FrameTooLarge {
                size: body_len,
                max: self.max_frame,
            });
        }

        self.state = FrameState::AwaitingBody { body_len };
        Ok(true)
    }

    /// Consume the body once enough bytes have accumulated.
    fn take_body(&mut self, body_len: usize) -> bool {
        if self.buffer.len() < body_len {
            return false;
        }
        let body = self.buffer.split_to(body_len).freeze();
        self.bodies.push_back(body);
        self.state = FrameState::AwaitingHeaders;
        true
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.bodies.clear();
        self.state = FrameState::AwaitingHeaders;
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Locate `needle` in `haystack`, byte-wise.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Extract the numeric length header from a header block.
///
/// Header lines are matched case-insensitively on the name; a missing,
/// duplicated-but-garbled or non-numeric value yields zero. Only the header
/// lines are ever interpreted as text, and lossily at that — body bytes
/// never pass through here.
fn parse_body_length(header_block: &[u8]) -> usize {
    for line in header_block.split(|&b| b == b'\n') {
        let line = String::from_utf8_lossy(line);
        let line = line.trim_end_matches('\r');
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case(LENGTH_HEADER) {
            return value.trim().parse().unwrap_or(0);
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_frame(body: &str) -> Vec<u8> {
        format!(
            "POST /log HTTP/1.1\r\nHost: gateway\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        )
        .into_bytes()
    }

    #[test]
    fn test_complete_frame_single_feed() {
        let mut fb = FrameBuffer::new();
        fb.feed(&make_frame("{\"cmd\":\"reg\"}")).unwrap();

        assert_eq!(fb.bodies_available(), 1);
        assert_eq!(&fb.next_body().unwrap()[..], b"{\"cmd\":\"reg\"}");
        assert_eq!(fb.state(), FrameState::AwaitingHeaders);
    }

    #[test]
    fn test_three_chunk_split_equals_one_chunk() {
        let frame = make_frame("{\"cmd\":\"heartbeat\",\"sn\":\"X1\"}");

        // Reference: whole frame at once.
        let mut whole = FrameBuffer::new();
        whole.feed(&frame).unwrap();
        let expected = whole.next_body().unwrap();

        // Arbitrary three-way splits, including inside the CRLF CRLF.
        for (a, b) in [(3, 20), (10, 45), (40, 50), (frame.len() - 2, frame.len() - 1)] {
            let mut fb = FrameBuffer::new();
            fb.feed(&frame[..a]).unwrap();
            fb.feed(&frame[a..b]).unwrap();
            fb.feed(&frame[b..]).unwrap();

            assert_eq!(fb.bodies_available(), 1, "split at ({a},{b})");
            assert_eq!(fb.next_body().unwrap(), expected, "split at ({a},{b})");
        }
    }

    #[test]
    fn test_byte_by_byte_feeding() {
        let frame = make_frame("{\"cmd\":\"reg\",\"sn\":\"B\"}");
        let mut fb = FrameBuffer::new();
        for &byte in &frame {
            fb.feed(&[byte]).unwrap();
        }
        assert_eq!(fb.bodies_available(), 1);
    }

    #[test]
    fn test_multiple_frames_one_feed() {
        let mut data = make_frame("{\"a\":1}");
        data.extend_from_slice(&make_frame("{\"b\":2}"));

        let mut fb = FrameBuffer::new();
        fb.feed(&data).unwrap();

        assert_eq!(fb.bodies_available(), 2);
        assert_eq!(&fb.next_body().unwrap()[..], b"{\"a\":1}");
        assert_eq!(&fb.next_body().unwrap()[..], b"{\"b\":2}");
    }

    #[test]
    fn test_missing_length_header_means_empty_body() {
        let mut fb = FrameBuffer::new();
        fb.feed(b"POST /log HTTP/1.1\r\nHost: gateway\r\n\r\n").unwrap();

        assert_eq!(fb.bodies_available(), 1);
        assert!(fb.next_body().unwrap().is_empty());
    }

    #[test]
    fn test_garbled_length_header_means_empty_body() {
        let mut fb = FrameBuffer::new();
        fb.feed(b"POST / HTTP/1.1\r\nContent-Length: banana\r\n\r\n")
            .unwrap();

        assert_eq!(fb.bodies_available(), 1);
        assert!(fb.next_body().unwrap().is_empty());
    }

    #[test]
    fn test_length_header_case_insensitive() {
        let mut fb = FrameBuffer::new();
        fb.feed(b"POST / HTTP/1.1\r\ncontent-length: 2\r\n\r\nok")
            .unwrap();

        assert_eq!(&fb.next_body().unwrap()[..], b"ok");
    }

    #[test]
    fn test_leftover_preserved_across_frames() {
        let mut data = make_frame("{\"a\":1}");
        let second = make_frame("{\"b\":22}");
        data.extend_from_slice(&second[..10]); // partial second frame

        let mut fb = FrameBuffer::new();
        fb.feed(&data).unwrap();
        assert_eq!(fb.bodies_available(), 1);

        fb.feed(&second[10..]).unwrap();
        assert_eq!(fb.bodies_available(), 2);
    }

    #[test]
    fn test_non_ascii_body_bytes_survive() {
        let body: Vec<u8> = vec![0xFF, 0xD8, 0xFF, 0x00, 0x9C];
        let mut frame =
            format!("POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n", body.len()).into_bytes();
        frame.extend_from_slice(&body);

        let mut fb = FrameBuffer::new();
        fb.feed(&frame).unwrap();
        assert_eq!(&fb.next_body().unwrap()[..], &body[..]);
    }

    #[test]
    fn test_oversized_declared_body_is_fatal() {
        let mut fb = FrameBuffer::with_max_frame(1024);
        let result = fb.feed(b"POST / HTTP/1.1\r\nContent-Length: 99999\r\n\r\n");
        assert!(matches!(result, Err(Error::FrameTooLarge { .. })));
    }

    #[test]
    fn test_oversized_header_block_is_fatal_even_when_terminated() {
        // Terminator and oversized block arrive in the same chunk.
        let mut fb = FrameBuffer::with_max_frame(64);
        let mut block = b"POST / HTTP/1.1\r\nX-Pad: ".to_vec();
        block.extend(std::iter::repeat_n(b'y', 100));
        block.extend_from_slice(b"\r\n\r\n");

        let result = fb.feed(&block);
        assert!(matches!(result, Err(Error::FrameTooLarge { .. })));
    }

    #[test]
    fn test_unterminated_header_block_is_fatal_past_cap() {
        let mut fb = FrameBuffer::with_max_frame(64);
        let junk = vec![b'X'; 100];
        let result = fb.feed(&junk);
        assert!(matches!(result, Err(Error::FrameTooLarge { .. })));
    }

    #[test]
    fn test_state_transitions() {
        let mut fb = FrameBuffer::new();
        assert_eq!(fb.state(), FrameState::AwaitingHeaders);

        fb.feed(b"POST / HTTP/1.1\r\nContent-Length: 4\r\n\r\n").unwrap();
        assert_eq!(fb.state(), FrameState::AwaitingBody { body_len: 4 });

        fb.feed(b"{\"\":0").unwrap(); // 4 body bytes + 1 leftover
        assert_eq!(fb.state(), FrameState::AwaitingHeaders);
        assert_eq!(fb.bodies_available(), 1);
    }
}
