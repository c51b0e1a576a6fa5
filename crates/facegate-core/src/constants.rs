//! Protocol-level constants and gateway defaults.
//!
//! This module centralizes every limit and default the gateway enforces.
//! The push protocol itself is loosely specified by the device vendor, so
//! the caps here are ours: they bound what an untrusted terminal can make
//! the gateway buffer, store, or write to disk.
//!
//! # Wire Format
//!
//! Devices speak JSON text over one of two transports:
//!
//! ```text
//! Legacy TCP:   <request line>\r\n<headers>\r\n\r\n<json body>
//! WebSocket:    one text message = one json document
//! ```
//!
//! The legacy transport carries a numeric `Content-Length` header; the body
//! ends exactly that many bytes after the blank line.

/// Maximum accepted serial number length (characters).
pub const MAX_SERIAL_LEN: usize = 64;

/// Maximum stored length for free-form string fields from devices.
pub const MAX_FIELD_LEN: usize = 128;

/// Maximum bytes a single frame (headers + body) may occupy.
///
/// Exceeding this is the one framing condition that closes the connection:
/// an oversized frame is either a broken client or a memory-exhaustion
/// attempt, and there is no safe way to resynchronize past it.
pub const MAX_FRAME_BYTES: usize = 512 * 1024;

/// Maximum decoded size for an event photo payload.
pub const MAX_IMAGE_BYTES: usize = 512 * 1024;

/// JPEG magic prefix required of decoded image payloads.
pub const JPEG_MAGIC: [u8; 3] = [0xFF, 0xD8, 0xFF];

/// Upper bound for synthesized placeholder enrollment ids.
pub const MAX_PLACEHOLDER_ENROLL_LEN: usize = 24;

/// Header block terminator on the legacy transport.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Name of the numeric body-length header (matched case-insensitively).
pub const LENGTH_HEADER: &str = "content-length";

/// Default per-source-address live connection ceiling.
pub const DEFAULT_MAX_CONNS_PER_ADDR: usize = 8;

/// Default request ceiling within one rate window.
pub const DEFAULT_RATE_LIMIT: u32 = 100;

/// Default rate-limit window length (seconds).
pub const DEFAULT_RATE_WINDOW_SECS: u64 = 60;

/// Default idle timeout before a silent connection is closed (seconds).
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Default staleness threshold before a device is projected offline (seconds).
pub const DEFAULT_OFFLINE_THRESHOLD_SECS: u64 = 90;

/// Default liveness watchdog sweep period (seconds).
pub const DEFAULT_WATCHDOG_PERIOD_SECS: u64 = 30;

/// Default sweep period for expired pending-command entries (seconds).
pub const DEFAULT_PENDING_SWEEP_SECS: u64 = 10;

/// Default deadline for a bridge-issued command awaiting its reply (seconds).
pub const DEFAULT_INVOKE_TIMEOUT_SECS: u64 = 10;
