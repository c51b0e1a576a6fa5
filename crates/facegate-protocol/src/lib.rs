//! Push-protocol model for facegate.
//!
//! Biometric terminals open a long-lived connection to the gateway and push
//! JSON documents: registration, heartbeats, attendance log batches, and
//! replies to server-initiated commands. This crate owns everything between
//! raw bytes and a dispatched message:
//!
//! - [`Command`] / [`CommandName`] — the closed command vocabulary
//! - [`Inbound`] — classified inbound messages (requests vs replies)
//! - [`FrameBuffer`] — incremental framing for the legacy text transport
//! - [`PushCodec`] — tokio-util integration for `Framed` streams
//! - [`validation`] — pure sanitizers for identifiers, fields and images
//!
//! Decode failures are data, not faults: the codec yields
//! [`FrameEvent::Invalid`] so the dispatcher can answer with a
//! protocol-level error instead of dropping the connection.

pub mod codec;
pub mod commands;
pub mod frame;
pub mod message;
pub mod validation;

pub use codec::{FrameEvent, PushCodec, decode_text};
pub use commands::{Command, CommandName};
pub use frame::{FrameBuffer, FrameState};
pub use message::{
    DeviceInfo, Inbound, LogRecord, Outbound, RegRequest, SendLogRequest, command_payload,
};
pub use validation::{
    clamp_field, clamp_field_to, image_file_name, validate_image, validate_serial,
};
