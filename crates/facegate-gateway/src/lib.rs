//! Connection gateway for biometric access-control terminals.
//!
//! Terminals open long-lived connections (legacy framed TCP or WebSocket)
//! and push JSON documents: registration, heartbeats, attendance batches,
//! and replies to server-initiated commands. This crate terminates those
//! connections and turns them into durable state and a command API:
//!
//! - [`Gateway`] — transports, accept loops, background tasks
//! - [`Dispatcher`] — per-message protocol semantics
//! - [`DeviceRegistry`] — serial to live-session map, last-writer-wins
//! - [`CommandBridge`] / [`PendingCommands`] — request/reply correlation
//!   for server-initiated commands
//! - [`ResourceGovernor`] — per-address connection ceilings and rates
//! - [`watchdog`] — periodic stale-offline projection in storage
//!
//! Persistence goes through `facegate_storage::GatewayStore` and is always
//! fire-and-forget from the protocol path.

pub mod bridge;
pub mod config;
pub mod dispatcher;
pub mod governor;
pub mod pending;
pub mod registry;
pub mod server;
pub mod watchdog;

mod ws;

pub use bridge::{CommandBridge, InvokeOutcome};
pub use config::GatewayConfig;
pub use dispatcher::{ConnState, Dispatcher};
pub use governor::{ConnectionPermit, ResourceGovernor};
pub use pending::PendingCommands;
pub use registry::{DeviceRegistry, SessionHandle, SessionInfo};
pub use server::Gateway;
