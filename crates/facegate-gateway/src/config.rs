//! Gateway runtime configuration.

use facegate_core::constants::{
    DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_INVOKE_TIMEOUT_SECS, DEFAULT_MAX_CONNS_PER_ADDR,
    DEFAULT_OFFLINE_THRESHOLD_SECS, DEFAULT_PENDING_SWEEP_SECS, DEFAULT_RATE_LIMIT,
    DEFAULT_RATE_WINDOW_SECS, DEFAULT_WATCHDOG_PERIOD_SECS,
};
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for a [`Gateway`](crate::Gateway).
///
/// Defaults come from `facegate_core::constants`; tests bind to port 0 and
/// tighten the limits.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address for the legacy TCP transport.
    pub bind_addr: SocketAddr,

    /// Address for the WebSocket transport, if enabled.
    pub ws_bind_addr: Option<SocketAddr>,

    /// Shared token devices must present on their first request. `None`
    /// disables authentication.
    pub auth_token: Option<String>,

    /// Live connection ceiling per source IP address.
    pub max_conns_per_addr: usize,

    /// Request ceiling within one rate window, per source IP address.
    pub rate_limit: u32,

    /// Rate window length.
    pub rate_window: Duration,

    /// Idle time after which a silent connection is closed.
    pub idle_timeout: Duration,

    /// Staleness threshold before the watchdog projects a device offline.
    pub offline_threshold: Duration,

    /// Watchdog sweep period.
    pub watchdog_period: Duration,

    /// Sweep period for expired pending-command entries.
    pub pending_sweep: Duration,

    /// Default deadline for bridge-issued commands awaiting a reply.
    pub invoke_timeout: Duration,

    /// Access decision echoed in `sendlog` acknowledgments. The gateway
    /// stores events either way; this only drives the door relay hint.
    pub grant_access: bool,

    /// Human-readable message echoed in `sendlog` acknowledgments.
    pub access_message: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7788".parse().unwrap(),
            ws_bind_addr: None,
            auth_token: None,
            max_conns_per_addr: DEFAULT_MAX_CONNS_PER_ADDR,
            rate_limit: DEFAULT_RATE_LIMIT,
            rate_window: Duration::from_secs(DEFAULT_RATE_WINDOW_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            offline_threshold: Duration::from_secs(DEFAULT_OFFLINE_THRESHOLD_SECS),
            watchdog_period: Duration::from_secs(DEFAULT_WATCHDOG_PERIOD_SECS),
            pending_sweep: Duration::from_secs(DEFAULT_PENDING_SWEEP_SECS),
            invoke_timeout: Duration::from_secs(DEFAULT_INVOKE_TIMEOUT_SECS),
            grant_access: true,
            access_message: "ok".to_string(),
        }
    }
}
