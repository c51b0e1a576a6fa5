//! Liveness watchdog.
//!
//! Periodically projects devices unseen past the staleness threshold as
//! offline in storage. The watchdog never closes sockets; dead TCP
//! connections are reaped by the per-connection idle timeout, and a
//! device that reconnects simply flips back online on its next upsert.

use chrono::{TimeDelta, Utc};
use facegate_storage::GatewayStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// One sweep: flip devices unseen for `threshold` to offline. Returns how
/// many rows flipped.
pub async fn sweep(store: &dyn GatewayStore, threshold: Duration) -> u64 {
    let threshold = TimeDelta::from_std(threshold).unwrap_or_else(|_| TimeDelta::seconds(90));
    let cutoff = Utc::now() - threshold;
    match store.mark_stale_offline(cutoff).await {
        Ok(flipped) => {
            if flipped > 0 {
                info!(flipped, "stale devices projected offline");
            }
            flipped
        }
        Err(e) => {
            warn!(error = %e, "watchdog sweep failed");
            0
        }
    }
}

/// Spawn the periodic sweep task.
pub fn spawn_watchdog(
    store: Arc<dyn GatewayStore>,
    threshold: Duration,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately; skip it so a restart does not
        // flap devices that are mid-reconnect.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweep(store.as_ref(), threshold).await;
        }
    })
}
