//! Per-source resource governance: connection ceilings and request rates.
//!
//! Admission happens before any protocol processing, so a flood from one
//! address cannot starve the accept loop or exhaust memory on half-open
//! sessions. Rates use a fixed window per IP; the window map is garbage
//! collected periodically so one-shot scanners do not accumulate state.

use facegate_core::{Error, Result};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

struct RateWindow {
    count: u32,
    reset_at: Instant,
}

struct Shared {
    conns: Mutex<HashMap<IpAddr, usize>>,
    rates: Mutex<HashMap<IpAddr, RateWindow>>,
}

pub struct ResourceGovernor {
    shared: Arc<Shared>,
    max_conns_per_addr: usize,
    rate_limit: u32,
    rate_window: Duration,
}

/// RAII admission permit. Dropping it releases the connection slot, so a
/// connection task cannot leak its slot on any exit path.
pub struct ConnectionPermit {
    shared: Arc<Shared>,
    ip: IpAddr,
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        let mut conns = self.shared.conns.lock().unwrap();
        match conns.get_mut(&self.ip) {
            Some(count) if *count > 1 => *count -= 1,
            _ => {
                conns.remove(&self.ip);
            }
        }
    }
}

impl ResourceGovernor {
    #[must_use]
    pub fn new(max_conns_per_addr: usize, rate_limit: u32, rate_window: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                conns: Mutex::new(HashMap::new()),
                rates: Mutex::new(HashMap::new()),
            }),
            max_conns_per_addr,
            rate_limit,
            rate_window,
        }
    }

    /// Admit a new connection from `addr`.
    ///
    /// # Errors
    /// Returns `Error::ConnectionLimit` when the address is at its ceiling.
    pub fn try_admit(&self, addr: SocketAddr) -> Result<ConnectionPermit> {
        let ip = addr.ip();
        let mut conns = self.shared.conns.lock().unwrap();
        let count = conns.entry(ip).or_insert(0);
        if *count >= self.max_conns_per_addr {
            warn!(%addr, ceiling = self.max_conns_per_addr, "connection rejected");
            return Err(Error::ConnectionLimit {
                addr: addr.to_string(),
            });
        }
        *count += 1;
        Ok(ConnectionPermit {
            shared: self.shared.clone(),
            ip,
        })
    }

    /// Count one request from `ip` against the current window. Returns
    /// whether the request is within the ceiling.
    pub fn check_rate(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut rates = self.shared.rates.lock().unwrap();
        let window = rates.entry(ip).or_insert(RateWindow {
            count: 0,
            reset_at: now + self.rate_window,
        });
        if now >= window.reset_at {
            window.count = 0;
            window.reset_at = now + self.rate_window;
        }
        window.count += 1;
        window.count <= self.rate_limit
    }

    /// Drop expired rate windows. Returns how many were removed.
    pub fn gc_rates(&self) -> usize {
        let now = Instant::now();
        let mut rates = self.shared.rates.lock().unwrap();
        let before = rates.len();
        rates.retain(|_, window| now < window.reset_at);
        let removed = before - rates.len();
        if removed > 0 {
            debug!(removed, "expired rate windows collected");
        }
        removed
    }

    /// Live connection count for an address, for tests and monitoring.
    #[must_use]
    pub fn connections_for(&self, ip: IpAddr) -> usize {
        self.shared.conns.lock().unwrap().get(&ip).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("10.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn test_admission_ceiling_and_permit_release() {
        let governor = ResourceGovernor::new(2, 100, Duration::from_secs(60));

        let p1 = governor.try_admit(addr(1)).unwrap();
        let _p2 = governor.try_admit(addr(2)).unwrap();
        assert!(governor.try_admit(addr(3)).is_err());
        assert_eq!(governor.connections_for(addr(1).ip()), 2);

        // Releasing one slot readmits.
        drop(p1);
        assert_eq!(governor.connections_for(addr(1).ip()), 1);
        let _p3 = governor.try_admit(addr(3)).unwrap();
    }

    #[test]
    fn test_other_addresses_unaffected() {
        let governor = ResourceGovernor::new(1, 100, Duration::from_secs(60));
        let _p1 = governor.try_admit(addr(1)).unwrap();

        let other: SocketAddr = "10.0.0.2:1".parse().unwrap();
        assert!(governor.try_admit(other).is_ok());
    }

    #[test]
    fn test_rate_window_counts_and_resets() {
        let governor = ResourceGovernor::new(8, 2, Duration::from_millis(20));
        let ip = addr(1).ip();

        assert!(governor.check_rate(ip));
        assert!(governor.check_rate(ip));
        assert!(!governor.check_rate(ip));

        std::thread::sleep(Duration::from_millis(25));
        assert!(governor.check_rate(ip));
    }

    #[test]
    fn test_gc_drops_only_expired_windows() {
        let governor = ResourceGovernor::new(8, 2, Duration::from_millis(10));
        governor.check_rate(addr(1).ip());
        assert_eq!(governor.gc_rates(), 0);

        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(governor.gc_rates(), 1);
    }
}
