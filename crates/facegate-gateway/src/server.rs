//! Gateway assembly and the legacy TCP accept/connection loops.
//!
//! [`Gateway::start`] wires the registry, pending table, governor and
//! dispatcher together, binds the transports, and spawns the background
//! tasks (watchdog, pending eviction, rate-window GC). Each accepted
//! connection runs in its own task; admission control happens before any
//! protocol processing.

use crate::bridge::CommandBridge;
use crate::config::GatewayConfig;
use crate::dispatcher::{ConnState, Dispatcher};
use crate::governor::{ConnectionPermit, ResourceGovernor};
use crate::pending::PendingCommands;
use crate::registry::DeviceRegistry;
use crate::watchdog;
use crate::ws;
use facegate_core::Result;
use facegate_protocol::{Outbound, PushCodec};
use facegate_storage::GatewayStore;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// Queue depth for documents headed to one device connection.
const OUTBOUND_QUEUE: usize = 32;

/// A running gateway instance.
///
/// Dropping the gateway aborts its tasks; live connections die with them.
pub struct Gateway {
    registry: Arc<DeviceRegistry>,
    pending: Arc<PendingCommands>,
    local_addr: SocketAddr,
    ws_local_addr: Option<SocketAddr>,
    invoke_timeout: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl Gateway {
    /// Bind the configured transports and start serving.
    ///
    /// # Errors
    /// Returns an error when a listener cannot bind.
    pub async fn start(config: GatewayConfig, store: Arc<dyn GatewayStore>) -> Result<Self> {
        let registry = Arc::new(DeviceRegistry::new());
        let pending = Arc::new(PendingCommands::new());
        let governor = Arc::new(ResourceGovernor::new(
            config.max_conns_per_addr,
            config.rate_limit,
            config.rate_window,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            registry.clone(),
            pending.clone(),
            config.auth_token.clone(),
            config.grant_access,
            config.access_message.clone(),
        ));

        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "gateway listening");

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(accept_loop(
            listener,
            dispatcher.clone(),
            governor.clone(),
            config.idle_timeout,
        )));

        let ws_local_addr = match config.ws_bind_addr {
            Some(addr) => {
                let ws_listener = TcpListener::bind(addr).await?;
                let ws_addr = ws_listener.local_addr()?;
                info!(%ws_addr, "websocket transport listening");
                tasks.push(tokio::spawn(ws::accept_loop(
                    ws_listener,
                    dispatcher.clone(),
                    governor.clone(),
                    config.idle_timeout,
                )));
                Some(ws_addr)
            }
            None => None,
        };

        tasks.push(watchdog::spawn_watchdog(
            store,
            config.offline_threshold,
            config.watchdog_period,
        ));
        tasks.push(spawn_pending_sweeper(pending.clone(), config.pending_sweep));
        tasks.push(spawn_rate_gc(governor, config.rate_window));

        Ok(Self {
            registry,
            pending,
            local_addr,
            ws_local_addr,
            invoke_timeout: config.invoke_timeout,
            tasks,
        })
    }

    /// Bound address of the legacy TCP transport.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Bound address of the WebSocket transport, if enabled.
    #[must_use]
    pub fn ws_local_addr(&self) -> Option<SocketAddr> {
        self.ws_local_addr
    }

    /// Live session registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Handle for issuing server-initiated commands.
    #[must_use]
    pub fn bridge(&self) -> CommandBridge {
        CommandBridge::new(self.registry.clone(), self.pending.clone())
    }

    /// Configured default deadline for bridged commands.
    #[must_use]
    pub fn invoke_timeout(&self) -> Duration {
        self.invoke_timeout
    }

    /// Stop the accept loops and background tasks.
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn accept_loop(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    governor: Arc<ResourceGovernor>,
    idle_timeout: Duration,
) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };
        // Admission happens before any bytes are read.
        let permit = match governor.try_admit(addr) {
            Ok(permit) => permit,
            Err(_) => {
                drop(stream);
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%addr, error = %e, "set_nodelay failed");
        }
        let dispatcher = dispatcher.clone();
        let governor = governor.clone();
        tokio::spawn(run_connection(
            stream, addr, dispatcher, governor, idle_timeout, permit,
        ));
    }
}

async fn run_connection(
    stream: TcpStream,
    addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    governor: Arc<ResourceGovernor>,
    idle_timeout: Duration,
    permit: ConnectionPermit,
) {
    // Held for the connection's lifetime; drop releases the slot.
    let _permit = permit;
    debug!(%addr, "connection opened");

    let mut framed = Framed::new(stream, PushCodec::new());
    let (tx, mut commands) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE);
    let mut state = ConnState::new(addr, tx);

    let idle = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            frame = framed.next() => match frame {
                Some(Ok(event)) => {
                    idle.as_mut().reset(Instant::now() + idle_timeout);
                    let reply = if governor.check_rate(addr.ip()) {
                        dispatcher.dispatch(&mut state, event).await
                    } else {
                        Some(Outbound::rate_limited())
                    };
                    if let Some(reply) = reply
                        && framed.send(reply).await.is_err()
                    {
                        break;
                    }
                }
                Some(Err(e)) => {
                    // Oversized frames and I/O faults cannot be resynced.
                    warn!(%addr, error = %e, "closing connection");
                    break;
                }
                None => break,
            },
            command = commands.recv() => {
                // `state` holds a sender, so recv cannot return None here.
                let Some(command) = command else { break };
                if framed.send(command).await.is_err() {
                    break;
                }
            }
            () = &mut idle => {
                debug!(%addr, "idle timeout");
                break;
            }
        }
    }

    dispatcher.finish(&state);
    debug!(%addr, "connection closed");
}

fn spawn_pending_sweeper(pending: Arc<PendingCommands>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            pending.evict_expired(std::time::Instant::now());
        }
    })
}

fn spawn_rate_gc(governor: Arc<ResourceGovernor>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            governor.gc_rates();
        }
    })
}
