//! WebSocket transport.
//!
//! Newer firmware dials a WebSocket endpoint instead of raw TCP; each text
//! message is one JSON document, so no frame accumulation is needed. The
//! dispatch path is identical to the legacy transport: same [`Dispatcher`],
//! same session registry, same governance.

use crate::dispatcher::{ConnState, Dispatcher};
use crate::governor::{ConnectionPermit, ResourceGovernor};
use facegate_core::constants::MAX_FRAME_BYTES;
use facegate_protocol::{Outbound, decode_text};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{debug, warn};

/// Queue depth for documents headed to one device connection.
const OUTBOUND_QUEUE: usize = 32;

pub(crate) async fn accept_loop(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    governor: Arc<ResourceGovernor>,
    idle_timeout: Duration,
) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "websocket accept failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };
        let permit = match governor.try_admit(addr) {
            Ok(permit) => permit,
            Err(_) => {
                drop(stream);
                continue;
            }
        };
        let dispatcher = dispatcher.clone();
        let governor = governor.clone();
        tokio::spawn(async move {
            // Same payload ceiling as the legacy transport; tungstenite
            // fails the read on breach and the connection closes below.
            let ws_config = WebSocketConfig::default()
                .max_message_size(Some(MAX_FRAME_BYTES))
                .max_frame_size(Some(MAX_FRAME_BYTES));
            let ws =
                match tokio_tungstenite::accept_async_with_config(stream, Some(ws_config)).await {
                    Ok(ws) => ws,
                    Err(e) => {
                        debug!(%addr, error = %e, "websocket handshake failed");
                        return;
                    }
                };
            run_connection(ws, addr, dispatcher, governor, idle_timeout, permit).await;
        });
    }
}

async fn run_connection(
    mut ws: WebSocketStream<TcpStream>,
    addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    governor: Arc<ResourceGovernor>,
    idle_timeout: Duration,
    permit: ConnectionPermit,
) {
    let _permit = permit;
    debug!(%addr, "websocket connection opened");

    let (tx, mut commands) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE);
    let mut state = ConnState::new(addr, tx);

    let idle = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            message = ws.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    idle.as_mut().reset(Instant::now() + idle_timeout);
                    let reply = if governor.check_rate(addr.ip()) {
                        dispatcher.dispatch(&mut state, decode_text(text.as_str())).await
                    } else {
                        Some(Outbound::rate_limited())
                    };
                    if let Some(reply) = reply
                        && ws.send(Message::Text(reply.to_wire().into())).await.is_err()
                    {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                // Pongs answer automatically inside tungstenite; binary
                // payloads are not part of this protocol.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(%addr, error = %e, "websocket error, closing");
                    break;
                }
            },
            command = commands.recv() => {
                let Some(command) = command else { break };
                if ws.send(Message::Text(command.to_wire().into())).await.is_err() {
                    break;
                }
            }
            () = &mut idle => {
                debug!(%addr, "websocket idle timeout");
                break;
            }
        }
    }

    dispatcher.finish(&state);
    debug!(%addr, "websocket connection closed");
}
