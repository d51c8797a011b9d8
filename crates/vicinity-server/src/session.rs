//! One WebSocket connection from upgrade to disconnect.
//!
//! The reader forwards text frames to the hub. The writer drains the
//! connection's outbound queue, sends pings and closes the socket when the
//! hub asks, the peer stops answering pings, or the server shuts down.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::connection::{ConnectionReceiver, ConnectionTable, Outgoing};
use crate::hub::{HubCommand, HubHandle};

/// Close code for server shutdown (RFC 6455 "going away").
const CLOSE_GOING_AWAY: u16 = 1001;

/// What a session needs from the server.
#[derive(Clone)]
pub struct SessionContext {
    pub hub: HubHandle,
    pub connections: Arc<ConnectionTable>,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub shutdown: CancellationToken,
}

/// Time of the last frame from the peer, in milliseconds since `started`.
struct Liveness {
    started: Instant,
    last_seen_ms: AtomicU64,
}

impl Liveness {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
        }
    }

    fn mark(&self) {
        let now = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_seen_ms.store(now, Ordering::Relaxed);
    }

    fn silent_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_seen_ms.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last)
    }
}

#[instrument(skip_all, fields(connection_id))]
pub async fn run_ws_session(ws: WebSocket, ctx: SessionContext) {
    let (connection_id, ConnectionReceiver { mut rx, closed }) = ctx.connections.register();
    tracing::Span::current().record("connection_id", tracing::field::display(&connection_id));
    info!("client connected");

    if !ctx
        .hub
        .send(HubCommand::Connected {
            connection_id: connection_id.clone(),
        })
        .await
    {
        ctx.connections.remove(&connection_id);
        return;
    }

    let (mut ws_tx, mut ws_rx) = ws.split();
    let liveness = Arc::new(Liveness::new());
    let done = CancellationToken::new();

    let writer = {
        let liveness = Arc::clone(&liveness);
        let done = done.clone();
        let shutdown = ctx.shutdown.clone();
        let ping_every = ctx.ping_interval.max(Duration::from_secs(1));
        let pong_timeout = ctx.pong_timeout;
        tokio::spawn(async move {
            // Whatever ends the writer also ends the reader.
            let _done = done.clone().drop_guard();
            let mut ping = tokio::time::interval(ping_every);
            ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let _ = ping.tick().await;

            loop {
                tokio::select! {
                    () = done.cancelled() => break,
                    () = closed.cancelled() => {
                        debug!("closed by server with a full queue");
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                    () = shutdown.cancelled() => {
                        let _ = ws_tx.send(close_frame(CLOSE_GOING_AWAY, "shutdown")).await;
                        break;
                    }
                    item = rx.recv() => match item {
                        Some(Outgoing::Text(text)) => {
                            if ws_tx.send(Message::Text(text.as_ref().into())).await.is_err() {
                                break;
                            }
                        }
                        Some(Outgoing::Close { code, reason }) => {
                            debug!(code, reason, "closing connection");
                            let _ = ws_tx.send(close_frame(code, reason)).await;
                            break;
                        }
                        None => break,
                    },
                    _ = ping.tick() => {
                        if liveness.silent_for() > pong_timeout {
                            warn!(timeout = ?pong_timeout, "client unresponsive, disconnecting");
                            break;
                        }
                        if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            let _ = ws_tx.close().await;
        })
    };

    loop {
        let message = tokio::select! {
            () = done.cancelled() => break,
            message = ws_rx.next() => message,
        };
        match message {
            Some(Ok(Message::Text(text))) => {
                liveness.mark();
                let command = HubCommand::Inbound {
                    connection_id: connection_id.clone(),
                    text: text.to_string(),
                };
                if !ctx.hub.send(command).await {
                    break;
                }
            }
            Some(Ok(Message::Binary(data))) => {
                liveness.mark();
                debug!(len = data.len(), "binary frame ignored");
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => liveness.mark(),
            Some(Ok(Message::Close(frame))) => {
                debug!(code = ?frame.as_ref().map(|f| f.code), "client sent close frame");
                break;
            }
            Some(Err(e)) => {
                debug!(error = %e, "socket error");
                break;
            }
            None => break,
        }
    }

    done.cancel();
    ctx.connections.remove(&connection_id);
    let _ = writer.await;
    let _ = ctx
        .hub
        .send(HubCommand::Disconnected {
            connection_id: connection_id.clone(),
        })
        .await;
    info!(
        duration_secs = liveness.started.elapsed().as_secs(),
        "client disconnected"
    );
}

fn close_frame(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: Utf8Bytes::from_static(reason),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn liveness_starts_fresh() {
        let liveness = Liveness::new();
        assert!(liveness.silent_for() < Duration::from_secs(1));
    }

    #[test]
    fn marking_resets_silence() {
        let liveness = Liveness::new();
        std::thread::sleep(Duration::from_millis(20));
        assert!(liveness.silent_for() >= Duration::from_millis(20));
        liveness.mark();
        assert!(liveness.silent_for() < Duration::from_millis(20));
    }

    #[test]
    fn close_frame_carries_code_and_reason() {
        match close_frame(4001, "auth_failed") {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, 4001);
                assert_eq!(frame.reason.as_str(), "auth_failed");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
