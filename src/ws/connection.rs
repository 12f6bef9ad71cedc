//! Live connection loop.
//!
//! Registers the user's live channel, sends the init frame, then forwards
//! pushes and keepalive pings until the client leaves, the channel is
//! replaced by a newer connection, or the process shuts down.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::time::{Instant, MissedTickBehavior};

use super::messages::LiveFrame;
use crate::service::Notifier;
use crate::shutdown::ShutdownSignal;

/// Why a connection loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    ClientGone,
    Replaced,
    Shutdown,
}

/// Runs the write/read loop for one live connection of `user_id`.
pub async fn run_connection(
    socket: WebSocket,
    user_id: i64,
    notifier: Arc<Notifier>,
    keepalive: Duration,
    mut shutdown: ShutdownSignal,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut live = notifier.channels().connect(user_id).await;
    let channel_id = live.channel_id();

    let unread_count = match notifier.unread_count(user_id).await {
        Ok(count) => count,
        Err(e) => {
            tracing::warn!(user = user_id, error = %e, "unread count unavailable");
            0
        }
    };
    let init = LiveFrame::Init {
        unread_count,
        connected_at: Utc::now(),
    };

    let exit = if send_frame(&mut ws_tx, &init).await {
        let period = keepalive.max(Duration::from_secs(1));
        let mut ping = tokio::time::interval_at(Instant::now() + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break Exit::Shutdown,
                push = live.recv() => {
                    let Some(push) = push else {
                        break Exit::Replaced;
                    };
                    if !send_frame(&mut ws_tx, &LiveFrame::from(push)).await {
                        break Exit::ClientGone;
                    }
                }
                _ = ping.tick() => {
                    if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                        break Exit::ClientGone;
                    }
                }
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Close(_)) | Err(_)) | None => break Exit::ClientGone,
                        _ => {}
                    }
                }
            }
        }
    } else {
        Exit::ClientGone
    };

    if exit != Exit::ClientGone {
        let _ = ws_tx.send(Message::Close(None)).await;
    }
    // A newer connection may already own the slot; only our own entry goes.
    notifier.channels().release(user_id, channel_id).await;
    tracing::debug!(user = user_id, channel = channel_id, ?exit, "live connection closed");
}

async fn send_frame(ws_tx: &mut SplitSink<WebSocket, Message>, frame: &LiveFrame) -> bool {
    let json = match frame.to_json() {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "live frame not serializable");
            return false;
        }
    };
    ws_tx.send(Message::text(json)).await.is_ok()
}
