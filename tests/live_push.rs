//! End-to-end tests of the live notification endpoint over a real socket.

#![allow(clippy::panic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use pricewatch::api;
use pricewatch::app_state::AppState;
use pricewatch::config::PipelineRole;
use pricewatch::domain::NotifyUser;
use pricewatch::persistence::{MemoryStore, Store};
use pricewatch::service::{ChannelRegistry, DeliveryStatus, Notifier, NotifierSettings};
use pricewatch::shutdown::{self, ShutdownTrigger};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Server {
    addr: SocketAddr,
    notifier: Arc<Notifier>,
    trigger: ShutdownTrigger,
}

async fn start() -> Server {
    start_with(Duration::from_secs(30)).await
}

async fn start_with(keepalive: Duration) -> Server {
    let memory = MemoryStore::new();
    memory.add_user(1).await;
    let store: Arc<dyn Store> = Arc::new(memory);
    let notifier = Arc::new(Notifier::new(
        Arc::clone(&store),
        ChannelRegistry::new(8),
        NotifierSettings::default(),
    ));
    let (trigger, signal) = shutdown::channel();
    let state = AppState {
        role: PipelineRole::Notifier,
        store,
        scheduler: None,
        matcher: None,
        notifier: Some(Arc::clone(&notifier)),
        keepalive,
        shutdown: signal,
    };

    let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
        panic!("bind failed");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("no local address");
    };
    tokio::spawn(async move {
        let _ = axum::serve(listener, api::app(state)).await;
    });

    Server {
        addr,
        notifier,
        trigger,
    }
}

async fn connect(addr: SocketAddr, user_id: i64) -> Client {
    let url = format!("ws://{addr}/api/v1/notifications/ws/{user_id}");
    let Ok((client, _)) = tokio_tungstenite::connect_async(url).await else {
        panic!("websocket handshake failed");
    };
    client
}

/// Next raw message, including control frames. `None` once the stream ends.
async fn next_message(client: &mut Client) -> Option<Result<Message, tungstenite::Error>> {
    let Ok(msg) = tokio::time::timeout(Duration::from_secs(5), client.next()).await else {
        panic!("timed out waiting for a frame");
    };
    msg
}

/// Next text frame as JSON, skipping control frames. `None` once closed.
async fn next_frame(client: &mut Client) -> Option<Value> {
    loop {
        match next_message(client).await {
            Some(Ok(Message::Text(text))) => {
                let Ok(value) = serde_json::from_str(text.as_str()) else {
                    panic!("frame is not JSON: {text}");
                };
                return Some(value);
            }
            Some(Ok(Message::Close(_)) | Err(_)) | None => return None,
            Some(Ok(_)) => {}
        }
    }
}

fn price_drop(user_id: i64) -> NotifyUser {
    NotifyUser {
        user_id,
        item_id: 10,
        item_name: "Desk lamp".to_string(),
        item_url: "https://shop.test/p/lamp".to_string(),
        variant_id: 11,
        previous_price: 100.0,
        new_price: 80.0,
        discount_percent: 20.0,
    }
}

#[tokio::test]
async fn init_frame_then_pushed_notification() {
    let server = start().await;
    let mut client = connect(server.addr, 1).await;

    let Some(init) = next_frame(&mut client).await else {
        panic!("connection closed before init");
    };
    assert_eq!(init["type"], "init");
    assert_eq!(init["unread_count"], 0);
    assert!(init["connected_at"].is_string());

    let status = server.notifier.handle_notify(price_drop(1)).await;
    assert_eq!(status, DeliveryStatus::Delivered);

    let Some(push) = next_frame(&mut client).await else {
        panic!("connection closed before push");
    };
    assert_eq!(push["type"], "notification");
    let Some(message) = push["message"].as_str() else {
        panic!("message is not a string");
    };
    assert!(message.contains("Desk lamp"));
    assert!(push["time"].is_string());

    let Ok(unread) = server.notifier.unread_count(1).await else {
        panic!("unread count failed");
    };
    assert_eq!(unread, 1);
}

#[tokio::test]
async fn unknown_user_is_rejected_before_upgrade() {
    let server = start().await;
    let url = format!("ws://{}/api/v1/notifications/ws/404", server.addr);
    match tokio_tungstenite::connect_async(url).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status().as_u16(), 404),
        Err(e) => panic!("unexpected handshake error: {e}"),
        Ok(_) => panic!("upgrade should have been refused"),
    }
}

#[tokio::test]
async fn newer_connection_replaces_older_one() {
    let server = start().await;
    let mut first = connect(server.addr, 1).await;
    let Some(_) = next_frame(&mut first).await else {
        panic!("first connection closed before init");
    };

    let mut second = connect(server.addr, 1).await;
    let Some(_) = next_frame(&mut second).await else {
        panic!("second connection closed before init");
    };
    assert!(next_frame(&mut first).await.is_none());

    server.notifier.handle_notify(price_drop(1)).await;
    let Some(push) = next_frame(&mut second).await else {
        panic!("second connection closed before push");
    };
    assert_eq!(push["type"], "notification");
}

#[tokio::test]
async fn idle_connection_receives_keepalive_ping() {
    let server = start_with(Duration::from_secs(1)).await;
    let mut client = connect(server.addr, 1).await;
    let Some(_) = next_frame(&mut client).await else {
        panic!("connection closed before init");
    };

    match next_message(&mut client).await {
        Some(Ok(Message::Ping(_))) => {}
        other => panic!("expected a ping, got {other:?}"),
    }
}

#[tokio::test]
async fn shutdown_closes_live_connection() {
    let server = start().await;
    let mut client = connect(server.addr, 1).await;
    let Some(_) = next_frame(&mut client).await else {
        panic!("connection closed before init");
    };

    server.trigger.trigger();
    match next_message(&mut client).await {
        Some(Ok(Message::Close(_))) => {}
        other => panic!("expected a close frame, got {other:?}"),
    }

    let mut released = false;
    for _ in 0..50 {
        if server.notifier.channels().is_empty().await {
            released = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(released, "live channel released after shutdown");
}
