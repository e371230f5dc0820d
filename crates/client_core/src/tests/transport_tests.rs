use super::*;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use axum::{
    extract::{
        ws::{Message as AxumWsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use shared::protocol::{MessageKind, MessageRecord, NewMessageEvent};
use tokio::{net::TcpListener, time::timeout};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct RelayState {
    connections: Arc<AtomicUsize>,
    frames: mpsc::UnboundedSender<(usize, String)>,
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<RelayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

/// The first connection pushes one event and drops after the client's first
/// frame; later connections only record what the client sends.
async fn serve_socket(mut socket: WebSocket, state: RelayState) {
    let connection = state.connections.fetch_add(1, Ordering::SeqCst) + 1;
    if connection == 1 {
        let _ = socket
            .send(AxumWsMessage::Text("not a push frame".to_string()))
            .await;
        let _ = socket
            .send(AxumWsMessage::Text(
                r#"{"event":"new_message","data":{"account_id":"main","phone_number":"15551234567","message":{"text":"hello","type":"incoming","timestamp":5}}}"#
                    .to_string(),
            ))
            .await;
    }

    while let Some(Ok(message)) = socket.recv().await {
        if let AxumWsMessage::Text(text) = message {
            let _ = state.frames.send((connection, text));
            if connection == 1 {
                let _ = socket.send(AxumWsMessage::Close(None)).await;
                return;
            }
        }
    }
}

async fn spawn_ws_relay() -> (String, mpsc::UnboundedReceiver<(usize, String)>) {
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let state = RelayState {
        connections: Arc::new(AtomicUsize::new(0)),
        frames: frames_tx,
    };
    let router = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    (format!("ws://{addr}/ws"), frames_rx)
}

async fn wait_for_state(connection: &PushConnection, expected: ConnectionState) {
    let mut state = connection.subscribe_state();
    timeout(WAIT, state.wait_for(|current| *current == expected))
        .await
        .expect("state change in time")
        .expect("connection task alive");
}

#[tokio::test]
async fn forwards_decodable_push_events() {
    let (ws_url, _frames) = spawn_ws_relay().await;
    let (events_tx, mut events_rx) = mpsc::channel(8);

    let connection = spawn_push_connection(ws_url, events_tx, Duration::from_millis(50));

    let event = timeout(WAIT, events_rx.recv())
        .await
        .expect("event in time")
        .expect("event");
    assert_eq!(
        event,
        PushEvent::NewMessage(NewMessageEvent {
            account_id: "main".to_string(),
            phone_number: "15551234567".to_string(),
            message: MessageRecord {
                text: "hello".to_string(),
                kind: MessageKind::Incoming,
                timestamp: 5,
            },
        })
    );
    wait_for_state(&connection, ConnectionState::Connected).await;
    connection.shutdown();
}

#[tokio::test]
async fn rejoins_last_room_after_reconnect() {
    let (ws_url, mut frames) = spawn_ws_relay().await;
    let (events_tx, _events_rx) = mpsc::channel(8);

    let connection = spawn_push_connection(ws_url, events_tx, Duration::from_millis(50));
    wait_for_state(&connection, ConnectionState::Connected).await;
    connection.join_room("+15551234567");

    let (first_connection, first) = timeout(WAIT, frames.recv())
        .await
        .expect("frame in time")
        .expect("frame");
    let (second_connection, second) = timeout(WAIT, frames.recv())
        .await
        .expect("rejoin in time")
        .expect("frame");

    assert_eq!(first_connection, 1);
    assert_eq!(second_connection, 2);
    for frame in [first, second] {
        let frame: ClientFrame = serde_json::from_str(&frame).expect("client frame");
        assert_eq!(
            frame,
            ClientFrame::JoinRoom {
                phone_number: "+15551234567".to_string()
            }
        );
    }
    connection.shutdown();
}

#[tokio::test]
async fn unreachable_relay_stays_disconnected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let (events_tx, _events_rx) = mpsc::channel(8);

    let connection = spawn_push_connection(
        format!("ws://{addr}/ws"),
        events_tx,
        Duration::from_secs(60),
    );
    wait_for_state(&connection, ConnectionState::Disconnected).await;
    assert_ne!(connection.state(), ConnectionState::Connected);
}
