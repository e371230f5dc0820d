//! Long-lived push channel to the relay.
//!
//! One task owns the socket. It reconnects after a fixed delay whenever the
//! connection drops and forwards every decodable frame, in arrival order, to
//! the router's channel.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use shared::protocol::{ClientFrame, PushEvent};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

const OUTBOUND_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

pub struct PushConnection {
    state: watch::Receiver<ConnectionState>,
    outbound: mpsc::Sender<ClientFrame>,
    task: JoinHandle<()>,
}

impl PushConnection {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Best effort: dropped when the outbound buffer is full or the task is gone.
    pub fn join_room(&self, phone_number: impl Into<String>) {
        let frame = ClientFrame::JoinRoom {
            phone_number: phone_number.into(),
        };
        if let Err(err) = self.outbound.try_send(frame) {
            debug!("push: join_room not queued: {err}");
        }
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for PushConnection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

enum SessionEnd {
    Lost,
    Closed,
}

pub fn spawn_push_connection(
    ws_url: String,
    events: mpsc::Sender<PushEvent>,
    reconnect_delay: Duration,
) -> PushConnection {
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
    let (outbound_tx, mut outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);

    let task = tokio::spawn(async move {
        let mut last_join: Option<ClientFrame> = None;
        loop {
            state_tx.send_replace(ConnectionState::Connecting);
            match connect_async(ws_url.as_str()).await {
                Ok((stream, _)) => {
                    info!(url = %ws_url, "push: connected");
                    state_tx.send_replace(ConnectionState::Connected);
                    let end = run_session(stream, &events, &mut outbound_rx, &mut last_join).await;
                    state_tx.send_replace(ConnectionState::Disconnected);
                    if let SessionEnd::Closed = end {
                        info!("push: consumers gone, stopping");
                        return;
                    }
                    warn!(url = %ws_url, "push: connection lost");
                }
                Err(err) => {
                    state_tx.send_replace(ConnectionState::Disconnected);
                    warn!(url = %ws_url, "push: connect failed: {err}");
                }
            }
            tokio::time::sleep(reconnect_delay).await;
        }
    });

    PushConnection {
        state: state_rx,
        outbound: outbound_tx,
        task,
    }
}

async fn run_session<S>(
    stream: tokio_tungstenite::WebSocketStream<S>,
    events: &mpsc::Sender<PushEvent>,
    outbound: &mut mpsc::Receiver<ClientFrame>,
    last_join: &mut Option<ClientFrame>,
) -> SessionEnd
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut writer, mut reader) = stream.split();

    if let Some(frame) = last_join.as_ref() {
        if let Err(err) = send_frame(&mut writer, frame).await {
            warn!("push: failed to rejoin room: {err}");
            return SessionEnd::Lost;
        }
    }

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    return SessionEnd::Closed;
                };
                *last_join = Some(frame.clone());
                if let Err(err) = send_frame(&mut writer, &frame).await {
                    warn!("push: send failed: {err}");
                    return SessionEnd::Lost;
                }
            }
            incoming = reader.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<PushEvent>(&text) {
                    Ok(event) => {
                        if events.send(event).await.is_err() {
                            return SessionEnd::Closed;
                        }
                    }
                    Err(err) => debug!("push: skipping undecodable frame: {err}"),
                },
                Some(Ok(WsMessage::Close(_))) | None => return SessionEnd::Lost,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!("push: read failed: {err}");
                    return SessionEnd::Lost;
                }
            },
        }
    }
}

async fn send_frame<W>(writer: &mut W, frame: &ClientFrame) -> Result<(), String>
where
    W: futures::Sink<WsMessage> + Unpin,
    W::Error: std::fmt::Display,
{
    let payload = serde_json::to_string(frame).map_err(|err| err.to_string())?;
    writer
        .send(WsMessage::Text(payload))
        .await
        .map_err(|err| err.to_string())
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
