use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::info;

use crate::{remote::RemoteDirectory, ClientEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStatus {
    Unknown,
    Online,
    Offline,
}

pub struct LivenessProbe {
    status: watch::Receiver<RelayStatus>,
    task: JoinHandle<()>,
}

impl LivenessProbe {
    pub fn status(&self) -> RelayStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RelayStatus> {
        self.status.clone()
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for LivenessProbe {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Polls the relay's status endpoint every `interval`, starting immediately.
/// Only transitions are announced on `events`.
pub fn spawn_liveness_probe(
    remote: Arc<dyn RemoteDirectory>,
    interval: Duration,
    events: broadcast::Sender<ClientEvent>,
) -> LivenessProbe {
    let (status_tx, status_rx) = watch::channel(RelayStatus::Unknown);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let status = if remote.fetch_liveness().await {
                RelayStatus::Online
            } else {
                RelayStatus::Offline
            };
            let changed = status_tx.send_if_modified(|current| {
                if *current == status {
                    false
                } else {
                    *current = status;
                    true
                }
            });
            if changed {
                info!(?status, "liveness: relay status changed");
                let _ = events.send(ClientEvent::RelayStatusChanged(status));
            }
        }
    });

    LivenessProbe {
        status: status_rx,
        task,
    }
}

#[cfg(test)]
#[path = "tests/liveness_tests.rs"]
mod tests;
