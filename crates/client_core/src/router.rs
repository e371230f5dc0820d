use std::sync::Arc;

use shared::{
    domain::{AccountId, Message, PhoneKey},
    protocol::{NewMessageEvent, PushEvent},
};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
    engine::ReconciliationEngine, error::ClientError, session::SessionManager, ClientEvent,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    DroppedInactiveAccount,
    DroppedInvalid,
    /// The selected conversation changed and needs to be redrawn.
    Redraw(PhoneKey),
    ContactListRefresh(PhoneKey),
}

/// Applies push events to the engine, one at a time, in delivery order.
pub struct EventRouter {
    session: Arc<SessionManager>,
    engine: Arc<ReconciliationEngine>,
    events: broadcast::Sender<ClientEvent>,
}

impl EventRouter {
    pub fn new(
        session: Arc<SessionManager>,
        engine: Arc<ReconciliationEngine>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            session,
            engine,
            events,
        }
    }

    pub fn spawn(self, mut inbound: mpsc::Receiver<PushEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                self.route(event).await;
            }
            debug!("router: push channel closed");
        })
    }

    pub async fn route(&self, event: PushEvent) -> RouteOutcome {
        match event {
            PushEvent::NewMessage(event) => self.route_new_message(event).await,
        }
    }

    async fn route_new_message(&self, event: NewMessageEvent) -> RouteOutcome {
        let account_id = AccountId::new(event.account_id);
        if account_id != self.session.active_account_id().await {
            debug!(%account_id, "router: dropping event for inactive account");
            return RouteOutcome::DroppedInactiveAccount;
        }

        let phone_key = PhoneKey::normalize(&event.phone_number);
        if phone_key.is_empty() {
            warn!(%account_id, raw = %event.phone_number, "router: dropping event without phone number");
            return RouteOutcome::DroppedInvalid;
        }

        let message = Message::from(event.message);
        match self
            .engine
            .apply_incoming_event(&account_id, &phone_key, message)
            .await
        {
            Ok(applied) => {
                debug!(
                    %account_id,
                    %phone_key,
                    created = applied.created_contact,
                    count = applied.contact.message_count,
                    "router: event applied"
                );
            }
            // The account was switched between the check above and the apply.
            Err(ClientError::NotFound(_)) => return RouteOutcome::DroppedInactiveAccount,
            Err(err) => {
                warn!(%account_id, %phone_key, "router: event rejected: {err}");
                return RouteOutcome::DroppedInvalid;
            }
        }

        if self.session.is_active_contact(&account_id, &phone_key).await {
            let _ = self.events.send(ClientEvent::ConversationChanged {
                account_id,
                phone_key: phone_key.clone(),
            });
            RouteOutcome::Redraw(phone_key)
        } else {
            let _ = self
                .events
                .send(ClientEvent::ContactListChanged { account_id });
            RouteOutcome::ContactListRefresh(phone_key)
        }
    }
}

#[cfg(test)]
#[path = "tests/router_tests.rs"]
mod tests;
