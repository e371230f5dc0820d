use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use shared::{
    domain::{Account, AccountId, Contact, Message, PhoneKey},
    protocol::PushEvent,
};
use storage::{CacheStore, Storage};
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod liveness;
pub mod remote;
pub mod router;
pub mod session;
pub mod transport;

use crate::{
    cache::ConversationCache,
    config::{prepare_database_url, push_url, Settings},
    engine::{BootstrapOutcome, HistoryOutcome, ReconciliationEngine},
    error::ClientError,
    liveness::{spawn_liveness_probe, LivenessProbe, RelayStatus},
    remote::{HttpRemoteDirectory, RemoteDirectory, SendAck},
    router::EventRouter,
    session::{SessionManager, SwitchOutcome},
    transport::{spawn_push_connection, ConnectionState, PushConnection},
};

/// Delay before re-reading a conversation after the relay accepted a send.
pub const SEND_REFRESH_DELAY: Duration = Duration::from_secs(1);
const PUSH_BUFFER: usize = 256;

/// Notifications for the view layer.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    AccountsLoaded(Vec<Account>),
    /// Carries the new account's cached contacts; a `ContactListChanged`
    /// follows once the relay has been consulted.
    AccountSwitched {
        account_id: AccountId,
        contacts: Vec<Contact>,
    },
    ContactListChanged {
        account_id: AccountId,
    },
    ConversationChanged {
        account_id: AccountId,
        phone_key: PhoneKey,
    },
    ConversationLoaded {
        account_id: AccountId,
        phone_key: PhoneKey,
        messages: Vec<Message>,
    },
    RelayStatusChanged(RelayStatus),
    PushConnectionChanged(ConnectionState),
    /// A background failure that was absorbed; the view still works.
    SoftError(String),
}

pub struct RelayClient {
    settings: Settings,
    remote: Arc<dyn RemoteDirectory>,
    engine: Arc<ReconciliationEngine>,
    session: Arc<SessionManager>,
    events: broadcast::Sender<ClientEvent>,
    push: Mutex<Option<PushConnection>>,
    liveness: Mutex<Option<LivenessProbe>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RelayClient {
    /// Opens the SQLite cache and an HTTP client for `settings.server_url`.
    pub async fn connect(settings: Settings) -> Result<Arc<Self>> {
        let database_url = prepare_database_url(&settings.database_url);
        let storage = Storage::new(&database_url)
            .await
            .with_context(|| format!("failed to open cache at {database_url}"))?;
        let remote = HttpRemoteDirectory::new(&settings.server_url)
            .with_context(|| format!("invalid server url {}", settings.server_url))?;
        Ok(Self::new(settings, Arc::new(remote), Arc::new(storage)).await)
    }

    pub async fn new(
        settings: Settings,
        remote: Arc<dyn RemoteDirectory>,
        store: Arc<dyn CacheStore>,
    ) -> Arc<Self> {
        let cache = ConversationCache::new(store);
        let engine = Arc::new(ReconciliationEngine::new(remote.clone(), cache.clone()));
        let session = Arc::new(
            SessionManager::restore(engine.clone(), cache, settings.default_account()).await,
        );
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            settings,
            remote,
            engine,
            session,
            events,
            push: Mutex::new(None),
            liveness: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub async fn active_account_id(&self) -> AccountId {
        self.session.active_account_id().await
    }

    pub async fn active_contact(&self) -> Option<PhoneKey> {
        self.session.active_contact().await
    }

    pub async fn accounts(&self) -> Vec<Account> {
        self.session.accounts().await
    }

    pub async fn contacts(&self) -> Vec<Contact> {
        self.engine.contacts().await
    }

    pub async fn history(&self, phone: &str) -> Vec<Message> {
        self.engine.history(&PhoneKey::normalize(phone)).await
    }

    /// Loads the account list, shows the cached view of the active account,
    /// then reconciles it with the relay.
    pub async fn start(&self) -> BootstrapOutcome {
        let _ = self.refresh_accounts().await;

        let account_id = self.session.active_account_id().await;
        info!(%account_id, "client: starting");
        self.engine.load_cached_view(&account_id).await;
        self.emit(ClientEvent::ContactListChanged {
            account_id: account_id.clone(),
        });

        let outcome = self.engine.bootstrap(&account_id).await;
        self.announce_bootstrap(&account_id, &outcome);
        outcome
    }

    pub async fn refresh_accounts(&self) -> Result<Vec<Account>, ClientError> {
        match self.remote.fetch_accounts().await {
            Ok(accounts) => {
                self.session.set_accounts(accounts.clone()).await;
                self.emit(ClientEvent::AccountsLoaded(accounts.clone()));
                Ok(accounts)
            }
            Err(err) => {
                warn!("client: account list unavailable: {err}");
                self.emit(ClientEvent::SoftError(format!(
                    "could not load accounts: {}",
                    err.reason()
                )));
                Err(err)
            }
        }
    }

    /// Makes `phone` the active conversation and loads its history.
    ///
    /// Returns `None` when another contact or account became active before
    /// the history arrived; such a response is never shown.
    pub async fn select_contact(&self, phone: &str) -> Result<Option<Vec<Message>>, ClientError> {
        let phone_key = PhoneKey::normalize(phone);
        let account_id = self.session.select_contact(&phone_key).await?;
        if let Some(contact) = self.engine.contact(&phone_key).await {
            if let Some(push) = self.push.lock().await.as_ref() {
                push.join_room(contact.display_phone);
            }
        }

        let outcome = self.engine.load_history(&account_id, &phone_key).await;
        if let HistoryOutcome::Cached { error, .. } = &outcome {
            self.emit(ClientEvent::SoftError(format!(
                "showing cached history: {}",
                error.reason()
            )));
        }
        let Some(messages) = outcome.messages() else {
            return Ok(None);
        };
        if !self.session.is_active_contact(&account_id, &phone_key).await {
            debug!(%account_id, %phone_key, "client: discarding stale history");
            return Ok(None);
        }

        let messages = messages.to_vec();
        self.emit(ClientEvent::ConversationLoaded {
            account_id,
            phone_key,
            messages: messages.clone(),
        });
        Ok(Some(messages))
    }

    /// Records `text` in the active conversation, then hands it to the relay.
    /// A failed send keeps the local entry and returns the relay's reason.
    pub async fn send_message(self: &Arc<Self>, text: &str) -> Result<SendAck, ClientError> {
        let phone_key = self
            .session
            .active_contact()
            .await
            .ok_or_else(|| ClientError::Validation("select a contact first".into()))?;
        let record = self.engine.record_outgoing_message(&phone_key, text).await?;
        self.emit(ClientEvent::ConversationChanged {
            account_id: record.account_id.clone(),
            phone_key: phone_key.clone(),
        });

        let sent = self
            .remote
            .send_message(&record.account_id, &record.phone_key, &record.message.text)
            .await;
        match sent {
            Ok(ack) => {
                info!(account_id = %record.account_id, %phone_key, "client: message sent");
                self.schedule_history_refresh(record.account_id, phone_key)
                    .await;
                Ok(ack)
            }
            Err(err) => {
                warn!(account_id = %record.account_id, %phone_key, "client: send failed: {err}");
                Err(err.into())
            }
        }
    }

    async fn schedule_history_refresh(self: &Arc<Self>, account_id: AccountId, phone_key: PhoneKey) {
        let client = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(SEND_REFRESH_DELAY).await;
            if !client.session.is_active_contact(&account_id, &phone_key).await {
                return;
            }
            let outcome = client.engine.load_history(&account_id, &phone_key).await;
            let HistoryOutcome::Server(messages) = outcome else {
                return;
            };
            if client.session.is_active_contact(&account_id, &phone_key).await {
                client.emit(ClientEvent::ConversationLoaded {
                    account_id,
                    phone_key,
                    messages,
                });
            }
        });
        self.track(task).await;
    }

    pub async fn add_contact(&self, name: &str, phone: &str) -> Result<Contact, ClientError> {
        let contact = self.engine.add_contact(name, phone).await?;
        self.emit(ClientEvent::ContactListChanged {
            account_id: self.session.active_account_id().await,
        });
        Ok(contact)
    }

    pub async fn clear_history(&self, phone: &str) -> Result<(), ClientError> {
        let phone_key = PhoneKey::normalize(phone);
        self.engine.clear_history(&phone_key).await?;
        let account_id = self.session.active_account_id().await;
        if self.session.is_active_contact(&account_id, &phone_key).await {
            self.emit(ClientEvent::ConversationChanged {
                account_id,
                phone_key,
            });
        } else {
            self.emit(ClientEvent::ContactListChanged { account_id });
        }
        Ok(())
    }

    /// Returns `false` when `account_id` was already active.
    pub async fn switch_account(self: &Arc<Self>, account_id: &str) -> Result<bool, ClientError> {
        let account_id = AccountId::from(account_id);
        let SwitchOutcome::Switched {
            provisional,
            reconcile,
            ..
        } = self.session.switch_account(&account_id).await?
        else {
            return Ok(false);
        };

        self.emit(ClientEvent::AccountSwitched {
            account_id: account_id.clone(),
            contacts: provisional,
        });

        let client = Arc::clone(self);
        let task = tokio::spawn(async move {
            match reconcile.await {
                Ok(outcome) => client.announce_bootstrap(&account_id, &outcome),
                Err(err) => warn!(%account_id, "client: reconciliation task failed: {err}"),
            }
        });
        self.track(task).await;
        Ok(true)
    }

    /// Routes events from any push source into the engine.
    pub async fn attach_push_events(&self, inbound: mpsc::Receiver<PushEvent>) {
        let router = EventRouter::new(
            self.session.clone(),
            self.engine.clone(),
            self.events.clone(),
        );
        self.track(router.spawn(inbound)).await;
    }

    pub async fn start_push_connection(&self) -> Result<(), ClientError> {
        let ws_url = push_url(&self.settings.server_url)?;
        let (inbound_tx, inbound_rx) = mpsc::channel(PUSH_BUFFER);
        self.attach_push_events(inbound_rx).await;

        let connection =
            spawn_push_connection(ws_url, inbound_tx, self.settings.reconnect_delay());
        let mut state = connection.subscribe_state();
        let events = self.events.clone();
        self.track(tokio::spawn(async move {
            while state.changed().await.is_ok() {
                let current = *state.borrow_and_update();
                let _ = events.send(ClientEvent::PushConnectionChanged(current));
            }
        }))
        .await;

        if let Some(previous) = self.push.lock().await.replace(connection) {
            previous.shutdown();
        }
        Ok(())
    }

    pub async fn start_liveness_probe(&self) {
        let probe = spawn_liveness_probe(
            self.remote.clone(),
            self.settings.liveness_interval(),
            self.events.clone(),
        );
        if let Some(previous) = self.liveness.lock().await.replace(probe) {
            previous.shutdown();
        }
    }

    pub async fn relay_status(&self) -> Option<RelayStatus> {
        self.liveness.lock().await.as_ref().map(LivenessProbe::status)
    }

    pub async fn push_state(&self) -> Option<ConnectionState> {
        self.push.lock().await.as_ref().map(PushConnection::state)
    }

    pub async fn shutdown(&self) {
        if let Some(push) = self.push.lock().await.take() {
            push.shutdown();
        }
        if let Some(probe) = self.liveness.lock().await.take() {
            probe.shutdown();
        }
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        self.engine.flush_contacts().await;
        info!("client: shut down");
    }

    fn announce_bootstrap(&self, account_id: &AccountId, outcome: &BootstrapOutcome) {
        match outcome {
            BootstrapOutcome::Reconciled { .. } => {
                self.emit(ClientEvent::ContactListChanged {
                    account_id: account_id.clone(),
                });
            }
            BootstrapOutcome::CacheOnly { error, .. } => {
                self.emit(ClientEvent::ContactListChanged {
                    account_id: account_id.clone(),
                });
                self.emit(ClientEvent::SoftError(format!(
                    "relay unavailable, showing cached contacts: {}",
                    error.reason()
                )));
            }
            BootstrapOutcome::Superseded => {}
        }
    }

    async fn track(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().await;
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
