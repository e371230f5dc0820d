//! In-memory conversation view for the active account, kept in step with the
//! relay and mirrored into the local cache on every mutation.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
    time::Duration,
};

use shared::domain::{now_ms, AccountId, Contact, Message, PhoneKey};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    cache::ConversationCache,
    error::ClientError,
    history::ConversationHistory,
    remote::RemoteDirectory,
};

/// A server outbound entry within this distance of a local optimistic entry
/// with the same text is treated as its echo.
pub const ECHO_MATCH_WINDOW: Duration = Duration::from_secs(60);

pub const MIN_PHONE_DIGITS: usize = 10;
pub const MAX_PHONE_DIGITS: usize = 19;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    Reconciled { contacts: Vec<Contact> },
    /// The relay was unreachable or answered badly; the cached view stands.
    CacheOnly {
        contacts: Vec<Contact>,
        error: ClientError,
    },
    /// The active account changed while the fetch was in flight.
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryOutcome {
    Server(Vec<Message>),
    Cached {
        messages: Vec<Message>,
        error: ClientError,
    },
    Superseded,
}

impl HistoryOutcome {
    pub fn messages(&self) -> Option<&[Message]> {
        match self {
            HistoryOutcome::Server(messages) | HistoryOutcome::Cached { messages, .. } => {
                Some(messages.as_slice())
            }
            HistoryOutcome::Superseded => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingRecord {
    pub account_id: AccountId,
    pub phone_key: PhoneKey,
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedEvent {
    pub contact: Contact,
    pub created_contact: bool,
}

#[derive(Default)]
struct EngineState {
    account_id: Option<AccountId>,
    contacts: Vec<Contact>,
    histories: BTreeMap<PhoneKey, ConversationHistory>,
}

impl EngineState {
    fn require_account(&self) -> Result<AccountId, ClientError> {
        self.account_id
            .clone()
            .ok_or_else(|| ClientError::NotFound("no active account".into()))
    }

    fn position(&self, phone_key: &PhoneKey) -> Option<usize> {
        self.contacts
            .iter()
            .position(|contact| &contact.phone_key == phone_key)
    }
}

pub struct ReconciliationEngine {
    remote: Arc<dyn RemoteDirectory>,
    cache: ConversationCache,
    state: Mutex<EngineState>,
}

impl ReconciliationEngine {
    pub fn new(remote: Arc<dyn RemoteDirectory>, cache: ConversationCache) -> Self {
        Self {
            remote,
            cache,
            state: Mutex::new(EngineState::default()),
        }
    }

    pub async fn active_account(&self) -> Option<AccountId> {
        self.state.lock().await.account_id.clone()
    }

    pub async fn contacts(&self) -> Vec<Contact> {
        self.state.lock().await.contacts.clone()
    }

    pub async fn contact(&self, phone_key: &PhoneKey) -> Option<Contact> {
        let state = self.state.lock().await;
        state
            .position(phone_key)
            .map(|index| state.contacts[index].clone())
    }

    pub async fn has_contact(&self, phone_key: &PhoneKey) -> bool {
        self.state.lock().await.position(phone_key).is_some()
    }

    pub async fn history(&self, phone_key: &PhoneKey) -> Vec<Message> {
        self.state
            .lock()
            .await
            .histories
            .get(phone_key)
            .map(ConversationHistory::to_vec)
            .unwrap_or_default()
    }

    /// Replaces the working set with what the cache holds for `account_id`
    /// and makes it the active account.
    pub async fn load_cached_view(&self, account_id: &AccountId) -> Vec<Contact> {
        let mut state = self.state.lock().await;
        self.load_into(&mut state, account_id).await;
        state.contacts.clone()
    }

    async fn load_into(&self, state: &mut EngineState, account_id: &AccountId) {
        state.contacts = self.cache.load_contacts(account_id).await;
        state.histories = self.cache.load_histories(account_id).await;
        state.account_id = Some(account_id.clone());
        debug!(
            %account_id,
            contacts = state.contacts.len(),
            conversations = state.histories.len(),
            "engine: cached view loaded"
        );
    }

    /// Writes the current contact list back under the account it belongs to.
    pub async fn flush_contacts(&self) {
        let state = self.state.lock().await;
        if let Some(account_id) = &state.account_id {
            self.cache.store_contacts(account_id, &state.contacts).await;
        }
    }

    pub async fn bootstrap(&self, account_id: &AccountId) -> BootstrapOutcome {
        {
            let mut state = self.state.lock().await;
            if state.account_id.as_ref() != Some(account_id) {
                self.load_into(&mut state, account_id).await;
            }
        }

        info!(%account_id, "engine: reconciling contacts with relay");
        let fetched = self.remote.fetch_contacts(account_id).await;

        let mut state = self.state.lock().await;
        if state.account_id.as_ref() != Some(account_id) {
            info!(%account_id, "engine: discarding contacts for inactive account");
            return BootstrapOutcome::Superseded;
        }

        match fetched {
            Ok(remote) => {
                let merged = merge_contacts(remote, &state.contacts);
                state.contacts = merged;
                self.cache.store_contacts(account_id, &state.contacts).await;
                info!(%account_id, contacts = state.contacts.len(), "engine: contacts reconciled");
                BootstrapOutcome::Reconciled {
                    contacts: state.contacts.clone(),
                }
            }
            Err(error) => {
                warn!(%account_id, "engine: contact fetch failed, keeping cached view: {error}");
                BootstrapOutcome::CacheOnly {
                    contacts: state.contacts.clone(),
                    error,
                }
            }
        }
    }

    pub async fn load_history(&self, account_id: &AccountId, phone_key: &PhoneKey) -> HistoryOutcome {
        let fetched = self.remote.fetch_messages(account_id, phone_key).await;

        let mut state = self.state.lock().await;
        if state.account_id.as_ref() != Some(account_id) {
            debug!(%account_id, %phone_key, "engine: discarding history for inactive account");
            return HistoryOutcome::Superseded;
        }

        match fetched {
            Ok(server) => {
                let local = state.histories.remove(phone_key).unwrap_or_default();
                let history = replace_with_server(&local, server);
                let messages = history.to_vec();
                state.histories.insert(phone_key.clone(), history);
                self.cache.store_histories(account_id, &state.histories).await;
                HistoryOutcome::Server(messages)
            }
            Err(error) => {
                warn!(%account_id, %phone_key, "engine: history fetch failed, using cache: {error}");
                let messages = state
                    .histories
                    .get(phone_key)
                    .map(ConversationHistory::to_vec)
                    .unwrap_or_default();
                HistoryOutcome::Cached { messages, error }
            }
        }
    }

    pub async fn apply_incoming_event(
        &self,
        account_id: &AccountId,
        phone_key: &PhoneKey,
        message: Message,
    ) -> Result<AppliedEvent, ClientError> {
        if phone_key.is_empty() {
            return Err(ClientError::Validation("event carries no phone number".into()));
        }

        let mut state = self.state.lock().await;
        if state.account_id.as_ref() != Some(account_id) {
            return Err(ClientError::NotFound(format!(
                "account {account_id} is not active"
            )));
        }

        let created_contact = state.position(phone_key).is_none();
        let contact = touch_contact(&mut state.contacts, phone_key, &message);
        state
            .histories
            .entry(phone_key.clone())
            .or_default()
            .append(message);
        self.persist(&state, account_id).await;

        Ok(AppliedEvent {
            contact,
            created_contact,
        })
    }

    /// Optimistically appends an outbound message. The entry is never
    /// retracted, whatever the relay later says about the send.
    pub async fn record_outgoing_message(
        &self,
        phone_key: &PhoneKey,
        text: &str,
    ) -> Result<OutgoingRecord, ClientError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ClientError::Validation("message text is empty".into()));
        }

        let mut state = self.state.lock().await;
        let account_id = state.require_account()?;
        if state.position(phone_key).is_none() {
            return Err(ClientError::NotFound(format!("unknown contact {phone_key}")));
        }

        let message = Message::outbound(text, now_ms());
        touch_contact(&mut state.contacts, phone_key, &message);
        state
            .histories
            .entry(phone_key.clone())
            .or_default()
            .append(message.clone());
        self.persist(&state, &account_id).await;

        Ok(OutgoingRecord {
            account_id,
            phone_key: phone_key.clone(),
            message,
        })
    }

    pub async fn clear_history(&self, phone_key: &PhoneKey) -> Result<(), ClientError> {
        let mut state = self.state.lock().await;
        let account_id = state.require_account()?;
        let Some(index) = state.position(phone_key) else {
            return Err(ClientError::NotFound(format!("unknown contact {phone_key}")));
        };

        let contact = &mut state.contacts[index];
        contact.message_count = 0;
        contact.last_message_preview = None;
        contact.last_message_timestamp = None;
        state.histories.entry(phone_key.clone()).or_default().clear();
        self.persist(&state, &account_id).await;
        info!(%account_id, %phone_key, "engine: history cleared");
        Ok(())
    }

    pub async fn add_contact(&self, name: &str, phone: &str) -> Result<Contact, ClientError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ClientError::Validation("contact name is required".into()));
        }
        let phone_key = PhoneKey::normalize(phone);
        if !(MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&phone_key.digit_count()) {
            return Err(ClientError::Validation(format!(
                "phone number must have {MIN_PHONE_DIGITS} to {MAX_PHONE_DIGITS} digits"
            )));
        }

        let mut state = self.state.lock().await;
        let account_id = state.require_account()?;
        if state.position(&phone_key).is_some() {
            return Err(ClientError::Validation(format!(
                "contact {} already exists",
                phone_key.display_phone()
            )));
        }

        let contact = Contact::new(name, phone_key);
        state.contacts.insert(0, contact.clone());
        self.cache.store_contacts(&account_id, &state.contacts).await;
        Ok(contact)
    }

    async fn persist(&self, state: &EngineState, account_id: &AccountId) {
        self.cache.store_histories(account_id, &state.histories).await;
        self.cache.store_contacts(account_id, &state.contacts).await;
    }
}

/// Relay contacts first, in relay order with duplicates collapsed, followed by
/// every local contact the relay does not know about.
pub fn merge_contacts(remote: Vec<Contact>, local: &[Contact]) -> Vec<Contact> {
    let mut seen = HashSet::new();
    let mut merged: Vec<Contact> = remote
        .into_iter()
        .filter(|contact| !contact.phone_key.is_empty())
        .filter(|contact| seen.insert(contact.phone_key.clone()))
        .collect();
    merged.extend(
        local
            .iter()
            .filter(|contact| seen.insert(contact.phone_key.clone()))
            .cloned(),
    );
    merged
}

/// The relay's list wins. Local entries newer than anything the relay returned
/// are kept at the tail unless the relay already carries them.
pub fn replace_with_server(local: &ConversationHistory, server: Vec<Message>) -> ConversationHistory {
    let newest_server = server.iter().map(|message| message.timestamp).max();
    let pending: Vec<Message> = local
        .iter()
        .filter(|message| newest_server.map_or(true, |newest| message.timestamp > newest))
        .filter(|message| !server.iter().any(|candidate| is_echo(candidate, message)))
        .cloned()
        .collect();

    ConversationHistory::from_messages(server.into_iter().chain(pending))
}

fn is_echo(server: &Message, local: &Message) -> bool {
    server.direction == local.direction
        && server.text == local.text
        && server.timestamp.abs_diff(local.timestamp) <= ECHO_MATCH_WINDOW.as_millis() as u64
}

/// The one place a contact's summary follows a newly appended message.
/// Unknown keys become a new contact at the top of the list.
fn touch_contact(contacts: &mut Vec<Contact>, phone_key: &PhoneKey, message: &Message) -> Contact {
    let index = match contacts
        .iter()
        .position(|contact| &contact.phone_key == phone_key)
    {
        Some(index) => index,
        None => {
            contacts.insert(0, Contact::from_unknown_sender(phone_key.clone()));
            0
        }
    };

    let contact = &mut contacts[index];
    contact.last_message_preview = Some(message.text.clone());
    contact.last_message_timestamp = Some(message.timestamp);
    contact.message_count = contact.message_count.saturating_add(1);
    contact.clone()
}

#[cfg(test)]
#[path = "tests/engine_tests.rs"]
mod tests;
