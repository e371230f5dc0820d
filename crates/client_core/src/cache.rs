//! Typed view over the account-scoped [`CacheStore`].
//!
//! Reads never fail: a missing entry, a storage error, or a payload that no
//! longer parses all come back as an empty collection. Writes log and move on.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use serde::{de::DeserializeOwned, Serialize};
use shared::domain::{AccountId, Contact, Message, PhoneKey};
use storage::{CacheKind, CacheStore};
use tracing::warn;

use crate::history::ConversationHistory;

#[derive(Clone)]
pub struct ConversationCache {
    store: Arc<dyn CacheStore>,
}

impl ConversationCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub async fn load_contacts(&self, account_id: &AccountId) -> Vec<Contact> {
        let contacts: Vec<Contact> = self
            .read(account_id, CacheKind::Contacts)
            .await
            .unwrap_or_default();

        let mut seen = HashSet::new();
        contacts
            .into_iter()
            .filter(|contact| !contact.phone_key.is_empty())
            .filter(|contact| seen.insert(contact.phone_key.clone()))
            .collect()
    }

    pub async fn store_contacts(&self, account_id: &AccountId, contacts: &[Contact]) {
        self.write(account_id, CacheKind::Contacts, &contacts).await;
    }

    pub async fn load_histories(
        &self,
        account_id: &AccountId,
    ) -> BTreeMap<PhoneKey, ConversationHistory> {
        let raw: BTreeMap<PhoneKey, Vec<Message>> = self
            .read(account_id, CacheKind::Messages)
            .await
            .unwrap_or_default();
        raw.into_iter()
            .filter(|(phone_key, _)| !phone_key.is_empty())
            .map(|(phone_key, messages)| (phone_key, ConversationHistory::from_messages(messages)))
            .collect()
    }

    /// Cached history of one contact, capped, or empty.
    pub async fn load_history(&self, account_id: &AccountId, phone_key: &PhoneKey) -> Vec<Message> {
        self.load_histories(account_id)
            .await
            .remove(phone_key)
            .map(|history| history.to_vec())
            .unwrap_or_default()
    }

    pub async fn store_histories(
        &self,
        account_id: &AccountId,
        histories: &BTreeMap<PhoneKey, ConversationHistory>,
    ) {
        let raw: BTreeMap<&PhoneKey, Vec<&Message>> = histories
            .iter()
            .map(|(phone_key, history)| (phone_key, history.iter().collect()))
            .collect();
        self.write(account_id, CacheKind::Messages, &raw).await;
    }

    pub async fn last_active_account(&self) -> Option<AccountId> {
        match self.store.last_active_account().await {
            Ok(account_id) => account_id,
            Err(err) => {
                warn!("cache: failed to read last active account: {err:#}");
                None
            }
        }
    }

    pub async fn remember_active_account(&self, account_id: &AccountId) {
        if let Err(err) = self.store.set_last_active_account(account_id).await {
            warn!(%account_id, "cache: failed to persist last active account: {err:#}");
        }
    }

    async fn read<T: DeserializeOwned>(&self, account_id: &AccountId, kind: CacheKind) -> Option<T> {
        let raw = match self.store.get(account_id, kind).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(%account_id, %kind, "cache: read failed, treating as empty: {err:#}");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(%account_id, %kind, "cache: corrupt entry, treating as empty: {err}");
                None
            }
        }
    }

    async fn write<T: Serialize + ?Sized>(&self, account_id: &AccountId, kind: CacheKind, value: &T) {
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(%account_id, %kind, "cache: failed to serialize entry: {err}");
                return;
            }
        };
        if let Err(err) = self.store.set(account_id, kind, &payload).await {
            warn!(%account_id, %kind, "cache: write failed: {err:#}");
        }
    }
}

#[cfg(test)]
#[path = "tests/cache_tests.rs"]
mod tests;
