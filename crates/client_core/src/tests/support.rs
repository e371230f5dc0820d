use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use shared::domain::{Account, AccountId, Contact, Message, PhoneKey};
use storage::MemoryCache;
use tokio::sync::Notify;

use crate::{
    cache::ConversationCache,
    error::{ClientError, SendError},
    remote::{RemoteDirectory, SendAck},
};

/// Holds a stubbed call open until the test releases it.
#[derive(Clone, Default)]
pub(crate) struct Gate {
    pub started: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl Gate {
    async fn pass(&self) {
        self.started.notify_one();
        self.release.notified().await;
    }
}

#[derive(Default)]
pub(crate) struct StubRemote {
    accounts: Mutex<Option<Result<Vec<Account>, ClientError>>>,
    contacts: Mutex<HashMap<AccountId, Result<Vec<Contact>, ClientError>>>,
    messages: Mutex<HashMap<PhoneKey, Result<Vec<Message>, ClientError>>>,
    send_result: Mutex<Option<Result<SendAck, SendError>>>,
    sent: Mutex<Vec<(AccountId, PhoneKey, String)>>,
    offline: AtomicBool,
    contact_gates: Mutex<HashMap<AccountId, Gate>>,
    message_gates: Mutex<HashMap<PhoneKey, Gate>>,
}

impl StubRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_accounts(&self, accounts: Result<Vec<Account>, ClientError>) {
        *self.accounts.lock().expect("accounts lock") = Some(accounts);
    }

    pub fn set_contacts(&self, account_id: &str, contacts: Result<Vec<Contact>, ClientError>) {
        self.contacts
            .lock()
            .expect("contacts lock")
            .insert(AccountId::from(account_id), contacts);
    }

    pub fn set_messages(&self, phone: &str, messages: Result<Vec<Message>, ClientError>) {
        self.messages
            .lock()
            .expect("messages lock")
            .insert(PhoneKey::normalize(phone), messages);
    }

    pub fn set_send_result(&self, result: Result<SendAck, SendError>) {
        *self.send_result.lock().expect("send lock") = Some(result);
    }

    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(AccountId, PhoneKey, String)> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub fn gate_contacts(&self, account_id: &str) -> Gate {
        let gate = Gate::default();
        self.contact_gates
            .lock()
            .expect("gate lock")
            .insert(AccountId::from(account_id), gate.clone());
        gate
    }

    pub fn gate_messages(&self, phone: &str) -> Gate {
        let gate = Gate::default();
        self.message_gates
            .lock()
            .expect("gate lock")
            .insert(PhoneKey::normalize(phone), gate.clone());
        gate
    }
}

#[async_trait]
impl RemoteDirectory for StubRemote {
    async fn fetch_accounts(&self) -> Result<Vec<Account>, ClientError> {
        self.accounts
            .lock()
            .expect("accounts lock")
            .clone()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn fetch_contacts(&self, account_id: &AccountId) -> Result<Vec<Contact>, ClientError> {
        let gate = self
            .contact_gates
            .lock()
            .expect("gate lock")
            .get(account_id)
            .cloned();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        self.contacts
            .lock()
            .expect("contacts lock")
            .get(account_id)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn fetch_messages(
        &self,
        _account_id: &AccountId,
        phone_key: &PhoneKey,
    ) -> Result<Vec<Message>, ClientError> {
        let gate = self
            .message_gates
            .lock()
            .expect("gate lock")
            .get(phone_key)
            .cloned();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        self.messages
            .lock()
            .expect("messages lock")
            .get(phone_key)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn fetch_liveness(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }

    async fn send_message(
        &self,
        account_id: &AccountId,
        phone_key: &PhoneKey,
        text: &str,
    ) -> Result<SendAck, SendError> {
        self.sent.lock().expect("sent lock").push((
            account_id.clone(),
            phone_key.clone(),
            text.to_string(),
        ));
        self.send_result
            .lock()
            .expect("send lock")
            .clone()
            .unwrap_or_else(|| Ok(SendAck::default()))
    }
}

pub(crate) fn memory_cache() -> (ConversationCache, Arc<MemoryCache>) {
    let store = Arc::new(MemoryCache::new());
    (ConversationCache::new(store.clone()), store)
}

pub(crate) fn contact(name: &str, phone: &str, message_count: u32) -> Contact {
    let mut contact = Contact::new(name, PhoneKey::normalize(phone));
    contact.message_count = message_count;
    contact
}

pub(crate) fn account(id: &str, name: &str) -> Account {
    Account {
        id: AccountId::from(id),
        display_name: name.to_string(),
    }
}
