use std::sync::Arc;

use shared::domain::{Account, AccountId, Contact, PhoneKey};
use tokio::{sync::RwLock, task::JoinHandle};
use tracing::info;

use crate::{
    cache::ConversationCache,
    engine::{BootstrapOutcome, ReconciliationEngine},
    error::ClientError,
};

#[derive(Debug)]
struct Session {
    active_account_id: AccountId,
    active_contact: Option<PhoneKey>,
}

pub enum SwitchOutcome {
    Unchanged,
    Switched {
        previous: AccountId,
        /// The new account's cached contacts, shown until reconciliation lands.
        provisional: Vec<Contact>,
        reconcile: JoinHandle<BootstrapOutcome>,
    },
}

/// Owns the active account and selected contact.
pub struct SessionManager {
    engine: Arc<ReconciliationEngine>,
    cache: ConversationCache,
    session: RwLock<Session>,
    accounts: RwLock<Vec<Account>>,
}

impl SessionManager {
    /// Resumes the last active account, or starts on `default_account`.
    pub async fn restore(
        engine: Arc<ReconciliationEngine>,
        cache: ConversationCache,
        default_account: AccountId,
    ) -> Self {
        let active_account_id = cache
            .last_active_account()
            .await
            .unwrap_or(default_account);
        cache.remember_active_account(&active_account_id).await;
        info!(account_id = %active_account_id, "session: restored");

        Self {
            engine,
            cache,
            session: RwLock::new(Session {
                active_account_id,
                active_contact: None,
            }),
            accounts: RwLock::new(Vec::new()),
        }
    }

    pub async fn active_account_id(&self) -> AccountId {
        self.session.read().await.active_account_id.clone()
    }

    pub async fn active_contact(&self) -> Option<PhoneKey> {
        self.session.read().await.active_contact.clone()
    }

    pub async fn is_active_contact(&self, account_id: &AccountId, phone_key: &PhoneKey) -> bool {
        let session = self.session.read().await;
        &session.active_account_id == account_id
            && session.active_contact.as_ref() == Some(phone_key)
    }

    pub async fn select_contact(&self, phone_key: &PhoneKey) -> Result<AccountId, ClientError> {
        let mut session = self.session.write().await;
        if !self.engine.has_contact(phone_key).await {
            return Err(ClientError::NotFound(format!("unknown contact {phone_key}")));
        }
        session.active_contact = Some(phone_key.clone());
        Ok(session.active_account_id.clone())
    }

    pub async fn set_accounts(&self, accounts: Vec<Account>) {
        *self.accounts.write().await = accounts;
    }

    pub async fn accounts(&self) -> Vec<Account> {
        self.accounts.read().await.clone()
    }

    pub async fn switch_account(&self, account_id: &AccountId) -> Result<SwitchOutcome, ClientError> {
        let mut session = self.session.write().await;
        if &session.active_account_id == account_id {
            return Ok(SwitchOutcome::Unchanged);
        }
        {
            let accounts = self.accounts.read().await;
            if !accounts.is_empty() && !accounts.iter().any(|account| &account.id == account_id) {
                return Err(ClientError::NotFound(format!("unknown account {account_id}")));
            }
        }

        let previous = session.active_account_id.clone();
        self.engine.flush_contacts().await;
        session.active_account_id = account_id.clone();
        self.cache.remember_active_account(account_id).await;
        session.active_contact = None;
        let provisional = self.engine.load_cached_view(account_id).await;
        drop(session);

        info!(from = %previous, to = %account_id, "session: switched account");
        let engine = Arc::clone(&self.engine);
        let target = account_id.clone();
        let reconcile = tokio::spawn(async move { engine.bootstrap(&target).await });

        Ok(SwitchOutcome::Switched {
            previous,
            provisional,
            reconcile,
        })
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
