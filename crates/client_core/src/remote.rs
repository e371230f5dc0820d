use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Account, AccountId, Contact, Message, PhoneKey},
    error::{ApiRejection, ApiStatus},
    protocol::{
        AccountsResponse, ContactsResponse, MessagesResponse, SendMessageRequest,
        SendMessageResponse,
    },
};
use tracing::debug;
use url::Url;

use crate::error::{ClientError, SendError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendAck {
    pub message_id: Option<String>,
}

/// Request/response access to the relay's authoritative directory.
///
/// Implementations keep no state and never retry; callers decide what a
/// failure means for them.
#[async_trait]
pub trait RemoteDirectory: Send + Sync {
    async fn fetch_accounts(&self) -> Result<Vec<Account>, ClientError>;
    async fn fetch_contacts(&self, account_id: &AccountId) -> Result<Vec<Contact>, ClientError>;
    async fn fetch_messages(
        &self,
        account_id: &AccountId,
        phone_key: &PhoneKey,
    ) -> Result<Vec<Message>, ClientError>;
    /// True iff the relay answered its status probe with a success code.
    async fn fetch_liveness(&self) -> bool;
    async fn send_message(
        &self,
        account_id: &AccountId,
        phone_key: &PhoneKey,
        text: &str,
    ) -> Result<SendAck, SendError>;
}

pub struct HttpRemoteDirectory {
    http: Client,
    server_url: Url,
}

impl HttpRemoteDirectory {
    pub fn new(server_url: &str) -> Result<Self, ClientError> {
        Self::with_client(Client::new(), server_url)
    }

    pub fn with_client(http: Client, server_url: &str) -> Result<Self, ClientError> {
        let mut server_url = Url::parse(server_url)
            .map_err(|err| ClientError::Validation(format!("invalid server url: {err}")))?;
        if server_url.cannot_be_a_base() {
            return Err(ClientError::Validation(format!(
                "server url '{server_url}' cannot carry paths"
            )));
        }
        if !server_url.path().ends_with('/') {
            let path = format!("{}/", server_url.path());
            server_url.set_path(&path);
        }
        Ok(Self { http, server_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.server_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ClientError::Validation("server url cannot carry paths".into()))?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        account_id: Option<&AccountId>,
    ) -> Result<T, ClientError> {
        let mut request = self.http.get(url.clone());
        if let Some(account_id) = account_id {
            request = request.query(&[("account_id", account_id.as_str())]);
        }
        debug!(%url, "remote: GET");
        let response = request.send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}

fn ensure_success(status: ApiStatus, what: &str) -> Result<(), ClientError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(ClientError::Server(format!(
            "{what} request returned status {status:?}"
        )))
    }
}

async fn rejection_reason(response: Response) -> String {
    let status = response.status();
    match response.json::<ApiRejection>().await {
        Ok(body) => body
            .reason()
            .map(str::to_string)
            .unwrap_or_else(|| format!("relay rejected the message ({status})")),
        Err(_) => format!("relay rejected the message ({status})"),
    }
}

#[async_trait]
impl RemoteDirectory for HttpRemoteDirectory {
    async fn fetch_accounts(&self) -> Result<Vec<Account>, ClientError> {
        let url = self.endpoint(&["api", "accounts"])?;
        let body: AccountsResponse = self.get_json(url, None).await?;
        ensure_success(body.status, "accounts")?;
        Ok(body.accounts.into_iter().map(Account::from).collect())
    }

    async fn fetch_contacts(&self, account_id: &AccountId) -> Result<Vec<Contact>, ClientError> {
        let url = self.endpoint(&["api", "contacts"])?;
        let body: ContactsResponse = self.get_json(url, Some(account_id)).await?;
        ensure_success(body.status, "contacts")?;
        Ok(body
            .contacts
            .into_iter()
            .map(Contact::from)
            .filter(|contact| !contact.phone_key.is_empty())
            .collect())
    }

    async fn fetch_messages(
        &self,
        account_id: &AccountId,
        phone_key: &PhoneKey,
    ) -> Result<Vec<Message>, ClientError> {
        let url = self.endpoint(&["api", "messages", phone_key.as_str()])?;
        let body: MessagesResponse = self.get_json(url, Some(account_id)).await?;
        ensure_success(body.status, "messages")?;
        Ok(body.messages.into_iter().map(Message::from).collect())
    }

    async fn fetch_liveness(&self) -> bool {
        let Ok(url) = self.endpoint(&["api", "status"]) else {
            return false;
        };
        match self.http.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!("remote: liveness probe failed: {err}");
                false
            }
        }
    }

    async fn send_message(
        &self,
        account_id: &AccountId,
        phone_key: &PhoneKey,
        text: &str,
    ) -> Result<SendAck, SendError> {
        let url = self
            .endpoint(&["send"])
            .map_err(|err| SendError::Transport(err.to_string()))?;
        let response = self
            .http
            .post(url)
            .json(&SendMessageRequest {
                to: phone_key.display_phone(),
                message: text.to_string(),
                account_id: account_id.as_str().to_string(),
            })
            .send()
            .await
            .map_err(|err| SendError::Transport(err.to_string()))?;

        if !response.status().is_success() {
            return Err(SendError::Rejected {
                reason: rejection_reason(response).await,
            });
        }

        // The relay's success body is informational; a missing or odd body
        // still means the send was accepted.
        let body = response
            .json::<SendMessageResponse>()
            .await
            .unwrap_or_default();
        Ok(SendAck {
            message_id: body.message_id,
        })
    }
}

#[cfg(test)]
#[path = "tests/remote_tests.rs"]
mod tests;
