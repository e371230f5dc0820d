use chrono::DateTime;
use serde::{de, Deserialize, Deserializer, Serialize};

use crate::{
    domain::{Account, AccountId, Contact, Direction, Message, PhoneKey},
    error::ApiStatus,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountsResponse {
    pub status: ApiStatus,
    #[serde(default)]
    pub accounts: Vec<AccountSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSummary {
    pub id: String,
    pub name: String,
}

impl From<AccountSummary> for Account {
    fn from(value: AccountSummary) -> Self {
        Account {
            id: AccountId(value.id),
            display_name: value.name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactsResponse {
    pub status: ApiStatus,
    #[serde(default)]
    pub contacts: Vec<ContactSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactSummary {
    pub phone_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_message_time: Option<i64>,
    #[serde(default)]
    pub message_count: u32,
}

impl From<ContactSummary> for Contact {
    fn from(value: ContactSummary) -> Self {
        let phone_key = PhoneKey::normalize(&value.phone_number);
        let display_phone = phone_key.display_phone();
        let name = value
            .display_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| display_phone.clone());
        Contact {
            phone_key,
            display_phone,
            name,
            last_message_preview: value.last_message,
            last_message_timestamp: value.last_message_time,
            message_count: value.message_count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub status: ApiStatus,
    #[serde(default)]
    pub messages: Vec<MessageRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[serde(alias = "received", alias = "inbound")]
    Incoming,
    #[serde(alias = "sent", alias = "outbound")]
    Outgoing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: i64,
}

impl From<MessageRecord> for Message {
    fn from(value: MessageRecord) -> Self {
        Message {
            text: value.text,
            direction: match value.kind {
                MessageKind::Incoming => Direction::Inbound,
                MessageKind::Outgoing => Direction::Outbound,
            },
            timestamp: value.timestamp,
        }
    }
}

impl From<&Message> for MessageRecord {
    fn from(value: &Message) -> Self {
        MessageRecord {
            text: value.text.clone(),
            kind: match value.direction {
                Direction::Inbound => MessageKind::Incoming,
                Direction::Outbound => MessageKind::Outgoing,
            },
            timestamp: value.timestamp,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    /// `+<digits>`
    pub to: String,
    pub message: String,
    pub account_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendMessageResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Events delivered by the relay's push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PushEvent {
    NewMessage(NewMessageEvent),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessageEvent {
    pub account_id: String,
    /// Digits-only on the wire, but normalized again by the router.
    pub phone_number: String,
    pub message: MessageRecord,
}

/// Frames the client writes to the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientFrame {
    JoinRoom { phone_number: String },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Int(i64),
    Float(f64),
    Text(String),
}

impl RawTimestamp {
    fn into_millis(self) -> Result<i64, String> {
        match self {
            RawTimestamp::Int(value) => Ok(value),
            RawTimestamp::Float(value) if value.is_finite() => Ok(value.round() as i64),
            RawTimestamp::Float(value) => Err(format!("non-finite timestamp {value}")),
            RawTimestamp::Text(text) => {
                let text = text.trim();
                if let Ok(value) = text.parse::<i64>() {
                    return Ok(value);
                }
                if let Ok(value) = text.parse::<f64>() {
                    if value.is_finite() {
                        return Ok(value.round() as i64);
                    }
                }
                DateTime::parse_from_rfc3339(text)
                    .map(|parsed| parsed.timestamp_millis())
                    .map_err(|err| format!("unrecognized timestamp '{text}': {err}"))
            }
        }
    }
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    RawTimestamp::deserialize(deserializer)?
        .into_millis()
        .map_err(de::Error::custom)
}

fn deserialize_optional_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<RawTimestamp>::deserialize(deserializer)?
        .map(RawTimestamp::into_millis)
        .transpose()
        .map_err(de::Error::custom)
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
