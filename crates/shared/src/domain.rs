use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of an isolated messaging identity on the relay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Strips every character that is not an ASCII digit.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Canonical digits-only identity of a contact.
///
/// Every constructor (including deserialization) runs [`normalize_phone`],
/// so two keys compare equal iff their digit sequences match regardless of
/// how the number was formatted at the source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct PhoneKey(String);

impl PhoneKey {
    pub fn normalize(raw: &str) -> Self {
        Self(normalize_phone(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn digit_count(&self) -> usize {
        self.0.len()
    }

    /// Presentation form used for contacts created locally.
    pub fn display_phone(&self) -> String {
        format!("+{}", self.0)
    }
}

impl From<String> for PhoneKey {
    fn from(value: String) -> Self {
        Self::normalize(&value)
    }
}

impl From<&str> for PhoneKey {
    fn from(value: &str) -> Self {
        Self::normalize(value)
    }
}

impl From<PhoneKey> for String {
    fn from(value: PhoneKey) -> Self {
        value.0
    }
}

impl fmt::Display for PhoneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    pub direction: Direction,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

impl Message {
    pub fn inbound(text: impl Into<String>, timestamp: i64) -> Self {
        Self {
            text: text.into(),
            direction: Direction::Inbound,
            timestamp,
        }
    }

    pub fn outbound(text: impl Into<String>, timestamp: i64) -> Self {
        Self {
            text: text.into(),
            direction: Direction::Outbound,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub phone_key: PhoneKey,
    /// Presentation only; never compared.
    pub display_phone: String,
    pub name: String,
    #[serde(default)]
    pub last_message_preview: Option<String>,
    #[serde(default)]
    pub last_message_timestamp: Option<i64>,
    #[serde(default)]
    pub message_count: u32,
}

impl Contact {
    /// A contact first seen through an inbound message from an unknown sender.
    pub fn from_unknown_sender(phone_key: PhoneKey) -> Self {
        let display_phone = phone_key.display_phone();
        Self {
            name: display_phone.clone(),
            display_phone,
            phone_key,
            last_message_preview: None,
            last_message_timestamp: None,
            message_count: 0,
        }
    }

    pub fn new(name: impl Into<String>, phone_key: PhoneKey) -> Self {
        Self {
            display_phone: phone_key.display_phone(),
            name: name.into(),
            phone_key,
            last_message_preview: None,
            last_message_timestamp: None,
            message_count: 0,
        }
    }
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
