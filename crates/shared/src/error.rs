use serde::{Deserialize, Serialize};

/// `status` field carried by every relay JSON envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiStatus {
    Success,
    Error,
    #[serde(other)]
    Unknown,
}

impl ApiStatus {
    pub fn is_success(self) -> bool {
        self == ApiStatus::Success
    }
}

/// Body of a non-2xx relay response.
///
/// The send endpoint reports rejections under `message`; request-shape
/// failures use `error`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiRejection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiRejection {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        self.message
            .as_deref()
            .or(self.error.as_deref())
            .filter(|reason| !reason.trim().is_empty())
    }
}
