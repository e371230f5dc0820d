use thiserror::Error;

/// Failure taxonomy shared by every client operation.
///
/// `Network` and `Server` raised by background reconciliation are absorbed
/// into cached/empty data; `Validation` and `NotFound` block the user action
/// that caused them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(String),
    #[error("server error: {0}")]
    Server(String),
    #[error("{0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl ClientError {
    /// Text suitable for a user-facing notification.
    pub fn reason(&self) -> &str {
        match self {
            ClientError::Network(reason)
            | ClientError::Server(reason)
            | ClientError::Validation(reason)
            | ClientError::NotFound(reason) => reason,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Server(format!("malformed payload: {err}"))
        } else if let Some(status) = err.status() {
            ClientError::Server(format!("unexpected status {status}"))
        } else {
            ClientError::Network(err.to_string())
        }
    }
}

/// Outcome of a rejected or failed send.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The relay answered and refused the message (e.g. invalid recipient).
    #[error("{reason}")]
    Rejected { reason: String },
    #[error("send failed: {0}")]
    Transport(String),
}

impl From<SendError> for ClientError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::Rejected { reason } => ClientError::Server(reason),
            SendError::Transport(reason) => ClientError::Network(reason),
        }
    }
}
