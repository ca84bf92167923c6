pub mod telegram;

use async_trait::async_trait;

/// Delivery channel for formatted cast notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one message. Failures are logged by the implementation and
    /// reported as `false`; this never errors to the caller.
    async fn deliver(&mut self, text: &str) -> bool;
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("refusing to send an empty message")]
    Empty,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    MalformedAck(String),
    #[error("message rejected: {0}")]
    Rejected(String),
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::Transport(_))
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(e: reqwest::Error) -> Self {
        // Bot API URLs embed the token
        let e = e.without_url();
        if e.is_decode() {
            DeliveryError::MalformedAck(e.to_string())
        } else {
            DeliveryError::Transport(e.to_string())
        }
    }
}
