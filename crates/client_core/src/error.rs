use shared::error::ApiError;
use thiserror::Error;

/// Anything that went wrong between issuing a request and holding a decoded
/// response. Every variant is retryable from the delivery path's point of view.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server answered {status}: {}", .error.message)]
    Status { status: u16, error: ApiError },
    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),
    #[error("unexpected response shape: {0}")]
    Shape(String),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Rejected locally; nothing was sent and nothing is retried.
    #[error("message text must not be empty")]
    EmptyText,
    #[error("delivery failed after {attempts} attempts: {last_error}")]
    Exhausted {
        attempts: u32,
        last_error: TransportError,
    },
    /// The owning conversation was closed before the outcome was known.
    #[error("delivery cancelled because the conversation was closed")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum StartChatError {
    #[error("message text must not be empty")]
    EmptyText,
    #[error("cannot start a conversation with yourself")]
    SelfConversation,
    #[error("failed to create conversation: {0}")]
    Create(#[source] TransportError),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("email and password are required")]
    MissingCredentials,
    #[error("sign-in succeeded but no token was returned")]
    MissingToken,
    #[error("sign-in failed: {0}")]
    Transport(#[from] TransportError),
    #[error("local store failure: {0}")]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum CompareError {
    #[error("at most {limit} listings can be compared")]
    LimitReached { limit: usize },
    #[error("exactly {expected} listings must be selected, got {actual}")]
    WrongSelectionSize { expected: usize, actual: usize },
    #[error("local store failure: {0}")]
    Storage(#[from] anyhow::Error),
}
