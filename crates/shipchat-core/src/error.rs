use thiserror::Error;

/// Errors surfaced by the messaging core.
///
/// Durable-store failures are not represented here: they are logged where
/// they happen and, for sends, reported through the message's delivery state.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("no local profile")]
    NoProfile,

    #[error("message text is empty")]
    EmptyMessage,

    #[error("no channel can be derived for peer {0:?}")]
    InvalidChannel(String),

    #[error("session storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session data error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value for {key}: {value:?}")]
    Config { key: String, value: String },
}
