use thiserror::Error;

/// Errors surfaced by the chat client core.
/// Every variant carries enough text to be shown in a chat bubble or a log line.
#[derive(Debug, Error)]
pub enum ClientError {
    // ── Authentication ───────────────────────────────────────────────────────
    #[error("Authorization Failed: {detail}")]
    Unauthorized { detail: String },

    #[error("Authentication required. Please log in to start chatting.")]
    MissingCredential,

    // ── Transport ────────────────────────────────────────────────────────────
    #[error("Network error: {0}")]
    Transport(String),

    #[error("API Error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed response: {0}")]
    MalformedPayload(String),

    // ── Session store ────────────────────────────────────────────────────────
    #[error("Session '{id}' not found")]
    SessionNotFound { id: String },

    // ── Validation ───────────────────────────────────────────────────────────
    #[error("Message is empty and has no attachments")]
    EmptyMessage,

    #[error("Another message is still being sent")]
    SendInFlight,

    #[error("Attachment '{name}' could not be prepared: {message}")]
    Attachment { name: String, message: String },

    // ── Configuration ────────────────────────────────────────────────────────
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    pub fn session_not_found(id: impl Into<String>) -> Self {
        ClientError::SessionNotFound { id: id.into() }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ClientError::Unauthorized { .. } | ClientError::MissingCredential)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::SessionNotFound { .. })
    }

    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::Transport(_)
                | ClientError::Status { .. }
                | ClientError::MalformedPayload(_)
        )
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ClientError::MalformedPayload(e.to_string())
        } else {
            ClientError::Transport(e.to_string())
        }
    }
}
