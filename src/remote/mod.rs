pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ClientError;
use crate::models::{PendingAttachment, SourceReference};

pub use http::HttpBackend;

// ── Wire types ────────────────────────────────────────────────────────────────

/// Conversation ids arrive as JSON numbers from the backend, but some
/// deployments send them as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RemoteId {
    Number(u64),
    Text(String),
}

impl std::fmt::Display for RemoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteId::Number(n) => write!(f, "{n}"),
            RemoteId::Text(s) => f.write_str(s),
        }
    }
}

/// One conversation from `GET /api/history/`.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConversation {
    pub id: RemoteId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub created_at: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub query_logs: Vec<QueryLog>,
    /// Older backends send flat messages instead of query logs.
    #[serde(default, deserialize_with = "null_as_default")]
    pub messages: Vec<RemoteMessage>,
}

/// One logged prompt/response exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryLog {
    #[serde(default, deserialize_with = "null_as_default")]
    pub prompt: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub response: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub source_documents: Option<Vec<RawSourceDocument>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteMessage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_user: bool,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Treats an explicit `null` like a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    let opt: Option<T> = Deserialize::deserialize(deserializer)?;
    Ok(opt.unwrap_or_default())
}

/// A source document exactly as the backend sent it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawSourceDocument {
    Named { name: String, url: String },
    Bare(String),
    Unrecognized(serde_json::Value),
}

/// Body of `POST /api/rag/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeRequest {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<u64>,
}

/// Parsed reply of one exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeReply {
    pub content: String,
    /// Authoritative conversation id; present even for new conversations.
    pub conversation_id: Option<String>,
    pub sources: Vec<SourceReference>,
}

// ── Collaborator contract ─────────────────────────────────────────────────────

/// The remote conversation store the client reconciles against.
/// Every call carries the caller's credential verbatim.
#[async_trait]
pub trait ConversationBackend: Send + Sync {
    async fn fetch_history(&self, token: &str) -> Result<Vec<RemoteConversation>, ClientError>;

    async fn exchange(
        &self,
        token: &str,
        request: ExchangeRequest,
    ) -> Result<ExchangeReply, ClientError>;

    async fn delete_conversation(
        &self,
        token: &str,
        conversation_id: &str,
    ) -> Result<(), ClientError>;

    async fn upload_attachment(
        &self,
        token: &str,
        conversation_id: u64,
        file: &PendingAttachment,
    ) -> Result<(), ClientError>;

    /// Mints a conversation id before any real prompt was sent, so uploads
    /// have something to attach to. The backend has no dedicated endpoint for
    /// this, so a placeholder prompt is exchanged.
    async fn open_conversation(&self, token: &str) -> Result<String, ClientError> {
        let reply = self
            .exchange(token, ExchangeRequest { prompt: ".".to_string(), conversation_id: None })
            .await?;
        reply
            .conversation_id
            .ok_or_else(|| ClientError::MalformedPayload("reply carried no conversation_id".into()))
    }
}
