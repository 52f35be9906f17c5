use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::bucket::{self, DisplayGroup};

/// Prefix reserved for client-generated session ids. Durable ids are numeric
/// strings, so the two forms never collide.
pub const PROVISIONAL_PREFIX: &str = "temp-";

/// Placeholder title of a session that has not seen a user message yet.
pub const DEFAULT_TITLE: &str = "New Chat";

/// Title used when the first message only carries attachments.
pub const ATTACHMENT_TITLE: &str = "Chat with files";

/// Source-document name the backend uses to say "nothing was retrieved".
pub const NO_DOCUMENTS_SENTINEL: &str = "[No documents retrieved]";

const TITLE_MAX_CHARS: usize = 30;

/// Public identity of a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum SessionId {
    /// Client-generated, not yet known to the server.
    Provisional(String),
    /// Server-assigned conversation id.
    Durable(String),
}

impl SessionId {
    pub fn new_provisional() -> Self {
        SessionId::Provisional(format!("{PROVISIONAL_PREFIX}{}", uuid::Uuid::new_v4()))
    }

    pub fn parse(raw: &str) -> Self {
        if raw.starts_with(PROVISIONAL_PREFIX) {
            SessionId::Provisional(raw.to_string())
        } else {
            SessionId::Durable(raw.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SessionId::Provisional(s) | SessionId::Durable(s) => s,
        }
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self, SessionId::Provisional(_))
    }

    /// Numeric value of a durable id, used as a recency proxy.
    pub fn numeric(&self) -> Option<u64> {
        match self {
            SessionId::Durable(s) => s.parse().ok(),
            SessionId::Provisional(_) => None,
        }
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        SessionId::parse(&s)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        match id {
            SessionId::Provisional(s) | SessionId::Durable(s) => s,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Liked,
    Disliked,
}

/// Descriptor of the files attached to a user message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A file selected in the compose box, waiting to be uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAttachment {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl PendingAttachment {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self { name: name.into(), mime_type: mime_type.into(), bytes }
    }
}

/// Summarises a batch of pending files as one attachment descriptor:
/// names joined with `, `, mime type of the first file.
pub fn describe_attachments(files: &[PendingAttachment]) -> Option<Attachment> {
    let first = files.first()?;
    Some(Attachment {
        name: files.iter().map(|f| f.name.as_str()).collect::<Vec<_>>().join(", "),
        mime_type: first.mime_type.clone(),
        url: None,
    })
}

/// A citation attached to an assistant reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceReference {
    pub name: String,
    pub url: String,
}

impl SourceReference {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self { name: name.into(), url: url.into() }
    }

    pub fn is_sentinel(&self) -> bool {
        self.name == NO_DOCUMENTS_SENTINEL
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceReference>,
}

impl Message {
    pub fn user(content: impl Into<String>, attachment: Option<Attachment>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: MessageRole::User,
            content: content.into(),
            attachment,
            feedback: None,
            sources: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>, sources: Vec<SourceReference>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: MessageRole::Assistant,
            content: content.into(),
            attachment: None,
            feedback: None,
            sources,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Source references worth rendering, with the "no documents" sentinel removed.
    pub fn visible_sources(&self) -> Vec<&SourceReference> {
        if self.sources.iter().all(SourceReference::is_sentinel) {
            return Vec::new();
        }
        self.sources.iter().filter(|s| !s.is_sentinel()).collect()
    }
}

/// Key of the arena slot a session lives in. Stable for the lifetime of the
/// session, unlike the public [`SessionId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey(pub(crate) u64);

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub(crate) slot: SlotKey,
    pub id: SessionId,
    pub title: String,
    /// Timestamp the display group is computed from.
    pub anchor: DateTime<Utc>,
    pub messages: Vec<Message>,
}

impl Session {
    pub fn slot(&self) -> SlotKey {
        self.slot
    }

    pub fn is_provisional(&self) -> bool {
        self.id.is_provisional()
    }

    pub fn has_default_title(&self) -> bool {
        self.title == DEFAULT_TITLE
    }

    pub fn display_group<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> DisplayGroup {
        bucket::classify(&self.anchor, now)
    }
}

/// Derives a session title from the first user message: at most 30
/// characters, with `...` appended when the text was cut.
pub fn derive_title(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(TITLE_MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
