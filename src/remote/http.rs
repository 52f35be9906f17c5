use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error};

use super::{
    ConversationBackend, ExchangeReply, ExchangeRequest, RawSourceDocument, RemoteConversation,
};
use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::importer::normalize_sources;
use crate::models::PendingAttachment;

const NO_CONTENT_FALLBACK: &str = "No response text found in API output.";
const AUTH_FALLBACK: &str = "Invalid token or permissions.";

/// Body of `POST /api/upload/`.
#[derive(Debug, Serialize)]
struct UploadRequest<'a> {
    conversation_id: u64,
    file_name: &'a str,
    mime_type: &'a str,
    data: String,
}

/// reqwest-backed client for the conversation REST API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    source_base_url: String,
}

impl HttpBackend {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.backend_url.trim_end_matches('/').to_string(),
            source_base_url: config.source_base_url.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn headers(token: &str) -> Result<HeaderMap, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let value = HeaderValue::from_str(token).map_err(|_| ClientError::Unauthorized {
            detail: "credential contains invalid header characters".into(),
        })?;
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }

    /// Reads the body and maps non-2xx statuses onto [`ClientError`].
    async fn read_body(response: reqwest::Response) -> Result<String, ClientError> {
        let status = response.status();
        let body = response.text().await?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let detail = extract_detail(&body).unwrap_or_else(|| AUTH_FALLBACK.to_string());
            return Err(ClientError::Unauthorized { detail });
        }
        if !status.is_success() {
            let body = if body.trim().is_empty() {
                status.canonical_reason().unwrap_or_default().to_string()
            } else {
                body
            };
            return Err(ClientError::Status { status: status.as_u16(), body });
        }
        Ok(body)
    }
}

#[async_trait]
impl ConversationBackend for HttpBackend {
    async fn fetch_history(&self, token: &str) -> Result<Vec<RemoteConversation>, ClientError> {
        let url = self.url("/api/history/");
        debug!("Fetching chat history from {url}");
        let response = self.client.get(&url).headers(Self::headers(token)?).send().await?;
        let body = Self::read_body(response).await?;
        serde_json::from_str(&body).map_err(|e| {
            error!("History payload could not be parsed: {e}");
            ClientError::MalformedPayload(e.to_string())
        })
    }

    async fn exchange(
        &self,
        token: &str,
        mut request: ExchangeRequest,
    ) -> Result<ExchangeReply, ClientError> {
        if request.prompt.trim().is_empty() {
            request.prompt = "Hello".to_string();
        } else {
            request.prompt = request.prompt.trim().to_string();
        }

        let response = self
            .client
            .post(self.url("/api/rag/"))
            .headers(Self::headers(token)?)
            .json(&request)
            .send()
            .await?;
        let body = Self::read_body(response).await?;
        parse_exchange_reply(&body, &self.source_base_url)
    }

    async fn delete_conversation(
        &self,
        token: &str,
        conversation_id: &str,
    ) -> Result<(), ClientError> {
        let response = self
            .client
            .delete(self.url(&format!("/api/delete/{conversation_id}/")))
            .headers(Self::headers(token)?)
            .send()
            .await?;
        Self::read_body(response).await.map(|_| ())
    }

    async fn upload_attachment(
        &self,
        token: &str,
        conversation_id: u64,
        file: &PendingAttachment,
    ) -> Result<(), ClientError> {
        let body = UploadRequest {
            conversation_id,
            file_name: &file.name,
            mime_type: &file.mime_type,
            data: STANDARD.encode(&file.bytes),
        };
        let response = self
            .client
            .post(self.url("/api/upload/"))
            .headers(Self::headers(token)?)
            .json(&body)
            .send()
            .await?;
        Self::read_body(response).await.map(|_| ())
    }
}

/// Pulls `detail` out of a FastAPI-style error body.
fn extract_detail(body: &str) -> Option<String> {
    let json: Value = serde_json::from_str(body).ok()?;
    match json.get("detail")? {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn parse_exchange_reply(body: &str, source_base_url: &str) -> Result<ExchangeReply, ClientError> {
    let json: Value =
        serde_json::from_str(body).map_err(|e| ClientError::MalformedPayload(e.to_string()))?;
    if !json.is_object() {
        return Err(ClientError::MalformedPayload("expected a JSON object".into()));
    }

    let content = ["content", "response", "text"]
        .iter()
        .find_map(|key| json.get(*key).and_then(Value::as_str).filter(|s| !s.is_empty()))
        .unwrap_or(NO_CONTENT_FALLBACK)
        .to_string();

    let conversation_id = match json.get("conversation_id") {
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    };

    let raw_sources: Vec<RawSourceDocument> = json
        .get("source_documents")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();

    Ok(ExchangeReply {
        content,
        conversation_id,
        sources: normalize_sources(&raw_sources, source_base_url),
    })
}
