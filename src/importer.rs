use chrono::{DateTime, Utc};
use tracing::debug;

use crate::bucket::parse_timestamp;
use crate::models::{
    DEFAULT_TITLE, Message, NO_DOCUMENTS_SENTINEL, Session, SourceReference, derive_title,
};
use crate::remote::{RawSourceDocument, RemoteConversation};
use crate::store::durable_session;

const UNKNOWN_DOCUMENT: &str = "Unknown Document";
const EMPTY_CONTENT: &str = "...";

/// Maps raw source documents onto [`SourceReference`]s.
///
/// Named entries pass through, bare strings become a link under
/// `source_base_url`, and anything else becomes an "Unknown Document" placeholder.
pub fn normalize_sources(raw: &[RawSourceDocument], source_base_url: &str) -> Vec<SourceReference> {
    raw.iter()
        .map(|doc| match doc {
            RawSourceDocument::Named { name, url } => SourceReference::new(name, url),
            RawSourceDocument::Bare(name) if name == NO_DOCUMENTS_SENTINEL => {
                SourceReference::new(name, "#")
            }
            RawSourceDocument::Bare(name) => {
                let base = source_base_url.trim_end_matches('/');
                SourceReference::new(name, format!("{base}/{}", name.trim_start_matches('/')))
            }
            RawSourceDocument::Unrecognized(_) => SourceReference::new(UNKNOWN_DOCUMENT, "#"),
        })
        .collect()
}

/// Converts remote history into durable sessions, most recent (highest id) first.
pub fn import_history(records: Vec<RemoteConversation>, source_base_url: &str) -> Vec<Session> {
    let mut sessions: Vec<Session> =
        records.into_iter().map(|record| import_conversation(record, source_base_url)).collect();
    sessions.sort_by(|a, b| b.id.numeric().cmp(&a.id.numeric()));
    debug!("Imported {} conversations", sessions.len());
    sessions
}

fn import_conversation(record: RemoteConversation, source_base_url: &str) -> Session {
    let id = record.id.to_string();
    let mut messages = Vec::with_capacity(record.query_logs.len() * 2 + record.messages.len());
    let mut first_prompt: Option<String> = None;

    for log in &record.query_logs {
        if first_prompt.is_none() && !log.prompt.trim().is_empty() {
            first_prompt = Some(log.prompt.clone());
        }
        let prompt = Message::user(non_empty(&log.prompt), None);
        messages.push(prompt.with_id(format!("{id}-{}", messages.len())));

        let raw_sources = log.source_documents.as_deref().unwrap_or_default();
        let sources = normalize_sources(raw_sources, source_base_url);
        let answer = Message::assistant(non_empty(&log.response), sources);
        messages.push(answer.with_id(format!("{id}-{}", messages.len())));
    }

    for legacy in &record.messages {
        if legacy.is_user && first_prompt.is_none() && !legacy.content.trim().is_empty() {
            first_prompt = Some(legacy.content.clone());
        }
        let content = non_empty(&legacy.content);
        let message = if legacy.is_user {
            Message::user(content, None)
        } else {
            Message::assistant(content, Vec::new())
        };
        messages.push(message.with_id(format!("{id}-{}", messages.len())));
    }

    let title = record
        .title
        .filter(|t| !t.trim().is_empty())
        .or_else(|| first_prompt.as_deref().map(derive_title))
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());

    let anchor = parse_timestamp(&record.created_at).unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

    durable_session(id, title, anchor, messages)
}

fn non_empty(text: &str) -> String {
    if text.is_empty() { EMPTY_CONTENT.to_string() } else { text.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::DisplayGroup;
    use crate::models::MessageRole;

    fn records(json: &str) -> Vec<RemoteConversation> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn each_log_becomes_a_user_and_assistant_message() {
        let sessions = import_history(
            records(
                r#"[{"id": 501, "title": "Refunds", "created_at": "2026-10-18T09:00:00Z",
                     "query_logs": [
                        {"prompt": "What is the refund policy?", "response": "14 days.",
                         "timestamp": "2026-10-18T09:00:00Z"},
                        {"prompt": "And exchanges?", "response": "30 days."}
                     ]}]"#,
            ),
            "https://docs",
        );
        assert_eq!(sessions.len(), 1);
        let session = &sessions[0];
        assert_eq!(session.id.as_str(), "501");
        assert_eq!(session.title, "Refunds");
        let roles: Vec<MessageRole> = session.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                MessageRole::User,
                MessageRole::Assistant,
                MessageRole::User,
                MessageRole::Assistant
            ]
        );
        assert_eq!(session.messages[3].content, "30 days.");
        assert_eq!(session.messages[2].id, "501-2");
    }

    #[test]
    fn titles_fall_back_to_first_prompt_then_placeholder() {
        let sessions = import_history(
            records(
                r#"[{"id": 1, "title": "", "created_at": "",
                     "query_logs": [{"prompt": "Explain the onboarding checklist for new hires",
                                     "response": "Sure"}]},
                    {"id": 2, "created_at": "", "query_logs": []}]"#,
            ),
            "/m",
        );
        assert_eq!(sessions[0].title, DEFAULT_TITLE);
        assert_eq!(sessions[1].title, "Explain the onboarding checkli...");
    }

    #[test]
    fn sessions_are_sorted_by_descending_numeric_id() {
        let sessions = import_history(
            records(
                r#"[{"id": 9, "created_at": ""},
                    {"id": 120, "created_at": ""},
                    {"id": "33", "created_at": ""}]"#,
            ),
            "/m",
        );
        let ids: Vec<&str> = sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["120", "33", "9"]);
    }

    #[test]
    fn no_documents_sentinel_yields_no_visible_sources() {
        let sessions = import_history(
            records(
                r#"[{"id": 4, "created_at": "",
                     "query_logs": [{"prompt": "hi", "response": "hello",
                                     "source_documents": ["[No documents retrieved]"]}]}]"#,
            ),
            "/m",
        );
        let reply = &sessions[0].messages[1];
        assert_eq!(reply.role, MessageRole::Assistant);
        assert!(reply.visible_sources().is_empty());
    }

    #[test]
    fn source_documents_are_normalized_by_shape() {
        let raw: Vec<RawSourceDocument> = serde_json::from_str(
            r#"["Policy Manual.pdf",
                {"name": "FAQ", "url": "https://kb/faq"},
                42,
                {"title": "?"}]"#,
        )
        .unwrap();
        let refs = normalize_sources(&raw, "https://docs/media/");
        assert_eq!(
            refs,
            vec![
                SourceReference::new("Policy Manual.pdf", "https://docs/media/Policy Manual.pdf"),
                SourceReference::new("FAQ", "https://kb/faq"),
                SourceReference::new(UNKNOWN_DOCUMENT, "#"),
                SourceReference::new(UNKNOWN_DOCUMENT, "#"),
            ]
        );
    }

    #[test]
    fn legacy_flat_messages_are_imported() {
        let sessions = import_history(
            records(
                r#"[{"id": 7, "created_at": "2020-01-01T00:00:00Z",
                     "messages": [{"content": "hello there", "is_user": true},
                                  {"content": "", "is_user": false}]}]"#,
            ),
            "/m",
        );
        let session = &sessions[0];
        assert_eq!(session.title, "hello there");
        assert_eq!(session.messages[1].content, EMPTY_CONTENT);
        assert_eq!(session.display_group(&Utc::now()), DisplayGroup::Older);
    }

    #[test]
    fn null_fields_do_not_discard_the_rest_of_the_history() {
        let sessions = import_history(
            records(
                r#"[{"id": 12, "title": "Payroll", "created_at": "2026-10-18T09:00:00Z",
                     "query_logs": [{"prompt": "When is payday?", "response": null}]},
                    {"id": 13, "title": null, "created_at": null, "query_logs": null,
                     "messages": [{"content": null, "is_user": true},
                                  {"content": "still here", "is_user": null}]}]"#,
            ),
            "/m",
        );
        assert_eq!(sessions.len(), 2);

        let legacy = &sessions[0];
        assert_eq!(legacy.id.as_str(), "13");
        assert_eq!(legacy.title, DEFAULT_TITLE);
        assert_eq!(legacy.display_group(&Utc::now()), DisplayGroup::Older);
        let messages: Vec<(MessageRole, &str)> =
            legacy.messages.iter().map(|m| (m.role, m.content.as_str())).collect();
        assert_eq!(
            messages,
            vec![(MessageRole::User, EMPTY_CONTENT), (MessageRole::Assistant, "still here")]
        );

        assert_eq!(sessions[1].title, "Payroll");
        assert_eq!(sessions[1].messages[1].content, EMPTY_CONTENT);
    }

    #[test]
    fn unparseable_creation_time_is_older() {
        let sessions =
            import_history(records(r#"[{"id": 5, "created_at": "yesterday-ish"}]"#), "/m");
        assert_eq!(sessions[0].display_group(&Utc::now()), DisplayGroup::Older);
    }
}
