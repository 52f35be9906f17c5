use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::errors::ClientError;
use crate::importer::import_history;
use crate::models::{
    ATTACHMENT_TITLE, Feedback, Message, MessageRole, PendingAttachment, SessionId, SlotKey,
    derive_title, describe_attachments,
};
use crate::remote::{ConversationBackend, ExchangeReply, ExchangeRequest};
use crate::store::SessionStore;

/// Text and files waiting in the compose box.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Composer {
    pub input: String,
    pub attachments: Vec<PendingAttachment>,
}

/// Result of a `send` or `regenerate` call.
#[derive(Debug)]
pub enum SendOutcome {
    /// Nothing was sent: empty input, a send already in flight, or an unknown session.
    Rejected(ClientError),
    /// The assistant reply was appended to the session.
    Replied { session_id: SessionId },
    /// The exchange failed; the error was appended as an assistant-style message.
    Failed { session_id: SessionId, error: ClientError },
    /// The target session disappeared while the request was in flight.
    Orphaned,
}

impl SendOutcome {
    pub fn is_rejected(&self) -> bool {
        matches!(self, SendOutcome::Rejected(_))
    }
}

/// Drives optimistic send/receive cycles against a [`ConversationBackend`]
/// and keeps the [`SessionStore`] reconciled with the server.
///
/// Cloning is cheap and every clone shares the same store and single-flight lock.
#[derive(Clone)]
pub struct ChatClient {
    backend: Arc<dyn ConversationBackend>,
    store: Arc<Mutex<SessionStore>>,
    composer: Arc<Mutex<Composer>>,
    credential: Arc<Mutex<Option<String>>>,
    in_flight: Arc<tokio::sync::Mutex<()>>,
    source_base_url: String,
}

impl ChatClient {
    pub fn new(
        backend: Arc<dyn ConversationBackend>,
        credential: Option<String>,
        source_base_url: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            store: Arc::new(Mutex::new(SessionStore::new())),
            composer: Arc::new(Mutex::new(Composer::default())),
            credential: Arc::new(Mutex::new(credential)),
            in_flight: Arc::new(tokio::sync::Mutex::new(())),
            source_base_url: source_base_url.into(),
        }
    }

    /// Locks the session store. Do not hold the guard across an `.await`.
    pub fn store(&self) -> MutexGuard<'_, SessionStore> {
        lock(&self.store)
    }

    pub fn composer(&self) -> Composer {
        lock(&self.composer).clone()
    }

    pub fn is_sending(&self) -> bool {
        self.in_flight.try_lock().is_err()
    }

    fn token(&self) -> Option<String> {
        lock(&self.credential).clone()
    }

    // ── Compose box ──────────────────────────────────────────────────────────

    pub fn set_input(&self, text: impl Into<String>) {
        lock(&self.composer).input = text.into();
    }

    pub fn add_attachment(&self, file: PendingAttachment) {
        lock(&self.composer).attachments.push(file);
    }

    pub fn remove_attachment(&self, index: usize) -> Option<PendingAttachment> {
        let mut composer = lock(&self.composer);
        (index < composer.attachments.len()).then(|| composer.attachments.remove(index))
    }

    // ── Session lifecycle ────────────────────────────────────────────────────

    /// Starts a fresh provisional chat and selects it.
    pub fn new_chat(&self) -> SessionId {
        let id = self.store().create_session(true).id.clone();
        *lock(&self.composer) = Composer::default();
        id
    }

    pub fn select_session(&self, id: &str) -> bool {
        let selected = self.store().select_session(id);
        if selected {
            lock(&self.composer).attachments.clear();
        }
        selected
    }

    pub fn set_feedback(&self, message_id: &str, feedback: Feedback) -> bool {
        self.store().set_feedback(message_id, feedback)
    }

    pub fn login(&self, token: impl Into<String>) {
        *lock(&self.credential) = Some(token.into());
    }

    /// Forgets the credential and resets the store to a single provisional session.
    pub fn logout(&self) {
        *lock(&self.credential) = None;
        self.store().reset();
        *lock(&self.composer) = Composer::default();
        info!("Logged out; session store reset");
    }

    /// Replaces the store contents with the server's history. Never fails: on
    /// any error the store keeps (at least) its provisional session.
    /// Returns the number of imported conversations.
    pub async fn load_history(&self) -> usize {
        let Some(token) = self.token() else {
            warn!("Cannot load chat history: authentication token is missing");
            self.store().reset();
            return 0;
        };

        match self.backend.fetch_history(&token).await {
            Ok(records) => {
                let sessions = import_history(records, &self.source_base_url);
                let count = sessions.len();
                self.store().install_history(sessions);
                info!("Loaded {count} conversations from history");
                count
            }
            Err(e) if e.is_auth() => {
                warn!("History unavailable, treating as empty: {e}");
                self.store().reset();
                0
            }
            Err(e) => {
                error!("Error loading chat history: {e}");
                0
            }
        }
    }

    /// Deletes a session. Durable sessions are deleted on the server first and
    /// stay visible if that fails; provisional ones are only dropped locally.
    pub async fn delete_session(&self, id: &str) -> Result<(), ClientError> {
        let session_id = self
            .store()
            .get(id)
            .map(|s| s.id.clone())
            .ok_or_else(|| ClientError::session_not_found(id))?;

        if let SessionId::Durable(durable) = &session_id {
            let token = self.token().ok_or(ClientError::MissingCredential)?;
            if let Err(e) = self.backend.delete_conversation(&token, durable).await {
                error!("Error deleting chat {durable}: {e}");
                return Err(e);
            }
        }

        self.store().remove_session(session_id.as_str());
        Ok(())
    }

    // ── Exchanges ────────────────────────────────────────────────────────────

    /// Sends whatever the compose box currently holds to the current session.
    pub async fn submit(&self) -> SendOutcome {
        let Composer { input, attachments } = self.composer();
        let session_id = self.store().current_id().as_str().to_string();
        self.send(&session_id, &input, attachments).await
    }

    /// Optimistically appends the user message, runs the exchange and
    /// reconciles the reply into the session.
    pub async fn send(
        &self,
        session_id: &str,
        text: &str,
        attachments: Vec<PendingAttachment>,
    ) -> SendOutcome {
        if text.trim().is_empty() && attachments.is_empty() {
            return SendOutcome::Rejected(ClientError::EmptyMessage);
        }
        let Ok(_guard) = self.in_flight.try_lock() else {
            warn!("Send rejected: another exchange is in flight");
            return SendOutcome::Rejected(ClientError::SendInFlight);
        };

        let user_message = Message::user(text, describe_attachments(&attachments));
        let user_message_id = user_message.id.clone();
        let slot = {
            let mut store = self.store();
            let Some(slot) = store.resolve(session_id) else {
                return SendOutcome::Rejected(ClientError::session_not_found(session_id));
            };
            let Some(session) = store.get_slot_mut(slot) else {
                return SendOutcome::Rejected(ClientError::session_not_found(session_id));
            };
            session.messages.push(user_message.clone());
            slot
        };
        *lock(&self.composer) = Composer::default();
        debug!("Optimistically appended user message {user_message_id} to {session_id}");

        let result = match self.token() {
            Some(token) => self.run_exchange(&token, slot, text, &attachments).await,
            None => Err(ClientError::MissingCredential),
        };

        // Applied on the first successful reply while the placeholder title remains.
        let title =
            if text.trim().is_empty() { ATTACHMENT_TITLE.to_string() } else { derive_title(text) };
        self.reconcile(slot, Some(&user_message), Some(title), result)
    }

    /// Replaces the last assistant reply with a fresh one for `last_user_message`.
    pub async fn regenerate(&self, last_user_message: &Message) -> SendOutcome {
        let Ok(_guard) = self.in_flight.try_lock() else {
            warn!("Regenerate rejected: another exchange is in flight");
            return SendOutcome::Rejected(ClientError::SendInFlight);
        };

        let slot = {
            let mut store = self.store();
            let slot = store.current_slot();
            let Some(session) = store.get_slot_mut(slot) else {
                return SendOutcome::Rejected(ClientError::session_not_found("current"));
            };
            if session.messages.last().is_some_and(|m| m.role == MessageRole::Assistant) {
                session.messages.pop();
            }
            slot
        };

        let result = match self.token() {
            Some(token) => self.run_exchange(&token, slot, &last_user_message.content, &[]).await,
            None => Err(ClientError::MissingCredential),
        };
        self.reconcile(slot, None, None, result)
    }

    /// Uploads attachments (minting a conversation id first when needed) and
    /// then performs the exchange. The store lock is never held across awaits.
    async fn run_exchange(
        &self,
        token: &str,
        slot: SlotKey,
        prompt: &str,
        attachments: &[PendingAttachment],
    ) -> Result<ExchangeReply, ClientError> {
        if !attachments.is_empty() {
            let conversation_id = match self.conversation_id(slot)? {
                Some(id) => id,
                None => {
                    let minted = self.backend.open_conversation(token).await?;
                    self.adopt_durable_id(slot, &minted)?;
                    parse_conversation_id(&minted).ok_or_else(|| {
                        ClientError::MalformedPayload(format!("conversation id '{minted}'"))
                    })?
                }
            };
            for file in attachments {
                self.backend.upload_attachment(token, conversation_id, file).await?;
                debug!("Uploaded {} to conversation {conversation_id}", file.name);
            }
        }

        let request = ExchangeRequest {
            prompt: prompt.to_string(),
            conversation_id: self.conversation_id(slot)?,
        };
        self.backend.exchange(token, request).await
    }

    /// Numeric server id of the session in `slot`, `None` while provisional.
    fn conversation_id(&self, slot: SlotKey) -> Result<Option<u64>, ClientError> {
        let store = self.store();
        let session =
            store.get_slot(slot).ok_or_else(|| ClientError::session_not_found("in-flight"))?;
        match &session.id {
            SessionId::Provisional(_) => Ok(None),
            SessionId::Durable(raw) => {
                let parsed = parse_conversation_id(raw);
                if parsed.is_none() {
                    warn!("Invalid conversation id {raw}, sending without conversation_id");
                }
                Ok(parsed)
            }
        }
    }

    /// Renames a provisional session to the server-assigned id and re-anchors
    /// its display group at "now". Durable sessions are left alone.
    fn adopt_durable_id(&self, slot: SlotKey, server_id: &str) -> Result<(), ClientError> {
        let mut store = self.store();
        let current = match store.get_slot(slot) {
            Some(session) if session.is_provisional() => session.id.as_str().to_string(),
            Some(_) => return Ok(()),
            None => return Err(ClientError::session_not_found(server_id)),
        };
        store.rename_session_id(&current, SessionId::Durable(server_id.to_string()))?;
        if let Some(session) = store.get_slot_mut(slot) {
            session.anchor = Utc::now();
        }
        info!("Session {current} is now conversation {server_id}");
        Ok(())
    }

    /// Applies the outcome of an exchange to the session in `slot`.
    fn reconcile(
        &self,
        slot: SlotKey,
        user_message: Option<&Message>,
        title: Option<String>,
        result: Result<ExchangeReply, ClientError>,
    ) -> SendOutcome {
        if self.store().get_slot(slot).is_none() {
            warn!("Session was removed while its exchange was in flight; dropping the response");
            return SendOutcome::Orphaned;
        }

        let (reply, error) = match result {
            Ok(reply) => {
                if let Some(server_id) = reply.conversation_id.as_deref() {
                    if let Err(e) = self.adopt_durable_id(slot, server_id) {
                        warn!("Could not adopt conversation id {server_id}: {e}");
                    }
                }
                (Message::assistant(reply.content, reply.sources), None)
            }
            Err(e) => {
                error!("Exchange failed: {e}");
                (Message::assistant(surface_error(&e), Vec::new()), Some(e))
            }
        };

        let mut store = self.store();
        let Some(session) = store.get_slot_mut(slot) else {
            return SendOutcome::Orphaned;
        };
        if let Some(user_message) = user_message {
            if !session.messages.iter().any(|m| m.id == user_message.id) {
                session.messages.push(user_message.clone());
            }
        }
        if error.is_none() && !session.is_provisional() && session.has_default_title() {
            if let Some(title) = title {
                session.title = title;
            }
        }
        session.messages.push(reply);
        let session_id = session.id.clone();

        match error {
            None => SendOutcome::Replied { session_id },
            Some(error) => SendOutcome::Failed { session_id, error },
        }
    }
}

/// Text of the assistant-style bubble shown for a failed exchange.
pub fn surface_error(error: &ClientError) -> String {
    match error {
        ClientError::MissingCredential | ClientError::Unauthorized { .. } => error.to_string(),
        other => format!("I apologize, but I encountered an error: {other}. Please try again."),
    }
}

fn parse_conversation_id(raw: &str) -> Option<u64> {
    raw.parse().ok().filter(|id| *id > 0)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
