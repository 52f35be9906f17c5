use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, warn};

use crate::bucket::DisplayGroup;
use crate::errors::ClientError;
use crate::models::{DEFAULT_TITLE, Feedback, Message, Session, SessionId, SlotKey};

/// In-memory, ordered collection of chat sessions.
///
/// Sessions live in slots keyed by a [`SlotKey`] that never changes, while the
/// public [`SessionId`] may be rewritten once (provisional → durable). Ids that
/// were renamed away keep resolving to their slot, so a caller still holding
/// the provisional id lands on the right session.
///
/// Invariants kept by every operation:
/// - there is always a current session;
/// - exactly one provisional session exists.
#[derive(Debug)]
pub struct SessionStore {
    next_slot: u64,
    order: Vec<SlotKey>,
    sessions: HashMap<SlotKey, Session>,
    renamed: HashMap<String, SlotKey>,
    current: SlotKey,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    /// A store holding a single provisional session, selected.
    pub fn new() -> Self {
        let mut store = Self {
            next_slot: 0,
            order: Vec::new(),
            sessions: HashMap::new(),
            renamed: HashMap::new(),
            current: SlotKey(0),
        };
        let slot = store.push_provisional();
        store.current = slot;
        store
    }

    /// Drops everything and starts over with one provisional session (logout).
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn current(&self) -> &Session {
        &self.sessions[&self.current]
    }

    pub fn current_id(&self) -> &SessionId {
        &self.current().id
    }

    pub fn current_slot(&self) -> SlotKey {
        self.current
    }

    /// Sessions in display order (front first).
    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.order.iter().map(|slot| &self.sessions[slot])
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Resolves a public id, including provisional ids that have since been renamed.
    pub fn resolve(&self, id: &str) -> Option<SlotKey> {
        self.order
            .iter()
            .copied()
            .find(|slot| self.sessions[slot].id.as_str() == id)
            .or_else(|| {
                self.renamed.get(id).copied().filter(|slot| self.sessions.contains_key(slot))
            })
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.resolve(id).and_then(|slot| self.sessions.get(&slot))
    }

    pub fn get_slot(&self, slot: SlotKey) -> Option<&Session> {
        self.sessions.get(&slot)
    }

    pub(crate) fn get_slot_mut(&mut self, slot: SlotKey) -> Option<&mut Session> {
        self.sessions.get_mut(&slot)
    }

    /// Durable sessions bucketed by display group. Groups iterate in
    /// Today, Yesterday, LastWeek, Older order; sessions within a group are
    /// ordered by descending numeric id.
    pub fn grouped_view<Tz: TimeZone>(
        &self,
        now: &DateTime<Tz>,
    ) -> BTreeMap<DisplayGroup, Vec<&Session>> {
        let mut groups: BTreeMap<DisplayGroup, Vec<&Session>> = BTreeMap::new();
        for session in self.sessions().filter(|s| !s.is_provisional()) {
            groups.entry(session.display_group(now)).or_default().push(session);
        }
        for sessions in groups.values_mut() {
            sessions.sort_by(|a, b| b.id.numeric().cmp(&a.id.numeric()));
        }
        groups
    }

    // ── Mutations ────────────────────────────────────────────────────────────

    /// Creates a provisional session at the front, evicting any other
    /// provisional session. Selects it when `select` is set, or when the
    /// evicted session was the current one.
    pub fn create_session(&mut self, select: bool) -> &Session {
        let evicted: Vec<SlotKey> = self
            .order
            .iter()
            .copied()
            .filter(|slot| self.sessions[slot].is_provisional())
            .collect();
        let current_evicted = evicted.contains(&self.current);
        for slot in &evicted {
            self.drop_slot(*slot);
        }

        let slot = self.push_provisional();
        if select || current_evicted {
            self.current = slot;
        }
        &self.sessions[&slot]
    }

    /// Points the current-session pointer at `id`. Unknown ids are ignored.
    pub fn select_session(&mut self, id: &str) -> bool {
        match self.resolve(id) {
            Some(slot) => {
                self.current = slot;
                true
            }
            None => {
                warn!("select_session: session {id} not found");
                false
            }
        }
    }

    /// Rewrites the public id of the session currently known as `old_id`.
    /// Position, messages and the current-session pointer are untouched.
    pub fn rename_session_id(
        &mut self,
        old_id: &str,
        new_id: SessionId,
    ) -> Result<(), ClientError> {
        let slot = self
            .order
            .iter()
            .copied()
            .find(|slot| self.sessions[slot].id.as_str() == old_id)
            .ok_or_else(|| ClientError::session_not_found(old_id))?;

        let session = self
            .sessions
            .get_mut(&slot)
            .ok_or_else(|| ClientError::session_not_found(old_id))?;
        debug!("Renaming session {old_id} -> {new_id}");
        let previous = std::mem::replace(&mut session.id, new_id);
        let was_provisional = previous.is_provisional();
        self.renamed.insert(previous.into(), slot);

        if was_provisional {
            self.ensure_provisional();
        }
        Ok(())
    }

    pub fn update_messages(&mut self, id: &str, messages: Vec<Message>) -> bool {
        self.with_session(id, |s| s.messages = messages)
    }

    pub fn update_title(&mut self, id: &str, title: impl Into<String>) -> bool {
        let title = title.into();
        self.with_session(id, |s| s.title = title)
    }

    pub fn append_message(&mut self, id: &str, message: Message) -> bool {
        self.with_session(id, |s| s.messages.push(message))
    }

    /// Records feedback on a message of the current session.
    pub fn set_feedback(&mut self, message_id: &str, feedback: Feedback) -> bool {
        let Some(session) = self.sessions.get_mut(&self.current) else {
            return false;
        };
        match session.messages.iter_mut().find(|m| m.id == message_id) {
            Some(message) => {
                message.feedback = Some(feedback);
                true
            }
            None => {
                warn!("set_feedback: message {message_id} not in current session");
                false
            }
        }
    }

    /// Removes a session locally. When it was the current one, selection falls
    /// back to the most recent durable session, else to the provisional one.
    pub fn remove_session(&mut self, id: &str) -> Option<Session> {
        let slot = self.resolve(id)?;
        let removed = self.drop_slot(slot)?;
        debug!("Removed session {}", removed.id);

        self.ensure_provisional();
        if self.current == slot {
            self.current = self.most_recent_durable().unwrap_or_else(|| self.provisional_slot());
        }
        Some(removed)
    }

    /// Replaces the store contents with imported sessions behind one fresh
    /// provisional session, which becomes current. Previous provisional
    /// content is discarded.
    pub fn install_history(&mut self, imported: Vec<Session>) {
        self.reset();
        for mut session in imported.into_iter().filter(|s| !s.is_provisional()) {
            let slot = self.next_key();
            session.slot = slot;
            self.sessions.insert(slot, session);
            self.order.push(slot);
        }
        debug!("Installed {} imported sessions", self.order.len() - 1);
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn with_session(&mut self, id: &str, f: impl FnOnce(&mut Session)) -> bool {
        match self.resolve(id).and_then(|slot| self.sessions.get_mut(&slot)) {
            Some(session) => {
                f(session);
                true
            }
            None => {
                warn!("Session {id} not found; update ignored");
                false
            }
        }
    }

    fn next_key(&mut self) -> SlotKey {
        let slot = SlotKey(self.next_slot);
        self.next_slot += 1;
        slot
    }

    fn push_provisional(&mut self) -> SlotKey {
        let slot = self.next_key();
        let session = Session {
            slot,
            id: SessionId::new_provisional(),
            title: DEFAULT_TITLE.to_string(),
            anchor: Utc::now(),
            messages: Vec::new(),
        };
        self.sessions.insert(slot, session);
        self.order.insert(0, slot);
        slot
    }

    fn drop_slot(&mut self, slot: SlotKey) -> Option<Session> {
        self.order.retain(|s| *s != slot);
        self.renamed.retain(|_, s| *s != slot);
        self.sessions.remove(&slot)
    }

    fn ensure_provisional(&mut self) {
        if !self.sessions.values().any(Session::is_provisional) {
            self.push_provisional();
        }
    }

    fn provisional_slot(&self) -> SlotKey {
        self.order
            .iter()
            .copied()
            .find(|slot| self.sessions[slot].is_provisional())
            .unwrap_or(self.current)
    }

    fn most_recent_durable(&self) -> Option<SlotKey> {
        self.order
            .iter()
            .copied()
            .filter(|slot| !self.sessions[slot].is_provisional())
            .max_by_key(|slot| self.sessions[slot].id.numeric())
    }
}

/// Builds a durable session ready to be handed to [`SessionStore::install_history`].
pub fn durable_session(
    id: impl Into<String>,
    title: impl Into<String>,
    anchor: DateTime<Utc>,
    messages: Vec<Message>,
) -> Session {
    Session {
        slot: SlotKey(u64::MAX),
        id: SessionId::Durable(id.into()),
        title: title.into(),
        anchor,
        messages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn provisional_count(store: &SessionStore) -> usize {
        store.sessions().filter(|s| s.is_provisional()).count()
    }

    fn store_with_history(now: DateTime<Utc>) -> SessionStore {
        let mut store = SessionStore::new();
        store.install_history(vec![
            durable_session("12", "twelve", now, vec![]),
            durable_session("7", "seven", now - Duration::hours(30), vec![]),
            durable_session("30", "thirty", now, vec![]),
            durable_session("3", "three", now - Duration::days(20), vec![]),
        ]);
        store
    }

    #[test]
    fn new_store_has_one_selected_provisional_session() {
        let store = SessionStore::new();
        assert_eq!(store.len(), 1);
        assert!(store.current().is_provisional());
        assert_eq!(store.current().title, DEFAULT_TITLE);
    }

    #[test]
    fn create_session_keeps_at_most_one_provisional() {
        let mut store = SessionStore::new();
        let first = store.current_id().clone();
        for _ in 0..5 {
            store.create_session(false);
            assert_eq!(provisional_count(&store), 1);
        }
        // The evicted session was current, so the replacement took over.
        assert_ne!(store.current_id(), &first);
        assert!(store.current().is_provisional());

        let id = store.create_session(true).id.clone();
        assert_eq!(store.current_id(), &id);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn create_session_without_select_leaves_durable_selection() {
        let now = Utc::now();
        let mut store = store_with_history(now);
        assert!(store.select_session("12"));
        store.create_session(false);
        assert_eq!(store.current_id().as_str(), "12");
        assert!(store.sessions().next().unwrap().is_provisional());
    }

    #[test]
    fn select_unknown_session_is_a_no_op() {
        let mut store = SessionStore::new();
        let before = store.current_id().clone();
        assert!(!store.select_session("999"));
        assert_eq!(store.current_id(), &before);
    }

    #[test]
    fn rename_preserves_history_and_position() {
        let mut store = SessionStore::new();
        let temp = store.current_id().as_str().to_string();
        for i in 0..3 {
            store.append_message(&temp, Message::user(format!("m{i}"), None));
        }
        let before = store.current().messages.clone();
        let slot = store.current_slot();

        store.rename_session_id(&temp, SessionId::Durable("501".into())).unwrap();

        let renamed = store.get("501").unwrap();
        assert_eq!(renamed.messages, before);
        assert_eq!(renamed.slot(), slot);
        assert_eq!(store.current_id().as_str(), "501");
        // The stale provisional id still reaches the renamed session.
        assert!(store.append_message(&temp, Message::assistant("reply", vec![])));
        assert_eq!(store.get("501").unwrap().messages.len(), 4);
        // A new provisional session replaces the one that became durable.
        assert_eq!(provisional_count(&store), 1);
    }

    #[test]
    fn rename_of_unknown_id_fails() {
        let mut store = SessionStore::new();
        let err =
            store.rename_session_id("temp-missing", SessionId::Durable("1".into())).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn updates_on_missing_sessions_are_ignored() {
        let mut store = SessionStore::new();
        assert!(!store.update_messages("42", vec![Message::user("x", None)]));
        assert!(!store.update_title("42", "x"));
        assert!(!store.append_message("42", Message::user("x", None)));
    }

    #[test]
    fn grouped_view_excludes_provisional_and_orders_by_id() {
        let now = Utc::now();
        let mut store = store_with_history(now);
        store.create_session(true);
        let groups = store.grouped_view(&now);

        assert!(groups.values().flatten().all(|s| !s.is_provisional()));
        let today: Vec<&str> = groups[&DisplayGroup::Today].iter().map(|s| s.id.as_str()).collect();
        assert_eq!(today, vec!["30", "12"]);
        assert_eq!(groups[&DisplayGroup::Older][0].id.as_str(), "3");
        let order: Vec<DisplayGroup> = groups.keys().copied().collect();
        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(order, sorted);
    }

    #[test]
    fn removing_current_durable_falls_back_to_most_recent_durable() {
        let now = Utc::now();
        let mut store = store_with_history(now);
        store.select_session("30");
        store.remove_session("30").unwrap();
        assert_eq!(store.current_id().as_str(), "12");
        assert!(store.get("30").is_none());
    }

    #[test]
    fn removing_the_only_provisional_creates_a_fresh_one() {
        let mut store = SessionStore::new();
        let temp = store.current_id().clone();
        store.remove_session(temp.as_str()).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.current().is_provisional());
        assert_ne!(store.current_id(), &temp);
    }

    #[test]
    fn install_history_discards_previous_provisional_content() {
        let mut store = SessionStore::new();
        let temp = store.current_id().as_str().to_string();
        store.append_message(&temp, Message::user("draft", None));

        store.install_history(vec![durable_session("1", "one", Utc::now(), vec![])]);
        assert_eq!(store.len(), 2);
        assert!(store.current().is_provisional());
        assert!(store.current().messages.is_empty());
        assert!(store.get(&temp).is_none());
    }

    #[test]
    fn feedback_targets_current_session_messages() {
        let mut store = SessionStore::new();
        let temp = store.current_id().as_str().to_string();
        let reply = Message::assistant("hi", vec![]);
        let reply_id = reply.id.clone();
        store.append_message(&temp, reply);

        assert!(store.set_feedback(&reply_id, Feedback::Liked));
        assert_eq!(store.current().messages[0].feedback, Some(Feedback::Liked));
        assert!(!store.set_feedback("nope", Feedback::Disliked));
    }
}
