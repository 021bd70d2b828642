//! Conversation transcript — turns, placeholder lifecycle, reply history.
//!
//! The transcript is the single in-memory record of one conversation. Turns
//! are append-only; the only in-place mutation allowed is resolving a
//! placeholder ("thinking") turn with the assistant's real reply, which
//! preserves the turn's position and identity in the list.

use serde::{Deserialize, Serialize};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// Identity of a turn within one transcript. Monotonic, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TurnId(pub u64);

/// One message in the visible conversation transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: TurnId,
    pub role: ChatRole,
    pub text: String,

    /// True only for the transient "thinking" turn awaiting the assistant's
    /// reply. Cleared when the reply arrives.
    pub is_placeholder: bool,
}

/// Role tag understood by the chat-reply service.
///
/// The wire protocol names the assistant side `model`, not `assistant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Model,
}

/// One prior exchange as sent to the chat-reply service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: HistoryRole,
    pub content: String,
}

/// The conversation transcript for one controller instance.
///
/// Lives only in memory for the controller's lifetime — nothing is persisted.
#[derive(Debug, Default)]
pub struct Transcript {
    turns: Vec<ConversationTurn>,
    next_id: u64,
}

impl Transcript {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a user turn; returns its id.
    pub fn push_user(&mut self, text: impl Into<String>) -> TurnId {
        self.push(ChatRole::User, text.into(), false)
    }

    /// Append a completed assistant turn; returns its id.
    pub fn push_assistant(&mut self, text: impl Into<String>) -> TurnId {
        self.push(ChatRole::Assistant, text.into(), false)
    }

    /// Append a transient "thinking" assistant turn; returns its id.
    ///
    /// The caller is expected to resolve it later via
    /// [`resolve_placeholder`](Self::resolve_placeholder).
    pub fn push_placeholder(&mut self) -> TurnId {
        self.push(ChatRole::Assistant, String::new(), true)
    }

    /// Resolve a placeholder turn in place with the real reply text.
    ///
    /// The turn keeps its id and list position. Returns `false` (and changes
    /// nothing) if the id is unknown or the turn is not a placeholder.
    pub fn resolve_placeholder(&mut self, id: TurnId, text: impl Into<String>) -> bool {
        match self.turns.iter_mut().find(|t| t.id == id) {
            Some(turn) if turn.is_placeholder => {
                turn.text = text.into();
                turn.is_placeholder = false;
                true
            }
            _ => false,
        }
    }

    /// All turns, in order.
    #[must_use]
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Look up one turn by id.
    #[must_use]
    pub fn get(&self, id: TurnId) -> Option<&ConversationTurn> {
        self.turns.iter().find(|t| t.id == id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Project the transcript into the history payload for the chat-reply
    /// service: finished turns only (placeholders excluded), roles mapped to
    /// the wire's `user` / `model` tags.
    #[must_use]
    pub fn reply_history(&self) -> Vec<HistoryMessage> {
        self.turns
            .iter()
            .filter(|t| !t.is_placeholder)
            .map(|t| HistoryMessage {
                role: match t.role {
                    ChatRole::User => HistoryRole::User,
                    ChatRole::Assistant => HistoryRole::Model,
                },
                content: t.text.clone(),
            })
            .collect()
    }

    fn push(&mut self, role: ChatRole, text: String, is_placeholder: bool) -> TurnId {
        let id = TurnId(self.next_id);
        self.next_id += 1;
        self.turns.push(ConversationTurn {
            id,
            role,
            text,
            is_placeholder,
        });
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_resolves_in_place() {
        let mut t = Transcript::new();
        let user = t.push_user("hello there");
        let placeholder = t.push_placeholder();

        assert!(t.resolve_placeholder(placeholder, "hi!"));

        // Position and identity preserved
        assert_eq!(t.turns()[0].id, user);
        assert_eq!(t.turns()[1].id, placeholder);
        assert_eq!(t.turns()[1].text, "hi!");
        assert!(!t.turns()[1].is_placeholder);
    }

    #[test]
    fn resolving_twice_is_a_noop() {
        let mut t = Transcript::new();
        let id = t.push_placeholder();
        assert!(t.resolve_placeholder(id, "first"));
        assert!(!t.resolve_placeholder(id, "second"));
        assert_eq!(t.get(id).unwrap().text, "first");
    }

    #[test]
    fn resolving_unknown_id_is_a_noop() {
        let mut t = Transcript::new();
        t.push_user("hi");
        assert!(!t.resolve_placeholder(TurnId(99), "nope"));
    }

    #[test]
    fn reply_history_excludes_placeholders() {
        let mut t = Transcript::new();
        t.push_user("question one");
        t.push_assistant("answer one");
        t.push_user("question two");
        t.push_placeholder();

        let history = t.reply_history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].role, HistoryRole::User);
        assert_eq!(history[1].role, HistoryRole::Model);
        assert_eq!(history[2].content, "question two");
    }

    #[test]
    fn history_roles_serialize_as_user_and_model() {
        let msg = HistoryMessage {
            role: HistoryRole::Model,
            content: "answer".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "model");

        let user = serde_json::to_value(&HistoryMessage {
            role: HistoryRole::User,
            content: "q".to_string(),
        })
        .unwrap();
        assert_eq!(user["role"], "user");
    }

    #[test]
    fn ids_are_monotonic() {
        let mut t = Transcript::new();
        let a = t.push_user("a");
        let b = t.push_placeholder();
        let c = t.push_assistant("c");
        assert!(a < b && b < c);
    }
}
