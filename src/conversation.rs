//! # Conversation History
//!
//! Bounded, ordered log of the messages exchanged in one voice session.
//!
//! ## Ownership:
//! Each session owns exactly one `ConversationHistory`. Only the session's
//! turn loop appends to it (user message on final transcript, assistant
//! message after successful composition) — there is no external writer, so no
//! locking is needed.
//!
//! ## Invariants:
//! - Messages appear in the order they were produced.
//! - Storage is append-only; the most-recent-N window is applied at read time
//!   and never reorders or mutates messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Coarse emotion tag attached to assistant messages, driven by the
/// `[emotion: x]` directive the model embeds in its replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Neutral,
    Happy,
    Sad,
    Angry,
    Surprised,
    Shy,
}

impl Emotion {
    /// Parse a directive value, case-insensitively. Unrecognized values map to
    /// `Neutral` rather than erroring — the directive is free text from a
    /// language model and cannot be trusted to stay on vocabulary.
    pub fn parse_or_neutral(value: &str) -> Emotion {
        match value.trim().to_ascii_lowercase().as_str() {
            "happy" => Emotion::Happy,
            "sad" => Emotion::Sad,
            "angry" => Emotion::Angry,
            "surprised" => Emotion::Surprised,
            "shy" => Emotion::Shy,
            _ => Emotion::Neutral,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Neutral => "neutral",
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Angry => "angry",
            Emotion::Surprised => "surprised",
            Emotion::Shy => "shy",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One exchanged message. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub emotion: Option<Emotion>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::User,
            content: content.into(),
            emotion: None,
            created_at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>, emotion: Emotion) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            content: content.into(),
            emotion: Some(emotion),
            created_at: Utc::now(),
        }
    }
}

/// Append-only, order-preserving message log for one session.
#[derive(Debug, Default)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message at the tail. Messages are never mutated afterwards.
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// The most recent `n` messages, oldest-first. Returns the whole history
    /// when it is shorter than the window.
    pub fn recent(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_window_keeps_order_and_suffix() {
        let mut history = ConversationHistory::new();
        for i in 0..25 {
            history.append(Message::user(format!("message {}", i)));
        }

        // Longer than the window: exactly the most recent 20, in original order.
        let window = history.recent(20);
        assert_eq!(window.len(), 20);
        assert_eq!(window[0].content, "message 5");
        assert_eq!(window[19].content, "message 24");
    }

    #[test]
    fn test_recent_window_on_short_history() {
        let mut history = ConversationHistory::new();
        history.append(Message::user("hi"));
        history.append(Message::assistant("hello", Emotion::Happy));

        let window = history.recent(20);
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].role, Role::User);
        assert_eq!(window[1].role, Role::Assistant);
    }

    #[test]
    fn test_emotion_parsing_falls_back_to_neutral() {
        assert_eq!(Emotion::parse_or_neutral("HAPPY"), Emotion::Happy);
        assert_eq!(Emotion::parse_or_neutral(" shy "), Emotion::Shy);
        assert_eq!(Emotion::parse_or_neutral("ecstatic"), Emotion::Neutral);
        assert_eq!(Emotion::parse_or_neutral(""), Emotion::Neutral);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let msg = Message::assistant("hey", Emotion::Neutral);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["emotion"], "neutral");
    }
}
