//! Conversation history.

use serde::{Deserialize, Serialize};

use crate::utils::now_millis;

/// Who spoke an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Twin,
    Therapist,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Twin => "twin",
            Self::Therapist => "therapist",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of live session, which decides the role of the remote speaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    #[default]
    Assistant,
    /// Digital twin of a clinician
    Twin,
    Therapy,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assistant => "assistant",
            Self::Twin => "twin",
            Self::Therapy => "therapy",
        }
    }

    /// Parse a session kind, falling back to `Assistant`.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "twin" => Self::Twin,
            "therapy" | "therapist" => Self::Therapy,
            _ => Self::Assistant,
        }
    }

    /// Role recorded for transcripts of the remote speaker.
    pub fn assistant_role(&self) -> Role {
        match self {
            Self::Assistant => Role::Assistant,
            Self::Twin => Role::Twin,
            Self::Therapy => Role::Therapist,
        }
    }
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub role: Role,
    pub content: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
}

impl ConversationEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: now_millis(),
        }
    }
}

/// Append-only list of conversation entries for one session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationHistory {
    entries: Vec<ConversationEntry>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: ConversationEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&ConversationEntry> {
        self.entries.last()
    }

    /// Entries spoken by `role`.
    pub fn by_role(&self, role: Role) -> impl Iterator<Item = &ConversationEntry> {
        self.entries.iter().filter(move |e| e.role == role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_kind_roles() {
        assert_eq!(SessionKind::default().assistant_role(), Role::Assistant);
        assert_eq!(SessionKind::from_str_or_default("Twin").assistant_role(), Role::Twin);
        assert_eq!(
            SessionKind::from_str_or_default("therapy").assistant_role(),
            Role::Therapist
        );
        assert_eq!(SessionKind::from_str_or_default("bogus"), SessionKind::Assistant);
    }

    #[test]
    fn test_history_serializes_as_array() {
        let mut history = ConversationHistory::new();
        history.push(ConversationEntry {
            role: Role::Therapist,
            content: "How are you?".to_string(),
            timestamp: 42,
        });
        let json = serde_json::to_value(&history).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{"role": "therapist", "content": "How are you?", "timestamp": 42}])
        );
        assert_eq!(history.by_role(Role::User).count(), 0);
    }
}
