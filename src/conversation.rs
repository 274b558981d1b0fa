//! Conversation turns, history, and message list construction
//!
//! The message list sent upstream is always:
//!
//! ```text
//! [system: character description] + history... + [user: current input]
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person talking to the character
    User,
    /// The character description and the character's replies
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::System => f.write_str("system"),
        }
    }
}

/// One role-tagged utterance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    role: Role,
    content: String,
}

impl Turn {
    /// Create a user turn
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create a system turn
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Ordered record of completed exchanges
///
/// Grows by one `(user, system)` pair per completed cycle and is never
/// pruned on its own.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
}

impl ConversationHistory {
    #[must_use]
    pub const fn new() -> Self {
        Self { turns: Vec::new() }
    }

    /// Append a completed exchange: the user's input, then the reply
    pub fn push_exchange(&mut self, input: impl Into<String>, reply: impl Into<String>) {
        self.turns.push(Turn::user(input));
        self.turns.push(Turn::system(reply));
    }

    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Number of completed exchanges
    #[must_use]
    pub fn exchanges(&self) -> usize {
        self.turns.len() / 2
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// Build the message list for one chat request
///
/// The character description appears exactly once, first. History follows in
/// chronological order and the current input is the final `user` turn.
#[must_use]
pub fn build_messages(character: &str, history: &[Turn], input: &str) -> Vec<Turn> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Turn::system(character));
    messages.extend(history.iter().cloned());
    messages.push(Turn::user(input));
    messages
}
