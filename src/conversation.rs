//! Ordered message history sent to the text oracle.
//!
//! A [`Conversation`] is a value: appending returns a new conversation and
//! leaves the original untouched, so a retry loop can rebuild its history
//! from a fixed base without earlier attempts leaking in.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a conversation with a system instruction.
    pub fn with_system_prompt(content: impl Into<String>) -> Self {
        Self::new().with(Role::System, content)
    }

    /// A copy of this conversation with one more message.
    pub fn with(&self, role: Role, content: impl Into<String>) -> Self {
        let mut messages = self.messages.clone();
        messages.push(Message::new(role, content));
        Self { messages }
    }

    pub fn with_system(&self, content: impl Into<String>) -> Self {
        self.with(Role::System, content)
    }

    pub fn with_user(&self, content: impl Into<String>) -> Self {
        self.with(Role::User, content)
    }

    pub fn with_assistant(&self, content: impl Into<String>) -> Self {
        self.with(Role::Assistant, content)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Flatten the history into a single prompt for oracles that accept
    /// plain text only.
    pub fn render(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("[{}]\n{}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
