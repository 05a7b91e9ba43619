//! Bounded conversation history shared by every agent.
//!
//! The history is a ring of exchanges (one user message plus the assistant
//! reply) behind a pinned system prompt. Eviction always drops a whole exchange,
//! oldest first, so the system prompt is never lost and user/assistant messages
//! never get orphaned.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    fn label(self) -> &'static str {
        match self {
            Self::System => "System",
            Self::User => "User",
            Self::Assistant => "Assistant",
        }
    }
}

/// A role-tagged chat message, serialized in the `{role, content}` wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Exchange {
    user: String,
    assistant: String,
    /// Optional note rendered as a system message after the reply.
    annotation: Option<String>,
}

/// Conversation history capped at `max_history` exchanges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationHistory {
    system_prompt: String,
    exchanges: VecDeque<Exchange>,
    max_exchanges: usize,
}

impl ConversationHistory {
    /// Create a history holding at most `max_history` exchanges (minimum 1).
    pub fn new(system_prompt: impl Into<String>, max_history: usize) -> Self {
        let max_exchanges = max_history.max(1);
        Self {
            system_prompt: system_prompt.into(),
            exchanges: VecDeque::with_capacity(max_exchanges),
            max_exchanges,
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn exchange_count(&self) -> usize {
        self.exchanges.len()
    }

    pub fn max_exchanges(&self) -> usize {
        self.max_exchanges
    }

    /// Record a completed exchange, evicting the oldest when full.
    pub fn record(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        if self.exchanges.len() == self.max_exchanges {
            self.exchanges.pop_front();
        }
        self.exchanges.push_back(Exchange {
            user: user.into(),
            assistant: assistant.into(),
            annotation: None,
        });
    }

    /// Attach a note to the most recent exchange.
    ///
    /// Returns `false` when there is no exchange to annotate.
    pub fn annotate_last(&mut self, note: impl Into<String>) -> bool {
        match self.exchanges.back_mut() {
            Some(exchange) => {
                exchange.annotation = Some(note.into());
                true
            }
            None => false,
        }
    }

    /// Drop every exchange, keeping the system prompt.
    pub fn reset(&mut self) {
        self.exchanges.clear();
    }

    /// Messages in wire order, system prompt first.
    pub fn messages(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(1 + self.exchanges.len() * 3);
        out.push(Message::system(self.system_prompt.clone()));
        for exchange in &self.exchanges {
            out.push(Message::user(exchange.user.clone()));
            out.push(Message::assistant(exchange.assistant.clone()));
            if let Some(note) = &exchange.annotation {
                out.push(Message::system(note.clone()));
            }
        }
        out
    }

    /// Messages followed by a pending user message that has no reply yet.
    pub fn messages_with(&self, pending_user: &str) -> Vec<Message> {
        let mut out = self.messages();
        out.push(Message::user(pending_user));
        out
    }

    /// Plain-text transcript for single-prompt backends, ending with the pending message.
    pub fn transcript_with(&self, pending_user: &str) -> String {
        self.messages_with(pending_user)
            .iter()
            .map(|m| format!("{}: {}", m.role.label(), m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
