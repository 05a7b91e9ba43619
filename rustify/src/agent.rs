//! A conversation with one backend: system prompt, bounded history, one client.

use tracing::debug;

use crate::core::history::ConversationHistory;
use crate::io::client::{ClientError, CompletionClient, CompletionOptions, Prompt, PromptShape};

/// Conversation state bound to a named backend.
///
/// Each controller owns one agent, so the converter, the repair loop, the
/// explainer and the router keep separate histories over a shared client.
pub struct Agent<'a> {
    client: &'a dyn CompletionClient,
    backend: String,
    history: ConversationHistory,
}

impl<'a> Agent<'a> {
    pub fn new(
        client: &'a dyn CompletionClient,
        backend: impl Into<String>,
        system_prompt: &str,
        max_history: usize,
    ) -> Self {
        Self {
            client,
            backend: backend.into(),
            history: ConversationHistory::new(system_prompt.trim(), max_history),
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// Send `input` with the conversation so far and record the exchange.
    ///
    /// Chat backends receive the message list; text backends receive a
    /// role-labelled transcript. Failed calls leave the history untouched.
    pub fn chat(&mut self, input: &str, options: &CompletionOptions) -> Result<String, ClientError> {
        let prompt = match self.client.shape(&self.backend)? {
            PromptShape::Messages => Prompt::Messages(self.history.messages_with(input)),
            PromptShape::Text => Prompt::Text(format!(
                "{}\nAssistant:",
                self.history.transcript_with(input)
            )),
        };
        let reply = self.client.complete(&self.backend, &prompt, options)?;
        debug!(
            backend = %self.backend,
            exchanges = self.history.exchange_count() + 1,
            "recorded exchange"
        );
        self.history.record(input, reply.clone());
        Ok(reply)
    }

    /// Attach a system note to the latest exchange.
    pub fn annotate(&mut self, note: impl Into<String>) {
        self.history.annotate_last(note);
    }
}

/// First `max_chars` characters of `text`, marked when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
