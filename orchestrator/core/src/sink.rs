//! Message Sink
//!
//! The display-facing collaborator that renders message entries. The
//! orchestrator creates entries by value and afterwards refers to them only by
//! [`MessageId`]: appending streamed text, replacing it on failure, and marking
//! it finished.
//!
//! Every call into a sink is made from the UI context (see [`crate::ui`]), so
//! implementations never race with themselves when the host runs a single UI
//! loop. They must still be `Send + Sync` because the calls are packaged on
//! other threads.
//!
//! [`MessageList`] is a headless sink that keeps the transcript in memory. It
//! is what tests and non-graphical hosts use.

use parking_lot::RwLock;

use crate::messages::{ChatMessage, MessageId, MessageRole};

/// Receives message entries for display
pub trait MessageSink: Send + Sync {
    /// Append a new entry to the list
    fn add_message(&self, message: ChatMessage);

    /// Append streamed text to an entry
    fn append_text(&self, id: &MessageId, text: &str);

    /// Replace the text of an entry
    fn replace_text(&self, id: &MessageId, text: &str);

    /// The entry will receive no more text
    fn finish_message(&self, _id: &MessageId) {}
}

/// In-memory transcript
#[derive(Debug, Default)]
pub struct MessageList {
    messages: RwLock<Vec<ChatMessage>>,
    /// Maximum number of entries to keep (0 = unlimited)
    max_messages: usize,
}

impl MessageList {
    /// Create an unbounded list
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a list that keeps at most `max_messages` entries
    ///
    /// When full, the oldest entries that are not streaming are dropped.
    #[must_use]
    pub fn with_limit(max_messages: usize) -> Self {
        Self {
            messages: RwLock::new(Vec::new()),
            max_messages,
        }
    }

    /// Copy of all entries, oldest first
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.read().clone()
    }

    /// Get an entry by ID
    #[must_use]
    pub fn get(&self, id: &MessageId) -> Option<ChatMessage> {
        self.messages.read().iter().find(|m| &m.id == id).cloned()
    }

    /// Entries authored by `role`, oldest first
    #[must_use]
    pub fn by_role(&self, role: MessageRole) -> Vec<ChatMessage> {
        self.messages
            .read()
            .iter()
            .filter(|m| m.role == role)
            .cloned()
            .collect()
    }

    /// The most recent entry
    #[must_use]
    pub fn last(&self) -> Option<ChatMessage> {
        self.messages.read().last().cloned()
    }

    /// Whether any entry is still streaming
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.messages.read().iter().any(|m| m.streaming)
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    /// Whether the list is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }

    /// Remove every entry
    pub fn clear(&self) {
        self.messages.write().clear();
    }

    fn with_message(&self, id: &MessageId, f: impl FnOnce(&mut ChatMessage)) {
        let mut messages = self.messages.write();
        match messages.iter_mut().find(|m| &m.id == id) {
            Some(msg) => f(msg),
            None => tracing::debug!(message_id = %id, "Update for unknown message ignored"),
        }
    }

    /// Drop the oldest non-streaming entries beyond the limit
    fn prune_if_needed(messages: &mut Vec<ChatMessage>, max_messages: usize) {
        if max_messages == 0 || messages.len() <= max_messages {
            return;
        }

        let mut to_remove = messages.len() - max_messages;
        messages.retain(|msg| {
            if to_remove > 0 && !msg.streaming {
                to_remove -= 1;
                false
            } else {
                true
            }
        });

        tracing::debug!(remaining = messages.len(), "Pruned message list");
    }
}

impl MessageSink for MessageList {
    fn add_message(&self, message: ChatMessage) {
        let mut messages = self.messages.write();
        messages.push(message);
        Self::prune_if_needed(&mut messages, self.max_messages);
    }

    fn append_text(&self, id: &MessageId, text: &str) {
        self.with_message(id, |msg| msg.append(text));
    }

    fn replace_text(&self, id: &MessageId, text: &str) {
        self.with_message(id, |msg| msg.replace(text));
    }

    fn finish_message(&self, id: &MessageId) {
        self.with_message(id, ChatMessage::complete);
    }
}
