//! Message Entries and Notifications
//!
//! Types the orchestrator hands to display-side collaborators: the message
//! entries a [`MessageSink`](crate::sink::MessageSink) renders, and the
//! attachment notifications hosts can subscribe to.
//!
//! # Design Philosophy
//!
//! The orchestrator never holds a reference into the display. It creates
//! entries by value, identifies them by [`MessageId`], and later refers to them
//! only by that id. This keeps the display free to live on its own execution
//! context while tokens are produced elsewhere.

use serde::{Deserialize, Serialize};

use crate::attachment::{Attachment, AttachmentInfo};

/// Message identifier
///
/// Unique for the lifetime of the process. The id of a user message doubles as
/// the correlation key for attachment notifications.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generate a new unique message ID
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        Self(format!("msg_{id}"))
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who authored a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRole {
    /// User input
    User,
    /// Assistant reply
    Assistant,
}

/// A message entry to display
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique message ID
    pub id: MessageId,
    /// Who sent this message
    pub role: MessageRole,
    /// Display label for the author ("You", "Assistant", ...)
    pub author: String,
    /// Message text
    pub text: String,
    /// Attachments shown alongside the text
    #[serde(default)]
    pub attachments: Vec<AttachmentInfo>,
    /// When the entry was created (Unix timestamp ms)
    pub timestamp_ms: i64,
    /// Whether the entry is still receiving streamed text
    pub streaming: bool,
}

impl ChatMessage {
    /// Create a complete user entry
    pub fn user(author: impl Into<String>, text: impl Into<String>, attachments: &[Attachment]) -> Self {
        Self {
            id: MessageId::new(),
            role: MessageRole::User,
            author: author.into(),
            text: text.into(),
            attachments: attachments.iter().map(Attachment::info).collect(),
            timestamp_ms: now_ms(),
            streaming: false,
        }
    }

    /// Create an empty assistant placeholder that will receive streamed text
    pub fn assistant_placeholder(author: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: MessageRole::Assistant,
            author: author.into(),
            text: String::new(),
            attachments: Vec::new(),
            timestamp_ms: now_ms(),
            streaming: true,
        }
    }

    /// Append streamed text
    pub fn append(&mut self, text: &str) {
        self.text.push_str(text);
    }

    /// Replace the text wholesale
    pub fn replace(&mut self, text: &str) {
        self.text.clear();
        self.text.push_str(text);
    }

    /// Mark streaming as complete
    pub fn complete(&mut self) {
        self.streaming = false;
    }
}

/// Sent when a turn carrying attachments is handed to the provider
#[derive(Clone, Debug)]
pub struct AttachmentSubmission {
    /// Id of the user message that carried the attachments
    pub message_id: MessageId,
    /// The full attachment list at submission time
    pub attachments: Vec<Attachment>,
}

/// Sent when the user clicks an attachment on a previously sent message
#[derive(Clone, Debug)]
pub struct AttachmentClick {
    /// Id of the user message the attachment belongs to
    pub message_id: MessageId,
    /// The clicked attachment
    pub attachment: Attachment,
}

/// Current timestamp in milliseconds
fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
