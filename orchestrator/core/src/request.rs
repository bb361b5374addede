//! Conversation Requests
//!
//! A [`ConversationRequest`] is the immutable snapshot of one user turn: the
//! text, the attachments taken from the intake, the system prompt resolved for
//! this turn, and the tool handles the provider may call. It is built fresh for
//! every turn and consumed once by the provider.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::attachment::Attachment;
use crate::messages::MessageId;

/// Errors building a request
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    /// The user message is empty or whitespace-only
    #[error("user message must not be blank")]
    BlankMessage,
}

/// Opaque tool handle passed through to the provider
///
/// The orchestrator never looks inside a tool. Providers that understand a
/// concrete tool type can recover it with [`Tool::downcast_ref`].
#[derive(Clone)]
pub struct Tool {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Tool {
    /// Wrap a provider-specific tool object
    pub fn new<T: Any + Send + Sync>(tool: T) -> Self {
        Self {
            inner: Arc::new(tool),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Rust type name of the wrapped object
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Borrow the wrapped object as `T`
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Tool").field(&self.type_name).finish()
    }
}

/// One user turn as seen by the provider
#[derive(Clone, Debug)]
pub struct ConversationRequest {
    message_id: MessageId,
    user_message: String,
    attachments: Vec<Attachment>,
    system_prompt: Option<String>,
    tools: Vec<Tool>,
}

impl ConversationRequest {
    /// Build a request
    ///
    /// `system_prompt` is resolved with [`resolve_system_prompt`], so callers
    /// may pass the configured prompt as-is.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::BlankMessage`] if `user_message` is blank.
    pub fn new(
        message_id: MessageId,
        user_message: impl Into<String>,
        attachments: Vec<Attachment>,
        system_prompt: Option<&str>,
        tools: Vec<Tool>,
    ) -> Result<Self, RequestError> {
        let user_message = user_message.into();
        if user_message.trim().is_empty() {
            return Err(RequestError::BlankMessage);
        }

        Ok(Self {
            message_id,
            user_message,
            attachments,
            system_prompt: resolve_system_prompt(system_prompt),
            tools,
        })
    }

    /// Id of the user message entry that started this turn
    #[must_use]
    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    /// The user's text
    #[must_use]
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Attachments submitted with this turn, in upload order
    #[must_use]
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// System prompt resolved for this turn
    #[must_use]
    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// Tools available to the provider
    #[must_use]
    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }
}

/// Resolve a configured system prompt
///
/// Blank or absent prompts resolve to `None`; anything else is trimmed.
#[must_use]
pub fn resolve_system_prompt(configured: Option<&str>) -> Option<String> {
    configured
        .map(str::trim)
        .filter(|prompt| !prompt.is_empty())
        .map(str::to_string)
}
