//! Streaming Provider Traits
//!
//! The orchestrator talks to language models only through
//! [`StreamingProvider`]. A provider turns one [`ConversationRequest`] into a
//! channel of [`StreamingToken`]s produced on its own task.
//!
//! # Stream contract
//!
//! - Tokens arrive in generation order.
//! - The stream ends with [`StreamingToken::Complete`] or
//!   [`StreamingToken::Error`]. A channel that simply closes counts as
//!   completion.
//! - Dropping the receiver is cancellation: producers must stop once a send
//!   fails (or once `Sender::closed` resolves).

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::request::ConversationRequest;

/// Token stream events from providers
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamingToken {
    /// A fragment of the response
    Token(String),
    /// Response completed successfully
    Complete,
    /// Error occurred during streaming
    Error(String),
}

/// Errors starting a stream
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider could not be reached
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The provider answered with a non-success status
    #[error("provider returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, if any
        body: String,
    },

    /// HTTP transport failure
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Anything else
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Streaming provider trait
///
/// Implement this to plug a model backend into the orchestrator.
#[async_trait]
pub trait StreamingProvider: Send + Sync {
    /// Provider name for logs (e.g., "Ollama")
    fn name(&self) -> &str;

    /// Check if the provider is reachable
    async fn health_check(&self) -> bool;

    /// Start streaming a response to `request`
    ///
    /// Returns as soon as the stream is established; tokens are produced on a
    /// task owned by the provider.
    async fn send_streaming(
        &self,
        request: &ConversationRequest,
    ) -> Result<mpsc::Receiver<StreamingToken>, ProviderError>;
}
