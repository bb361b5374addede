//! Scripted Provider
//!
//! Replays canned responses instead of calling a model. Each call to
//! `send_streaming` consumes the next queued [`Script`]; once the queue is
//! empty the fallback script is used. Every request is recorded so callers can
//! inspect what the orchestrator sent.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use super::traits::{ProviderError, StreamingProvider, StreamingToken};
use crate::request::ConversationRequest;

/// How one response plays out
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Script {
    /// Emit the tokens, then complete
    Tokens(Vec<String>),
    /// Emit the tokens, then report a stream error
    FailMidStream {
        /// Tokens emitted before the error
        tokens: Vec<String>,
        /// Error text
        error: String,
    },
    /// Emit the tokens, then stay open until the receiver is dropped
    Hang(Vec<String>),
    /// Refuse to start the stream
    FailToStart(String),
}

impl Script {
    /// Convenience for [`Script::Tokens`]
    pub fn tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Tokens(tokens.into_iter().map(Into::into).collect())
    }

    /// A response that never produces anything
    #[must_use]
    pub fn silent() -> Self {
        Self::Hang(Vec::new())
    }
}

/// Provider that replays [`Script`]s
#[derive(Clone)]
pub struct ScriptedProvider {
    name: String,
    queue: Arc<Mutex<VecDeque<Script>>>,
    fallback: Script,
    requests: Arc<Mutex<Vec<ConversationRequest>>>,
    request_seen: Arc<Notify>,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new(Script::Tokens(Vec::new()))
    }
}

impl ScriptedProvider {
    /// Create a provider that plays `fallback` for every call
    #[must_use]
    pub fn new(fallback: Script) -> Self {
        Self {
            name: "Scripted".to_string(),
            queue: Arc::new(Mutex::new(VecDeque::new())),
            fallback,
            requests: Arc::new(Mutex::new(Vec::new())),
            request_seen: Arc::new(Notify::new()),
        }
    }

    /// Always reply with `tokens`
    pub fn replying<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Script::tokens(tokens))
    }

    /// Set the provider name reported in logs
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Queue a script for the next unscripted call
    #[must_use]
    pub fn then(self, script: Script) -> Self {
        self.push(script);
        self
    }

    /// Queue a script on a shared provider
    pub fn push(&self, script: Script) {
        self.queue.lock().push_back(script);
    }

    /// Requests received so far, oldest first
    #[must_use]
    pub fn requests(&self) -> Vec<ConversationRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests received so far
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Wait until at least `count` requests have been received
    pub async fn wait_for_requests(&self, count: usize) {
        loop {
            let notified = self.request_seen.notified();
            if self.request_count() >= count {
                return;
            }
            notified.await;
        }
    }

    fn next_script(&self) -> Script {
        self.queue.lock().pop_front().unwrap_or_else(|| self.fallback.clone())
    }
}

async fn emit(tx: &mpsc::Sender<StreamingToken>, tokens: Vec<String>) -> bool {
    for token in tokens {
        if tx.send(StreamingToken::Token(token)).await.is_err() {
            return false;
        }
    }
    true
}

#[async_trait]
impl StreamingProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn send_streaming(
        &self,
        request: &ConversationRequest,
    ) -> Result<mpsc::Receiver<StreamingToken>, ProviderError> {
        let script = self.next_script();
        self.requests.lock().push(request.clone());
        self.request_seen.notify_waiters();

        let (tx, rx) = mpsc::channel(32);
        match script {
            Script::FailToStart(reason) => {
                return Err(ProviderError::Unavailable(reason));
            }
            Script::Tokens(tokens) => {
                tokio::spawn(async move {
                    if emit(&tx, tokens).await {
                        let _ = tx.send(StreamingToken::Complete).await;
                    }
                });
            }
            Script::FailMidStream { tokens, error } => {
                tokio::spawn(async move {
                    if emit(&tx, tokens).await {
                        let _ = tx.send(StreamingToken::Error(error)).await;
                    }
                });
            }
            Script::Hang(tokens) => {
                tokio::spawn(async move {
                    if emit(&tx, tokens).await {
                        tx.closed().await;
                    }
                });
            }
        }

        Ok(rx)
    }
}
