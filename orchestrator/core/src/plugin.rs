//! Orchestrator Plugins
//!
//! Hooks for code that wants to observe turns without owning them: audit
//! logging, usage accounting, prompt inspection. Plugins are registered on the
//! builder and called in registration order.
//!
//! Hooks run inline on the orchestrator's path (`on_request` inside
//! `prompt`, `on_turn_finished` on the streaming task) and must return
//! quickly.

use crate::messages::MessageId;
use crate::orchestrator::TurnOutcome;
use crate::request::ConversationRequest;

/// Observer of orchestrator turns
pub trait OrchestratorPlugin: Send + Sync {
    /// Plugin name for logs
    fn name(&self) -> &str;

    /// A request is about to be handed to the provider
    fn on_request(&self, _request: &ConversationRequest) {}

    /// A turn reached a terminal state
    ///
    /// `message_id` is the id of the user message that started the turn.
    fn on_turn_finished(&self, _message_id: &MessageId, _outcome: &TurnOutcome) {}
}
