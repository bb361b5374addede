//! Orchestrator Core - Headless Chat Turn Orchestration
//!
//! This crate coordinates one chat conversation: it takes user text and
//! uploaded files, hands them to a streaming language-model provider, and
//! streams the reply into a message list. It does no rendering itself and
//! works with any UI toolkit, or none.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Host UI                                   │
//! │  ┌────────────┐   ┌──────────────┐   ┌──────────────────────────┐ │
//! │  │ Text input │   │ File upload  │   │ Message list             │ │
//! │  │(InputSurf.)│   │(FileReceiver)│   │(MessageSink)             │ │
//! │  └─────┬──────┘   └──────┬───────┘   └────────────▲─────────────┘ │
//! │        │ submit          │ upload/remove          │ UiLoop runs   │
//! └────────┼─────────────────┼────────────────────────┼───────────────┘
//!          │                 │                        │ UiHandle::access
//! ┌────────┼─────────────────┼────────────────────────┼───────────────┐
//! │        ▼                 ▼                        │               │
//! │  ┌──────────────┐  ┌────────────┐                 │               │
//! │  │ Orchestrator │◄─┤ FileIntake │                 │               │
//! │  │  (1 turn at  │  └────────────┘                 │               │
//! │  │   a time)    ├─────────── tokens ──────────────┘               │
//! │  └──────┬───────┘                                                 │
//! │         │ ConversationRequest                                     │
//! │         ▼                                                         │
//! │  ┌──────────────────────┐                                         │
//! │  │ StreamingProvider    │  Ollama, Scripted, ...                  │
//! │  └──────────────────────┘             ORCHESTRATOR CORE           │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Orchestrator`]: Single-in-flight turn coordination
//! - [`FileIntake`]: Pending attachments between turns
//! - [`StreamingProvider`]: Model backend abstraction
//! - [`MessageSink`]: Display-side message list
//! - [`UiHandle`] / [`UiLoop`]: Marshaling display updates to one context
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use orchestrator_core::{
//!     load_config, MessageList, OllamaProvider, Orchestrator, UiLoop,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = load_config()?;
//!     let (ui, ui_loop) = UiLoop::new();
//!     let messages = Arc::new(MessageList::new());
//!
//!     let provider = OllamaProvider::from_settings(&settings.provider)?;
//!     let orchestrator = Orchestrator::builder(Arc::new(provider))
//!         .settings(&settings)
//!         .message_sink(messages.clone())
//!         .ui(ui)
//!         .build()?;
//!
//!     ui_loop.spawn();
//!     if let Some(turn) = orchestrator.prompt("Hello!")?.into_handle() {
//!         turn.wait().await;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`attachment`]: Uploaded files
//! - [`config`]: TOML/env settings loading
//! - [`input`]: Text input surfaces
//! - [`intake`]: Pending attachment buffer and upload wiring
//! - [`messages`]: Message entries and attachment notifications
//! - [`orchestrator`]: Turn coordination
//! - [`plugin`]: Turn observers
//! - [`provider`]: Streaming model providers
//! - [`request`]: Per-turn request snapshots
//! - [`sink`]: Message display trait and headless list
//! - [`ui`]: UI execution context

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod attachment;
pub mod config;
pub mod input;
pub mod intake;
pub mod messages;
pub mod orchestrator;
pub mod plugin;
pub mod provider;
pub mod request;
pub mod sink;
pub mod ui;

// Re-exports for convenience
pub use attachment::{Attachment, AttachmentInfo, AttachmentMeta};
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, OrchestratorSettings, OrchestratorToml, ProviderSettings,
};
pub use input::{InputSurface, SubmitListener, TextInput};
pub use intake::{AttachmentError, FileIntake, FileReceiver, IntakeLimits};
pub use messages::{AttachmentClick, AttachmentSubmission, ChatMessage, MessageId, MessageRole};
pub use orchestrator::{
    Orchestrator, OrchestratorBuilder, OrchestratorError, PromptOutcome, TurnError, TurnHandle,
    TurnOutcome, TurnState, FAILURE_MESSAGE, TIMEOUT_MESSAGE,
};
pub use plugin::OrchestratorPlugin;
pub use provider::{
    OllamaProvider, ProviderError, Script, ScriptedProvider, StreamingProvider, StreamingToken,
};
pub use request::{resolve_system_prompt, ConversationRequest, RequestError, Tool};
pub use sink::{MessageList, MessageSink};
pub use ui::{UiError, UiHandle, UiLoop};
