//! Streaming Providers
//!
//! Abstracted access to language models through a common trait.
//!
//! # Available Providers
//!
//! - **Ollama**: local model server over `/api/chat`
//! - **Scripted**: replays canned responses; for tests and headless demos
//!
//! # Usage
//!
//! ```ignore
//! use orchestrator_core::provider::{OllamaProvider, StreamingProvider};
//!
//! let provider = OllamaProvider::from_env()?;
//! let rx = provider.send_streaming(&request).await?;
//! ```

mod ollama;
mod scripted;
mod traits;

pub use ollama::OllamaProvider;
pub use scripted::{Script, ScriptedProvider};
pub use traits::{ProviderError, StreamingProvider, StreamingToken};
