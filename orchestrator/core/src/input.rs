//! Input Surface
//!
//! The text box a host shows. The orchestrator subscribes one listener per
//! wired surface and forwards submitted text into
//! [`Orchestrator::prompt`](crate::Orchestrator::prompt).

use std::sync::Arc;

use parking_lot::RwLock;

/// Called with the submitted text
pub type SubmitListener = Arc<dyn Fn(String) + Send + Sync>;

/// A component that lets the user submit text
pub trait InputSurface: Send + Sync {
    /// Register a listener for submissions
    fn on_submit(&self, listener: SubmitListener);
}

/// Headless input surface for tests and programmatic hosts
#[derive(Default)]
pub struct TextInput {
    listeners: RwLock<Vec<SubmitListener>>,
}

impl TextInput {
    /// Create an input with no listeners
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit `text` to every listener, as if the user pressed enter
    pub fn submit(&self, text: impl Into<String>) {
        let text = text.into();
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener(text.clone());
        }
    }

    /// Number of registered listeners
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl InputSurface for TextInput {
    fn on_submit(&self, listener: SubmitListener) {
        self.listeners.write().push(listener);
    }
}

impl std::fmt::Debug for TextInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextInput")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
