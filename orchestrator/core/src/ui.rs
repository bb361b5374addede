//! UI Execution Context
//!
//! Display state belongs to one execution context (the host's UI loop). Tokens
//! arrive on provider-owned tasks, so every display mutation is packaged as a
//! closure and posted to that context instead of being applied in place.
//!
//! ```text
//!   provider task ──access(|| sink.append_text(..))──┐
//!   prompt()      ──access(|| sink.add_message(..))──┼──► UiLoop (runs in order)
//!   intake        ──access(|| receiver.clear(..))────┘
//! ```
//!
//! [`UiHandle::access`] never blocks: it enqueues and returns. The host drives
//! the queue either with [`UiLoop::run`] on a task of its own, or by calling
//! [`UiLoop::drain`] from its frame loop.

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A unit of work to run on the UI context
pub type UiTask = Box<dyn FnOnce() + Send + 'static>;

/// Errors posting to the UI context
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum UiError {
    /// The UI loop has been dropped or closed
    #[error("UI context is detached")]
    Detached,
}

/// Cloneable handle for posting work to the UI context
#[derive(Clone, Debug)]
pub struct UiHandle {
    tx: mpsc::UnboundedSender<UiTask>,
}

impl UiHandle {
    /// Post `task` to run later on the UI context
    ///
    /// # Errors
    ///
    /// Returns [`UiError::Detached`] if the loop is gone.
    pub fn access<F>(&self, task: F) -> Result<(), UiError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(Box::new(task)).map_err(|_| UiError::Detached)
    }

    /// Whether the loop is still accepting work
    #[must_use]
    pub fn is_attached(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// The receiving side: runs posted tasks in submission order
pub struct UiLoop {
    rx: mpsc::UnboundedReceiver<UiTask>,
    executed: u64,
}

impl UiLoop {
    /// Create a connected handle/loop pair
    #[must_use]
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (UiHandle, UiLoop) {
        let (tx, rx) = mpsc::unbounded_channel();
        (UiHandle { tx }, UiLoop { rx, executed: 0 })
    }

    /// Run tasks until every handle is dropped or the loop is closed
    pub async fn run(mut self) {
        while let Some(task) = self.rx.recv().await {
            task();
            self.executed += 1;
        }
        tracing::debug!(executed = self.executed, "UI loop finished");
    }

    /// Run the loop on its own tokio task
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Wait for the next task and run it
    ///
    /// Returns `false` once no more tasks can arrive.
    pub async fn run_next(&mut self) -> bool {
        match self.rx.recv().await {
            Some(task) => {
                task();
                self.executed += 1;
                true
            }
            None => false,
        }
    }

    /// Run every task queued right now without waiting
    ///
    /// Returns the number of tasks executed.
    pub fn drain(&mut self) -> usize {
        let mut count = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            count += 1;
        }
        self.executed += count as u64;
        count
    }

    /// Stop accepting new tasks; already queued tasks can still be drained
    pub fn close(&mut self) {
        self.rx.close();
    }

    /// Total tasks executed so far
    #[must_use]
    pub fn executed(&self) -> u64 {
        self.executed
    }
}
