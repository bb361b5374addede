//! File Intake
//!
//! Buffers attachments uploaded between turns and hands the batch to the
//! orchestrator when a turn is submitted.
//!
//! # Guarantees
//!
//! - No two pending attachments share a name.
//! - [`FileIntake::take_attachments`] snapshots and empties the batch under a
//!   single lock acquisition, so an upload that lands after the snapshot
//!   belongs to the next turn, never the current one.
//! - Upload callbacks may fire concurrently from any thread.
//!
//! # Wiring
//!
//! A [`FileReceiver`] is the upload widget a host shows. Attaching one with
//! [`FileIntake::attach_receiver`] installs the duplicate-checking upload
//! handler and the removal listener on it; the intake only keeps weak
//! references to itself inside those callbacks.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::attachment::{Attachment, AttachmentMeta};
use crate::config::ConfigError;

// =============================================================================
// Error Types
// =============================================================================

/// Reasons an upload is rejected before it reaches the pending batch
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AttachmentError {
    /// A pending attachment already has this name
    #[error("an attachment named '{name}' is already pending")]
    Duplicate {
        /// The colliding file name
        name: String,
    },

    /// The pending batch is full
    #[error("at most {limit} attachments can be pending")]
    TooMany {
        /// Configured maximum
        limit: usize,
    },

    /// The file exceeds the configured size limit
    #[error("attachment '{name}' is {size} bytes (max: {limit})")]
    TooLarge {
        /// The rejected file name
        name: String,
        /// Actual size in bytes
        size: usize,
        /// Configured maximum in bytes
        limit: usize,
    },
}

// =============================================================================
// Limits
// =============================================================================

/// Bounds on the pending batch (`0` = unlimited)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IntakeLimits {
    /// Maximum number of pending attachments
    pub max_attachments: usize,
    /// Maximum size of a single attachment in bytes
    pub max_attachment_bytes: usize,
}

impl IntakeLimits {
    /// No limits
    #[must_use]
    pub fn unlimited() -> Self {
        Self::default()
    }

    fn check(&self, pending: usize, name: &str, size: usize) -> Result<(), AttachmentError> {
        if self.max_attachments > 0 && pending >= self.max_attachments {
            return Err(AttachmentError::TooMany {
                limit: self.max_attachments,
            });
        }
        if self.max_attachment_bytes > 0 && size > self.max_attachment_bytes {
            return Err(AttachmentError::TooLarge {
                name: name.to_string(),
                size,
                limit: self.max_attachment_bytes,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Upload Surface
// =============================================================================

/// Callback invoked when an upload completes
pub type UploadHandler =
    Arc<dyn Fn(AttachmentMeta, Vec<u8>) -> Result<(), AttachmentError> + Send + Sync>;

/// Callback invoked when the user removes a file from the upload list
pub type RemovalListener = Arc<dyn Fn(&str) + Send + Sync>;

/// An upload widget that reports completed and removed files
pub trait FileReceiver: Send + Sync {
    /// Whether an upload handler is already installed
    fn has_upload_handler(&self) -> bool;

    /// Install the handler called for each completed upload
    fn set_upload_handler(&self, handler: UploadHandler);

    /// Register a listener for user-initiated removals
    fn add_file_removed_listener(&self, listener: RemovalListener);

    /// Clear the visual list of uploaded files
    fn clear_file_list(&self);
}

// =============================================================================
// File Intake
// =============================================================================

/// Pending-attachment buffer
#[derive(Default)]
pub struct FileIntake {
    pending: Mutex<Vec<Attachment>>,
    limits: IntakeLimits,
    receiver: RwLock<Option<Arc<dyn FileReceiver>>>,
}

impl FileIntake {
    /// Create an intake without limits
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an intake with limits
    #[must_use]
    pub fn with_limits(limits: IntakeLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Configured limits
    #[must_use]
    pub fn limits(&self) -> IntakeLimits {
        self.limits
    }

    /// Add a completed upload to the pending batch
    ///
    /// # Errors
    ///
    /// Returns [`AttachmentError::Duplicate`] if a pending attachment has the
    /// same name, or a limit error if the batch or file is too large.
    pub fn add_attachment(&self, meta: AttachmentMeta, data: Vec<u8>) -> Result<(), AttachmentError> {
        let mut pending = self.pending.lock();

        if pending.iter().any(|a| a.name() == meta.name) {
            tracing::debug!(name = %meta.name, "Rejected duplicate attachment");
            return Err(AttachmentError::Duplicate { name: meta.name });
        }
        self.limits.check(pending.len(), &meta.name, data.len())?;

        let attachment = Attachment::new(meta, data);
        tracing::debug!(
            name = %attachment.name(),
            mime_type = %attachment.mime_type(),
            size = attachment.size(),
            pending = pending.len() + 1,
            "Attachment pending"
        );
        pending.push(attachment);
        Ok(())
    }

    /// Remove the first pending attachment with `name`
    ///
    /// Returns whether anything was removed.
    pub fn remove_attachment(&self, name: &str) -> bool {
        let mut pending = self.pending.lock();
        match pending.iter().position(|a| a.name() == name) {
            Some(idx) => {
                pending.remove(idx);
                tracing::debug!(name = %name, "Attachment removed");
                true
            }
            None => false,
        }
    }

    /// Snapshot and empty the pending batch atomically
    pub fn take_attachments(&self) -> Vec<Attachment> {
        std::mem::take(&mut *self.pending.lock())
    }

    /// Discard the pending batch and clear the wired display
    pub fn clear_pending_attachments(&self) {
        let discarded = self.take_attachments();
        if !discarded.is_empty() {
            tracing::debug!(count = discarded.len(), "Discarded pending attachments");
        }
        self.clear_display();
    }

    /// Tell the wired display (if any) to clear its visual upload list
    pub fn clear_display(&self) {
        // Clone out of the lock: the widget may call back into the intake
        if let Some(receiver) = self.receiver() {
            receiver.clear_file_list();
        }
    }

    /// Copy of the pending batch
    #[must_use]
    pub fn pending(&self) -> Vec<Attachment> {
        self.pending.lock().clone()
    }

    /// Names of the pending attachments, in upload order
    #[must_use]
    pub fn pending_names(&self) -> Vec<String> {
        self.pending
            .lock()
            .iter()
            .map(|a| a.name().to_string())
            .collect()
    }

    /// Number of pending attachments
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether nothing is pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// The wired display, if any
    #[must_use]
    pub fn receiver(&self) -> Option<Arc<dyn FileReceiver>> {
        self.receiver.read().clone()
    }

    /// Wire an upload widget to this intake
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UploadHandlerAlreadySet`] if the receiver already
    /// has an upload handler, and [`ConfigError::ReceiverAlreadyAttached`] if
    /// this intake is already wired to a receiver.
    pub fn attach_receiver(self: &Arc<Self>, receiver: Arc<dyn FileReceiver>) -> Result<(), ConfigError> {
        let mut slot = self.receiver.write();
        if slot.is_some() {
            return Err(ConfigError::ReceiverAlreadyAttached);
        }
        if receiver.has_upload_handler() {
            return Err(ConfigError::UploadHandlerAlreadySet);
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        receiver.set_upload_handler(Arc::new(move |meta, data| match weak.upgrade() {
            Some(intake) => intake.add_attachment(meta, data),
            None => {
                tracing::debug!(name = %meta.name, "Upload arrived after intake was dropped");
                Ok(())
            }
        }));

        let weak: Weak<Self> = Arc::downgrade(self);
        receiver.add_file_removed_listener(Arc::new(move |name| {
            if let Some(intake) = weak.upgrade() {
                intake.remove_attachment(name);
            }
        }));

        *slot = Some(receiver);
        Ok(())
    }
}

impl std::fmt::Debug for FileIntake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileIntake")
            .field("pending", &self.pending_names())
            .field("limits", &self.limits)
            .field("has_receiver", &self.receiver.read().is_some())
            .finish()
    }
}
