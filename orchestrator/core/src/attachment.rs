//! Attachments
//!
//! An attachment is one uploaded file waiting to be sent with the next turn.
//! Attachments are immutable: the bytes are shared behind an `Arc` so a
//! snapshot handed to the provider and the copy retained for click
//! correlation never duplicate the payload.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Metadata an upload surface reports for a completed file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMeta {
    /// File name (unique within a pending batch)
    pub name: String,
    /// MIME type as reported by the uploader
    pub mime_type: String,
}

impl AttachmentMeta {
    /// Create metadata for an uploaded file
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// One uploaded file pending submission
#[derive(Clone, PartialEq, Eq)]
pub struct Attachment {
    name: String,
    mime_type: String,
    data: Arc<[u8]>,
}

impl Attachment {
    /// Create an attachment from upload metadata and the file contents
    pub fn new(meta: AttachmentMeta, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: meta.name,
            mime_type: meta.mime_type,
            data: Arc::from(data.into()),
        }
    }

    /// File name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// MIME type
    #[must_use]
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Raw file contents
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Size of the contents in bytes
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Whether the MIME type denotes an image
    #[must_use]
    pub fn is_image(&self) -> bool {
        self.mime_type
            .split('/')
            .next()
            .is_some_and(|top| top.eq_ignore_ascii_case("image"))
    }

    /// Display-side description (no payload)
    #[must_use]
    pub fn info(&self) -> AttachmentInfo {
        AttachmentInfo {
            name: self.name.clone(),
            mime_type: self.mime_type.clone(),
            size: self.size(),
        }
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.data.len())
            .finish()
    }
}

/// What a message entry shows about an attachment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentInfo {
    /// File name
    pub name: String,
    /// MIME type
    pub mime_type: String,
    /// Size in bytes
    pub size: usize,
}
