//! Attachment hosting.
//!
//! Clients send attachments inline as base64 or `data:` URLs. Each one is
//! stored before the message is persisted and replaced by its public URL.

mod local;

pub use local::LocalMediaStore;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Invalid media payload: {0}")]
    InvalidPayload(String),

    #[error("Attachment of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },

    #[error("Media I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Folder attachments of this kind are filed under
    pub fn folder(&self) -> &'static str {
        match self {
            MediaKind::Image => "chat-images",
            MediaKind::Video => "chat-videos",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }

    fn default_extension(&self) -> &'static str {
        match self {
            MediaKind::Image => "jpg",
            MediaKind::Video => "mp4",
        }
    }
}

#[async_trait]
pub trait MediaUploader: Send + Sync {
    /// Store one attachment and return the URL it is publicly served from
    async fn upload(&self, raw: &str, kind: MediaKind) -> Result<String, MediaError>;

    /// Remove an attachment returned by `upload` that ended up unused.
    ///
    /// Hosts that cannot delete keep the default no-op.
    async fn discard(&self, _url: &str) -> Result<(), MediaError> {
        Ok(())
    }
}
