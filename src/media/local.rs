use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use uuid::Uuid;

use crate::config::MediaConfig;
use crate::metrics::MediaMetrics;

use super::{MediaError, MediaKind, MediaUploader};

/// Writes attachments below a local directory that the HTTP layer serves
/// under `public_base_url`.
pub struct LocalMediaStore {
    root: PathBuf,
    public_base_url: String,
    max_bytes: usize,
}

/// A decoded attachment ready to be written
struct DecodedMedia {
    bytes: Vec<u8>,
    extension: &'static str,
}

impl LocalMediaStore {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            root: PathBuf::from(&config.root_dir),
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
            max_bytes: config.max_upload_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn decode(&self, raw: &str, kind: MediaKind) -> Result<DecodedMedia, MediaError> {
        let raw = raw.trim();
        let (mime, data) = match raw.strip_prefix("data:") {
            Some(rest) => {
                let (header, data) = rest
                    .split_once(',')
                    .ok_or_else(|| MediaError::InvalidPayload("data URL has no payload".into()))?;
                let mime = header.strip_suffix(";base64").ok_or_else(|| {
                    MediaError::InvalidPayload("only base64 data URLs are supported".into())
                })?;
                (Some(mime), data)
            }
            None => (None, raw),
        };

        if data.is_empty() {
            return Err(MediaError::InvalidPayload("empty attachment".into()));
        }

        let extension = match mime {
            Some(mime) => extension_for(mime, kind)?,
            None => kind.default_extension(),
        };

        // reject before allocating the decoded buffer
        let estimated = data.len() / 4 * 3;
        if estimated > self.max_bytes + 2 {
            return Err(MediaError::TooLarge {
                size: estimated,
                max: self.max_bytes,
            });
        }

        let bytes = STANDARD
            .decode(data)
            .map_err(|e| MediaError::InvalidPayload(e.to_string()))?;

        if bytes.len() > self.max_bytes {
            return Err(MediaError::TooLarge {
                size: bytes.len(),
                max: self.max_bytes,
            });
        }

        Ok(DecodedMedia { bytes, extension })
    }

    async fn store(&self, media: DecodedMedia, kind: MediaKind) -> Result<String, MediaError> {
        let dir = self.root.join(kind.folder());
        tokio::fs::create_dir_all(&dir).await?;

        let file_name = format!("{}.{}", Uuid::new_v4(), media.extension);
        tokio::fs::write(dir.join(&file_name), &media.bytes).await?;

        tracing::debug!(
            kind = kind.as_str(),
            file = %file_name,
            bytes = media.bytes.len(),
            "Attachment stored"
        );

        Ok(format!(
            "{}/{}/{}",
            self.public_base_url,
            kind.folder(),
            file_name
        ))
    }

    /// Map a URL produced by `store` back to its file. Anything else is None.
    fn path_for(&self, url: &str) -> Option<PathBuf> {
        let rest = url.strip_prefix(&self.public_base_url)?.strip_prefix('/')?;
        let (folder, file) = rest.split_once('/')?;
        if folder != MediaKind::Image.folder() && folder != MediaKind::Video.folder() {
            return None;
        }
        if file.is_empty() || file.starts_with('.') || file.contains(['/', '\\']) {
            return None;
        }
        Some(self.root.join(folder).join(file))
    }
}

/// File extension for a declared MIME type, checked against the expected kind
fn extension_for(mime: &str, kind: MediaKind) -> Result<&'static str, MediaError> {
    let (top, sub) = mime
        .split_once('/')
        .ok_or_else(|| MediaError::InvalidPayload(format!("malformed MIME type {}", mime)))?;

    if top != kind.as_str() {
        return Err(MediaError::InvalidPayload(format!(
            "expected {} attachment, got {}",
            kind.as_str(),
            mime
        )));
    }

    Ok(match sub {
        "png" => "png",
        "jpeg" | "jpg" => "jpg",
        "gif" => "gif",
        "webp" => "webp",
        "mp4" => "mp4",
        "webm" => "webm",
        "quicktime" => "mov",
        _ => kind.default_extension(),
    })
}

#[async_trait]
impl MediaUploader for LocalMediaStore {
    async fn upload(&self, raw: &str, kind: MediaKind) -> Result<String, MediaError> {
        let result = match self.decode(raw, kind) {
            Ok(media) => self.store(media, kind).await,
            Err(e) => Err(e),
        };

        MediaMetrics::record_upload(kind.as_str(), result.is_ok());
        if let Err(e) = &result {
            tracing::warn!(kind = kind.as_str(), error = %e, "Attachment upload failed");
        }
        result
    }

    async fn discard(&self, url: &str) -> Result<(), MediaError> {
        let path = self.path_for(url).ok_or_else(|| {
            MediaError::InvalidPayload(format!("{} is not a stored attachment", url))
        })?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(url = %url, "Attachment discarded");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir, max_upload_bytes: usize) -> LocalMediaStore {
        LocalMediaStore::new(&MediaConfig {
            root_dir: dir.path().to_string_lossy().into_owned(),
            public_base_url: "http://cdn.test/media/".to_string(),
            max_upload_bytes,
        })
    }

    #[tokio::test]
    async fn test_data_url_image_upload() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, 1024);
        let payload = format!("data:image/png;base64,{}", STANDARD.encode(b"\x89PNGdata"));

        let url = store.upload(&payload, MediaKind::Image).await.unwrap();
        assert!(url.starts_with("http://cdn.test/media/chat-images/"));
        assert!(url.ends_with(".png"));

        let file_name = url.rsplit('/').next().unwrap();
        let written = std::fs::read(dir.path().join("chat-images").join(file_name)).unwrap();
        assert_eq!(written, b"\x89PNGdata");
    }

    #[tokio::test]
    async fn test_bare_base64_video_uses_default_extension() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, 1024);

        let url = store
            .upload(&STANDARD.encode(b"frames"), MediaKind::Video)
            .await
            .unwrap();
        assert!(url.contains("/chat-videos/"));
        assert!(url.ends_with(".mp4"));
    }

    #[tokio::test]
    async fn test_rejects_wrong_kind_and_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, 1024);

        let video_as_image = format!("data:video/mp4;base64,{}", STANDARD.encode(b"x"));
        assert!(matches!(
            store.upload(&video_as_image, MediaKind::Image).await,
            Err(MediaError::InvalidPayload(_))
        ));
        assert!(matches!(
            store.upload("not base64!!", MediaKind::Image).await,
            Err(MediaError::InvalidPayload(_))
        ));
        assert!(matches!(
            store.upload("data:image/png;base64,", MediaKind::Image).await,
            Err(MediaError::InvalidPayload(_))
        ));
    }

    #[tokio::test]
    async fn test_discard_removes_stored_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, 1024);

        let url = store
            .upload(&STANDARD.encode(b"pixels"), MediaKind::Image)
            .await
            .unwrap();
        let file_name = url.rsplit('/').next().unwrap().to_string();
        let path = dir.path().join("chat-images").join(&file_name);
        assert!(path.exists());

        store.discard(&url).await.unwrap();
        assert!(!path.exists());
        // already gone
        store.discard(&url).await.unwrap();
    }

    #[tokio::test]
    async fn test_discard_refuses_foreign_urls() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, 1024);
        std::fs::write(dir.path().join("keep.txt"), b"x").unwrap();

        for url in [
            "https://elsewhere.test/chat-images/a.jpg",
            "http://cdn.test/media/other/a.jpg",
            "http://cdn.test/media/chat-images/../keep.txt",
            "http://cdn.test/media/chat-images/",
        ] {
            assert!(
                matches!(store.discard(url).await, Err(MediaError::InvalidPayload(_))),
                "{} should be refused",
                url
            );
        }
        assert!(dir.path().join("keep.txt").exists());
    }

    #[tokio::test]
    async fn test_rejects_oversized_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, 8);

        let result = store
            .upload(&STANDARD.encode([0u8; 64]), MediaKind::Image)
            .await;
        assert!(matches!(result, Err(MediaError::TooLarge { max: 8, .. })));
    }
}
