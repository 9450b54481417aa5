use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use log::{info, warn};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::models::Attachment;

/// Upload types accepted for attachments, by sniffed content.
pub const ALLOWED_MIME: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "video/webm",
    "video/mp4",
];

/// Public prefix under which stored files are served.
pub const MEDIA_PREFIX: &str = "media";

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("empty upload")]
    Empty,
    #[error("file exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("unsupported file type")]
    Unsupported,
    #[error("not_found")]
    NotFound,
    #[error("other: {0}")]
    Other(String),
}

/// A file accepted into storage, addressed the way posts reference it.
#[derive(Debug, Clone)]
pub struct StoredMedia {
    pub name: String,
    pub mime: String,
    pub size: usize,
    pub attachment: Attachment,
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Validate and persist an upload under a fresh name.
    async fn save(&self, bytes: &[u8]) -> Result<StoredMedia, MediaError>;
    async fn load(&self, name: &str) -> Result<(Vec<u8>, String), MediaError>;
    /// Turn a previously returned name into an attachment, checking it exists.
    async fn resolve(&self, name: &str) -> Result<Attachment, MediaError>;
    /// Remove every file the attachment references. Files already gone count as removed.
    async fn delete(&self, attachment: &Attachment) -> Result<(), MediaError>;
}

/// Sniff the content type and enforce the size limit. Returns the MIME
/// type and canonical extension.
pub fn inspect(bytes: &[u8], limit: usize) -> Result<(&'static str, &'static str), MediaError> {
    if bytes.is_empty() {
        return Err(MediaError::Empty);
    }
    if bytes.len() > limit {
        return Err(MediaError::TooLarge { limit });
    }
    let kind = infer::get(bytes).ok_or(MediaError::Unsupported)?;
    if !ALLOWED_MIME.contains(&kind.mime_type()) {
        return Err(MediaError::Unsupported);
    }
    Ok((kind.mime_type(), kind.extension()))
}

/// Stored names are `<uuid-simple>.<ext>`; anything else is rejected so a
/// name can never escape the media directory.
pub fn is_valid_name(name: &str) -> bool {
    let Some((stem, ext)) = name.split_once('.') else {
        return false;
    };
    stem.len() == 32
        && stem.bytes().all(|b| b.is_ascii_hexdigit())
        && !ext.is_empty()
        && ext.len() <= 5
        && ext.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Public path for a stored name, as kept on posts.
pub fn public_path(name: &str) -> String {
    format!("{MEDIA_PREFIX}/{name}")
}

/// Inverse of [`public_path`]; tolerates bare names.
fn name_from_path(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next()?;
    is_valid_name(name).then_some(name)
}

/// Bare stored name for a value a client sends back, whether it is the
/// name itself or the public `media/<name>` path.
pub fn upload_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Uploads waiting to be attached to a post. Each name is claimed by at
/// most one post; names left unclaimed past the TTL are handed back for
/// removal.
#[derive(Clone)]
pub struct PendingUploads {
    issued: Arc<DashMap<String, DateTime<Utc>>>,
    ttl_secs: i64,
}

impl PendingUploads {
    pub fn new(ttl_secs: i64) -> Self {
        Self { issued: Arc::new(DashMap::new()), ttl_secs: ttl_secs.max(0) }
    }

    pub fn issue(&self, name: &str, at: DateTime<Utc>) {
        self.issued.insert(name.to_string(), at);
    }

    /// Take the name out of the pending set. `None` when it was never
    /// issued, is already attached, or has expired.
    pub fn claim(&self, name: &str) -> Option<DateTime<Utc>> {
        self.issued.remove(name).map(|(_, at)| at)
    }

    /// Put back a claim whose post was not written.
    pub fn release(&self, name: &str, issued_at: DateTime<Utc>) {
        self.issued.insert(name.to_string(), issued_at);
    }

    /// Remove and return every name issued more than the TTL before `now`.
    pub fn expire(&self, now: DateTime<Utc>) -> Vec<String> {
        let cutoff = now - Duration::seconds(self.ttl_secs);
        let stale: Vec<String> = self
            .issued
            .iter()
            .filter(|e| *e.value() <= cutoff)
            .map(|e| e.key().clone())
            .collect();
        stale
            .into_iter()
            .filter(|name| self.issued.remove_if(name, |_, at| *at <= cutoff).is_some())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.issued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issued.is_empty()
    }
}

// ---------------- Filesystem implementation ----------------
pub struct FsMediaStore {
    root: PathBuf,
    max_bytes: usize,
}

impl FsMediaStore {
    pub async fn new(root: impl AsRef<Path>, max_bytes: usize) -> Result<Self, MediaError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| MediaError::Other(e.to_string()))?;
        info!("media store rooted at {}", root.display());
        Ok(Self { root, max_bytes })
    }

    fn file_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    async fn remove_path(&self, path: &str) -> Result<(), MediaError> {
        let Some(name) = name_from_path(path) else {
            warn!("refusing to delete unrecognised media path {path}");
            return Ok(());
        };
        match tokio::fs::remove_file(self.file_for(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MediaError::Other(e.to_string())),
        }
    }
}

#[async_trait]
impl MediaStore for FsMediaStore {
    async fn save(&self, bytes: &[u8]) -> Result<StoredMedia, MediaError> {
        let (mime, ext) = inspect(bytes, self.max_bytes)?;
        let name = format!("{}.{ext}", uuid::Uuid::new_v4().simple());
        let tmp = self.root.join(format!(".{name}.part"));
        // Write then rename so a reader never sees a partial file.
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| MediaError::Other(e.to_string()))?;
        tokio::fs::rename(&tmp, self.file_for(&name))
            .await
            .map_err(|e| MediaError::Other(e.to_string()))?;
        Ok(StoredMedia {
            attachment: Attachment { media: public_path(&name), thumb: None },
            name,
            mime: mime.to_string(),
            size: bytes.len(),
        })
    }

    async fn load(&self, name: &str) -> Result<(Vec<u8>, String), MediaError> {
        if !is_valid_name(name) {
            return Err(MediaError::NotFound);
        }
        let bytes = match tokio::fs::read(self.file_for(name)).await {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(MediaError::NotFound),
            Err(e) => return Err(MediaError::Other(e.to_string())),
        };
        let mime = infer::get(&bytes)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".into());
        Ok((bytes, mime))
    }

    async fn resolve(&self, name: &str) -> Result<Attachment, MediaError> {
        let name = name_from_path(name).ok_or(MediaError::NotFound)?;
        match tokio::fs::metadata(self.file_for(name)).await {
            Ok(meta) if meta.is_file() => Ok(Attachment { media: public_path(name), thumb: None }),
            Ok(_) => Err(MediaError::NotFound),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(MediaError::NotFound),
            Err(e) => Err(MediaError::Other(e.to_string())),
        }
    }

    async fn delete(&self, attachment: &Attachment) -> Result<(), MediaError> {
        self.remove_path(&attachment.media).await?;
        if let Some(thumb) = &attachment.thumb {
            self.remove_path(thumb).await?;
        }
        Ok(())
    }
}

pub async fn build_media_store(root: &Path, max_bytes: usize) -> anyhow::Result<Arc<dyn MediaStore>> {
    let store = FsMediaStore::new(root, max_bytes)
        .await
        .map_err(|e| anyhow::anyhow!("failed to initialise media store at {}: {e}", root.display()))?;
    Ok(Arc::new(store))
}
