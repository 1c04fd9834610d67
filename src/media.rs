//! Session-scoped storage for downloaded videos.
//!
//! Files live in a private temporary directory that is removed when the last
//! handle to the store is dropped, so a [`GeneratedVideo`] URL never outlives
//! the session that produced it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use tempfile::TempDir;
use tracing::{debug, info};
use uuid::Uuid;

use crate::constants::MEDIA_ROUTE;
use crate::message::GeneratedVideo;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaEntry {
    pub path: PathBuf,
    pub mime_type: String,
    pub len: u64,
}

#[derive(Debug)]
struct MediaInner {
    dir: TempDir,
    entries: RwLock<HashMap<Uuid, MediaEntry>>,
}

#[derive(Debug, Clone)]
pub struct MediaStore {
    inner: Arc<MediaInner>,
}

impl MediaStore {
    pub fn new() -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("fitstream-media-").tempdir()?;
        info!("Session media directory: {}", dir.path().display());
        Ok(Self {
            inner: Arc::new(MediaInner {
                dir,
                entries: RwLock::new(HashMap::new()),
            }),
        })
    }

    pub fn url_for(id: &Uuid) -> String {
        format!("{}/{}", MEDIA_ROUTE, id)
    }

    /// Extract the media id from a URL produced by [`MediaStore::url_for`].
    pub fn id_from_url(url: &str) -> Option<Uuid> {
        url.strip_prefix(MEDIA_ROUTE)
            .and_then(|rest| rest.strip_prefix('/'))
            .and_then(|id| Uuid::parse_str(id).ok())
    }

    pub fn dir(&self) -> &std::path::Path {
        self.inner.dir.path()
    }

    /// Write a payload and return a session-local handle to it.
    pub async fn store(&self, bytes: &[u8], mime_type: &str) -> std::io::Result<GeneratedVideo> {
        let id = Uuid::new_v4();
        let path = self.inner.dir.path().join(format!("{}.{}", id, extension_for(mime_type)));
        tokio::fs::write(&path, bytes).await?;
        debug!(%id, bytes = bytes.len(), "Stored session media at {}", path.display());

        let entry = MediaEntry {
            path,
            mime_type: mime_type.to_string(),
            len: bytes.len() as u64,
        };
        self.inner
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, entry);

        Ok(GeneratedVideo {
            url: Self::url_for(&id),
            mime_type: mime_type.to_string(),
        })
    }

    pub fn get(&self, id: &Uuid) -> Option<MediaEntry> {
        self.inner
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Resolve a handle URL to its entry.
    pub fn resolve(&self, url: &str) -> Option<MediaEntry> {
        Self::id_from_url(url).and_then(|id| self.get(&id))
    }

    pub async fn read(&self, id: &Uuid) -> std::io::Result<Option<(Vec<u8>, String)>> {
        match self.get(id) {
            Some(entry) => {
                let bytes = tokio::fs::read(&entry.path).await?;
                Ok(Some((bytes, entry.mime_type)))
            }
            None => Ok(None),
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        _ => "mp4",
    }
}
