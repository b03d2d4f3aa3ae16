//! On-disk avatar image cache.
//!
//! Files live under one directory, named after a sanitized form of the
//! source URL. Entries are created on first request, kept for the whole
//! session, and wiped together on logout.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tokio::fs;
use tracing::{debug, info, warn};

use platesync_shared::constants::AVATAR_NAME_PREFIX_LEN;

use crate::error::Result;

/// Number of hex characters of the URL digest appended to file names.
const DIGEST_HEX_LEN: usize = 16;

#[derive(Debug)]
pub struct AvatarCache {
    dir: PathBuf,
    entries: Mutex<HashMap<String, PathBuf>>,
}

/// File name for `url`: non-alphanumerics become `_`, the result is
/// truncated, and a digest of the full URL keeps long URLs apart.
pub fn file_name_for(url: &str) -> String {
    let sanitized: String = url
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(AVATAR_NAME_PREFIX_LEN)
        .collect();
    let digest = blake3::hash(url.as_bytes()).to_hex();
    format!("{}_{}", sanitized, &digest[..DIGEST_HEX_LEN])
}

impl AvatarCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn memo_get(&self, url: &str) -> Option<PathBuf> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(url).cloned())
    }

    fn memo_put(&self, url: &str, path: PathBuf) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(url.to_string(), path);
        }
    }

    /// Local file for `url`, if it was cached earlier (this session or a
    /// previous one).
    pub async fn lookup(&self, url: &str) -> Option<PathBuf> {
        if let Some(path) = self.memo_get(url) {
            return Some(path);
        }
        let path = self.dir.join(file_name_for(url));
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {
                self.memo_put(url, path.clone());
                Some(path)
            }
            _ => None,
        }
    }

    /// Write downloaded bytes for `url` and remember the file.
    pub async fn store(&self, url: &str, bytes: &[u8]) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(file_name_for(url));
        fs::write(&path, bytes).await?;
        debug!(url, path = %path.display(), size = bytes.len(), "Avatar cached");
        self.memo_put(url, path.clone());
        Ok(path)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete every cached file.
    pub async fn clear(&self) -> Result<()> {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => {
                info!(dir = %self.dir.display(), "Avatar cache cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(error = %e, "Failed to clear avatar cache");
                Err(e.into())
            }
        }
    }
}
