use std::path::PathBuf;

use tracing::warn;

use crate::client::SyncClient;
use crate::error::SyncError;

impl SyncClient {
    /// Local file for an avatar image, downloaded on first use.
    pub async fn avatar(&self, url: &str) -> Result<PathBuf, SyncError> {
        if url.trim().is_empty() {
            return Err(SyncError::invalid("avatar url is empty"));
        }
        if let Some(path) = self.avatars.lookup(url).await {
            return Ok(path);
        }

        let bytes = self.transport.fetch_bytes(url).await.map_err(|e| {
            warn!(url, error = %e, "Avatar download failed");
            SyncError::from(e)
        })?;
        Ok(self.avatars.store(url, &bytes).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use platesync_shared::TransportError;

    #[tokio::test]
    async fn test_avatar_is_downloaded_once_and_reused() {
        let h = harness();
        let url = "https://cdn.example.com/cars/10.png";
        h.http.serve_bytes(url, b"\x89PNG");

        let first = h.client.avatar(url).await.unwrap();
        assert_eq!(tokio::fs::read(&first).await.unwrap(), b"\x89PNG");
        assert!(first.starts_with(h.dir.path().join("avatars")));

        let again = h.client.avatar(url).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(h.client.avatars.len(), 1);
    }

    #[tokio::test]
    async fn test_avatar_download_failure() {
        let h = harness();
        let err = h.client.avatar("https://cdn.example.com/missing.png").await.unwrap_err();
        assert!(matches!(err, SyncError::Transport(TransportError::HttpStatus(404))));
        assert!(h.client.avatars.is_empty());
    }
}
