use anyhow::Result;
use std::path::PathBuf;
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

/// Manages on-disk blob storage for message and story media.
///
/// Each blob is stored as a single flat file at `{dir}/{media_ref}`, where
/// `media_ref` is an opaque uuid minted by `create_upload`. A reserved
/// (empty) file marks an upload target the client has not filled yet;
/// references only resolve to a display URL once bytes have landed.
pub struct MediaStore {
    dir: PathBuf,
}

impl MediaStore {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Media storage directory: {}", dir.display());
        Ok(Self { dir })
    }

    fn file_path(&self, media_ref: Uuid) -> PathBuf {
        self.dir.join(media_ref.to_string())
    }

    /// Public URL a stored blob is served from.
    pub fn display_url(&self, media_ref: Uuid) -> String {
        format!("/media/{}", media_ref)
    }

    /// Mint a fresh reference and reserve its upload slot on disk.
    pub async fn create_upload(&self) -> Result<Uuid> {
        let media_ref = Uuid::new_v4();
        fs::File::create(self.file_path(media_ref)).await?;
        Ok(media_ref)
    }

    /// Persist the uploaded bytes. Returns false for references that were
    /// never reserved, so clients cannot invent their own.
    pub async fn store(&self, media_ref: Uuid, data: &[u8]) -> Result<bool> {
        let path = self.file_path(media_ref);
        if fs::metadata(&path).await.is_err() {
            warn!("Rejecting upload for unknown media reference {}", media_ref);
            return Ok(false);
        }
        fs::write(&path, data).await?;
        Ok(true)
    }

    /// Resolve a reference to its display URL. Reserved-but-empty and
    /// missing references both fail to resolve.
    pub async fn resolve_url(&self, media_ref: Uuid) -> Option<String> {
        match fs::metadata(self.file_path(media_ref)).await {
            Ok(meta) if meta.len() > 0 => Some(self.display_url(media_ref)),
            _ => None,
        }
    }

    /// Open a stored blob for streaming to a client.
    pub async fn open(&self, media_ref: Uuid) -> Result<Option<fs::File>> {
        match fs::File::open(self.file_path(media_ref)).await {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Release a blob. A missing file is success, so story cleanup and
    /// owner deletes can race without surfacing errors.
    pub async fn release(&self, media_ref: Uuid) -> Result<()> {
        match fs::remove_file(self.file_path(media_ref)).await {
            Ok(()) => {
                info!("Released media {}", media_ref);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Media {} already gone", media_ref);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> MediaStore {
        let dir = std::env::temp_dir().join(format!("glimpse-media-test-{}", Uuid::new_v4()));
        MediaStore::new(dir).await.unwrap()
    }

    #[tokio::test]
    async fn upload_resolve_release_cycle() {
        let store = test_store().await;

        let media_ref = store.create_upload().await.unwrap();

        // Reserved but empty: not resolvable yet
        assert!(store.resolve_url(media_ref).await.is_none());

        assert!(store.store(media_ref, b"jpeg bytes").await.unwrap());
        let url = store.resolve_url(media_ref).await.unwrap();
        assert_eq!(url, format!("/media/{}", media_ref));

        store.release(media_ref).await.unwrap();
        assert!(store.resolve_url(media_ref).await.is_none());

        // Releasing again is success, not failure
        store.release(media_ref).await.unwrap();
    }

    #[tokio::test]
    async fn store_rejects_unreserved_refs() {
        let store = test_store().await;
        let invented = Uuid::new_v4();
        assert!(!store.store(invented, b"data").await.unwrap());
        assert!(store.resolve_url(invented).await.is_none());
    }

    #[tokio::test]
    async fn open_returns_none_for_missing() {
        let store = test_store().await;
        assert!(store.open(Uuid::new_v4()).await.unwrap().is_none());

        let media_ref = store.create_upload().await.unwrap();
        assert!(store.store(media_ref, b"payload").await.unwrap());
        assert!(store.open(media_ref).await.unwrap().is_some());
    }
}
