use anyhow::Result;
use std::path::PathBuf;
use tokio::fs;
use tracing::{info, warn};

/// On-disk blob storage for sticker assets.
///
/// Blobs live at `{dir}/{key}` where keys follow the
/// `<owner_id>/<unix_millis>-<sanitized_name>` convention, so each owner
/// gets a subdirectory. The public URL for a key is `{public_base}/{key}`;
/// the server mounts the directory read-only under that base path.
pub struct AssetStore {
    dir: PathBuf,
    public_base: String,
}

impl AssetStore {
    pub async fn new(dir: PathBuf, public_base: impl Into<String>) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Asset storage directory: {}", dir.display());
        Ok(Self {
            dir,
            public_base: public_base.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn blob_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    /// Resolve the public URL a stored key is served under.
    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key)
    }

    /// Write a blob. Keys contain an owner-directory component, so the
    /// parent directory is created on demand.
    pub async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.blob_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data).await?;
        Ok(())
    }

    pub async fn read(&self, key: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.blob_path(key)).await?)
    }

    pub async fn exists(&self, key: &str) -> bool {
        fs::try_exists(self.blob_path(key)).await.unwrap_or(false)
    }

    /// Delete a blob. A missing blob is not an error.
    pub async fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.blob_path(key)).await {
            Ok(()) => {
                info!("Deleted blob {}", key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Blob {} already gone", key);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
