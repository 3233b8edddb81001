use super::RemoteStore;
use crate::error::RemoteError;
use anisync_models::{AccountId, DocumentPatch, UserDocument};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Remote stand-in keeping one `user_data/<account>.json` file per account.
///
/// Useful for running the engine without a network service; the directory
/// can live on a synced drive to share state between machines.
pub struct DirectoryRemoteStore {
    dir: PathBuf,
}

impl DirectoryRemoteStore {
    pub fn new(dir: &Path) -> Self {
        Self { dir: dir.to_path_buf() }
    }

    fn document_path(&self, account: &AccountId) -> Result<PathBuf, RemoteError> {
        let id = account.as_str();
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(RemoteError::PermissionDenied(format!("invalid account id: {}", id)));
        }
        Ok(self.dir.join("user_data").join(format!("{}.json", id)))
    }

    async fn read(&self, path: &Path) -> Result<Option<UserDocument>, RemoteError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| RemoteError::Codec(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(e)),
        }
    }

    async fn write(&self, path: &Path, document: &UserDocument) -> Result<(), RemoteError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        let json = serde_json::to_vec_pretty(document).map_err(|e| RemoteError::Codec(e.to_string()))?;

        let temp_path = path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, json).await.map_err(io_error)?;
        tokio::fs::rename(&temp_path, path).await.map_err(io_error)?;
        Ok(())
    }
}

fn io_error(e: std::io::Error) -> RemoteError {
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        RemoteError::PermissionDenied(e.to_string())
    } else {
        RemoteError::Transient(e.to_string())
    }
}

#[async_trait]
impl RemoteStore for DirectoryRemoteStore {
    async fn get_document(&self, account: &AccountId) -> Result<Option<UserDocument>, RemoteError> {
        let path = self.document_path(account)?;
        let document = self.read(&path).await?;
        debug!(
            "Remote directory read for {}: {}",
            account,
            if document.is_some() { "found" } else { "missing" }
        );
        Ok(document)
    }

    async fn create_document(&self, account: &AccountId, document: &UserDocument) -> Result<(), RemoteError> {
        let path = self.document_path(account)?;
        self.write(&path, document).await
    }

    async fn update_fields(&self, account: &AccountId, patch: &DocumentPatch) -> Result<(), RemoteError> {
        let path = self.document_path(account)?;
        let mut document = match self.read(&path).await {
            Ok(Some(document)) => document,
            Ok(None) => return Err(RemoteError::NotFound),
            Err(RemoteError::Codec(message)) => {
                warn!("Remote document for {} is corrupted ({}), rewriting it", account, message);
                return Err(RemoteError::NotFound);
            }
            Err(e) => return Err(e),
        };
        document.apply(patch);
        self.write(&path, &document).await
    }
}
