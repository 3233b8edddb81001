pub mod directory;
pub mod http;
pub mod memory;

pub use directory::DirectoryRemoteStore;
pub use http::HttpRemoteStore;
pub use memory::{FailureMode, MemoryRemoteStore};

use anisync_models::{AccountId, DocumentPatch, UserDocument};
use async_trait::async_trait;
use crate::error::RemoteError;
use tracing::debug;

/// Document-oriented remote service holding one `UserDocument` per account.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// `Ok(None)` when the account has no document yet.
    async fn get_document(&self, account: &AccountId) -> Result<Option<UserDocument>, RemoteError>;

    async fn create_document(&self, account: &AccountId, document: &UserDocument) -> Result<(), RemoteError>;

    /// Fails with `RemoteError::NotFound` if the document does not exist.
    async fn update_fields(&self, account: &AccountId, patch: &DocumentPatch) -> Result<(), RemoteError>;
}

/// Write a patch, creating the document on first write.
pub async fn write_patch(
    remote: &dyn RemoteStore,
    account: &AccountId,
    patch: &DocumentPatch,
) -> Result<(), RemoteError> {
    match remote.update_fields(account, patch).await {
        Err(RemoteError::NotFound) => {
            debug!(
                operation = "remote_create_document",
                account = %account,
                "Remote document missing, creating it"
            );
            remote.create_document(account, &patch.clone().into_document()).await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anisync_models::WatchlistEntry;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn test_write_patch_creates_missing_document() {
        let remote = MemoryRemoteStore::new();
        let account = AccountId::new("user-1");
        let entry = WatchlistEntry {
            anime_id: "a1".to_string(),
            name: "A1".to_string(),
            image_url: String::new(),
            added_at: Utc.timestamp_opt(100, 0).unwrap(),
            external_id: None,
        };
        let patch = DocumentPatch::watchlist(vec![entry], Utc.timestamp_opt(200, 0).unwrap());

        write_patch(&remote, &account, &patch).await.unwrap();
        let doc = remote.get_document(&account).await.unwrap().unwrap();
        assert_eq!(doc.watchlist.len(), 1);
        assert!(doc.history.is_empty());

        // Second write goes through update_fields
        let patch = DocumentPatch::watchlist(Vec::new(), Utc.timestamp_opt(300, 0).unwrap());
        write_patch(&remote, &account, &patch).await.unwrap();
        let doc = remote.get_document(&account).await.unwrap().unwrap();
        assert!(doc.watchlist.is_empty());
        assert_eq!(remote.create_count(), 1);
        assert_eq!(remote.write_count(), 2);
    }
}
