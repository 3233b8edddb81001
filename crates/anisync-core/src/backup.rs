use crate::error::SyncError;
use crate::store::LocalStore;
use bincode::{deserialize, serialize};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, info};

/// Rolling pre-mutation snapshot of a collection, stored as gzip-compressed
/// bincode in its own LocalStore slot.
pub fn encode_snapshot<T: Serialize>(entries: &[T]) -> Result<Vec<u8>, SyncError> {
    let raw = serialize(entries).map_err(|e| SyncError::Backup(format!("encode failed: {}", e)))?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&raw)
        .map_err(|e| SyncError::Backup(format!("compression failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| SyncError::Backup(format!("compression failed: {}", e)))
}

pub fn decode_snapshot<T: DeserializeOwned>(data: &[u8]) -> Result<Vec<T>, SyncError> {
    let mut decoder = GzDecoder::new(data);
    let mut raw = Vec::new();
    decoder
        .read_to_end(&mut raw)
        .map_err(|e| SyncError::Backup(format!("decompression failed: {}", e)))?;
    deserialize(&raw).map_err(|e| SyncError::Backup(format!("decode failed: {}", e)))
}

pub fn write_snapshot<T: Serialize>(store: &dyn LocalStore, key: &str, entries: &[T]) -> Result<(), SyncError> {
    let start = std::time::Instant::now();
    let data = encode_snapshot(entries)?;
    store.set(key, &data)?;
    debug!(
        "Backup snapshot {} saved: {} entries, {} bytes in {:?}",
        key,
        entries.len(),
        data.len(),
        start.elapsed()
    );
    Ok(())
}

/// `Ok(None)` when no snapshot has been taken yet.
pub fn read_snapshot<T: DeserializeOwned>(store: &dyn LocalStore, key: &str) -> Result<Option<Vec<T>>, SyncError> {
    let Some(data) = store.get(key)? else {
        debug!("No backup snapshot under {}", key);
        return Ok(None);
    };
    let entries: Vec<T> = decode_snapshot(&data)?;
    info!("Loaded backup snapshot {} ({} entries)", key, entries.len());
    Ok(Some(entries))
}

/// One backup slot shared by concurrent snapshot writers. Each snapshot
/// takes a sequence number when it is captured; a write that arrives after a
/// newer one has landed is dropped.
pub struct SnapshotSlot {
    key: &'static str,
    issued: AtomicU64,
    written: Mutex<u64>,
}

impl SnapshotSlot {
    pub fn new(key: &'static str) -> Self {
        Self {
            key,
            issued: AtomicU64::new(0),
            written: Mutex::new(0),
        }
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    pub fn next_sequence(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns `Ok(false)` when a newer snapshot is already stored.
    pub fn write_if_newest<T: Serialize>(
        &self,
        store: &dyn LocalStore,
        sequence: u64,
        entries: &[T],
    ) -> Result<bool, SyncError> {
        let mut written = self.written.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if sequence <= *written {
            debug!(
                "Skipping backup snapshot {} #{}: #{} already stored",
                self.key, sequence, *written
            );
            return Ok(false);
        }
        write_snapshot(store, self.key, entries)?;
        *written = sequence;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use anisync_models::{HistoryEntry, SubOrDub, WatchlistEntry};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_snapshot_survives_store() {
        let store = MemoryStore::new();
        let entries = vec![
            WatchlistEntry {
                anime_id: "a1".to_string(),
                name: "Frieren".to_string(),
                image_url: "https://img/a1.jpg".to_string(),
                added_at: Utc.timestamp_opt(100, 0).unwrap(),
                external_id: Some("mal-52991".to_string()),
            },
            WatchlistEntry {
                anime_id: "a2".to_string(),
                name: "Mushishi".to_string(),
                image_url: String::new(),
                added_at: Utc.timestamp_opt(50, 0).unwrap(),
                external_id: None,
            },
        ];

        write_snapshot(&store, "my_list_backup", &entries).unwrap();
        let restored: Vec<WatchlistEntry> = read_snapshot(&store, "my_list_backup").unwrap().unwrap();
        assert_eq!(restored, entries);
    }

    #[test]
    fn test_missing_snapshot_is_none() {
        let store = MemoryStore::new();
        let restored: Option<Vec<HistoryEntry>> = read_snapshot(&store, "watch_history_backup").unwrap();
        assert!(restored.is_none());
    }

    #[test]
    fn test_garbage_snapshot_is_backup_error() {
        let store = MemoryStore::new();
        store.set("watch_history_backup", b"not gzip").unwrap();
        let result: Result<Option<Vec<HistoryEntry>>, _> = read_snapshot(&store, "watch_history_backup");
        assert!(matches!(result, Err(SyncError::Backup(_))));
    }

    #[test]
    fn test_snapshot_is_compressed() {
        let entries: Vec<HistoryEntry> = (0..200)
            .map(|i| HistoryEntry {
                anime_id: "show".to_string(),
                episode_id: format!("show-{}", i),
                episode_number: i,
                name: "Same title every time".to_string(),
                image_url: "https://img/show.jpg".to_string(),
                progress_seconds: 0.0,
                duration_seconds: 1440.0,
                last_watched_at: Utc.timestamp_opt(i as i64, 0).unwrap(),
                sub_or_dub: SubOrDub::Dub,
            })
            .collect();
        let compressed = encode_snapshot(&entries).unwrap();
        let raw = serialize(&entries).unwrap();
        assert!(compressed.len() < raw.len());
    }

    #[test]
    fn test_slot_drops_snapshot_that_lands_late() {
        let store = MemoryStore::new();
        let slot = SnapshotSlot::new("my_list_backup");
        let older = slot.next_sequence();
        let newer = slot.next_sequence();

        assert!(slot.write_if_newest(&store, newer, &["a1", "a2"]).unwrap());
        assert!(!slot.write_if_newest(&store, older, &["a1"]).unwrap());

        let stored: Vec<String> = read_snapshot(&store, slot.key()).unwrap().unwrap();
        assert_eq!(stored, vec!["a1", "a2"]);
    }

    #[test]
    fn test_slot_writes_in_order() {
        let store = MemoryStore::new();
        let slot = SnapshotSlot::new("my_list_backup");
        for round in 1..=3u32 {
            let sequence = slot.next_sequence();
            assert!(slot.write_if_newest(&store, sequence, &[round]).unwrap());
        }
        let stored: Vec<u32> = read_snapshot(&store, slot.key()).unwrap().unwrap();
        assert_eq!(stored, vec![3]);
    }
}
