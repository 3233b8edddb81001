use anisync_models::{HistoryEntry, WatchlistEntry};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

/// Merge local and remote watch history, keyed by `episode_id`.
///
/// For a colliding episode the entry with the later `last_watched_at` wins;
/// on equal timestamps the larger `progress_seconds` wins, and a full tie
/// keeps the local entry. Output is sorted by `last_watched_at` descending.
pub fn merge_history(local: &[HistoryEntry], remote: &[HistoryEntry]) -> Vec<HistoryEntry> {
    let mut by_episode: HashMap<&str, &HistoryEntry> = HashMap::with_capacity(local.len() + remote.len());

    for entry in remote {
        by_episode
            .entry(entry.episode_id.as_str())
            .and_modify(|existing| {
                if history_supersedes(existing, entry) {
                    *existing = entry;
                }
            })
            .or_insert(entry);
    }

    let mut local_wins = 0usize;
    let mut remote_wins = 0usize;
    for entry in local {
        match by_episode.get(entry.episode_id.as_str()) {
            Some(remote_entry) if history_supersedes(entry, remote_entry) => {
                remote_wins += 1;
            }
            _ => {
                local_wins += 1;
                by_episode.insert(entry.episode_id.as_str(), entry);
            }
        }
    }

    let mut merged: Vec<HistoryEntry> = by_episode.into_values().cloned().collect();
    sort_history(&mut merged);

    debug!(
        "merge_history: local={}, remote={}, merged={}, local_kept={}, remote_kept={}",
        local.len(),
        remote.len(),
        merged.len(),
        local_wins,
        remote_wins
    );
    merged
}

/// True when `candidate` is strictly ahead of `current`.
fn history_supersedes(current: &HistoryEntry, candidate: &HistoryEntry) -> bool {
    match candidate.last_watched_at.cmp(&current.last_watched_at) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => candidate.progress_seconds > current.progress_seconds,
    }
}

/// Most recently watched first; ties broken by episode id so the order is
/// deterministic.
pub fn sort_history(entries: &mut [HistoryEntry]) {
    entries.sort_by(|a, b| {
        b.last_watched_at
            .cmp(&a.last_watched_at)
            .then_with(|| a.episode_id.cmp(&b.episode_id))
    });
}

/// Merge local and remote watchlists, keyed by `anime_id`.
///
/// Conservative: every id present on either side survives. For an id on
/// both sides the entry with the later `added_at` wins (local on ties).
/// An empty side never erases the other. Output is sorted by `added_at`
/// descending.
pub fn merge_watchlist(local: &[WatchlistEntry], remote: &[WatchlistEntry]) -> Vec<WatchlistEntry> {
    let mut by_anime: HashMap<&str, &WatchlistEntry> = HashMap::with_capacity(local.len() + remote.len());

    for entry in remote {
        by_anime
            .entry(entry.anime_id.as_str())
            .and_modify(|existing| {
                if entry.added_at > existing.added_at {
                    *existing = entry;
                }
            })
            .or_insert(entry);
    }

    let mut collisions = 0usize;
    for entry in local {
        match by_anime.get(entry.anime_id.as_str()) {
            Some(remote_entry) => {
                collisions += 1;
                if entry.added_at >= remote_entry.added_at {
                    by_anime.insert(entry.anime_id.as_str(), entry);
                }
            }
            None => {
                by_anime.insert(entry.anime_id.as_str(), entry);
            }
        }
    }

    let mut merged: Vec<WatchlistEntry> = by_anime.into_values().cloned().collect();
    sort_watchlist(&mut merged);

    debug!(
        "merge_watchlist: local={}, remote={}, merged={}, collisions={}",
        local.len(),
        remote.len(),
        merged.len(),
        collisions
    );
    merged
}

/// Most recently added first; ties broken by anime id.
pub fn sort_watchlist(entries: &mut [WatchlistEntry]) {
    entries.sort_by(|a, b| {
        b.added_at
            .cmp(&a.added_at)
            .then_with(|| a.anime_id.cmp(&b.anime_id))
    });
}
