use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A bookmarked show. `anime_id` is the unique key within a collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchlistEntry {
    pub anime_id: String,
    pub name: String,
    pub image_url: String,
    pub added_at: DateTime<Utc>,
    #[serde(default)]
    pub external_id: Option<String>, // MyAnimeList id when known
}
