use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audio track the episode was watched with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubOrDub {
    #[default]
    Sub,
    Dub,
}

/// One watched episode. `episode_id` is the unique key within a collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub anime_id: String,
    pub episode_id: String,
    pub episode_number: u32,
    pub name: String,
    pub image_url: String,
    pub progress_seconds: f64,
    pub duration_seconds: f64,
    pub last_watched_at: DateTime<Utc>,
    #[serde(default)]
    pub sub_or_dub: SubOrDub,
}

impl HistoryEntry {
    /// Fraction of the episode watched, clamped to `0.0..=1.0`.
    pub fn completion(&self) -> f64 {
        if self.duration_seconds <= 0.0 {
            return 0.0;
        }
        (self.progress_seconds / self.duration_seconds).clamp(0.0, 1.0)
    }
}
