use super::{ensure_synced, finish, print_report, Session};
use crate::output::Output;
use crate::HistoryCommands;
use anisync_models::{HistoryEntry, SubOrDub};
use chrono::Utc;
use color_eyre::eyre::eyre;
use color_eyre::Result;

pub async fn run_history(cmd: HistoryCommands, session: &Session, output: &Output) -> Result<()> {
    let engine = session.open_engine()?;
    let history = engine.history();

    match cmd {
        HistoryCommands::List { limit } => {
            let mut entries = history.entries();
            if let Some(limit) = limit {
                entries.truncate(limit);
            }
            if !output.is_human() {
                output.data(&entries);
            } else if entries.is_empty() {
                output.info("No watch history yet");
            } else {
                let rows = entries
                    .iter()
                    .map(|e| {
                        vec![
                            e.name.clone(),
                            e.episode_number.to_string(),
                            format!(
                                "{} / {} ({:.0}%)",
                                format_seconds(e.progress_seconds),
                                format_seconds(e.duration_seconds),
                                e.completion() * 100.0
                            ),
                            format!("{:?}", e.sub_or_dub).to_lowercase(),
                            e.last_watched_at.format("%Y-%m-%d %H:%M").to_string(),
                            e.episode_id.clone(),
                        ]
                    })
                    .collect();
                output.table(&["Anime", "Ep", "Progress", "Audio", "Watched", "Episode id"], rows);
            }
            engine.shutdown();
            return Ok(());
        }
        HistoryCommands::Add {
            anime_id,
            episode_id,
            episode,
            name,
            image_url,
            progress,
            duration,
            dub,
        } => {
            let entry = HistoryEntry {
                episode_id: episode_id.unwrap_or_else(|| format!("{}-episode-{}", anime_id, episode)),
                name: name.unwrap_or_else(|| anime_id.clone()),
                anime_id,
                episode_number: episode,
                image_url,
                progress_seconds: progress,
                duration_seconds: duration,
                last_watched_at: Utc::now(),
                sub_or_dub: if dub { SubOrDub::Dub } else { SubOrDub::Sub },
            };
            let episode_id = entry.episode_id.clone();
            if history.add(entry) {
                output.success(format!("Recorded {}", episode_id));
            } else {
                output.info(format!("{} is already recorded with the same values", episode_id));
            }
        }
        HistoryCommands::Progress { episode_id, seconds } => {
            let mut entry = history
                .get(&episode_id)
                .ok_or_else(|| eyre!("{} is not in watch history; add it first", episode_id))?;
            entry.progress_seconds = seconds;
            entry.last_watched_at = Utc::now();
            if history.update(entry) {
                output.success(format!("Progress for {} set to {}", episode_id, format_seconds(seconds)));
            } else {
                output.info(format!(
                    "Progress for {} set to {}, saved with the next write",
                    episode_id,
                    format_seconds(seconds)
                ));
            }
        }
        HistoryCommands::Remove { episode_id } => {
            if history.remove(&episode_id) {
                output.success(format!("Removed {}", episode_id));
            } else {
                output.warn(format!("{} is not in watch history", episode_id));
            }
        }
        HistoryCommands::RemoveAnime { anime_id } => {
            let removed = history.remove_anime(&anime_id);
            if removed > 0 {
                output.success(format!("Removed {} episodes of {}", removed, anime_id));
            } else {
                output.warn(format!("No episodes of {} in watch history", anime_id));
            }
        }
        HistoryCommands::Clear => {
            let report = history.clear().await;
            print_report("Watch history", &report, output);
            finish(&engine, output).await;
            return ensure_synced(&[&report]);
        }
    }

    finish(&engine, output).await;
    Ok(())
}

pub(crate) fn format_seconds(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_seconds() {
        assert_eq!(format_seconds(0.0), "0:00");
        assert_eq!(format_seconds(65.4), "1:05");
        assert_eq!(format_seconds(1440.0), "24:00");
        assert_eq!(format_seconds(-3.0), "0:00");
    }
}
