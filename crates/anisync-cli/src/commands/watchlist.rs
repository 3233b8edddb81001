use super::{ensure_synced, finish, print_report, Session};
use crate::output::Output;
use crate::WatchlistCommands;
use anisync_models::WatchlistEntry;
use chrono::Utc;
use color_eyre::Result;

pub async fn run_watchlist(cmd: WatchlistCommands, session: &Session, output: &Output) -> Result<()> {
    let engine = session.open_engine()?;
    let watchlist = engine.watchlist();

    match cmd {
        WatchlistCommands::List => {
            let entries = watchlist.entries();
            if !output.is_human() {
                output.data(&entries);
            } else if entries.is_empty() {
                output.info("Watchlist is empty");
            } else {
                let rows = entries
                    .iter()
                    .map(|e| {
                        vec![
                            e.name.clone(),
                            e.anime_id.clone(),
                            e.external_id.clone().unwrap_or_else(|| "-".to_string()),
                            e.added_at.format("%Y-%m-%d").to_string(),
                        ]
                    })
                    .collect();
                output.table(&["Anime", "Id", "MAL id", "Added"], rows);
            }
            engine.shutdown();
            return Ok(());
        }
        WatchlistCommands::Add {
            anime_id,
            name,
            image_url,
            external_id,
        } => {
            let entry = WatchlistEntry {
                name: name.unwrap_or_else(|| anime_id.clone()),
                anime_id: anime_id.clone(),
                image_url,
                added_at: Utc::now(),
                external_id,
            };
            if watchlist.add(entry) {
                output.success(format!("Bookmarked {}", anime_id));
            } else {
                output.info(format!("{} is already on the watchlist", anime_id));
            }
        }
        WatchlistCommands::Remove { anime_id } => {
            if watchlist.remove(&anime_id) {
                output.success(format!("Removed {} from the watchlist", anime_id));
            } else {
                output.warn(format!("{} is not on the watchlist", anime_id));
            }
        }
        WatchlistCommands::Clear => {
            let report = watchlist.clear().await;
            print_report("Watchlist", &report, output);
            finish(&engine, output).await;
            return ensure_synced(&[&report]);
        }
    }

    finish(&engine, output).await;
    Ok(())
}
