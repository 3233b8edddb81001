use super::Session;
use crate::output::Output;
use anisync_config::RemoteKind;
use anisync_core::QueueStatus;
use color_eyre::Result;
use owo_colors::OwoColorize;
use serde_json::json;

pub async fn run_status(session: &Session, output: &Output) -> Result<()> {
    let engine = session.open_engine()?;
    let status = engine.status();
    engine.shutdown();

    let remote = match session.config.remote.kind {
        RemoteKind::Directory => format!("directory {}", session.remote_dir().display()),
        RemoteKind::Http => format!("http {}", session.config.remote.base_url.as_deref().unwrap_or_default()),
    };
    let verified = session.config.account.as_ref().map(|a| a.verified).unwrap_or(false);

    if !output.is_human() {
        output.data(&json!({
            "status": status,
            "remote": remote,
            "verified": verified,
            "local_store": session.paths.local_store_dir(),
        }));
        return Ok(());
    }

    let account = match &status.account {
        Some(account) if verified => format!("{} {}", account, "(verified)".green()),
        Some(account) => format!("{} {}", account, "(unverified, cloud writes disabled)".yellow()),
        None => "signed out".dimmed().to_string(),
    };

    output.table(
        &["Setting", "Value"],
        vec![
            vec!["Account".to_string(), account],
            vec!["Remote".to_string(), remote],
            vec!["Local store".to_string(), session.paths.local_store_dir().display().to_string()],
            vec!["Watch history".to_string(), format!("{} episodes", status.history_entries)],
            vec!["Watchlist".to_string(), format!("{} anime", status.watchlist_entries)],
            vec!["History queue".to_string(), describe_queue(&status.history_queue)],
            vec!["Watchlist queue".to_string(), describe_queue(&status.watchlist_queue)],
        ],
    );
    Ok(())
}

fn describe_queue(queue: &QueueStatus) -> String {
    match (queue.in_flight, queue.timer_pending) {
        (true, _) => "writing".to_string(),
        (false, true) => "write scheduled".to_string(),
        (false, false) => "idle".to_string(),
    }
}
