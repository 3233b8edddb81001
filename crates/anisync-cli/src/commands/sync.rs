use super::{ensure_synced, finish, print_report, Session};
use crate::output::Output;
use color_eyre::Result;

pub async fn run_sync(session: &Session, output: &Output) -> Result<()> {
    tracing::debug!("Sync command started");

    let engine = session.open_engine()?;
    let report = engine.sync_now().await;

    if output.is_human() {
        print_report("Watch history", &report.history, output);
        print_report("Watchlist", &report.watchlist, output);
    } else {
        output.data(&report);
    }

    finish(&engine, output).await;
    ensure_synced(&[&report.history, &report.watchlist])
}
