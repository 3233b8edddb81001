pub mod config;
pub mod history;
pub mod status;
pub mod sync;
pub mod watchlist;

use crate::output::Output;
use anisync_config::{Config, PathManager, RemoteKind};
use anisync_core::{
    CloudStatus, DirectoryRemoteStore, FileStore, HttpRemoteStore, IdentityProvider, LocalStore, RemoteStore,
    SessionIdentity, SyncEngine, SyncReport,
};
use anisync_models::AccountId;
use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Paths and configuration shared by every command.
pub struct Session {
    pub paths: PathManager,
    pub config_file: PathBuf,
    pub config: Config,
}

impl Session {
    pub fn load(config_override: Option<PathBuf>) -> Result<Self> {
        let paths = PathManager::default();
        let config_file = config_override.unwrap_or_else(|| paths.config_file());
        let config = Config::load_or_default(&config_file)
            .map_err(|e| eyre!("Failed to load config from {}: {}", config_file.display(), e))?;
        Ok(Self {
            paths,
            config_file,
            config,
        })
    }

    /// Directory used by the directory-backed remote.
    pub fn remote_dir(&self) -> PathBuf {
        self.config
            .remote
            .directory
            .clone()
            .unwrap_or_else(|| self.paths.remote_dir())
    }

    /// Build an engine over the on-disk local store and the configured
    /// remote, with both collections loaded from local storage.
    pub fn open_engine(&self) -> Result<Arc<SyncEngine>> {
        self.config
            .validate()
            .map_err(|e| eyre!("Invalid configuration in {}: {}", self.config_file.display(), e))?;
        self.paths
            .ensure_directories()
            .map_err(|e| eyre!("Failed to create data directories: {}", e))?;

        let local: Arc<dyn LocalStore> =
            Arc::new(FileStore::new(&self.paths.local_store_dir()).context("Failed to open local store")?);

        let remote: Arc<dyn RemoteStore> = match self.config.remote.kind {
            RemoteKind::Directory => Arc::new(DirectoryRemoteStore::new(&self.remote_dir())),
            RemoteKind::Http => {
                let base_url = self.config.remote.base_url.as_deref().unwrap_or_default();
                Arc::new(
                    HttpRemoteStore::new(
                        base_url,
                        self.config.remote.api_token.clone(),
                        Duration::from_secs(self.config.remote.request_timeout_secs),
                    )
                    .context("Failed to create HTTP remote client")?,
                )
            }
        };

        let identity: Arc<dyn IdentityProvider> = match &self.config.account {
            Some(account) => Arc::new(SessionIdentity::signed_in(AccountId::new(&account.id), account.verified)),
            None => Arc::new(SessionIdentity::signed_out()),
        };

        let engine = Arc::new(SyncEngine::new(self.config.sync.clone(), local, remote, identity));
        engine.load_local();
        Ok(engine)
    }
}

/// Wait for scheduled remote writes to land, then stop the engine.
pub async fn finish(engine: &SyncEngine, output: &Output) {
    let status = engine.status();
    if status.history_queue.timer_pending || status.watchlist_queue.timer_pending {
        output.info(format!(
            "Waiting {}ms for the debounced remote write...",
            engine.context().settings.debounce_ms
        ));
    }
    engine.drain().await;
    engine.shutdown();
}

pub fn print_report(label: &str, report: &SyncReport, output: &Output) {
    if !output.is_human() {
        output.data(report);
        return;
    }

    match &report.cloud {
        CloudStatus::Synced => output.success(format!("{}: {} entries, cloud copy up to date", label, report.local_entries)),
        CloudStatus::Skipped(reason) => output.warn(format!(
            "{}: {} entries saved locally, cloud sync skipped ({})",
            label, report.local_entries, reason
        )),
        CloudStatus::Failed(error) => output.error(format!(
            "{}: {} entries saved locally, cloud sync failed: {}",
            label, report.local_entries, error
        )),
    }
    if report.trimmed > 0 {
        output.warn(format!(
            "{}: {} oldest entries were left out of the cloud copy to fit the size limit",
            label, report.trimmed
        ));
    }
}

/// Fail the command when any report carries a remote failure.
pub fn ensure_synced(reports: &[&SyncReport]) -> Result<()> {
    let failed: Vec<&str> = reports
        .iter()
        .filter(|r| matches!(r.cloud, CloudStatus::Failed(_)))
        .map(|r| r.key.as_str())
        .collect();
    if failed.is_empty() {
        Ok(())
    } else {
        Err(eyre!("Cloud sync failed for: {}", failed.join(", ")))
    }
}
