use anyhow::Result;
use std::path::{Path, PathBuf};

const BASE_PATH_ENV: &str = "ANISYNC_BASE_PATH";
const CONTAINER_BASE: &str = "/app";

/// Directory layout rooted at one base directory:
///
/// ```text
/// <root>/config.toml
/// <root>/data/local/    durable local copy and backup snapshots
/// <root>/data/remote/   default directory-backed remote
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathManager {
    root: PathBuf,
}

impl PathManager {
    /// `<platform config dir>/anisync`.
    pub fn new() -> Result<Self> {
        let config_dir = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(Self::from_base(config_dir.join("anisync")))
    }

    pub fn from_base(root: PathBuf) -> Self {
        Self { root }
    }

    /// The container layout, if its base directory exists.
    pub fn container() -> Option<Self> {
        let base = std::env::var_os(BASE_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(CONTAINER_BASE));
        base.is_dir().then(|| Self::from_base(base))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn local_store_dir(&self) -> PathBuf {
        self.root.join("data").join("local")
    }

    pub fn remote_dir(&self) -> PathBuf {
        self.root.join("data").join("remote")
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(self.local_store_dir())?;
        Ok(())
    }
}

impl Default for PathManager {
    fn default() -> Self {
        Self::container()
            .or_else(|| Self::new().ok())
            .unwrap_or_else(|| Self::from_base(PathBuf::from(".anisync")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_under_base() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathManager::from_base(dir.path().to_path_buf());
        paths.ensure_directories().unwrap();

        assert_eq!(paths.root(), dir.path());
        assert_eq!(paths.config_file(), dir.path().join("config.toml"));
        assert!(paths.local_store_dir().is_dir());
        assert_eq!(paths.remote_dir(), dir.path().join("data").join("remote"));
        // The remote directory is created lazily by the store itself
        assert!(!paths.remote_dir().exists());
    }
}
