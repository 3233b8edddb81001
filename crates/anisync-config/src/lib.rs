pub mod config;
pub mod paths;

pub use config::{AccountConfig, Config, LoggingConfig, RemoteConfig, RemoteKind, SyncSettings};
pub use paths::PathManager;
