pub mod backup;
pub mod cache;
pub mod collection;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod gate;
pub mod history;
pub mod identity;
pub mod merge;
pub mod remote;
pub mod retry;
pub mod size_guard;
pub mod store;
pub mod tasks;
pub mod watchlist;

pub use cache::ReadCache;
pub use collection::{CloudStatus, CollectionKind, SyncContext, SyncReport, SyncedCollection};
pub use coordinator::{operation, QueueStatus, SyncCoordinator, SyncOperation};
pub use engine::{EngineReport, EngineStatus, SyncEngine};
pub use error::{RemoteError, StoreError, SyncError};
pub use gate::AccessGate;
pub use history::{History, HistoryCollection};
pub use identity::{IdentityProvider, SessionIdentity};
pub use merge::{merge_history, merge_watchlist};
pub use remote::{DirectoryRemoteStore, FailureMode, HttpRemoteStore, MemoryRemoteStore, RemoteStore};
pub use retry::RetryPolicy;
pub use size_guard::{SizeGuard, TrimAction};
pub use store::{FileStore, LocalStore, MemoryStore};
pub use tasks::DetachedTasks;
pub use watchlist::{Watchlist, WatchlistCollection};
