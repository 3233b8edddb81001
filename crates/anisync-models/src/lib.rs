pub mod account;
pub mod document;
pub mod watch_history;
pub mod watchlist;

pub use account::{AccountId, SyncKey};
pub use document::{DocumentPatch, UserDocument};
pub use watch_history::{HistoryEntry, SubOrDub};
pub use watchlist::WatchlistEntry;
