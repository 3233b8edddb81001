use thiserror::Error;

/// Failures of the durable local key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("local store I/O error for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode '{key}': {message}")]
    Encode { key: String, message: String },

    #[error("failed to decode '{key}': {message}")]
    Decode { key: String, message: String },
}

/// Failures reported by the remote document store, classified for the
/// access gate and retry policy.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The account cannot currently read or write (e.g. unverified email).
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("remote document not found")]
    NotFound,

    /// Network, timeout or server-side failure; eligible for retry.
    #[error("transient remote failure: {0}")]
    Transient(String),

    #[error("remote payload could not be decoded: {0}")]
    Codec(String),
}

impl RemoteError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, RemoteError::PermissionDenied(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return RemoteError::Codec(e.to_string());
        }
        if let Some(status) = e.status() {
            return RemoteError::from_status(status.as_u16(), e.to_string());
        }
        RemoteError::Transient(e.to_string())
    }
}

impl RemoteError {
    /// Map an HTTP status code to the remote error taxonomy.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => RemoteError::PermissionDenied(message),
            404 => RemoteError::NotFound,
            _ => RemoteError::Transient(message),
        }
    }
}

/// Errors surfaced by sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Local(#[from] StoreError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("no signed-in account")]
    NotSignedIn,

    #[error("sync engine is shut down")]
    Shutdown,

    #[error("backup snapshot error: {0}")]
    Backup(String),
}

impl SyncError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, SyncError::Remote(e) if e.is_permission_denied())
    }
}
