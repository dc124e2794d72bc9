//! Sync engine error taxonomy

use crate::remote::RemoteError;

/// Errors surfaced by the sync engine
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Network unreachable or the request timed out
    #[error("transport error: {0}")]
    Transport(String),

    /// The server refused the request
    #[error("server rejected request ({code}): {message}")]
    ServerRejected { code: String, message: String },

    /// The local transaction failed and was rolled back
    #[error("local store error: {0:#}")]
    LocalStore(#[from] anyhow::Error),

    /// A response arrived after a newer one had already been accepted
    #[error("response {sequence} discarded, {accepted} already accepted")]
    OrderingDiscarded { sequence: u64, accepted: u64 },

    /// Superseded by a newer refresh
    #[error("operation cancelled")]
    Cancelled,

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A remote payload failed normalization
    #[error("invalid data: {0}")]
    Validation(String),
}

impl SyncError {
    /// Errors that are dropped without notifying the user
    pub fn is_silent(&self) -> bool {
        matches!(self, SyncError::OrderingDiscarded { .. } | SyncError::Cancelled)
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::Transport(_))
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        SyncError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Transport(message) => SyncError::Transport(message),
            RemoteError::Rejected { code, message } => SyncError::ServerRejected { code, message },
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
