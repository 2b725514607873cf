use thiserror::Error;

use crate::session::SessionState;

/// Failures of the two remote operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Transport failure, non-2xx status, or an undecodable outer envelope.
    #[error("network_error:{message}")]
    Network { message: String },
    #[error("not_found:{id}")]
    NotFound { id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("storage_read_failed:{message}")]
    Read { message: String },
    #[error("storage_write_failed:{message}")]
    Write { message: String },
    #[error("storage_encode_failed:{message}")]
    Encode { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The simulated program failed or returned non-JSON; `cause` is the
    /// service's explanation, shown verbatim.
    #[error("execution_error:{cause}")]
    Execution { cause: String },
    #[error("identity_conflict:no key is held locally for {id}; fork the document to save a copy")]
    IdentityConflict { id: String },
    #[error("identity_invalid:capability keys cannot be adopted for an empty id")]
    EmptyId,
    #[error("document_unloaded:{id} failed to load; reload it before executing")]
    Unloaded { id: String },
    #[error("session_not_ready:{}", state.as_str())]
    NotReady { state: SessionState },
}

impl SessionError {
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Sync(SyncError::Network { .. }))
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Sync(SyncError::NotFound { .. }))
    }
}
