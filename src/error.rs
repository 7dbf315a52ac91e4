use cashline_core::{AccountId, StoreError, ValidationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("account not found: {0}")]
    NotFound(AccountId),
    #[error("limit exceeded")]
    LimitExceeded,
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::AccountNotFound(id) => LedgerError::NotFound(id),
            other => LedgerError::Store(other),
        }
    }
}
