use thiserror::Error;

use crate::transaction::{AbortReason, TransactionId};

pub type GraniteResult<T, E = GraniteError> = Result<T, E>;

#[derive(Debug, Error)]
pub enum GraniteError {
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("transaction {txn_id} aborted: {reason}")]
    TransactionAbort {
        txn_id: TransactionId,
        reason: AbortReason,
    },
}

impl GraniteError {
    pub fn abort_reason(&self) -> Option<AbortReason> {
        match self {
            GraniteError::TransactionAbort { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}
