// Domain errors for the ledger library.
// Storage, config and CLI edges wrap these in anyhow with context.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum LedgerError {
    #[error("invalid recurrence rule: {0}")]
    InvalidRecurrence(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("cannot move {entity} from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("invalid period: {0}")]
    InvalidPeriod(String),

    #[error("invalid stored value: {0}")]
    InvalidValue(String),
}

impl LedgerError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        LedgerError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;
