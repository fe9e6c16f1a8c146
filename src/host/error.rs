use thiserror::Error as ThisError;

use crate::types::{BlockHeight, ContractId};

#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum ObligationError {
    #[error("Obligation already exists: {0}")]
    DuplicateObligation(ContractId),
    #[error("Obligation not found: {0}")]
    NotFound(ContractId),
    #[error("Capacity exceeded: requested {requested} bytes, {remaining} remaining")]
    CapacityExceeded { requested: u64, remaining: i64 },
    #[error("Invalid contract: {0}")]
    InvalidContract(String),
    #[error("Storage failure: {0}")]
    Storage(String),
}

#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum RevisionError {
    #[error("Obligation not found: {0}")]
    NotFound(ContractId),
    #[error("Stale revision: proposed {proposed}, current {current}")]
    StaleRevision { proposed: u64, current: u64 },
    #[error("Proof window already open: starts at {window_start}, height {height}")]
    WindowAlreadyOpen {
        window_start: BlockHeight,
        height: BlockHeight,
    },
    #[error("Insufficient payout: offered {offered}, required {required}")]
    InsufficientPayout { offered: String, required: String },
    #[error("Oversized contract: {0}")]
    OversizedContract(String),
    #[error("Bad signature: {0}")]
    BadSignature(&'static str),
    #[error("Capacity exceeded: requested {requested} bytes, {remaining} remaining")]
    CapacityExceeded { requested: u64, remaining: i64 },
    #[error("Invalid revision: {0}")]
    InvalidRevision(String),
}

/// Returned by the ledger when a reservation does not fit.
#[derive(ThisError, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Capacity exceeded: requested {requested} bytes, {remaining} remaining")]
pub struct CapacityExceeded {
    pub requested: u64,
    pub remaining: i64,
}

impl From<CapacityExceeded> for ObligationError {
    fn from(e: CapacityExceeded) -> Self {
        ObligationError::CapacityExceeded {
            requested: e.requested,
            remaining: e.remaining,
        }
    }
}

impl From<CapacityExceeded> for RevisionError {
    fn from(e: CapacityExceeded) -> Self {
        RevisionError::CapacityExceeded {
            requested: e.requested,
            remaining: e.remaining,
        }
    }
}
