use std::{fmt, path::PathBuf};

use bitcoin::secp256k1::XOnlyPublicKey;
use serde::{Deserialize, Serialize};

use crate::types::{BlockHeight, ContractId, FileContract, RevisionTransaction, TransactionId};

/// A storage proof the host broadcast and is waiting to see confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub height: BlockHeight,
    pub txid: TransactionId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ObligationState {
    Active,
    ProofPending { submission: Option<Submission> },
    Proven { height: BlockHeight },
    Missed,
}

impl ObligationState {
    pub fn is_active(&self) -> bool {
        matches!(self, ObligationState::Active)
    }
}

impl fmt::Display for ObligationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObligationState::Active => write!(f, "active"),
            ObligationState::ProofPending { submission: None } => write!(f, "proof pending"),
            ObligationState::ProofPending {
                submission: Some(s),
            } => write!(f, "proof pending (submitted at {})", s.height),
            ObligationState::Proven { height } => write!(f, "proven at {}", height),
            ObligationState::Missed => write!(f, "missed"),
        }
    }
}

/// A file contract the host is obligated to fulfill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObligationRecord {
    pub id: ContractId,
    pub contract: FileContract,
    pub last_revision_txn: RevisionTransaction,
    pub renter_key: XOnlyPublicKey,
    /// Location of the data inside the file store.
    pub path: PathBuf,
    pub state: ObligationState,
}

impl ObligationRecord {
    /// Space this obligation holds against the host's capacity.
    pub fn space(&self) -> u64 {
        self.contract.file_size
    }
}
