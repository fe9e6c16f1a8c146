use std::path::Path;

use anyhow::Result;
use thiserror::Error as ThisError;

use crate::types::{
    BlockHeight, ConsensusChange, ContractId, FileContract, PriceQuote, StorageProof, Transaction,
};

#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("Signing failed: {0}")]
    SigningFailed(String),
}

#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Transaction rejected: {0}")]
    Rejected(String),
}

pub trait Wallet: Send + Sync + Clone + 'static {
    fn sign(
        &self,
        transaction: Transaction,
    ) -> impl Future<Output = Result<Transaction, WalletError>> + Send;
}

pub trait TransactionPool: Send + Sync + Clone + 'static {
    fn broadcast(
        &self,
        transaction: Transaction,
    ) -> impl Future<Output = Result<(), PoolError>> + Send;
}

pub trait PeerDirectory: Send + Sync + Clone + 'static {
    fn sample(&self, n: usize) -> impl Future<Output = Result<Vec<PriceQuote>>> + Send;
}

/// Ordered source of consensus changes. `after` is the id of the last change
/// already processed, `None` to start from the beginning.
pub trait ConsensusFeed: Send + Sync + Clone + 'static {
    fn consensus_changes(
        &self,
        after: Option<u64>,
    ) -> impl Future<Output = Result<Vec<ConsensusChange>>> + Send;
}

/// Content storage. Paths are relative to the store's root.
pub trait FileStore: Send + Sync + Clone + 'static {
    fn read(&self, path: &Path) -> impl Future<Output = Result<Vec<u8>>> + Send;
    fn write(&self, path: &Path, data: &[u8]) -> impl Future<Output = Result<()>> + Send;
    fn delete(&self, path: &Path) -> impl Future<Output = Result<()>> + Send;
}

pub trait ProofBuilder: Send + Sync + Clone + 'static {
    fn build(
        &self,
        id: &ContractId,
        contract: &FileContract,
        height: BlockHeight,
        data: &[u8],
    ) -> Result<StorageProof>;
}

/// Everything the host needs from the full node it is attached to.
pub trait Node: Wallet + TransactionPool + PeerDirectory {}
impl<T> Node for T where T: Wallet + TransactionPool + PeerDirectory {}
