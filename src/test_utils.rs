//! Collaborator doubles and fixture builders shared by unit and integration
//! tests.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::{Result, anyhow};
use bitcoin::secp256k1::schnorr::Signature;

use crate::{
    collaborators::{
        ConsensusFeed, FileStore, PeerDirectory, PoolError, TransactionPool, Wallet, WalletError,
    },
    crypto::HostKey,
    host::{Host, HostOptions, ObligationRecord, ObligationState},
    storage::DigestProofBuilder,
    types::{
        Block, BlockHeight, BlockId, ConsensusChange, ContractId, ContractTransaction, Currency,
        FileContract, Hash256, HostSettings, PriceQuote, RevisionTransaction, StorageProof,
        Transaction, TransactionBody,
    },
};

pub fn gen_contract(
    window_start: BlockHeight,
    window_end: BlockHeight,
    file_size: u64,
) -> FileContract {
    FileContract::builder()
        .file_size(file_size)
        .file_merkle_root(Hash256::digest(&file_size.to_le_bytes()))
        .window_start(window_start)
        .window_end(window_end)
        .payout(Currency::new(1_000_000))
        .host_payout(Currency::new(500_000))
        .build()
}

pub fn gen_record(n: u64, contract: FileContract) -> ObligationRecord {
    let id = ContractId(Hash256::digest(&n.to_le_bytes()));
    ObligationRecord {
        id,
        last_revision_txn: RevisionTransaction::new(id, contract.clone()),
        contract,
        renter_key: HostKey::generate().public_key(),
        path: PathBuf::from(format!("{}.dat", n)),
        state: ObligationState::Active,
    }
}

pub fn block_id(height: BlockHeight) -> BlockId {
    BlockId(Hash256::digest(&height.to_le_bytes()))
}

pub fn gen_block(height: BlockHeight, transactions: Vec<Transaction>) -> Block {
    Block::builder()
        .height(height)
        .id(block_id(height))
        .parent_id(block_id(height.saturating_sub(1)))
        .transactions(transactions)
        .build()
}

/// Empty blocks `start..=end`, lowest first.
pub fn gen_blocks(start: BlockHeight, end: BlockHeight) -> Vec<Block> {
    (start..=end).map(|h| gen_block(h, vec![])).collect()
}

pub fn proof_transaction(id: ContractId) -> Transaction {
    Transaction::unsigned(TransactionBody::StorageProof(StorageProof {
        parent_id: id,
        segment_index: 0,
        segment: vec![],
        hash_set: vec![],
    }))
}

pub fn apply_change(id: u64, blocks: Vec<Block>) -> ConsensusChange {
    ConsensusChange::builder()
        .id(id)
        .applied_blocks(blocks)
        .build()
}

/// Reverts the tip down to `to`, exclusive, then applies `blocks`.
pub fn reorg_change(id: u64, tip: BlockHeight, to: BlockHeight, blocks: Vec<Block>) -> ConsensusChange {
    let mut reverted = gen_blocks(to + 1, tip);
    reverted.reverse();
    ConsensusChange::builder()
        .id(id)
        .reverted_blocks(reverted)
        .applied_blocks(blocks)
        .build()
}

/// Small limits and a price of 1 per byte per block so fixtures stay readable.
pub fn test_settings() -> HostSettings {
    HostSettings::builder()
        .total_storage(1_000_000)
        .max_filesize(100_000)
        .max_duration(1_000)
        .window_size(10)
        .price(Currency::new(1))
        .collateral(Currency::ZERO)
        .build()
}

/// A renter forming and revising contracts with the host.
#[derive(Debug, Clone)]
pub struct Renter {
    pub key: HostKey,
}

impl Default for Renter {
    fn default() -> Self {
        Self {
            key: HostKey::generate(),
        }
    }
}

impl Renter {
    pub fn contract_for(
        &self,
        data: &[u8],
        window_start: BlockHeight,
        window_end: BlockHeight,
    ) -> FileContract {
        FileContract::builder()
            .file_size(data.len() as u64)
            .file_merkle_root(Hash256::digest(data))
            .window_start(window_start)
            .window_end(window_end)
            .payout(Currency::new(1_000_000))
            .host_payout(Currency::new(500_000))
            .build()
    }

    pub fn sign_contract(&self, contract: FileContract) -> ContractTransaction {
        let renter_key = self.key.public_key();
        let digest = ContractTransaction::sig_hash(&contract, &renter_key);
        ContractTransaction {
            contract,
            renter_key,
            renter_signature: self.key.sign(&digest),
        }
    }

    /// A revision of `parent_id` to `revision`, with the renter's signature.
    pub fn sign_revision(
        &self,
        parent_id: ContractId,
        revision: FileContract,
    ) -> (RevisionTransaction, Signature) {
        let txn = RevisionTransaction::new(parent_id, revision);
        let signature = self.key.sign(&txn.sig_hash());
        (txn, signature)
    }
}

#[derive(Debug, Default)]
struct NodeState {
    signed: Vec<Transaction>,
    broadcast: Vec<Transaction>,
    reject_broadcasts: bool,
    quotes: Vec<PriceQuote>,
    changes: Vec<ConsensusChange>,
    feed_down: bool,
}

/// In-process node: records what the host signs and broadcasts, serves
/// configured price quotes and consensus changes.
#[derive(Debug, Clone, Default)]
pub struct MockNode {
    state: Arc<Mutex<NodeState>>,
}

impl MockNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn broadcast_transactions(&self) -> Vec<Transaction> {
        self.state.lock().unwrap().broadcast.clone()
    }

    pub fn signed_transactions(&self) -> Vec<Transaction> {
        self.state.lock().unwrap().signed.clone()
    }

    pub fn set_reject_broadcasts(&self, reject: bool) {
        self.state.lock().unwrap().reject_broadcasts = reject;
    }

    pub fn set_quotes(&self, quotes: Vec<PriceQuote>) {
        self.state.lock().unwrap().quotes = quotes;
    }

    pub fn push_change(&self, change: ConsensusChange) {
        self.state.lock().unwrap().changes.push(change);
    }

    pub fn set_feed_down(&self, down: bool) {
        self.state.lock().unwrap().feed_down = down;
    }
}

impl Wallet for MockNode {
    async fn sign(&self, mut transaction: Transaction) -> Result<Transaction, WalletError> {
        let mut state = self.state.lock().unwrap();
        let key = HostKey::generate();
        transaction
            .signatures
            .push(key.sign(&transaction.id().0));
        state.signed.push(transaction.clone());
        Ok(transaction)
    }
}

impl TransactionPool for MockNode {
    async fn broadcast(&self, transaction: Transaction) -> Result<(), PoolError> {
        let mut state = self.state.lock().unwrap();
        if state.reject_broadcasts {
            return Err(PoolError::Rejected("transaction pool full".to_string()));
        }
        state.broadcast.push(transaction);
        Ok(())
    }
}

impl PeerDirectory for MockNode {
    async fn sample(&self, n: usize) -> Result<Vec<PriceQuote>> {
        let state = self.state.lock().unwrap();
        Ok(state.quotes.iter().take(n).cloned().collect())
    }
}

impl ConsensusFeed for MockNode {
    async fn consensus_changes(&self, after: Option<u64>) -> Result<Vec<ConsensusChange>> {
        let state = self.state.lock().unwrap();
        if state.feed_down {
            return Err(anyhow!("connection refused"));
        }
        Ok(state
            .changes
            .iter()
            .filter(|c| after.is_none_or(|last| c.id > last))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryFileStore {
    files: Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FileStore for MemoryFileStore {
    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("No such file: {}", path.display()))
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), data.to_vec());
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        self.files.lock().unwrap().remove(path);
        Ok(())
    }
}

pub type TestHost = Host<MockNode, MemoryFileStore, DigestProofBuilder>;

/// A host on `test_settings` persisting into `dir`.
pub async fn new_test_host(dir: &Path) -> Result<(TestHost, MockNode, MemoryFileStore)> {
    let node = MockNode::new();
    let files = MemoryFileStore::new();
    let host = Host::new(
        HostOptions::builder()
            .persist_dir(dir.to_path_buf())
            .net_address("127.0.0.1:9982".to_string())
            .settings(test_settings())
            .build(),
        node.clone(),
        files.clone(),
        DigestProofBuilder,
    )
    .await?;
    Ok((host, node, files))
}

/// Forms a contract over `data` with `host` and returns its id.
pub async fn form_contract(
    host: &TestHost,
    renter: &Renter,
    data: &[u8],
    window_start: BlockHeight,
    window_end: BlockHeight,
) -> Result<ContractId> {
    let txn = renter.sign_contract(renter.contract_for(data, window_start, window_end));
    Ok(host.create_obligation(txn, data.to_vec()).await?)
}
