//! The contract-obligation engine.
//!
//! Locking: `state` is the coarse lock over the store, the ledger and the
//! scheduler; it is held only across in-memory work. Each obligation also
//! has its own guard (see [`store::RecordGuard`]) held across a revision.
//! A caller needing both takes the record guard first.

pub mod consensus;
pub mod error;
pub mod ledger;
pub mod obligation;
pub mod persist;
pub mod revision;
pub mod scheduler;
pub mod status;
pub mod store;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Result;
use bitcoin::secp256k1::XOnlyPublicKey;
use bon::Builder;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{error, info, warn};

pub use error::{ObligationError, RevisionError};
pub use ledger::AccountingLedger;
pub use obligation::{ObligationRecord, ObligationState, Submission};
pub use scheduler::{ProofScheduler, STORAGE_PROOF_REORG_DEPTH};
pub use store::ObligationStore;

use crate::{
    collaborators::{FileStore, Node, ProofBuilder},
    crypto::{self, HostKey},
    types::{BlockHeight, ContractId, ContractTransaction, HostSettings, RevisionTransaction},
};
use persist::PersistedHost;

#[derive(Debug, Clone, Builder)]
pub struct HostOptions {
    pub persist_dir: PathBuf,
    /// Address advertised in the host's settings.
    #[builder(default)]
    pub net_address: String,
    #[builder(default = STORAGE_PROOF_REORG_DEPTH)]
    pub reorg_depth: BlockHeight,
    /// Settings used when no persisted state exists yet.
    #[builder(default)]
    pub settings: HostSettings,
}

/// Everything guarded by the coarse lock.
#[derive(Debug)]
pub(crate) struct HostState {
    pub block_height: BlockHeight,
    pub last_change_id: Option<u64>,
    pub settings: HostSettings,
    pub store: ObligationStore,
    pub ledger: AccountingLedger,
    pub scheduler: ProofScheduler,
    pub file_counter: u64,
}

impl HostState {
    fn is_consistent(&self) -> bool {
        self.store.is_consistent() && self.ledger.is_balanced(self.store.committed_space())
    }
}

struct Inner<N, F, P> {
    node: N,
    files: F,
    prover: P,
    key: HostKey,
    net_address: String,
    persist_path: PathBuf,
    state: RwLock<HostState>,
    persist_lock: Mutex<()>,
    consensus_lock: Mutex<()>,
}

/// Handle to a running host. Cheap to clone; all clones share one engine.
pub struct Host<N, F, P> {
    inner: Arc<Inner<N, F, P>>,
}

impl<N, F, P> Clone for Host<N, F, P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<N: Node, F: FileStore, P: ProofBuilder> Host<N, F, P> {
    /// Loads persisted state (or starts fresh) and rebuilds every index.
    /// Must complete before the first consensus change is processed.
    pub async fn new(options: HostOptions, node: N, files: F, prover: P) -> Result<Self> {
        tokio::fs::create_dir_all(&options.persist_dir).await?;
        let persist_path = options.persist_dir.join(persist::PERSIST_FILENAME);

        let (key, state) = match persist::load(&persist_path).await? {
            Some(persisted) => {
                let key = HostKey::from_secret_hex(&persisted.secret_key)?;
                let state = restore_state(persisted, options.reorg_depth)?;
                info!(
                    "Loaded {} obligations at height {}",
                    state.store.len(),
                    state.block_height
                );
                (key, state)
            }
            None => {
                info!("No persisted host state found, starting fresh");
                let settings = options.settings.clone();
                (
                    HostKey::generate(),
                    HostState {
                        block_height: 0,
                        last_change_id: None,
                        ledger: AccountingLedger::new(settings.total_storage),
                        settings,
                        store: ObligationStore::new(),
                        scheduler: ProofScheduler::new(options.reorg_depth),
                        file_counter: 0,
                    },
                )
            }
        };
        assert!(state.is_consistent(), "persisted host state is inconsistent");
        info!("Host key {}", key.public_key());

        let host = Self {
            inner: Arc::new(Inner {
                node,
                files,
                prover,
                key,
                net_address: options.net_address,
                persist_path,
                state: RwLock::new(state),
                persist_lock: Mutex::new(()),
                consensus_lock: Mutex::new(()),
            }),
        };
        host.save().await?;
        Ok(host)
    }

    /// Flushes all state to disk. The coarse lock is held until the write
    /// completes so nothing can change underneath the flush.
    pub async fn close(&self) -> Result<()> {
        let _persisting = self.inner.persist_lock.lock().await;
        let state = self.inner.state.write().await;
        let snapshot = self.snapshot(&state);
        persist::save(&self.inner.persist_path, &snapshot)?;
        info!(
            "Persisted {} obligations at height {}",
            state.store.len(),
            state.block_height
        );
        Ok(())
    }

    pub(crate) async fn save(&self) -> Result<()> {
        let _persisting = self.inner.persist_lock.lock().await;
        let snapshot = {
            let state = self.inner.state.read().await;
            self.snapshot(&state)
        };
        let path = self.inner.persist_path.clone();
        tokio::task::spawn_blocking(move || persist::save(&path, &snapshot)).await?
    }

    /// Saves after a change that is already committed in memory. A failure
    /// is logged; the next save writes the change.
    pub(crate) async fn save_committed(&self) {
        if let Err(e) = self.save().await {
            error!("Failed to persist host state: {:#}", e);
        }
    }

    fn snapshot(&self, state: &HostState) -> PersistedHost {
        let mut obligations: Vec<ObligationRecord> = state.store.iter().cloned().collect();
        obligations.sort_by_key(|r| r.id);
        PersistedHost {
            settings: state.settings.clone(),
            profit: state.ledger.profit(),
            block_height: state.block_height,
            last_change_id: state.last_change_id,
            file_counter: state.file_counter,
            secret_key: self.inner.key.secret_hex(),
            obligations,
        }
    }

    pub fn public_key(&self) -> XOnlyPublicKey {
        self.inner.key.public_key()
    }

    pub fn net_address(&self) -> &str {
        &self.inner.net_address
    }

    pub async fn block_height(&self) -> BlockHeight {
        self.inner.state.read().await.block_height
    }

    pub async fn last_change_id(&self) -> Option<u64> {
        self.inner.state.read().await.last_change_id
    }

    /// Snapshot of one obligation.
    pub async fn obligation(&self, id: &ContractId) -> Result<ObligationRecord, ObligationError> {
        self.inner.state.read().await.store.get(id).cloned()
    }

    pub async fn obligation_ids(&self) -> Vec<ContractId> {
        let state = self.inner.state.read().await;
        let mut ids: Vec<ContractId> = state.store.iter().map(|r| r.id).collect();
        ids.sort();
        ids
    }

    /// Takes an obligation's revision guard. Revisions of `id` wait until
    /// the returned guard is dropped; other obligations are unaffected.
    pub async fn lock_obligation(
        &self,
        id: &ContractId,
    ) -> Result<OwnedMutexGuard<()>, ObligationError> {
        let guard = self.inner.state.read().await.store.guard(id)?;
        Ok(guard.lock_owned().await)
    }

    /// Full check of the store indices and the space accounting.
    pub async fn check_invariants(&self) -> bool {
        self.inner.state.read().await.is_consistent()
    }

    pub async fn current_settings(&self) -> HostSettings {
        let mut settings = self.inner.state.read().await.settings.clone();
        settings.net_address = self.inner.net_address.clone();
        settings
    }

    /// Replaces the settings. A capacity change is applied to the remaining
    /// space as a delta.
    pub async fn update_settings(&self, settings: HostSettings) -> Result<()> {
        {
            let mut state = self.inner.state.write().await;
            state.ledger.resize(settings.total_storage);
            if state.ledger.space_remaining() < 0 {
                warn!(
                    "Total storage {} is below committed space, {} bytes remaining",
                    settings.total_storage,
                    state.ledger.space_remaining()
                );
            }
            state.settings = settings;
            debug_assert!(state.is_consistent());
        }
        info!("Settings updated");
        self.save().await
    }

    /// Accepts a new file contract and stores its data.
    pub async fn create_obligation(
        &self,
        txn: ContractTransaction,
        data: Vec<u8>,
    ) -> Result<ContractId, ObligationError> {
        let id = txn.contract_id();
        let (settings, height, reorg_depth) = {
            let state = self.inner.state.read().await;
            if state.store.contains(&id) {
                return Err(ObligationError::DuplicateObligation(id));
            }
            (
                state.settings.clone(),
                state.block_height,
                state.scheduler.reorg_depth(),
            )
        };
        validate_new_contract(&txn, data.len(), &settings, height, reorg_depth)
            .map_err(ObligationError::InvalidContract)?;

        let path = {
            let mut state = self.inner.state.write().await;
            state.file_counter += 1;
            PathBuf::from(format!("{}.dat", state.file_counter))
        };
        self.inner
            .files
            .write(&path, &data)
            .await
            .map_err(|e| ObligationError::Storage(e.to_string()))?;

        let record = ObligationRecord {
            id,
            contract: txn.contract.clone(),
            last_revision_txn: RevisionTransaction::new(id, txn.contract.clone()),
            renter_key: txn.renter_key,
            path: path.clone(),
            state: ObligationState::Active,
        };
        let committed = {
            let mut state = self.inner.state.write().await;
            insert_reserved(&mut state, record)
        };
        if let Err(e) = committed {
            warn!("Rejected contract {}: {}", id, e);
            self.discard_file(&path).await;
            return Err(e);
        }

        info!(
            "Accepted contract {} ({} bytes, window {}..={})",
            id, txn.contract.file_size, txn.contract.window_start, txn.contract.window_end
        );
        self.save_committed().await;
        Ok(id)
    }

    async fn discard_file(&self, path: &Path) {
        if let Err(e) = self.inner.files.delete(path).await {
            warn!("Failed to delete {}: {:#}", path.display(), e);
        }
    }
}

/// Reserves the record's space and indexes it, or does neither.
fn insert_reserved(state: &mut HostState, record: ObligationRecord) -> Result<(), ObligationError> {
    if state.store.contains(&record.id) {
        return Err(ObligationError::DuplicateObligation(record.id));
    }
    if record.contract.window_start <= state.block_height {
        return Err(ObligationError::InvalidContract(format!(
            "window start {} is not after height {}",
            record.contract.window_start, state.block_height
        )));
    }
    state.ledger.reserve(record.space())?;
    state.store.insert(record)?;
    debug_assert!(state.is_consistent());
    Ok(())
}

fn validate_new_contract(
    txn: &ContractTransaction,
    data_len: usize,
    settings: &HostSettings,
    height: BlockHeight,
    reorg_depth: BlockHeight,
) -> Result<(), String> {
    let fc = &txn.contract;
    if fc.revision_number != 0 {
        return Err(format!("revision number must start at 0, got {}", fc.revision_number));
    }
    if fc.window_start <= height {
        return Err(format!(
            "window start {} is not after height {}",
            fc.window_start, height
        ));
    }
    revision::check_terms(fc, settings, height, reorg_depth)
        .map_err(revision::TermsViolation::into_message)?;
    if fc.file_size > settings.max_filesize {
        return Err(format!(
            "file size {} exceeds maximum {}",
            fc.file_size, settings.max_filesize
        ));
    }
    if data_len as u64 != fc.file_size {
        return Err(format!(
            "received {} bytes, contract declares {}",
            data_len, fc.file_size
        ));
    }
    if fc.payout < fc.host_payout {
        return Err("host payout exceeds contract payout".to_string());
    }
    let required = revision::storage_cost(settings.price, fc.file_size, fc.window_start, height);
    if fc.host_payout < required {
        return Err(format!(
            "host payout {} below price {}",
            fc.host_payout, required
        ));
    }
    let digest = ContractTransaction::sig_hash(fc, &txn.renter_key);
    if !crypto::verify(&txn.renter_key, &digest, &txn.renter_signature) {
        return Err("renter signature does not verify".to_string());
    }
    Ok(())
}

fn restore_state(persisted: PersistedHost, reorg_depth: BlockHeight) -> Result<HostState> {
    let mut store = ObligationStore::new();
    for record in persisted.obligations {
        store.insert(record)?;
    }
    let ledger = AccountingLedger::restore(
        persisted.settings.total_storage,
        store.committed_space(),
        persisted.profit,
    );
    let scheduler = ProofScheduler::rebuild(reorg_depth, &store);
    Ok(HostState {
        block_height: persisted.block_height,
        last_change_id: persisted.last_change_id,
        settings: persisted.settings,
        store,
        ledger,
        scheduler,
        file_counter: persisted.file_counter,
    })
}
