use bitcoin::secp256k1::schnorr::Signature;
use tracing::{info, warn};

use super::{Host, HostState, error::RevisionError, obligation::ObligationRecord};
use crate::{
    collaborators::{FileStore, Node, ProofBuilder},
    crypto,
    types::{BlockHeight, ContractId, Currency, FileContract, HostSettings, RevisionTransaction},
};

/// Largest encoded revision transaction accepted, not counting file data.
pub const MAX_CONTRACT_LEN: usize = 1 << 16;

/// What the host charges to hold `file_size` bytes from `height` until the
/// proof window opens.
pub fn storage_cost(
    price: Currency,
    file_size: u64,
    window_start: BlockHeight,
    height: BlockHeight,
) -> Currency {
    price
        .saturating_mul(file_size as u128)
        .saturating_mul(window_start.saturating_sub(height) as u128)
}

/// Host payout a revision must carry: the current payout adjusted by the
/// change in storage cost.
fn required_payout(
    current: &FileContract,
    proposed: &FileContract,
    price: Currency,
    height: BlockHeight,
) -> Currency {
    let old_cost = storage_cost(price, current.file_size, current.window_start, height);
    let new_cost = storage_cost(price, proposed.file_size, proposed.window_start, height);
    if new_cost >= old_cost {
        current.host_payout + (new_cost - old_cost)
    } else {
        current.host_payout - (old_cost - new_cost)
    }
}

/// Window terms outside what the host's settings allow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermsViolation {
    Duration(String),
    Window(String),
}

impl TermsViolation {
    pub fn into_message(self) -> String {
        match self {
            TermsViolation::Duration(message) | TermsViolation::Window(message) => message,
        }
    }
}

impl From<TermsViolation> for RevisionError {
    fn from(violation: TermsViolation) -> Self {
        match violation {
            TermsViolation::Duration(message) => RevisionError::OversizedContract(message),
            TermsViolation::Window(message) => RevisionError::InvalidRevision(message),
        }
    }
}

/// Bounds shared by new contracts and revisions: the window may not open
/// more than `max_duration` blocks out, and must stay open long enough for
/// a proof submitted `reorg_depth` blocks in to land.
pub fn check_terms(
    contract: &FileContract,
    settings: &HostSettings,
    height: BlockHeight,
    reorg_depth: BlockHeight,
) -> Result<(), TermsViolation> {
    let duration = contract.window_start.saturating_sub(height);
    if duration > settings.max_duration {
        return Err(TermsViolation::Duration(format!(
            "duration {} exceeds maximum {}",
            duration, settings.max_duration
        )));
    }
    let min_width = settings.window_size.max(reorg_depth);
    if contract.window_end < contract.window_start
        || contract.window_end - contract.window_start < min_width
    {
        return Err(TermsViolation::Window(format!(
            "proof window {}..={} shorter than {} blocks",
            contract.window_start, contract.window_end, min_width
        )));
    }
    Ok(())
}

fn check_window(
    record: &ObligationRecord,
    proposed: &FileContract,
    height: BlockHeight,
) -> Result<(), RevisionError> {
    if !record.state.is_active() || height >= record.contract.window_start {
        return Err(RevisionError::WindowAlreadyOpen {
            window_start: record.contract.window_start,
            height,
        });
    }
    if proposed.window_start <= height {
        return Err(RevisionError::WindowAlreadyOpen {
            window_start: proposed.window_start,
            height,
        });
    }
    Ok(())
}

/// Checks a proposed revision against the current record. Signatures are
/// verified separately.
pub fn validate_revision(
    record: &ObligationRecord,
    proposed: &FileContract,
    txn: &RevisionTransaction,
    settings: &HostSettings,
    height: BlockHeight,
    reorg_depth: BlockHeight,
) -> Result<(), RevisionError> {
    if txn.parent_id != record.id {
        return Err(RevisionError::InvalidRevision(format!(
            "revision targets {}",
            txn.parent_id
        )));
    }
    if txn.revision != *proposed {
        return Err(RevisionError::InvalidRevision(
            "transaction terms differ from proposed contract".to_string(),
        ));
    }

    let current = &record.contract;
    if proposed.revision_number <= current.revision_number {
        return Err(RevisionError::StaleRevision {
            proposed: proposed.revision_number,
            current: current.revision_number,
        });
    }

    check_window(record, proposed, height)?;
    check_terms(proposed, settings, height, reorg_depth)?;

    if proposed.payout < proposed.host_payout {
        return Err(RevisionError::InvalidRevision(
            "host payout exceeds contract payout".to_string(),
        ));
    }

    if proposed.file_size > settings.max_filesize {
        return Err(RevisionError::OversizedContract(format!(
            "file size {} exceeds maximum {}",
            proposed.file_size, settings.max_filesize
        )));
    }
    let encoded_len = serde_json::to_vec(txn).map_or(usize::MAX, |b| b.len());
    if encoded_len > MAX_CONTRACT_LEN {
        return Err(RevisionError::OversizedContract(format!(
            "encoded revision is {} bytes, maximum {}",
            encoded_len, MAX_CONTRACT_LEN
        )));
    }

    let required = required_payout(current, proposed, settings.price, height);
    if proposed.host_payout < required {
        return Err(RevisionError::InsufficientPayout {
            offered: proposed.host_payout.to_string(),
            required: required.to_string(),
        });
    }

    Ok(())
}

/// Applies the space delta and the new terms, or nothing.
fn commit_revision(
    state: &mut HostState,
    id: &ContractId,
    proposed: FileContract,
    txn: RevisionTransaction,
) -> Result<(), RevisionError> {
    let height = state.block_height;
    let record = state
        .store
        .get(id)
        .map_err(|_| RevisionError::NotFound(*id))?;
    // the chain may have advanced while the revision was being checked
    check_window(record, &proposed, height)?;

    let old_size = record.contract.file_size;
    if proposed.file_size > old_size {
        state.ledger.reserve(proposed.file_size - old_size)?;
    } else {
        state.ledger.release(old_size - proposed.file_size);
    }
    state
        .store
        .revise(id, proposed, txn)
        .map_err(|_| RevisionError::NotFound(*id))?;
    debug_assert!(state.is_consistent());
    Ok(())
}

impl<N: Node, F: FileStore, P: ProofBuilder> Host<N, F, P> {
    /// Validates, co-signs and applies a revision. Revisions of the same
    /// obligation are serialized on its guard; any rejection leaves the
    /// record and the ledger untouched.
    pub async fn apply_revision(
        &self,
        id: &ContractId,
        proposed: FileContract,
        txn: RevisionTransaction,
        renter_signature: Signature,
    ) -> Result<RevisionTransaction, RevisionError> {
        let result = self
            .try_apply_revision(id, proposed, txn, renter_signature)
            .await;
        match &result {
            Ok(signed) => info!(
                "Applied revision {} to {}",
                signed.revision.revision_number, id
            ),
            Err(e) => warn!("Rejected revision for {}: {}", id, e),
        }
        result
    }

    async fn try_apply_revision(
        &self,
        id: &ContractId,
        proposed: FileContract,
        mut txn: RevisionTransaction,
        renter_signature: Signature,
    ) -> Result<RevisionTransaction, RevisionError> {
        let guard = self
            .inner
            .state
            .read()
            .await
            .store
            .guard(id)
            .map_err(|_| RevisionError::NotFound(*id))?;
        let _held = guard.lock().await;

        let (record, settings, height, reorg_depth) = {
            let state = self.inner.state.read().await;
            let record = state
                .store
                .get(id)
                .map_err(|_| RevisionError::NotFound(*id))?
                .clone();
            (
                record,
                state.settings.clone(),
                state.block_height,
                state.scheduler.reorg_depth(),
            )
        };
        validate_revision(&record, &proposed, &txn, &settings, height, reorg_depth)?;

        let digest = txn.sig_hash();
        if !crypto::verify(&record.renter_key, &digest, &renter_signature) {
            return Err(RevisionError::BadSignature(
                "renter signature does not verify",
            ));
        }
        if let Some(claimed) = &txn.host_signature {
            if !crypto::verify(&self.inner.key.public_key(), &digest, claimed) {
                return Err(RevisionError::BadSignature(
                    "host signature does not verify",
                ));
            }
        }
        let host_signature = self.inner.key.sign(&digest);
        if !crypto::verify(&self.inner.key.public_key(), &digest, &host_signature) {
            return Err(RevisionError::BadSignature("host signature does not verify"));
        }
        txn.renter_signature = Some(renter_signature);
        txn.host_signature = Some(host_signature);

        {
            let mut state = self.inner.state.write().await;
            commit_revision(&mut state, id, proposed, txn.clone())?;
        }
        self.save_committed().await;
        Ok(txn)
    }
}
