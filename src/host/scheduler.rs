use std::{collections::BTreeSet, path::PathBuf};

use tracing::{info, warn};

use super::{
    error::ObligationError,
    ledger::AccountingLedger,
    obligation::{ObligationRecord, ObligationState, Submission},
    store::ObligationStore,
};
use crate::types::{Block, BlockHeight, ContractId, Currency, FileContract};

/// Blocks to wait past the start of a proof window before submitting, so a
/// shallow reorg near the window boundary does not force a resubmission.
pub const STORAGE_PROOF_REORG_DEPTH: BlockHeight = 10;

/// A storage proof the host should build and broadcast now.
#[derive(Debug, Clone)]
pub struct ProofJob {
    pub id: ContractId,
    pub contract: FileContract,
    pub path: PathBuf,
    pub height: BlockHeight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Proven { credited: Currency },
    Missed,
}

/// Drives each obligation through `Active -> ProofPending -> Proven | Missed`.
///
/// `pending` holds every obligation whose window has opened and which is
/// still in the store.
#[derive(Debug, Clone)]
pub struct ProofScheduler {
    reorg_depth: BlockHeight,
    pending: BTreeSet<ContractId>,
}

impl ProofScheduler {
    pub fn new(reorg_depth: BlockHeight) -> Self {
        Self {
            reorg_depth,
            pending: BTreeSet::new(),
        }
    }

    pub fn rebuild(reorg_depth: BlockHeight, store: &ObligationStore) -> Self {
        let pending = store
            .iter()
            .filter(|r| !r.state.is_active())
            .map(|r| r.id)
            .collect();
        Self {
            reorg_depth,
            pending,
        }
    }

    pub fn reorg_depth(&self) -> BlockHeight {
        self.reorg_depth
    }

    pub fn pending(&self) -> &BTreeSet<ContractId> {
        &self.pending
    }

    /// Handles `block` becoming the tip. Returns the obligations whose window
    /// closed with this block; they must be resolved before the next block.
    pub fn apply_block(&mut self, store: &mut ObligationStore, block: &Block) -> Vec<ContractId> {
        let height = block.height;

        for id in block.transactions.iter().filter_map(|t| t.storage_proof_for()) {
            if !self.pending.contains(&id) {
                continue;
            }
            let Ok(record) = store.get(&id) else {
                continue;
            };
            let in_window =
                record.contract.window_start <= height && height <= record.contract.window_end;
            if matches!(record.state, ObligationState::ProofPending { .. }) && in_window {
                info!("Storage proof for {} confirmed at height {}", id, height);
                let updated = store.set_state(&id, ObligationState::Proven { height });
                debug_assert!(updated.is_ok(), "pending obligation {} not in store", id);
            }
        }

        for id in store.opening_at(height) {
            let Ok(record) = store.get(&id) else {
                continue;
            };
            if record.state.is_active() {
                info!(
                    "Proof window for {} opened at height {}, submitting from {}",
                    id,
                    height,
                    height + self.reorg_depth
                );
                let updated =
                    store.set_state(&id, ObligationState::ProofPending { submission: None });
                debug_assert!(updated.is_ok(), "opening obligation {} not in store", id);
                self.pending.insert(id);
            }
        }

        match height.checked_sub(1) {
            Some(closed) => store.due_at(closed),
            None => vec![],
        }
    }

    /// Handles the tip `block` being reverted. Proofs confirmed or submitted
    /// in the reverted block are no longer relied on.
    pub fn revert_block(&mut self, store: &mut ObligationStore, block: &Block) {
        let height = block.height;
        for id in &self.pending {
            let Ok(record) = store.get(id) else {
                continue;
            };
            let reset = match record.state {
                ObligationState::Proven { height: proven } => proven >= height,
                ObligationState::ProofPending {
                    submission: Some(submission),
                } => submission.height >= height,
                _ => false,
            };
            if reset {
                warn!(
                    "Block {} reverted, storage proof for {} ({}) must be resubmitted",
                    height, id, record.state
                );
                let updated =
                    store.set_state(id, ObligationState::ProofPending { submission: None });
                debug_assert!(updated.is_ok(), "pending obligation {} not in store", id);
            }
        }
    }

    /// Obligations that need a proof submitted at `height`: window open for
    /// at least the reorg depth, not yet closed, nothing in flight.
    pub fn due_jobs(&self, store: &ObligationStore, height: BlockHeight) -> Vec<ProofJob> {
        self.pending
            .iter()
            .filter_map(|id| store.get(id).ok())
            .filter(|r| r.state == ObligationState::ProofPending { submission: None })
            .filter(|r| {
                height >= r.contract.window_start.saturating_add(self.reorg_depth)
                    && height <= r.contract.window_end
            })
            .map(|r| ProofJob {
                id: r.id,
                contract: r.contract.clone(),
                path: r.path.clone(),
                height,
            })
            .collect()
    }

    pub fn record_submission(
        &self,
        store: &mut ObligationStore,
        id: &ContractId,
        submission: Submission,
    ) -> Result<(), ObligationError> {
        let record = store.get(id)?;
        if record.state == (ObligationState::ProofPending { submission: None }) {
            store.set_state(
                id,
                ObligationState::ProofPending {
                    submission: Some(submission),
                },
            )?;
        }
        Ok(())
    }

    /// Settles an obligation whose window has closed: releases its space,
    /// credits the payout if the proof was confirmed, and drops the record.
    /// The caller holds the record's guard.
    pub fn resolve(
        &mut self,
        store: &mut ObligationStore,
        ledger: &mut AccountingLedger,
        id: &ContractId,
    ) -> Result<(ObligationRecord, Outcome), ObligationError> {
        let record = store.get(id)?;
        let outcome = match record.state {
            ObligationState::Proven { .. } => Outcome::Proven {
                credited: record.contract.payout.post_tax(),
            },
            _ => Outcome::Missed,
        };
        if outcome == Outcome::Missed {
            store.set_state(id, ObligationState::Missed)?;
        }

        let record = store.remove(id)?;
        ledger.release(record.space());
        match outcome {
            Outcome::Proven { credited } => {
                ledger.credit_profit(credited);
                info!("Obligation {} fulfilled, credited {}", id, credited);
            }
            Outcome::Missed => warn!(
                "Obligation {} missed its proof window ending at {}",
                id, record.contract.window_end
            ),
        }
        self.pending.remove(id);
        Ok((record, outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{gen_block, gen_contract, gen_record, proof_transaction};
    use crate::types::TransactionId;

    fn setup() -> (ObligationStore, AccountingLedger, ProofScheduler, ContractId) {
        let mut store = ObligationStore::new();
        let mut ledger = AccountingLedger::new(1000);
        let record = gen_record(1, gen_contract(100, 120, 10));
        let id = record.id;
        ledger.reserve(record.space()).unwrap();
        store.insert(record).unwrap();
        (store, ledger, ProofScheduler::new(STORAGE_PROOF_REORG_DEPTH), id)
    }

    #[test]
    fn test_window_opens_and_jobs_wait_for_depth() {
        let (mut store, _, mut scheduler, id) = setup();
        scheduler.apply_block(&mut store, &gen_block(100, vec![]));
        assert_eq!(
            store.get(&id).unwrap().state,
            ObligationState::ProofPending { submission: None }
        );
        assert!(scheduler.due_jobs(&store, 109).is_empty());
        let jobs = scheduler.due_jobs(&store, 110);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, id);
        assert!(scheduler.due_jobs(&store, 121).is_empty());
    }

    #[test]
    fn test_confirmation_and_revert() {
        let (mut store, _, mut scheduler, id) = setup();
        scheduler.apply_block(&mut store, &gen_block(100, vec![]));
        scheduler.apply_block(&mut store, &gen_block(111, vec![proof_transaction(id)]));
        assert_eq!(
            store.get(&id).unwrap().state,
            ObligationState::Proven { height: 111 }
        );

        scheduler.revert_block(&mut store, &gen_block(111, vec![proof_transaction(id)]));
        assert_eq!(
            store.get(&id).unwrap().state,
            ObligationState::ProofPending { submission: None }
        );
    }

    #[test]
    fn test_revert_clears_submission() {
        let (mut store, _, mut scheduler, id) = setup();
        scheduler.apply_block(&mut store, &gen_block(100, vec![]));
        let submission = Submission {
            height: 110,
            txid: TransactionId::default(),
        };
        scheduler.record_submission(&mut store, &id, submission).unwrap();
        assert!(scheduler.due_jobs(&store, 111).is_empty());

        scheduler.revert_block(&mut store, &gen_block(110, vec![]));
        assert_eq!(scheduler.due_jobs(&store, 110).len(), 1);
    }

    #[test]
    fn test_resolve_missed_and_proven() {
        let (mut store, mut ledger, mut scheduler, id) = setup();
        scheduler.apply_block(&mut store, &gen_block(100, vec![]));
        let closing = scheduler.apply_block(&mut store, &gen_block(121, vec![]));
        assert_eq!(closing, vec![id]);
        let (record, outcome) = scheduler.resolve(&mut store, &mut ledger, &id).unwrap();
        assert_eq!(outcome, Outcome::Missed);
        assert_eq!(record.state, ObligationState::Missed);
        assert_eq!(ledger.space_remaining(), 1000);
        assert_eq!(ledger.profit(), Currency::ZERO);
        assert!(scheduler.pending().is_empty());

        let (mut store, mut ledger, mut scheduler, id) = setup();
        scheduler.apply_block(&mut store, &gen_block(100, vec![]));
        scheduler.apply_block(&mut store, &gen_block(115, vec![proof_transaction(id)]));
        let payout = store.get(&id).unwrap().contract.payout;
        let (_, outcome) = scheduler.resolve(&mut store, &mut ledger, &id).unwrap();
        assert_eq!(
            outcome,
            Outcome::Proven {
                credited: payout.post_tax()
            }
        );
        assert_eq!(ledger.profit(), payout.post_tax());
        assert_eq!(ledger.space_remaining(), 1000);
    }

    #[test]
    fn test_proof_outside_window_ignored() {
        let (mut store, _, mut scheduler, id) = setup();
        scheduler.apply_block(&mut store, &gen_block(100, vec![]));
        scheduler.apply_block(&mut store, &gen_block(121, vec![proof_transaction(id)]));
        assert_eq!(
            store.get(&id).unwrap().state,
            ObligationState::ProofPending { submission: None }
        );
    }
}
