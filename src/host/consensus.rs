use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use super::{
    Host, HostState,
    obligation::Submission,
    scheduler::ProofJob,
    store::RecordGuard,
};
use crate::{
    collaborators::{FileStore, Node, ProofBuilder},
    types::{BlockHeight, ConsensusChange, ContractId, Transaction, TransactionBody, TransactionId},
};

/// Checks that the batch extends the current tip: reverted blocks walk down
/// from the tip one height at a time, applied blocks walk up from there.
fn validate_order(state: &HostState, change: &ConsensusChange) -> Result<()> {
    let fresh = state.last_change_id.is_none();
    let mut tip = state.block_height;

    for block in &change.reverted_blocks {
        if block.height != tip {
            bail!(
                "Order exception: change {} reverts block {} but tip is {}",
                change.id,
                block.height,
                tip
            );
        }
        tip = match block.height.checked_sub(1) {
            Some(height) => height,
            None => bail!("Order exception: change {} reverts genesis", change.id),
        };
    }

    for (i, block) in change.applied_blocks.iter().enumerate() {
        let first_on_fresh_host = fresh && i == 0 && change.reverted_blocks.is_empty();
        if !first_on_fresh_host && block.height != tip + 1 {
            bail!(
                "Order exception: change {} applies block {} on tip {}",
                change.id,
                block.height,
                tip
            );
        }
        tip = block.height;
    }
    Ok(())
}

/// What is left to do once the coarse lock is released.
#[derive(Default)]
struct Followup {
    discarded: Vec<std::path::PathBuf>,
    deferred: Vec<(ContractId, RecordGuard)>,
    jobs: Vec<ProofJob>,
}

fn apply_change(state: &mut HostState, change: &ConsensusChange) -> Result<Followup> {
    validate_order(state, change)?;
    let mut followup = Followup::default();

    for block in &change.reverted_blocks {
        state.scheduler.revert_block(&mut state.store, block);
        state.block_height = block.height.saturating_sub(1);
        debug!("Reverted block {}", block.height);
    }

    for block in &change.applied_blocks {
        state.block_height = block.height;
        let closing = state.scheduler.apply_block(&mut state.store, block);
        for id in closing {
            let guard = state.store.guard(&id)?;
            // a revision in flight holds the guard; settle after it finishes
            match guard.clone().try_lock_owned() {
                Ok(_held) => {
                    let (record, _) =
                        state
                            .scheduler
                            .resolve(&mut state.store, &mut state.ledger, &id)?;
                    followup.discarded.push(record.path);
                }
                Err(_) => followup.deferred.push((id, guard)),
            }
        }
        debug!("Applied block {}", block.height);
    }

    state.last_change_id = Some(change.id);
    followup.jobs = state.scheduler.due_jobs(&state.store, state.block_height);
    debug_assert!(state.is_consistent());
    Ok(followup)
}

impl<N: Node, F: FileStore, P: ProofBuilder> Host<N, F, P> {
    /// Applies one consensus change in full, then submits any storage proofs
    /// that became due. Changes at or below the last processed id are
    /// skipped. An error means the change does not extend the current chain;
    /// the host state is left as it was before the call.
    pub async fn process_consensus_change(&self, change: &ConsensusChange) -> Result<()> {
        let _processing = self.inner.consensus_lock.lock().await;

        let followup = {
            let mut state = self.inner.state.write().await;
            if state.last_change_id.is_some_and(|last| change.id <= last) {
                debug!("Skipping already processed consensus change {}", change.id);
                return Ok(());
            }
            apply_change(&mut state, change)?
        };

        for path in &followup.discarded {
            self.discard_file(path).await;
        }
        for (id, guard) in followup.deferred {
            let _held = guard.lock_owned().await;
            let resolved = {
                let mut state = self.inner.state.write().await;
                let state = &mut *state;
                if state.store.contains(&id) {
                    Some(
                        state
                            .scheduler
                            .resolve(&mut state.store, &mut state.ledger, &id)?,
                    )
                } else {
                    None
                }
            };
            if let Some((record, _)) = resolved {
                self.discard_file(&record.path).await;
            }
        }

        for job in followup.jobs {
            match self.submit_proof(&job).await {
                Ok(txid) => {
                    info!(
                        "Broadcast storage proof {} for {} at height {}",
                        txid, job.id, job.height
                    );
                    let mut state = self.inner.state.write().await;
                    let state = &mut *state;
                    let submission = Submission {
                        height: job.height,
                        txid,
                    };
                    if let Err(e) =
                        state
                            .scheduler
                            .record_submission(&mut state.store, &job.id, submission)
                    {
                        warn!("Could not record proof submission for {}: {}", job.id, e);
                    }
                }
                Err(e) => warn!(
                    "Storage proof for {} failed at height {}, retrying next block: {:#}",
                    job.id, job.height, e
                ),
            }
        }

        self.save().await
    }

    async fn submit_proof(&self, job: &ProofJob) -> Result<TransactionId> {
        let data = self
            .inner
            .files
            .read(&job.path)
            .await
            .with_context(|| format!("Failed to read {}", job.path.display()))?;
        let proof = self
            .inner
            .prover
            .build(&job.id, &job.contract, job.height, &data)?;
        let transaction = Transaction::unsigned(TransactionBody::StorageProof(proof));
        let signed = self.inner.node.sign(transaction).await?;
        let txid = signed.id();
        self.inner.node.broadcast(signed).await?;
        Ok(txid)
    }

    /// Obligations whose proof window is open, with the height it closes at.
    pub async fn pending_proofs(&self) -> Vec<(ContractId, BlockHeight)> {
        let state = self.inner.state.read().await;
        state
            .scheduler
            .pending()
            .iter()
            .filter_map(|id| state.store.get(id).ok())
            .map(|r| (r.id, r.contract.window_end))
            .collect()
    }
}
