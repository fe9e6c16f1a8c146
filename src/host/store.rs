use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use tokio::sync::Mutex;

use super::{
    error::ObligationError,
    obligation::{ObligationRecord, ObligationState},
};
use crate::types::{BlockHeight, ContractId, FileContract, RevisionTransaction};

/// Exclusive guard serializing read-modify-write of one record's terms.
pub type RecordGuard = Arc<Mutex<()>>;

#[derive(Debug)]
struct Slot {
    record: ObligationRecord,
    guard: RecordGuard,
}

type HeightIndex = BTreeMap<BlockHeight, BTreeSet<ContractId>>;

fn index_add(index: &mut HeightIndex, height: BlockHeight, id: ContractId) {
    index.entry(height).or_default().insert(id);
}

fn index_remove(index: &mut HeightIndex, height: BlockHeight, id: &ContractId) -> bool {
    let Some(bucket) = index.get_mut(&height) else {
        return false;
    };
    let removed = bucket.remove(id);
    if bucket.is_empty() {
        index.remove(&height);
    }
    removed
}

/// In-memory index of every obligation, by id and by the heights the
/// scheduler acts on. The store owns the records; the height maps only
/// reference them.
#[derive(Debug, Default)]
pub struct ObligationStore {
    by_id: HashMap<ContractId, Slot>,
    /// Keyed by due height, the last block of the proof window.
    by_height: HeightIndex,
    /// Keyed by the first block of the proof window.
    by_window_start: HeightIndex,
}

impl ObligationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn insert(&mut self, record: ObligationRecord) -> Result<(), ObligationError> {
        if self.by_id.contains_key(&record.id) {
            return Err(ObligationError::DuplicateObligation(record.id));
        }
        index_add(&mut self.by_height, record.contract.due_height(), record.id);
        index_add(
            &mut self.by_window_start,
            record.contract.window_start,
            record.id,
        );
        self.by_id.insert(
            record.id,
            Slot {
                record,
                guard: RecordGuard::default(),
            },
        );
        debug_assert!(self.is_consistent());
        Ok(())
    }

    pub fn get(&self, id: &ContractId) -> Result<&ObligationRecord, ObligationError> {
        self.by_id
            .get(id)
            .map(|slot| &slot.record)
            .ok_or(ObligationError::NotFound(*id))
    }

    pub fn contains(&self, id: &ContractId) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn guard(&self, id: &ContractId) -> Result<RecordGuard, ObligationError> {
        self.by_id
            .get(id)
            .map(|slot| slot.guard.clone())
            .ok_or(ObligationError::NotFound(*id))
    }

    /// Ids whose proof window closes at `height`.
    pub fn due_at(&self, height: BlockHeight) -> Vec<ContractId> {
        self.by_height
            .get(&height)
            .map(|bucket| bucket.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Ids whose proof window opens at `height`.
    pub fn opening_at(&self, height: BlockHeight) -> Vec<ContractId> {
        self.by_window_start
            .get(&height)
            .map(|bucket| bucket.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Moves `id` from the due bucket at `old_height` to `new_height`.
    pub fn relocate(
        &mut self,
        id: &ContractId,
        old_height: BlockHeight,
        new_height: BlockHeight,
    ) -> Result<(), ObligationError> {
        if !self.by_id.contains_key(id) {
            return Err(ObligationError::NotFound(*id));
        }
        if old_height == new_height {
            return Ok(());
        }
        let removed = index_remove(&mut self.by_height, old_height, id);
        assert!(removed, "obligation {} missing from due bucket {}", id, old_height);
        index_add(&mut self.by_height, new_height, *id);
        Ok(())
    }

    /// Replaces the terms of a record, keeping both height indices in step.
    /// The caller holds the record's guard.
    pub fn revise(
        &mut self,
        id: &ContractId,
        contract: FileContract,
        revision_txn: RevisionTransaction,
    ) -> Result<(), ObligationError> {
        let (old_due, old_start) = {
            let record = self.get(id)?;
            (record.contract.due_height(), record.contract.window_start)
        };
        let (new_due, new_start) = (contract.due_height(), contract.window_start);

        self.relocate(id, old_due, new_due)?;
        if old_start != new_start {
            let removed = index_remove(&mut self.by_window_start, old_start, id);
            assert!(removed, "obligation {} missing from start bucket {}", id, old_start);
            index_add(&mut self.by_window_start, new_start, *id);
        }

        let slot = self
            .by_id
            .get_mut(id)
            .ok_or(ObligationError::NotFound(*id))?;
        slot.record.contract = contract;
        slot.record.last_revision_txn = revision_txn;
        debug_assert!(self.is_consistent());
        Ok(())
    }

    pub fn set_state(
        &mut self,
        id: &ContractId,
        state: ObligationState,
    ) -> Result<(), ObligationError> {
        let slot = self
            .by_id
            .get_mut(id)
            .ok_or(ObligationError::NotFound(*id))?;
        slot.record.state = state;
        Ok(())
    }

    /// Drops a record from both indices. The caller holds the record's
    /// guard and has already settled the ledger.
    pub fn remove(&mut self, id: &ContractId) -> Result<ObligationRecord, ObligationError> {
        let slot = self
            .by_id
            .remove(id)
            .ok_or(ObligationError::NotFound(*id))?;
        let contract = &slot.record.contract;
        let removed_due = index_remove(&mut self.by_height, contract.due_height(), id);
        let removed_start = index_remove(&mut self.by_window_start, contract.window_start, id);
        assert!(
            removed_due && removed_start,
            "obligation {} missing from height indices",
            id
        );
        debug_assert!(self.is_consistent());
        Ok(slot.record)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObligationRecord> {
        self.by_id.values().map(|slot| &slot.record)
    }

    pub fn committed_space(&self) -> u64 {
        self.iter().map(ObligationRecord::space).sum()
    }

    /// Checks that every record sits in exactly the buckets of its current
    /// heights and that no bucket references a missing or misplaced record.
    pub fn is_consistent(&self) -> bool {
        let index_ok = |index: &HeightIndex, key: fn(&FileContract) -> BlockHeight| {
            let mut count = 0;
            for (height, bucket) in index {
                if bucket.is_empty() {
                    return false;
                }
                for id in bucket {
                    count += 1;
                    match self.by_id.get(id) {
                        Some(slot) if key(&slot.record.contract) == *height => {}
                        _ => return false,
                    }
                }
            }
            count == self.by_id.len()
        };
        index_ok(&self.by_height, FileContract::due_height)
            && index_ok(&self.by_window_start, |c| c.window_start)
    }
}
