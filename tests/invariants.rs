use proptest::prelude::*;
use storage_host::{
    host::{AccountingLedger, ObligationStore},
    test_utils::{gen_contract, gen_record},
    types::RevisionTransaction,
};

const TOTAL: i64 = 10_000;

#[derive(Debug, Clone)]
enum Op {
    Create { n: u64, start: u64, len: u64, size: u64 },
    Revise { pick: usize, start: u64, len: u64, size: u64 },
    Resolve { pick: usize },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..20u64, 1..50u64, 0..20u64, 1..3_000u64)
            .prop_map(|(n, start, len, size)| Op::Create { n, start, len, size }),
        (any::<usize>(), 1..50u64, 0..20u64, 1..3_000u64)
            .prop_map(|(pick, start, len, size)| Op::Revise { pick, start, len, size }),
        any::<usize>().prop_map(|pick| Op::Resolve { pick }),
    ]
}

fn pick_id(
    store: &ObligationStore,
    pick: usize,
) -> Option<storage_host::types::ContractId> {
    let mut ids: Vec<_> = store.iter().map(|r| r.id).collect();
    ids.sort();
    if ids.is_empty() {
        None
    } else {
        Some(ids[pick % ids.len()])
    }
}

proptest! {
    #[test]
    fn test_store_and_ledger_stay_in_step(ops in prop::collection::vec(op(), 1..60)) {
        let mut store = ObligationStore::new();
        let mut ledger = AccountingLedger::new(TOTAL);

        for op in ops {
            match op {
                Op::Create { n, start, len, size } => {
                    let record = gen_record(n, gen_contract(start, start + len, size));
                    if !store.contains(&record.id) && ledger.reserve(record.space()).is_ok() {
                        store.insert(record).unwrap();
                    }
                }
                Op::Revise { pick, start, len, size } => {
                    let Some(id) = pick_id(&store, pick) else { continue };
                    let record = store.get(&id).unwrap().clone();
                    let mut revised = record.contract.clone();
                    revised.revision_number += 1;
                    revised.window_start = start;
                    revised.window_end = start + len;
                    revised.file_size = size;
                    let fits = if size > record.space() {
                        ledger.reserve(size - record.space()).is_ok()
                    } else {
                        ledger.release(record.space() - size);
                        true
                    };
                    if fits {
                        store
                            .revise(&id, revised.clone(), RevisionTransaction::new(id, revised.clone()))
                            .unwrap();
                        prop_assert!(store.due_at(revised.window_end).contains(&id));
                        prop_assert!(store.opening_at(revised.window_start).contains(&id));
                        if record.contract.window_end != revised.window_end {
                            prop_assert!(!store.due_at(record.contract.window_end).contains(&id));
                        }
                    }
                }
                Op::Resolve { pick } => {
                    let Some(id) = pick_id(&store, pick) else { continue };
                    let record = store.remove(&id).unwrap();
                    ledger.release(record.space());
                }
            }

            prop_assert!(store.is_consistent());
            prop_assert!(ledger.is_balanced(store.committed_space()));
            prop_assert!(ledger.space_remaining() >= 0);
        }
    }
}
