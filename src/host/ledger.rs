use serde::{Deserialize, Serialize};

use super::error::CapacityExceeded;
use crate::types::Currency;

/// Space and profit bookkeeping. Every mutation happens under the same
/// lock as the store change it accompanies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountingLedger {
    total_storage: i64,
    space_remaining: i64,
    profit: Currency,
}

impl AccountingLedger {
    pub fn new(total_storage: i64) -> Self {
        Self {
            total_storage,
            space_remaining: total_storage,
            profit: Currency::ZERO,
        }
    }

    /// Restores a ledger from persisted totals and the space still committed
    /// by loaded obligations.
    pub fn restore(total_storage: i64, committed: u64, profit: Currency) -> Self {
        Self {
            total_storage,
            space_remaining: total_storage - committed as i64,
            profit,
        }
    }

    pub fn total_storage(&self) -> i64 {
        self.total_storage
    }

    pub fn space_remaining(&self) -> i64 {
        self.space_remaining
    }

    pub fn profit(&self) -> Currency {
        self.profit
    }

    pub fn reserve(&mut self, space: u64) -> Result<(), CapacityExceeded> {
        let space = i64::try_from(space).unwrap_or(i64::MAX);
        if self.space_remaining < space {
            return Err(CapacityExceeded {
                requested: space as u64,
                remaining: self.space_remaining,
            });
        }
        self.space_remaining -= space;
        Ok(())
    }

    pub fn release(&mut self, space: u64) {
        self.space_remaining += space as i64;
    }

    pub fn credit_profit(&mut self, amount: Currency) {
        self.profit += amount;
    }

    /// Applies a capacity change as a delta so space already committed is
    /// never lost. The result may be negative when capacity shrinks below
    /// what is committed.
    pub fn resize(&mut self, total_storage: i64) {
        self.space_remaining += total_storage - self.total_storage;
        self.total_storage = total_storage;
    }

    pub fn is_balanced(&self, committed: u64) -> bool {
        self.space_remaining + committed as i64 == self.total_storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_release() {
        let mut ledger = AccountingLedger::new(100);
        ledger.reserve(60).unwrap();
        assert_eq!(ledger.space_remaining(), 40);
        assert_eq!(
            ledger.reserve(41),
            Err(CapacityExceeded {
                requested: 41,
                remaining: 40
            })
        );
        assert_eq!(ledger.space_remaining(), 40);
        ledger.release(60);
        assert_eq!(ledger.space_remaining(), 100);
    }

    #[test]
    fn test_resize_applies_delta() {
        let mut ledger = AccountingLedger::new(10_000_000_000);
        ledger.reserve(2_000_000_000).unwrap();
        ledger.resize(5_000_000_000);
        assert_eq!(ledger.space_remaining(), 3_000_000_000);
        assert!(ledger.is_balanced(2_000_000_000));
    }

    #[test]
    fn test_resize_below_committed_goes_negative() {
        let mut ledger = AccountingLedger::new(100);
        ledger.reserve(80).unwrap();
        ledger.resize(50);
        assert_eq!(ledger.space_remaining(), -30);
        assert!(ledger.reserve(1).is_err());
        assert!(ledger.is_balanced(80));
    }

    #[test]
    fn test_credit_profit() {
        let mut ledger = AccountingLedger::new(0);
        ledger.credit_profit(Currency::new(5));
        ledger.credit_profit(Currency::new(7));
        assert_eq!(ledger.profit(), Currency::new(12));
    }
}
