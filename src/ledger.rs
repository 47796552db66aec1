//! Funds ledger contract and per-user advisory locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("insufficient funds: balance {balance}, change {delta}")]
pub struct InsufficientFunds {
    pub balance: i64,
    pub delta: i64,
}

/// Balances shared with the other games. `adjust` must fail with
/// [`InsufficientFunds`] rather than take a balance below zero.
pub trait FundsLedger {
    fn balance(&self, server_id: u64, user_id: u64) -> Result<i64>;
    fn adjust(&self, server_id: u64, user_id: u64, delta: i64) -> Result<i64>;
}

/// Idle entries are swept once the map grows past this.
const PRUNE_AT: usize = 256;

/// One lock per (server, user), held across a balance read-modify-write.
/// Entries nobody holds are dropped as the map grows.
#[derive(Debug, Default)]
pub struct UserLocks {
    locks: Mutex<HashMap<(u64, u64), Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, server_id: u64, user_id: u64) -> Arc<Mutex<()>> {
        let mut map = match self.locks.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        if map.len() >= PRUNE_AT {
            // only the map holds these, so no one can be waiting on them
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        map.entry((server_id, user_id)).or_default().clone()
    }

    pub fn len(&self) -> usize {
        match self.locks.lock() {
            Ok(map) => map.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_user_shares_lock() {
        let locks = UserLocks::new();
        let a = locks.lock_for(1, 2);
        let b = locks.lock_for(1, 2);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_lock_scoped_per_server() {
        let locks = UserLocks::new();
        let a = locks.lock_for(1, 2);
        let b = locks.lock_for(9, 2);
        assert!(!Arc::ptr_eq(&a, &b));
        let _ga = a.lock().unwrap();
        assert!(b.try_lock().is_ok());
    }

    #[test]
    fn test_idle_locks_are_pruned() {
        let locks = UserLocks::new();
        let held = locks.lock_for(0, 0);
        for user in 1..PRUNE_AT as u64 {
            locks.lock_for(1, user);
        }
        assert_eq!(locks.len(), PRUNE_AT);
        // the next new user triggers a sweep of every idle entry
        let fresh = locks.lock_for(2, 1);
        assert_eq!(locks.len(), 2);
        assert!(Arc::ptr_eq(&held, &locks.lock_for(0, 0)));
        assert!(Arc::ptr_eq(&fresh, &locks.lock_for(2, 1)));
    }
}
