use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState,
};

/// Issues transactions and tracks the active ones. Commit and abort hand
/// every held lock back to the lock manager.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Begin a new transaction.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.active_transactions.lock().insert(txn_id, txn.clone());
        txn
    }

    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    /// Commit: release every held lock and retire the transaction.
    pub fn commit(&self, txn: &Arc<Transaction>, lock_manager: &LockManager) {
        txn.set_state(TransactionState::Committed);
        Self::release_locks(txn, lock_manager);
        self.active_transactions.lock().remove(&txn.id());
    }

    /// Abort: release every held lock and retire the transaction.
    pub fn abort(&self, txn: &Arc<Transaction>, lock_manager: &LockManager) {
        txn.set_state(TransactionState::Aborted);
        Self::release_locks(txn, lock_manager);
        self.active_transactions.lock().remove(&txn.id());
    }

    fn release_locks(txn: &Arc<Transaction>, lock_manager: &LockManager) {
        for rid in txn.shared_locks() {
            lock_manager.unlock(txn, rid);
        }
        for rid in txn.exclusive_locks() {
            lock_manager.unlock(txn, rid);
        }
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_begin_assigns_increasing_ids() {
        let tm = TransactionManager::new();
        let t1 = tm.begin(IsolationLevel::RepeatableRead);
        let t2 = tm.begin(IsolationLevel::ReadCommitted);

        assert_eq!(t1.id(), 1);
        assert_eq!(t2.id(), 2);
        assert!(tm.get_transaction(1).is_some());
        assert!(tm.get_transaction(2).is_some());
    }

    #[test]
    fn test_commit_retires_transaction_and_releases_locks() {
        let tm = TransactionManager::new();
        let lm = LockManager::new(Duration::from_millis(50), false);
        let txn = tm.begin(IsolationLevel::RepeatableRead);
        let rid = crate::common::types::Rid::new(1, 1);

        lm.lock_exclusive(&txn, rid).unwrap();
        assert!(txn.is_exclusive_locked(rid));

        tm.commit(&txn, &lm);
        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(!txn.is_exclusive_locked(rid));
        assert!(tm.get_transaction(txn.id()).is_none());
    }
}
