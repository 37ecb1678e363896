use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TxnId};
use crate::transaction::concurrency::transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionAbort, TransactionState,
};

/// Row lock modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

struct LockRequest {
    txn: Arc<Transaction>,
    mode: LockMode,
    granted: bool,
}

impl LockRequest {
    fn new(txn: Arc<Transaction>, mode: LockMode) -> Self {
        Self {
            txn,
            mode,
            granted: false,
        }
    }
}

struct QueueState {
    requests: VecDeque<LockRequest>,
    upgrading: bool,
}

/// Per-row FIFO of lock requests with its own latch and condition
/// variable for blocking waiters.
struct LockRequestQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                requests: VecDeque::new(),
                upgrading: false,
            }),
            cv: Condvar::new(),
        }
    }
}

struct LockTable {
    queues: HashMap<Rid, Arc<LockRequestQueue>>,
    txn_to_rids: HashMap<TxnId, Vec<Rid>>,
}

/// Row-granularity two-phase locking with FIFO queues and periodic
/// wait-for-graph deadlock detection.
///
/// Lock order is table latch, then queue latch; the table latch is never
/// held while waiting on a queue's condition variable.
pub struct LockManager {
    lock_table: Mutex<LockTable>,
    shutdown: Arc<AtomicBool>,
}

impl LockManager {
    /// Build a lock manager. When `enable_cycle_detection` is set, a
    /// background thread wakes every `cycle_detection_interval` to break
    /// deadlocks; it stops on [`shutdown`](Self::shutdown) or once the
    /// manager is dropped.
    pub fn new(cycle_detection_interval: Duration, enable_cycle_detection: bool) -> Arc<Self> {
        let manager = Arc::new(Self {
            lock_table: Mutex::new(LockTable {
                queues: HashMap::new(),
                txn_to_rids: HashMap::new(),
            }),
            shutdown: Arc::new(AtomicBool::new(false)),
        });

        if enable_cycle_detection {
            let weak: Weak<LockManager> = Arc::downgrade(&manager);
            let shutdown = manager.shutdown.clone();
            thread::Builder::new()
                .name("cycle-detector".into())
                .spawn(move || {
                    while !shutdown.load(Ordering::Relaxed) {
                        thread::sleep(cycle_detection_interval);
                        match weak.upgrade() {
                            Some(manager) => manager.run_detection_once(),
                            None => break,
                        }
                    }
                })
                .expect("failed to spawn the cycle detection thread");
        }

        manager
    }

    /// Stop the background cycle detector after its current sleep.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Acquire a shared lock on `rid`, blocking while any exclusive
    /// request sits in the queue or an upgrade is in progress.
    pub fn lock_shared(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<bool, TransactionAbort> {
        self.check_before_locking(txn, LockMode::Shared)?;

        let queue = self.queue_for(txn.id(), rid);
        let mut state = queue.state.lock();
        state
            .requests
            .push_back(LockRequest::new(txn.clone(), LockMode::Shared));

        while !(Self::shared_grantable(&state) && !state.upgrading)
            && txn.state() != TransactionState::Aborted
        {
            queue.cv.wait(&mut state);
        }

        if txn.state() == TransactionState::Aborted {
            return self.abort_waiter(&queue, state, txn, rid);
        }

        Self::mark_granted(&mut state, txn.id());
        drop(state);
        txn.add_shared_lock(rid);
        Ok(true)
    }

    /// Acquire an exclusive lock on `rid`, blocking until the request is
    /// at the head of the queue.
    pub fn lock_exclusive(
        &self,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<bool, TransactionAbort> {
        self.check_before_locking(txn, LockMode::Exclusive)?;

        let queue = self.queue_for(txn.id(), rid);
        let mut state = queue.state.lock();
        state
            .requests
            .push_back(LockRequest::new(txn.clone(), LockMode::Exclusive));

        while state.requests.front().map(|r| r.txn.id()) != Some(txn.id())
            && txn.state() != TransactionState::Aborted
        {
            queue.cv.wait(&mut state);
        }

        if txn.state() == TransactionState::Aborted {
            return self.abort_waiter(&queue, state, txn, rid);
        }

        Self::mark_granted(&mut state, txn.id());
        drop(state);
        txn.add_exclusive_lock(rid);
        Ok(true)
    }

    /// Upgrade a held shared lock to exclusive. Only one upgrade may wait
    /// per queue; a second one aborts with `UPGRADE_CONFLICT`.
    pub fn lock_upgrade(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<bool, TransactionAbort> {
        if !txn.is_shared_locked(rid) {
            return Ok(false);
        }
        self.check_before_locking(txn, LockMode::Exclusive)?;

        let queue = {
            let table = self.lock_table.lock();
            match table.queues.get(&rid) {
                Some(queue) => queue.clone(),
                None => return Ok(false),
            }
        };

        let mut state = queue.state.lock();
        if state.upgrading {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionAbort {
                txn_id: txn.id(),
                reason: AbortReason::UpgradeConflict,
            });
        }

        // Trade the shared entry for an exclusive one placed right after
        // the granted prefix, and stall later arrivals until we're done.
        Self::remove_request(&mut state, txn.id());
        txn.remove_shared_lock(rid);
        let insert_at = state
            .requests
            .iter()
            .position(|r| !r.granted)
            .unwrap_or(state.requests.len());
        state
            .requests
            .insert(insert_at, LockRequest::new(txn.clone(), LockMode::Exclusive));
        state.upgrading = true;

        while state.requests.front().map(|r| r.txn.id()) != Some(txn.id())
            && txn.state() != TransactionState::Aborted
        {
            queue.cv.wait(&mut state);
        }

        if txn.state() == TransactionState::Aborted {
            state.upgrading = false;
            return self.abort_waiter(&queue, state, txn, rid);
        }

        state.upgrading = false;
        Self::mark_granted(&mut state, txn.id());
        drop(state);
        txn.add_exclusive_lock(rid);
        Ok(true)
    }

    /// Release a held lock and wake the queue. Entering the shrinking
    /// phase follows two-phase locking, except that releasing a shared
    /// lock under READ_COMMITTED does not shrink.
    pub fn unlock(&self, txn: &Transaction, rid: Rid) -> bool {
        let queue = {
            let mut table = self.lock_table.lock();
            if let Some(rids) = table.txn_to_rids.get_mut(&txn.id()) {
                rids.retain(|r| *r != rid);
                if rids.is_empty() {
                    table.txn_to_rids.remove(&txn.id());
                }
            }
            match table.queues.get(&rid) {
                Some(queue) => queue.clone(),
                None => return false,
            }
        };

        let mut state = queue.state.lock();
        let Some(index) = state.requests.iter().position(|r| r.txn.id() == txn.id()) else {
            return false;
        };
        let mode = state.requests[index].mode;
        state.requests.remove(index);
        drop(state);

        txn.remove_shared_lock(rid);
        txn.remove_exclusive_lock(rid);

        if txn.state() == TransactionState::Growing
            && !(txn.isolation_level() == IsolationLevel::ReadCommitted
                && mode == LockMode::Shared)
        {
            txn.set_state(TransactionState::Shrinking);
        }

        queue.cv.notify_all();
        true
    }

    /// One deadlock detection pass: rebuild the wait-for graph from the
    /// queues, abort the youngest transaction on each cycle (largest id)
    /// and wake its queues, until the graph is acyclic.
    pub fn run_detection_once(&self) {
        let table = self.lock_table.lock();

        let mut graph: BTreeMap<TxnId, BTreeSet<TxnId>> = BTreeMap::new();
        let mut transactions: HashMap<TxnId, Arc<Transaction>> = HashMap::new();

        for queue in table.queues.values() {
            let state = queue.state.lock();
            let mut granted = Vec::new();
            let mut waiting = Vec::new();
            for request in &state.requests {
                transactions.insert(request.txn.id(), request.txn.clone());
                if request.granted {
                    granted.push(request.txn.id());
                } else {
                    waiting.push(request.txn.id());
                }
            }
            for &waiter in &waiting {
                for &holder in &granted {
                    if waiter != holder {
                        graph.entry(waiter).or_default().insert(holder);
                    }
                }
            }
        }

        while let Some(victim) = Self::find_cycle_victim(&graph) {
            warn!("aborting transaction {} to break a deadlock", victim);
            if let Some(txn) = transactions.get(&victim) {
                txn.set_state(TransactionState::Aborted);
            }
            graph.remove(&victim);
            for targets in graph.values_mut() {
                targets.remove(&victim);
            }
            if let Some(rids) = table.txn_to_rids.get(&victim) {
                for rid in rids {
                    if let Some(queue) = table.queues.get(rid) {
                        queue.cv.notify_all();
                    }
                }
            }
        }
    }

    /// Current waiter -> holder edges, for inspection.
    pub fn edge_list(&self) -> Vec<(TxnId, TxnId)> {
        let table = self.lock_table.lock();
        let mut edges = BTreeSet::new();
        for queue in table.queues.values() {
            let state = queue.state.lock();
            for waiter in state.requests.iter().filter(|r| !r.granted) {
                for holder in state.requests.iter().filter(|r| r.granted) {
                    if waiter.txn.id() != holder.txn.id() {
                        edges.insert((waiter.txn.id(), holder.txn.id()));
                    }
                }
            }
        }
        edges.into_iter().collect()
    }

    fn check_before_locking(
        &self,
        txn: &Transaction,
        mode: LockMode,
    ) -> Result<(), TransactionAbort> {
        if txn.state() == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionAbort {
                txn_id: txn.id(),
                reason: AbortReason::LockOnShrinking,
            });
        }
        if mode == LockMode::Shared && txn.isolation_level() == IsolationLevel::ReadUncommitted {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionAbort {
                txn_id: txn.id(),
                reason: AbortReason::LockSharedOnReadUncommitted,
            });
        }
        Ok(())
    }

    /// Look up (or create) the queue for `rid` and record the rid against
    /// the transaction for the cycle detector's wake-ups.
    fn queue_for(&self, txn_id: TxnId, rid: Rid) -> Arc<LockRequestQueue> {
        let mut table = self.lock_table.lock();
        let rids = table.txn_to_rids.entry(txn_id).or_default();
        if !rids.contains(&rid) {
            rids.push(rid);
        }
        table
            .queues
            .entry(rid)
            .or_insert_with(|| Arc::new(LockRequestQueue::new()))
            .clone()
    }

    /// Shared requests go through only while no exclusive request sits
    /// anywhere in the queue; FIFO order is preserved across modes.
    fn shared_grantable(state: &QueueState) -> bool {
        state.requests.iter().all(|r| r.mode != LockMode::Exclusive)
    }

    fn mark_granted(state: &mut QueueState, txn_id: TxnId) {
        if let Some(request) = state.requests.iter_mut().find(|r| r.txn.id() == txn_id) {
            request.granted = true;
        }
    }

    fn remove_request(state: &mut QueueState, txn_id: TxnId) {
        if let Some(index) = state.requests.iter().position(|r| r.txn.id() == txn_id) {
            state.requests.remove(index);
        }
    }

    /// A woken waiter found itself aborted: drop its queue entry, wake
    /// the followers and surface the deadlock.
    fn abort_waiter(
        &self,
        queue: &LockRequestQueue,
        mut state: parking_lot::MutexGuard<'_, QueueState>,
        txn: &Transaction,
        rid: Rid,
    ) -> Result<bool, TransactionAbort> {
        Self::remove_request(&mut state, txn.id());
        drop(state);
        queue.cv.notify_all();

        let mut table = self.lock_table.lock();
        if let Some(rids) = table.txn_to_rids.get_mut(&txn.id()) {
            rids.retain(|r| *r != rid);
            if rids.is_empty() {
                table.txn_to_rids.remove(&txn.id());
            }
        }
        debug!("transaction {} cancelled while waiting for {}", txn.id(), rid);
        Err(TransactionAbort {
            txn_id: txn.id(),
            reason: AbortReason::Deadlock,
        })
    }

    /// DFS cycle search over ids in ascending order. On a cycle, the
    /// victim is the largest transaction id on the recursion stack.
    fn find_cycle_victim(graph: &BTreeMap<TxnId, BTreeSet<TxnId>>) -> Option<TxnId> {
        let mut nodes: BTreeSet<TxnId> = graph.keys().copied().collect();
        for targets in graph.values() {
            nodes.extend(targets.iter().copied());
        }

        let mut visited = HashSet::new();
        for &node in &nodes {
            if visited.contains(&node) {
                continue;
            }
            let mut stack = HashSet::new();
            if Self::dfs(node, graph, &mut visited, &mut stack) {
                return stack.iter().max().copied();
            }
        }
        None
    }

    fn dfs(
        node: TxnId,
        graph: &BTreeMap<TxnId, BTreeSet<TxnId>>,
        visited: &mut HashSet<TxnId>,
        stack: &mut HashSet<TxnId>,
    ) -> bool {
        visited.insert(node);
        stack.insert(node);

        if let Some(targets) = graph.get(&node) {
            for &next in targets {
                if stack.contains(&next) {
                    return true;
                }
                if !visited.contains(&next) && Self::dfs(next, graph, visited, stack) {
                    return true;
                }
            }
        }

        stack.remove(&node);
        false
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
