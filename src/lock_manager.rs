//! Page-level multiple-granularity locking: shared/exclusive locks with
//! upgrade, condvar-based blocking (no timeout), and wait-for-graph
//! deadlock detection on every blocking step (§4.3).

use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex};

use log::debug;

use crate::error::{StorageError, StorageResult};
use crate::page_id::PageId;
use crate::transaction::TransactionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// What the caller wants to do with the page; maps 1:1 onto a lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    ReadOnly,
    ReadWrite,
}

impl Permission {
    pub fn lock_mode(self) -> LockMode {
        match self {
            Permission::ReadOnly => LockMode::Shared,
            Permission::ReadWrite => LockMode::Exclusive,
        }
    }
}

/// The wait-for graph: an edge `from -> to` means `from` is blocked on a
/// lock currently held by `to`. Edges exist only while `from` is
/// actually blocked (added on block, removed in full on grant/release).
struct WaitForGraph {
    edges: HashMap<TransactionId, HashSet<TransactionId>>,
}

impl WaitForGraph {
    fn new() -> Self {
        WaitForGraph {
            edges: HashMap::new(),
        }
    }

    fn set_waits_for(&mut self, from: TransactionId, holders: impl Iterator<Item = TransactionId>) {
        let set: HashSet<TransactionId> = holders.filter(|h| *h != from).collect();
        if set.is_empty() {
            self.edges.remove(&from);
        } else {
            self.edges.insert(from, set);
        }
    }

    fn clear_waiter(&mut self, tid: TransactionId) {
        self.edges.remove(&tid);
    }

    /// DFS cycle search starting from `start`. Because the manager only
    /// ever calls this right after adding `start`'s own outgoing edges,
    /// any cycle found necessarily passes through `start` — so `start`
    /// is the victim by construction.
    fn has_cycle_from(&self, start: TransactionId) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![start];
        let mut first = true;
        while let Some(tid) = stack.pop() {
            if tid == start && !first {
                return true;
            }
            first = false;
            if !visited.insert(tid) {
                continue;
            }
            if let Some(neighbors) = self.edges.get(&tid) {
                for &n in neighbors {
                    stack.push(n);
                }
            }
        }
        false
    }
}

struct LockState {
    shared_holders: HashMap<PageId, HashSet<TransactionId>>,
    exclusive_holder: HashMap<PageId, TransactionId>,
    held_by: HashMap<TransactionId, HashSet<PageId>>,
    wait_for: WaitForGraph,
}

impl LockState {
    fn new() -> Self {
        LockState {
            shared_holders: HashMap::new(),
            exclusive_holder: HashMap::new(),
            held_by: HashMap::new(),
            wait_for: WaitForGraph::new(),
        }
    }

    fn holders_of(&self, pid: &PageId) -> HashSet<TransactionId> {
        let mut holders: HashSet<TransactionId> = self
            .shared_holders
            .get(pid)
            .cloned()
            .unwrap_or_default();
        if let Some(x) = self.exclusive_holder.get(pid) {
            holders.insert(*x);
        }
        holders
    }

    fn can_grant(&self, tid: TransactionId, pid: &PageId, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => self
                .exclusive_holder
                .get(pid)
                .map_or(true, |holder| *holder == tid),
            LockMode::Exclusive => {
                let x_ok = self.exclusive_holder.get(pid).map_or(true, |h| *h == tid);
                let s_ok = match self.shared_holders.get(pid) {
                    None => true,
                    Some(holders) => holders.is_empty() || (holders.len() == 1 && holders.contains(&tid)),
                };
                x_ok && s_ok
            }
        }
    }

    fn grant(&mut self, tid: TransactionId, pid: PageId, mode: LockMode) {
        match mode {
            LockMode::Shared => {
                self.shared_holders.entry(pid).or_default().insert(tid);
            }
            LockMode::Exclusive => {
                self.shared_holders.entry(pid).or_default().remove(&tid);
                self.exclusive_holder.insert(pid, tid);
            }
        }
        self.held_by.entry(tid).or_default().insert(pid);
        self.wait_for.clear_waiter(tid);
    }

    fn release(&mut self, tid: TransactionId, pid: &PageId) {
        if let Some(holders) = self.shared_holders.get_mut(pid) {
            holders.remove(&tid);
            if holders.is_empty() {
                self.shared_holders.remove(pid);
            }
        }
        if self.exclusive_holder.get(pid) == Some(&tid) {
            self.exclusive_holder.remove(pid);
        }
        if let Some(pages) = self.held_by.get_mut(&tid) {
            pages.remove(pid);
        }
    }

    fn release_all(&mut self, tid: TransactionId) {
        if let Some(pages) = self.held_by.remove(&tid) {
            for pid in pages {
                self.release(tid, &pid);
            }
        }
        self.wait_for.clear_waiter(tid);
    }

    fn holds_lock(&self, tid: TransactionId, pid: &PageId) -> bool {
        self.exclusive_holder.get(pid) == Some(&tid)
            || self
                .shared_holders
                .get(pid)
                .map_or(false, |h| h.contains(&tid))
    }
}

/// Blocks callers on a `Condvar` until their request can be granted, or
/// fails them with `TransactionAborted` when granting would deadlock.
/// There is no timeout: the only way out of a block, besides a grant, is
/// the deadlock detector declaring the requester itself the victim.
pub struct LockManager {
    state: Mutex<LockState>,
    released: Condvar,
}

impl LockManager {
    pub fn new() -> Self {
        LockManager {
            state: Mutex::new(LockState::new()),
            released: Condvar::new(),
        }
    }

    /// Blocking acquire. Returns `TransactionAborted` if granting this
    /// request would complete a cycle in the wait-for graph — the
    /// caller is always the victim, since the cycle necessarily runs
    /// through it.
    pub fn acquire(
        &self,
        tid: TransactionId,
        pid: PageId,
        perm: Permission,
    ) -> StorageResult<()> {
        let mode = perm.lock_mode();
        let mut guard = self.state.lock().unwrap();

        loop {
            if guard.can_grant(tid, &pid, mode) {
                guard.grant(tid, pid, mode);
                return Ok(());
            }

            let holders = guard.holders_of(&pid);
            guard.wait_for.set_waits_for(tid, holders.into_iter());

            if guard.wait_for.has_cycle_from(tid) {
                guard.wait_for.clear_waiter(tid);
                debug!("deadlock detected, aborting requester tx_{}", tid);
                return Err(StorageError::TransactionAborted(format!(
                    "deadlock detected while tx_{} waited for page {:?}",
                    tid, pid
                )));
            }

            guard = self.released.wait(guard).unwrap();
        }
    }

    pub fn release(&self, tid: TransactionId, pid: &PageId) {
        let mut guard = self.state.lock().unwrap();
        guard.release(tid, pid);
        drop(guard);
        self.released.notify_all();
    }

    pub fn release_all(&self, tid: TransactionId) {
        let mut guard = self.state.lock().unwrap();
        guard.release_all(tid);
        drop(guard);
        self.released.notify_all();
    }

    pub fn holds_lock(&self, tid: TransactionId, pid: &PageId) -> bool {
        self.state.lock().unwrap().holds_lock(tid, pid)
    }

    pub fn clear(&self) {
        *self.state.lock().unwrap() = LockState::new();
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn pid(n: usize) -> PageId {
        PageId::new(1, n)
    }

    #[test]
    fn shared_locks_are_compatible() {
        let lm = LockManager::new();
        lm.acquire(1, pid(0), Permission::ReadOnly).unwrap();
        lm.acquire(2, pid(0), Permission::ReadOnly).unwrap();
        assert!(lm.holds_lock(1, &pid(0)));
        assert!(lm.holds_lock(2, &pid(0)));
    }

    #[test]
    fn sole_shared_holder_can_upgrade() {
        let lm = LockManager::new();
        lm.acquire(1, pid(0), Permission::ReadOnly).unwrap();
        lm.acquire(1, pid(0), Permission::ReadWrite).unwrap();
        assert!(lm.holds_lock(1, &pid(0)));
    }

    #[test]
    fn exclusive_blocks_until_release() {
        let lm = Arc::new(LockManager::new());
        lm.acquire(1, pid(0), Permission::ReadWrite).unwrap();

        let lm2 = Arc::clone(&lm);
        let handle = thread::spawn(move || {
            lm2.acquire(2, pid(0), Permission::ReadWrite).unwrap();
        });

        thread::sleep(Duration::from_millis(50));
        lm.release_all(1);
        handle.join().unwrap();
        assert!(lm.holds_lock(2, &pid(0)));
    }

    #[test]
    fn mutual_wait_aborts_exactly_one() {
        let lm = Arc::new(LockManager::new());
        lm.acquire(1, pid(0), Permission::ReadWrite).unwrap();
        lm.acquire(2, pid(1), Permission::ReadWrite).unwrap();

        let lm_a = Arc::clone(&lm);
        let a = thread::spawn(move || lm_a.acquire(1, pid(1), Permission::ReadWrite));

        thread::sleep(Duration::from_millis(50));
        // tx 2 requesting page 0 closes the cycle 2 -> 1 -> 2; tx 2 is
        // the requester, so it is the one to observe the abort.
        let b_result = lm.acquire(2, pid(0), Permission::ReadWrite);
        assert!(b_result.is_err());

        lm.release_all(2);
        let a_result = a.join().unwrap();
        assert!(a_result.is_ok());
    }
}
