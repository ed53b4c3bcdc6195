//! Transaction identity and lifecycle: begin, commit, abort. Strict 2PL
//! means locks are held until `commit`/`abort` runs to completion; there
//! is deliberately no `Drop`-based auto-commit (the teacher's own
//! commented-out attempt at this deadlocked its `RwLock`-based state).

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::database::Database;
use crate::error::StorageResult;

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// Globally unique, monotonically assigned (§3).
pub type TransactionId = u64;

pub fn next_transaction_id() -> TransactionId {
    NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    id: TransactionId,
}

impl Transaction {
    /// Begins a new transaction: assigns it an id and writes its BEGIN
    /// log record.
    pub fn begin(db: &Database) -> StorageResult<Self> {
        let id = next_transaction_id();
        db.log_manager().wl().log_begin(id)?;
        Ok(Transaction { id })
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Flushes this transaction's dirty pages (forcing their UPDATE log
    /// records first), writes COMMIT, then releases every lock it holds.
    pub fn commit(&self, db: &Database) -> StorageResult<()> {
        db.buffer_pool().transaction_complete(db, self.id, true)?;
        db.log_manager().wl().log_commit(self.id)?;
        db.lock_manager().release_all(self.id);
        Ok(())
    }

    /// Rolls back this transaction's updates (via the log), discards its
    /// dirty pages, writes ABORT, then releases every lock it holds.
    pub fn abort(&self, db: &Database) -> StorageResult<()> {
        db.log_manager()
            .wl()
            .log_abort(db, db.buffer_pool(), self.id)?;
        db.buffer_pool()
            .transaction_complete(db, self.id, false)?;
        db.lock_manager().release_all(self.id);
        Ok(())
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "tx_{}", self.id)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}
