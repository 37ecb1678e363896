use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::types::{Page, PageId};
use crate::index::btree::error::BTreeError;
use crate::index::btree::page::AccessOp;
use crate::storage::buffer::BufferPoolManager;
use crate::transaction::concurrency::Transaction;

/// An owned page latch: either shared or exclusive.
pub(crate) enum PageGuard {
    Read(ArcRwLockReadGuard<RawRwLock, Page>),
    Write(ArcRwLockWriteGuard<RawRwLock, Page>),
}

impl PageGuard {
    pub fn page(&self) -> &Page {
        match self {
            PageGuard::Read(guard) => guard,
            PageGuard::Write(guard) => guard,
        }
    }

    pub fn page_mut(&mut self) -> &mut Page {
        match self {
            PageGuard::Write(guard) => guard,
            PageGuard::Read(_) => unreachable!("write access through a read latch"),
        }
    }
}

/// The root-id latch, taken before the root page itself is latched.
pub(crate) enum RootLock<'a> {
    Read(RwLockReadGuard<'a, PageId>),
    Write(RwLockWriteGuard<'a, PageId>),
}

impl RootLock<'_> {
    pub fn id(&self) -> PageId {
        match self {
            RootLock::Read(guard) => **guard,
            RootLock::Write(guard) => **guard,
        }
    }

    pub fn set(&mut self, page_id: PageId) {
        match self {
            RootLock::Write(guard) => **guard = page_id,
            RootLock::Read(_) => unreachable!("root id mutated under a read lock"),
        }
    }
}

/// A page held by the current operation.
pub(crate) struct LatchedPage {
    pub page_id: PageId,
    pub guard: PageGuard,
}

/// Scoped latch-crabbing state for one tree operation: the root-id latch
/// plus the chain of still-latched ancestors, deepest last. Dropping the
/// context on an error path releases every latch; pins and deferred page
/// deletions are drained explicitly through [`break_free`].
///
/// [`break_free`]: CrabContext::break_free
pub(crate) struct CrabContext<'a> {
    pub op: AccessOp,
    pub root_lock: Option<RootLock<'a>>,
    pub pages: Vec<LatchedPage>,
}

impl<'a> CrabContext<'a> {
    pub fn new(op: AccessOp, root_lock: RootLock<'a>) -> Self {
        Self {
            op,
            root_lock: Some(root_lock),
            pages: Vec::new(),
        }
    }

    fn unpin_dirty(&self) -> bool {
        self.op != AccessOp::Read
    }

    /// Drop the root-id latch and every held page latch, unpinning as we
    /// go. Called as soon as the descent reaches a safe child.
    pub fn release_ancestors(&mut self, buffer_pool: &BufferPoolManager) {
        self.root_lock = None;
        let dirty = self.unpin_dirty();
        for latched in self.pages.drain(..) {
            let page_id = latched.page_id;
            drop(latched.guard);
            buffer_pool.unpin_page(page_id, dirty);
        }
    }

    /// Release only the deepest held page.
    pub fn pop_and_release(&mut self, buffer_pool: &BufferPoolManager) {
        if let Some(latched) = self.pages.pop() {
            let page_id = latched.page_id;
            drop(latched.guard);
            buffer_pool.unpin_page(page_id, self.unpin_dirty());
        }
    }

    /// Finish the operation: release everything, then physically delete
    /// the pages the transaction marked for deferred deletion (their
    /// latches are gone and their pins are dropped by now).
    pub fn break_free(
        mut self,
        buffer_pool: &BufferPoolManager,
        txn: Option<&Transaction>,
    ) -> Result<(), BTreeError> {
        self.release_ancestors(buffer_pool);
        if let Some(txn) = txn {
            for page_id in txn.take_deleted_pages() {
                buffer_pool.delete_page(page_id)?;
            }
        }
        Ok(())
    }
}
