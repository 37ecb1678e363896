use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::common::types::{PageId, PagePtr, Rid, HEADER_PAGE_ID, INVALID_PAGE_ID, PAGE_SIZE};
use crate::index::btree::error::BTreeError;
use crate::index::btree::index::context::{CrabContext, LatchedPage, PageGuard, RootLock};
use crate::index::btree::key::IndexKey;
use crate::index::btree::page::{
    AccessOp, HeaderPage, InternalPage, LeafPage, TreePage, INTERNAL_HEADER_SIZE, LEAF_HEADER_SIZE,
};
use crate::storage::buffer::BufferPoolManager;

/// Disk-resident B+Tree index. Pages live in the buffer pool; the tree
/// itself only names them by page id. The root page id is persisted in
/// the directory page under `index_name`.
pub struct BTreeIndex<K: IndexKey> {
    pub(crate) index_name: String,
    pub(crate) buffer_pool: Arc<BufferPoolManager>,
    pub(crate) root_page_id: RwLock<PageId>,
    pub(crate) leaf_max_size: usize,
    pub(crate) internal_max_size: usize,
    pub(crate) _marker: PhantomData<K>,
}

impl<K: IndexKey> BTreeIndex<K> {
    /// Open (or prepare to create) the index named `index_name`. An
    /// existing root recorded in the directory page is picked up.
    pub fn new(
        index_name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self, BTreeError> {
        assert!(
            leaf_max_size >= 3 && internal_max_size >= 3,
            "tree fanout too small"
        );
        let index_name = index_name.into();

        let header = buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let root = {
            let guard = header.read();
            HeaderPage::attach(&guard.data[..]).get_root_id(&index_name)
        };
        buffer_pool.unpin_page(HEADER_PAGE_ID, false);

        Ok(Self {
            index_name,
            buffer_pool,
            root_page_id: RwLock::new(root.unwrap_or(INVALID_PAGE_ID)),
            leaf_max_size,
            internal_max_size,
            _marker: PhantomData,
        })
    }

    /// Open the index with node sizes derived from the page capacity for
    /// this key width. One entry of slack is reserved: nodes transiently
    /// hold `max_size + 1` entries right before a split.
    pub fn with_page_capacity(
        index_name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
    ) -> Result<Self, BTreeError> {
        let leaf_max_size = (PAGE_SIZE - LEAF_HEADER_SIZE) / (K::ENCODED_SIZE + 8) - 1;
        let internal_max_size = (PAGE_SIZE - INTERNAL_HEADER_SIZE) / (K::ENCODED_SIZE + 4) - 1;
        Self::new(index_name, buffer_pool, leaf_max_size, internal_max_size)
    }

    pub fn name(&self) -> &str {
        &self.index_name
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.read() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.read()
    }

    /// Point lookup: all values stored under `key` (zero or one, since
    /// keys are unique).
    pub fn get_value(&self, key: &K) -> Result<Vec<Rid>, BTreeError> {
        let root_guard = self.root_page_id.read();
        if *root_guard == INVALID_PAGE_ID {
            return Ok(Vec::new());
        }

        let mut ctx = CrabContext::new(AccessOp::Read, RootLock::Read(root_guard));
        self.descend_to_leaf(Some(key), &mut ctx)?;

        let result = {
            let top = ctx.pages.last().expect("descent ends at a latched leaf");
            let leaf = LeafPage::<_, K>::attach(&top.guard.page().data[..]);
            match leaf.lookup(key) {
                Some(rid) => vec![rid],
                None => Vec::new(),
            }
        };
        ctx.break_free(&self.buffer_pool, None)?;
        Ok(result)
    }

    /// Latch-crab from the root down to the leaf covering `key` (the
    /// leftmost leaf when `key` is `None`).
    ///
    /// Reads latch the child shared and then let the ancestors go.
    /// Mutations latch the child exclusive and release the ancestors,
    /// root-id latch included, only once the child is safe for the
    /// operation.
    pub(crate) fn descend_to_leaf(
        &self,
        key: Option<&K>,
        ctx: &mut CrabContext<'_>,
    ) -> Result<(), BTreeError> {
        let mut page_id = ctx
            .root_lock
            .as_ref()
            .expect("root latch must be held for a descent")
            .id();

        loop {
            let page = self.fetch(page_id)?;
            let guard = match ctx.op {
                AccessOp::Read => PageGuard::Read(page.read_arc()),
                _ => PageGuard::Write(page.write_arc()),
            };

            let (is_leaf, is_safe, child) = {
                let data = &guard.page().data[..];
                let view = TreePage::attach(data);
                let is_leaf = view.is_leaf();
                let is_safe = view.is_safe(ctx.op);
                let child = if is_leaf {
                    INVALID_PAGE_ID
                } else {
                    let internal = InternalPage::<_, K>::attach(data);
                    match key {
                        Some(key) => internal.lookup(key),
                        None => internal.value_at(0),
                    }
                };
                (is_leaf, is_safe, child)
            };

            if !ctx.pages.is_empty() && is_safe {
                ctx.release_ancestors(&self.buffer_pool);
            }
            ctx.pages.push(LatchedPage { page_id, guard });

            if is_leaf {
                return Ok(());
            }
            page_id = child;
        }
    }

    /// Record `root_id` for this index in the directory page.
    pub(crate) fn update_root_record(&self, root_id: PageId) -> Result<(), BTreeError> {
        let page = self.fetch(HEADER_PAGE_ID)?;
        {
            let mut guard = page.write();
            let mut header = HeaderPage::attach(&mut guard.data[..]);
            if !header.update_record(&self.index_name, root_id) {
                header.insert_record(&self.index_name, root_id);
            }
        }
        self.buffer_pool.unpin_page(HEADER_PAGE_ID, true);
        Ok(())
    }

    pub(crate) fn fetch(&self, page_id: PageId) -> Result<PagePtr, BTreeError> {
        Ok(self.buffer_pool.fetch_page(page_id)?)
    }

    pub(crate) fn allocate(&self) -> Result<(PagePtr, PageId), BTreeError> {
        Ok(self.buffer_pool.new_page()?)
    }
}
