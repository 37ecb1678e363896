use log::debug;
use parking_lot::RwLockWriteGuard;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::index::base::BTreeIndex;
use crate::index::btree::index::context::{CrabContext, RootLock};
use crate::index::btree::key::IndexKey;
use crate::index::btree::page::{AccessOp, InternalPage, LeafPage, TreePage};
use crate::transaction::concurrency::Transaction;

impl<K: IndexKey> BTreeIndex<K> {
    /// Insert `(key, rid)`. Returns `false` when the key already exists.
    pub fn insert(&self, key: &K, rid: Rid, txn: &Transaction) -> Result<bool, BTreeError> {
        let mut root_guard = self.root_page_id.write();
        if *root_guard == INVALID_PAGE_ID {
            self.start_new_tree(&mut root_guard, key, rid)?;
            return Ok(true);
        }

        let mut ctx = CrabContext::new(AccessOp::Insert, RootLock::Write(root_guard));
        self.descend_to_leaf(Some(key), &mut ctx)?;

        let outcome = {
            let top = ctx.pages.last_mut().expect("descent ends at a latched leaf");
            let mut leaf = LeafPage::<_, K>::attach(&mut top.guard.page_mut().data[..]);
            leaf.insert(key, rid).map(|new_size| new_size >= leaf.max_size())
        };

        let Some(needs_split) = outcome else {
            ctx.break_free(&self.buffer_pool, Some(txn))?;
            return Ok(false);
        };

        if needs_split {
            self.split_and_propagate(&mut ctx)?;
        }
        ctx.break_free(&self.buffer_pool, Some(txn))?;
        Ok(true)
    }

    /// The tree is empty: allocate a root leaf and record it in the
    /// directory page.
    fn start_new_tree(
        &self,
        root_guard: &mut RwLockWriteGuard<'_, PageId>,
        key: &K,
        rid: Rid,
    ) -> Result<(), BTreeError> {
        let (page, page_id) = self.allocate()?;
        {
            let mut guard = page.write();
            let mut leaf = LeafPage::<_, K>::attach(&mut guard.data[..]);
            leaf.init(page_id, INVALID_PAGE_ID, self.leaf_max_size);
            leaf.insert(key, rid);
        }
        self.buffer_pool.unpin_page(page_id, true);

        **root_guard = page_id;
        self.update_root_record(page_id)?;
        debug!("index {}: new root leaf {}", self.index_name, page_id);
        Ok(())
    }

    /// The deepest latched node overflowed. Split it and push separators
    /// upward through the latched ancestor chain, growing a new root if
    /// the overflow reaches the top.
    fn split_and_propagate(&self, ctx: &mut CrabContext<'_>) -> Result<(), BTreeError> {
        loop {
            let (new_page, new_page_id) = self.allocate()?;
            let mut new_guard = new_page.write_arc();

            let split_root = ctx.pages.len() == 1;
            let (old_page_id, separator) = {
                let top = ctx.pages.last_mut().expect("overflowing node is latched");
                let page = top.guard.page_mut();
                let separator = if TreePage::attach(&page.data[..]).is_leaf() {
                    let mut old_leaf = LeafPage::<_, K>::attach(&mut page.data[..]);
                    let mut new_leaf = LeafPage::<_, K>::attach(&mut new_guard.data[..]);
                    new_leaf.init(new_page_id, old_leaf.parent_page_id(), self.leaf_max_size);
                    old_leaf.move_half_to(&mut new_leaf);
                    new_leaf.set_next_page_id(old_leaf.next_page_id());
                    old_leaf.set_next_page_id(new_page_id);
                    new_leaf.key_at(0)
                } else {
                    let mut old_node = InternalPage::<_, K>::attach(&mut page.data[..]);
                    let mut new_node = InternalPage::<_, K>::attach(&mut new_guard.data[..]);
                    new_node.init(new_page_id, old_node.parent_page_id(), self.internal_max_size);
                    old_node.move_half_to(&mut new_node, &self.buffer_pool)?;
                    new_node.key_at(0)
                };
                (top.page_id, separator)
            };
            debug!(
                "index {}: split page {} into {}",
                self.index_name, old_page_id, new_page_id
            );

            if split_root {
                // Grow the tree by one level.
                let (root_page, root_id) = self.allocate()?;
                {
                    let mut guard = root_page.write();
                    let mut root = InternalPage::<_, K>::attach(&mut guard.data[..]);
                    root.init(root_id, INVALID_PAGE_ID, self.internal_max_size);
                    root.populate_new_root(old_page_id, &separator, new_page_id);
                }
                self.buffer_pool.unpin_page(root_id, true);

                let old_root = ctx.pages.last_mut().expect("old root is latched");
                TreePage::attach(&mut old_root.guard.page_mut().data[..])
                    .set_parent_page_id(root_id);
                TreePage::attach(&mut new_guard.data[..]).set_parent_page_id(root_id);
                drop(new_guard);
                self.buffer_pool.unpin_page(new_page_id, true);

                if let Some(root_lock) = ctx.root_lock.as_mut() {
                    root_lock.set(root_id);
                }
                self.update_root_record(root_id)?;
                debug!("index {}: new root {}", self.index_name, root_id);
                return Ok(());
            }

            // The sibling is complete; let go of it and of the split node
            // before touching the parent, so reparenting during a parent
            // split never meets a latch we still hold.
            drop(new_guard);
            self.buffer_pool.unpin_page(new_page_id, true);
            ctx.pop_and_release(&self.buffer_pool);

            let parent = ctx
                .pages
                .last_mut()
                .expect("unsafe child kept its parent latched");
            let mut parent_view = InternalPage::<_, K>::attach(&mut parent.guard.page_mut().data[..]);
            let new_size = parent_view.insert_node_after(old_page_id, &separator, new_page_id);
            if new_size <= self.internal_max_size {
                return Ok(());
            }
            // Parent overflowed in turn; next iteration splits it.
        }
    }
}
