use log::debug;
use parking_lot::lock_api::ArcRwLockWriteGuard;
use parking_lot::RawRwLock;

use crate::common::types::{Page, PageId, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::index::base::BTreeIndex;
use crate::index::btree::index::context::{CrabContext, RootLock};
use crate::index::btree::key::IndexKey;
use crate::index::btree::page::{AccessOp, InternalPage, LeafPage, TreePage};
use crate::transaction::concurrency::Transaction;

impl<K: IndexKey> BTreeIndex<K> {
    /// Remove `key` if present. Underflowing nodes are repaired by
    /// redistribution or by merging with a sibling; emptied pages are
    /// deleted after the operation through the transaction's deferred
    /// deletion set.
    pub fn remove(&self, key: &K, txn: &Transaction) -> Result<(), BTreeError> {
        let root_guard = self.root_page_id.write();
        if *root_guard == INVALID_PAGE_ID {
            return Ok(());
        }

        let mut ctx = CrabContext::new(AccessOp::Remove, RootLock::Write(root_guard));
        self.descend_to_leaf(Some(key), &mut ctx)?;

        let underflow = {
            let top = ctx.pages.last_mut().expect("descent ends at a latched leaf");
            let mut leaf = LeafPage::<_, K>::attach(&mut top.guard.page_mut().data[..]);
            let removed = leaf.remove_and_delete_record(key);
            removed && leaf.size() < leaf.min_size()
        };

        if underflow {
            self.coalesce_or_redistribute(&mut ctx, txn)?;
        }
        ctx.break_free(&self.buffer_pool, Some(txn))?;
        Ok(())
    }

    /// Repair the deepest latched node, walking upward while merges keep
    /// underflowing the parents.
    fn coalesce_or_redistribute(
        &self,
        ctx: &mut CrabContext<'_>,
        txn: &Transaction,
    ) -> Result<(), BTreeError> {
        loop {
            if ctx.pages.len() == 1 {
                // The unsafe chain reaches the root.
                return self.adjust_root(ctx, txn);
            }

            let (node_id, node_size, node_max) = {
                let top = ctx.pages.last().expect("underflowing node is latched");
                let view = TreePage::attach(&top.guard.page().data[..]);
                (top.page_id, view.size(), view.max_size())
            };

            // Pick the left sibling, or the right one for the leftmost
            // child. The separator between the pair sits at the higher of
            // the two child indices.
            let (node_index, sibling_id, middle_index) = {
                let parent = &ctx.pages[ctx.pages.len() - 2];
                let parent_view = InternalPage::<_, K>::attach(&parent.guard.page().data[..]);
                let node_index = parent_view
                    .value_index(node_id)
                    .expect("underflowing node is missing from its parent");
                let sibling_index = if node_index == 0 { 1 } else { node_index - 1 };
                let middle_index = node_index.max(sibling_index);
                (node_index, parent_view.value_at(sibling_index), middle_index)
            };

            let sibling_page = self.fetch(sibling_id)?;
            let mut sibling_guard = sibling_page.write_arc();
            let sibling_size = TreePage::attach(&sibling_guard.data[..]).size();

            if sibling_size + node_size > node_max {
                self.redistribute(ctx, &mut sibling_guard, node_index, middle_index)?;
                drop(sibling_guard);
                self.buffer_pool.unpin_page(sibling_id, true);
                return Ok(());
            }

            let parent_underflow =
                self.coalesce(ctx, &mut sibling_guard, sibling_id, node_index, middle_index, txn)?;
            drop(sibling_guard);
            self.buffer_pool.unpin_page(sibling_id, true);
            ctx.pop_and_release(&self.buffer_pool);

            if !parent_underflow {
                return Ok(());
            }
        }
    }

    /// Merge the right page of the (node, sibling) pair into the left one
    /// and drop the separator from the parent. Returns whether the parent
    /// underflowed.
    fn coalesce(
        &self,
        ctx: &mut CrabContext<'_>,
        sibling_guard: &mut ArcRwLockWriteGuard<RawRwLock, Page>,
        sibling_id: PageId,
        node_index: usize,
        middle_index: usize,
        txn: &Transaction,
    ) -> Result<bool, BTreeError> {
        let level = ctx.pages.len() - 1;
        let (ancestors, nodes) = ctx.pages.split_at_mut(level);
        let parent_entry = ancestors.last_mut().expect("parent is latched");
        let node_entry = &mut nodes[0];
        let node_id = node_entry.page_id;
        let node_page = node_entry.guard.page_mut();

        let mut parent = InternalPage::<_, K>::attach(&mut parent_entry.guard.page_mut().data[..]);
        let middle_key = parent.key_at(middle_index);
        let node_is_leaf = TreePage::attach(&node_page.data[..]).is_leaf();

        if node_index == 0 {
            // Sibling is on the right: fold it into this node.
            if node_is_leaf {
                let mut dst = LeafPage::<_, K>::attach(&mut node_page.data[..]);
                let mut src = LeafPage::<_, K>::attach(&mut sibling_guard.data[..]);
                let next = src.next_page_id();
                src.move_all_to(&mut dst);
                dst.set_next_page_id(next);
            } else {
                let mut dst = InternalPage::<_, K>::attach(&mut node_page.data[..]);
                let mut src = InternalPage::<_, K>::attach(&mut sibling_guard.data[..]);
                src.move_all_to(&mut dst, &middle_key, &self.buffer_pool)?;
            }
            txn.add_deleted_page(sibling_id);
            debug!("index {}: merged page {} into {}", self.index_name, sibling_id, node_id);
        } else {
            // Sibling is on the left: fold this node into it.
            if node_is_leaf {
                let mut src = LeafPage::<_, K>::attach(&mut node_page.data[..]);
                let mut dst = LeafPage::<_, K>::attach(&mut sibling_guard.data[..]);
                let next = src.next_page_id();
                src.move_all_to(&mut dst);
                dst.set_next_page_id(next);
            } else {
                let mut src = InternalPage::<_, K>::attach(&mut node_page.data[..]);
                let mut dst = InternalPage::<_, K>::attach(&mut sibling_guard.data[..]);
                src.move_all_to(&mut dst, &middle_key, &self.buffer_pool)?;
            }
            txn.add_deleted_page(node_id);
            debug!("index {}: merged page {} into {}", self.index_name, node_id, sibling_id);
        }

        parent.remove(middle_index);
        Ok(parent.size() < parent.min_size())
    }

    /// Move a single entry between the siblings and refresh the parent's
    /// separator: it becomes the right sibling's first key, with internal
    /// moves carrying the old separator down as the pivot.
    fn redistribute(
        &self,
        ctx: &mut CrabContext<'_>,
        sibling_guard: &mut ArcRwLockWriteGuard<RawRwLock, Page>,
        node_index: usize,
        middle_index: usize,
    ) -> Result<(), BTreeError> {
        let level = ctx.pages.len() - 1;
        let (ancestors, nodes) = ctx.pages.split_at_mut(level);
        let parent_entry = ancestors.last_mut().expect("parent is latched");
        let node_entry = &mut nodes[0];
        let node_page = node_entry.guard.page_mut();

        let mut parent = InternalPage::<_, K>::attach(&mut parent_entry.guard.page_mut().data[..]);
        let middle_key = parent.key_at(middle_index);
        let node_is_leaf = TreePage::attach(&node_page.data[..]).is_leaf();

        if node_is_leaf {
            let mut node = LeafPage::<_, K>::attach(&mut node_page.data[..]);
            let mut sibling = LeafPage::<_, K>::attach(&mut sibling_guard.data[..]);
            if node_index == 0 {
                sibling.move_first_to_end_of(&mut node);
                parent.set_key_at(middle_index, &sibling.key_at(0));
            } else {
                sibling.move_last_to_front_of(&mut node);
                parent.set_key_at(middle_index, &node.key_at(0));
            }
        } else {
            let mut node = InternalPage::<_, K>::attach(&mut node_page.data[..]);
            let mut sibling = InternalPage::<_, K>::attach(&mut sibling_guard.data[..]);
            if node_index == 0 {
                sibling.move_first_to_end_of(&mut node, &middle_key, &self.buffer_pool)?;
                parent.set_key_at(middle_index, &sibling.key_at(0));
            } else {
                sibling.move_last_to_front_of(&mut node, &middle_key, &self.buffer_pool)?;
                parent.set_key_at(middle_index, &node.key_at(0));
            }
        }
        Ok(())
    }

    /// The root itself shrank. An internal root left with one child hands
    /// the tree over to that child; an emptied leaf root leaves the tree
    /// empty. Anything else is left alone (the root is exempt from the
    /// minimum-size rule).
    fn adjust_root(&self, ctx: &mut CrabContext<'_>, txn: &Transaction) -> Result<(), BTreeError> {
        let (root_id, is_leaf, size) = {
            let root_entry = ctx.pages.last().expect("root is latched");
            let view = TreePage::attach(&root_entry.guard.page().data[..]);
            (root_entry.page_id, view.is_leaf(), view.size())
        };

        if !is_leaf && size == 1 {
            let child_id = {
                let root_entry = ctx.pages.last_mut().expect("root is latched");
                InternalPage::<_, K>::attach(&mut root_entry.guard.page_mut().data[..])
                    .remove_and_return_only_child()
            };
            if let Some(root_lock) = ctx.root_lock.as_mut() {
                root_lock.set(child_id);
            }
            self.update_root_record(child_id)?;

            let child = self.fetch(child_id)?;
            {
                let mut guard = child.write();
                TreePage::attach(&mut guard.data[..]).set_parent_page_id(INVALID_PAGE_ID);
            }
            self.buffer_pool.unpin_page(child_id, true);

            txn.add_deleted_page(root_id);
            debug!("index {}: promoted page {} to root", self.index_name, child_id);
        } else if is_leaf && size == 0 {
            if let Some(root_lock) = ctx.root_lock.as_mut() {
                root_lock.set(INVALID_PAGE_ID);
            }
            self.update_root_record(INVALID_PAGE_ID)?;
            txn.add_deleted_page(root_id);
            debug!("index {}: tree is now empty", self.index_name);
        }
        Ok(())
    }
}
