use std::marker::PhantomData;
use std::sync::Arc;

use log::warn;
use parking_lot::lock_api::ArcRwLockReadGuard;
use parking_lot::RawRwLock;

use crate::common::types::{Page, PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::index::base::BTreeIndex;
use crate::index::btree::key::IndexKey;
use crate::index::btree::page::{InternalPage, LeafPage, TreePage};
use crate::storage::buffer::BufferPoolManager;

type LeafGuard = ArcRwLockReadGuard<RawRwLock, Page>;

/// Forward cursor over the leaf chain. At most one leaf is read-latched
/// and pinned at a time; crossing a leaf boundary releases the current
/// leaf before latching its successor, so scans are weakly consistent
/// across boundaries.
pub struct TreeIterator<K: IndexKey> {
    buffer_pool: Arc<BufferPoolManager>,
    leaf: Option<(PageId, LeafGuard)>,
    index: usize,
    _marker: PhantomData<K>,
}

impl<K: IndexKey> BTreeIndex<K> {
    /// Cursor positioned at the smallest key.
    pub fn iter(&self) -> Result<TreeIterator<K>, BTreeError> {
        self.make_iterator(None)
    }

    /// Cursor positioned at the first key >= `key`.
    pub fn iter_from(&self, key: &K) -> Result<TreeIterator<K>, BTreeError> {
        self.make_iterator(Some(key))
    }

    fn make_iterator(&self, key: Option<&K>) -> Result<TreeIterator<K>, BTreeError> {
        let root_guard = self.root_page_id.read();
        if *root_guard == INVALID_PAGE_ID {
            return Ok(TreeIterator {
                buffer_pool: self.buffer_pool.clone(),
                leaf: None,
                index: 0,
                _marker: PhantomData,
            });
        }

        // Read-crab down to the target leaf: latch the child, then let
        // the parent go.
        let mut page_id = *root_guard;
        let mut current: Option<(PageId, LeafGuard)> = None;
        loop {
            let page = self.fetch(page_id)?;
            let guard = page.read_arc();
            if let Some((parent_id, parent_guard)) = current.take() {
                drop(parent_guard);
                self.buffer_pool.unpin_page(parent_id, false);
            }

            if TreePage::attach(&guard.data[..]).is_leaf() {
                current = Some((page_id, guard));
                break;
            }
            let internal = InternalPage::<_, K>::attach(&guard.data[..]);
            let child = match key {
                Some(key) => internal.lookup(key),
                None => internal.value_at(0),
            };
            current = Some((page_id, guard));
            page_id = child;
        }
        drop(root_guard);

        let (leaf_id, leaf_guard) = current.expect("descent ends at a leaf");
        let index = match key {
            Some(key) => LeafPage::<_, K>::attach(&leaf_guard.data[..]).key_index(key),
            None => 0,
        };

        Ok(TreeIterator {
            buffer_pool: self.buffer_pool.clone(),
            leaf: Some((leaf_id, leaf_guard)),
            index,
            _marker: PhantomData,
        })
    }
}

impl<K: IndexKey> Iterator for TreeIterator<K> {
    type Item = (K, Rid);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (_, guard) = self.leaf.as_ref()?;
            let leaf = LeafPage::<_, K>::attach(&guard.data[..]);

            if self.index < leaf.size() {
                let item = leaf.item_at(self.index);
                self.index += 1;
                return Some(item);
            }

            let next_page_id = leaf.next_page_id();
            let (page_id, guard) = self.leaf.take().expect("leaf checked above");
            drop(guard);
            self.buffer_pool.unpin_page(page_id, false);

            if next_page_id == INVALID_PAGE_ID {
                return None;
            }
            let page = match self.buffer_pool.fetch_page(next_page_id) {
                Ok(page) => page,
                Err(err) => {
                    warn!("scan stopped at leaf {}: {}", next_page_id, err);
                    return None;
                }
            };
            self.leaf = Some((next_page_id, page.read_arc()));
            self.index = 0;
        }
    }
}

impl<K: IndexKey> Drop for TreeIterator<K> {
    fn drop(&mut self) {
        if let Some((page_id, guard)) = self.leaf.take() {
            drop(guard);
            self.buffer_pool.unpin_page(page_id, false);
        }
    }
}
