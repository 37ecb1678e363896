use std::marker::PhantomData;

use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::PageId;
use crate::index::btree::key::IndexKey;
use crate::index::btree::page::base::{TreePage, TreePageType};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};

pub const INTERNAL_HEADER_SIZE: usize = 24;

const CHILD_ID_SIZE: usize = 4;

/// Typed view of an internal page.
///
/// Entries are `(key, child_page_id)` pairs; the key in slot 0 is a
/// sentinel and never consulted during lookups, so an internal page of
/// size `n` separates its `n` children with `n - 1` live keys.
pub struct InternalPage<B, K> {
    buf: B,
    _marker: PhantomData<K>,
}

impl<B: AsRef<[u8]>, K: IndexKey> InternalPage<B, K> {
    const ENTRY_SIZE: usize = K::ENCODED_SIZE + CHILD_ID_SIZE;

    pub fn attach(buf: B) -> Self {
        Self {
            buf,
            _marker: PhantomData,
        }
    }

    fn common(&self) -> TreePage<&[u8]> {
        TreePage::attach(self.buf.as_ref())
    }

    pub fn size(&self) -> usize {
        self.common().size()
    }

    pub fn max_size(&self) -> usize {
        self.common().max_size()
    }

    pub fn min_size(&self) -> usize {
        self.common().min_size()
    }

    pub fn page_id(&self) -> PageId {
        self.common().page_id()
    }

    pub fn parent_page_id(&self) -> PageId {
        self.common().parent_page_id()
    }

    pub fn is_root(&self) -> bool {
        self.common().is_root()
    }

    fn entry_offset(index: usize) -> usize {
        INTERNAL_HEADER_SIZE + index * Self::ENTRY_SIZE
    }

    pub fn key_at(&self, index: usize) -> K {
        let offset = Self::entry_offset(index);
        K::decode(&self.buf.as_ref()[offset..offset + K::ENCODED_SIZE])
    }

    pub fn value_at(&self, index: usize) -> PageId {
        let offset = Self::entry_offset(index) + K::ENCODED_SIZE;
        LittleEndian::read_i32(&self.buf.as_ref()[offset..offset + 4])
    }

    /// Index of the entry holding `child_page_id`, if present.
    pub fn value_index(&self, child_page_id: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.value_at(i) == child_page_id)
    }

    /// Child whose subtree covers `key`: the child after the largest live
    /// key that is <= `key`, or child 0 when `key` precedes every key.
    pub fn lookup(&self, key: &K) -> PageId {
        let mut lo = 1;
        let mut hi = self.size();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.key_at(mid) <= *key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        self.value_at(lo - 1)
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>, K: IndexKey> InternalPage<B, K> {
    fn common_mut(&mut self) -> TreePage<&mut [u8]> {
        TreePage::attach(self.buf.as_mut())
    }

    pub fn init(&mut self, page_id: PageId, parent_page_id: PageId, max_size: usize) {
        self.common_mut()
            .init(TreePageType::Internal, page_id, parent_page_id, max_size);
    }

    pub fn set_size(&mut self, size: usize) {
        self.common_mut().set_size(size);
    }

    pub fn set_parent_page_id(&mut self, parent_page_id: PageId) {
        self.common_mut().set_parent_page_id(parent_page_id);
    }

    pub fn set_key_at(&mut self, index: usize, key: &K) {
        let offset = Self::entry_offset(index);
        key.encode(&mut self.buf.as_mut()[offset..offset + K::ENCODED_SIZE]);
    }

    fn set_value_at(&mut self, index: usize, child_page_id: PageId) {
        let offset = Self::entry_offset(index) + K::ENCODED_SIZE;
        LittleEndian::write_i32(&mut self.buf.as_mut()[offset..offset + 4], child_page_id);
    }

    /// Turn an empty page into a root with exactly two children separated
    /// by `key`.
    pub fn populate_new_root(&mut self, left: PageId, key: &K, right: PageId) {
        self.set_value_at(0, left);
        self.set_key_at(1, key);
        self.set_value_at(1, right);
        self.set_size(2);
    }

    /// Insert `(key, new_child)` immediately after the entry holding
    /// `old_child`. Returns the new size.
    pub fn insert_node_after(&mut self, old_child: PageId, key: &K, new_child: PageId) -> usize {
        let index = self
            .value_index(old_child)
            .expect("split child is missing from its parent");
        let size = self.size();

        let src = Self::entry_offset(index + 1);
        let end = Self::entry_offset(size);
        self.buf.as_mut().copy_within(src..end, src + Self::ENTRY_SIZE);
        self.set_key_at(index + 1, key);
        self.set_value_at(index + 1, new_child);
        self.set_size(size + 1);
        size + 1
    }

    /// Drop the entry at `index`, shifting the rest left.
    pub fn remove(&mut self, index: usize) {
        let size = self.size();
        debug_assert!(index < size);
        let src = Self::entry_offset(index + 1);
        let end = Self::entry_offset(size);
        self.buf.as_mut().copy_within(src..end, Self::entry_offset(index));
        self.set_size(size - 1);
    }

    /// Collapse a root that is down to a single child.
    pub fn remove_and_return_only_child(&mut self) -> PageId {
        debug_assert_eq!(self.size(), 1);
        let child = self.value_at(0);
        self.set_size(0);
        child
    }

    /// Move the upper half of the entries to `other` (freshly initialized)
    /// and reparent the moved children. The key landing in `other`'s
    /// sentinel slot is the separator the caller pushes up.
    pub fn move_half_to<B2: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        other: &mut InternalPage<B2, K>,
        buffer_pool: &BufferPoolManager,
    ) -> Result<(), BufferPoolError> {
        let size = self.size();
        let split = size / 2;
        self.copy_entries_to(split, size, other);
        self.set_size(split);
        reparent_range(other, split, size, buffer_pool)
    }

    /// Append every entry to `other`, planting `middle_key` (the parent's
    /// old separator) in the sentinel slot of the moved block, and
    /// reparent the moved children.
    pub fn move_all_to<B2: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        other: &mut InternalPage<B2, K>,
        middle_key: &K,
        buffer_pool: &BufferPoolManager,
    ) -> Result<(), BufferPoolError> {
        let size = self.size();
        let other_size = other.size();
        self.copy_entries_to(0, size, other);
        other.set_key_at(other_size, middle_key);
        self.set_size(0);
        reparent_range(other, 0, size, buffer_pool)
    }

    /// Shift the first entry to the end of `other`, carrying the parent's
    /// old separator down as the pivot key. After the shift this page's
    /// sentinel slot holds the key the caller promotes into the parent.
    pub fn move_first_to_end_of<B2: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        other: &mut InternalPage<B2, K>,
        middle_key: &K,
        buffer_pool: &BufferPoolManager,
    ) -> Result<(), BufferPoolError> {
        let size = self.size();
        debug_assert!(size > 0);
        let moved_child = self.value_at(0);

        let other_size = other.size();
        other.set_key_at(other_size, middle_key);
        other.set_value_at(other_size, moved_child);
        other.set_size(other_size + 1);

        self.remove(0);
        reparent(moved_child, other.page_id(), buffer_pool)
    }

    /// Shift the last entry to the front of `other`. The displaced
    /// sentinel key of `other` becomes `middle_key`, and the moved key
    /// lands in the new sentinel slot for the caller to promote.
    pub fn move_last_to_front_of<B2: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        other: &mut InternalPage<B2, K>,
        middle_key: &K,
        buffer_pool: &BufferPoolManager,
    ) -> Result<(), BufferPoolError> {
        let size = self.size();
        debug_assert!(size > 0);
        let moved_key = self.key_at(size - 1);
        let moved_child = self.value_at(size - 1);

        let other_size = other.size();
        let end = InternalPage::<B2, K>::entry_offset(other_size);
        other
            .buf
            .as_mut()
            .copy_within(INTERNAL_HEADER_SIZE..end, INTERNAL_HEADER_SIZE + Self::ENTRY_SIZE);
        other.set_key_at(0, &moved_key);
        other.set_value_at(0, moved_child);
        other.set_key_at(1, middle_key);
        other.set_size(other_size + 1);

        self.set_size(size - 1);
        reparent(moved_child, other.page_id(), buffer_pool)
    }

    fn copy_entries_to<B2: AsRef<[u8]> + AsMut<[u8]>>(
        &self,
        from: usize,
        to: usize,
        other: &mut InternalPage<B2, K>,
    ) {
        let other_size = other.size();
        let src_start = Self::entry_offset(from);
        let src_end = Self::entry_offset(to);
        let dst_start = InternalPage::<B2, K>::entry_offset(other_size);
        let len = src_end - src_start;
        other.buf.as_mut()[dst_start..dst_start + len]
            .copy_from_slice(&self.buf.as_ref()[src_start..src_end]);
        other.set_size(other_size + (to - from));
    }
}

/// Rewrite the parent pointer of `child_page_id`.
fn reparent(
    child_page_id: PageId,
    new_parent: PageId,
    buffer_pool: &BufferPoolManager,
) -> Result<(), BufferPoolError> {
    let page = buffer_pool.fetch_page(child_page_id)?;
    {
        let mut guard = page.write();
        TreePage::attach(&mut guard.data[..]).set_parent_page_id(new_parent);
    }
    buffer_pool.unpin_page(child_page_id, true);
    Ok(())
}

fn reparent_range<B: AsRef<[u8]> + AsMut<[u8]>, K: IndexKey>(
    node: &InternalPage<B, K>,
    from: usize,
    to: usize,
    buffer_pool: &BufferPoolManager,
) -> Result<(), BufferPoolError> {
    let parent = node.page_id();
    // Indices are relative to the recipient after the copy.
    let base = node.size() - (to - from);
    for i in 0..(to - from) {
        reparent(node.value_at(base + i), parent, buffer_pool)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{INVALID_PAGE_ID, PAGE_SIZE};

    fn new_internal(page_id: PageId, max_size: usize) -> [u8; PAGE_SIZE] {
        let mut data = [0u8; PAGE_SIZE];
        InternalPage::<_, i32>::attach(&mut data[..]).init(page_id, INVALID_PAGE_ID, max_size);
        data
    }

    #[test]
    fn test_lookup_routes_to_covering_child() {
        let mut data = new_internal(1, 8);
        let mut node = InternalPage::<_, i32>::attach(&mut data[..]);
        node.populate_new_root(100, &10, 101);
        node.insert_node_after(101, &20, 102);
        node.insert_node_after(102, &30, 103);

        assert_eq!(node.lookup(&5), 100);
        assert_eq!(node.lookup(&10), 101);
        assert_eq!(node.lookup(&15), 101);
        assert_eq!(node.lookup(&25), 102);
        assert_eq!(node.lookup(&35), 103);
    }

    #[test]
    fn test_insert_node_after_preserves_order() {
        let mut data = new_internal(1, 8);
        let mut node = InternalPage::<_, i32>::attach(&mut data[..]);
        node.populate_new_root(100, &10, 101);
        node.insert_node_after(100, &5, 105);

        assert_eq!(node.size(), 3);
        assert_eq!(node.value_at(0), 100);
        assert_eq!(node.value_at(1), 105);
        assert_eq!(node.key_at(1), 5);
        assert_eq!(node.value_at(2), 101);
        assert_eq!(node.key_at(2), 10);
    }

    #[test]
    fn test_value_index_and_remove() {
        let mut data = new_internal(1, 8);
        let mut node = InternalPage::<_, i32>::attach(&mut data[..]);
        node.populate_new_root(100, &10, 101);
        node.insert_node_after(101, &20, 102);

        assert_eq!(node.value_index(101), Some(1));
        assert_eq!(node.value_index(999), None);

        node.remove(1);
        assert_eq!(node.size(), 2);
        assert_eq!(node.value_at(1), 102);
        assert_eq!(node.key_at(1), 20);
    }

    #[test]
    fn test_remove_and_return_only_child() {
        let mut data = new_internal(1, 8);
        let mut node = InternalPage::<_, i32>::attach(&mut data[..]);
        node.populate_new_root(100, &10, 101);
        node.remove(1);

        assert_eq!(node.remove_and_return_only_child(), 100);
        assert_eq!(node.size(), 0);
    }
}
