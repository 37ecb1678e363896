use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{PageId, INVALID_PAGE_ID};

// Common header layout, shared by leaf and internal pages:
// - page_type: u32        (0)
// - lsn: u32              (4)
// - size: i32             (8)
// - max_size: i32         (12)
// - parent_page_id: i32   (16)
// - page_id: i32          (20)
pub(crate) const PAGE_TYPE_OFFSET: usize = 0;
pub(crate) const LSN_OFFSET: usize = 4;
pub(crate) const SIZE_OFFSET: usize = 8;
pub(crate) const MAX_SIZE_OFFSET: usize = 12;
pub(crate) const PARENT_PAGE_ID_OFFSET: usize = 16;
pub(crate) const PAGE_ID_OFFSET: usize = 20;
pub const COMMON_HEADER_SIZE: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreePageType {
    Invalid,
    Leaf,
    Internal,
}

impl TreePageType {
    fn from_u32(raw: u32) -> Self {
        match raw {
            1 => TreePageType::Leaf,
            2 => TreePageType::Internal,
            _ => TreePageType::Invalid,
        }
    }

    fn as_u32(self) -> u32 {
        match self {
            TreePageType::Invalid => 0,
            TreePageType::Leaf => 1,
            TreePageType::Internal => 2,
        }
    }
}

/// Tree operations, used to decide whether a node is "safe" during latch
/// crabbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOp {
    Read,
    Insert,
    Remove,
}

/// View of the common header of any tree page.
pub struct TreePage<B> {
    buf: B,
}

impl<B: AsRef<[u8]>> TreePage<B> {
    pub fn attach(buf: B) -> Self {
        Self { buf }
    }

    fn read_i32(&self, offset: usize) -> i32 {
        LittleEndian::read_i32(&self.buf.as_ref()[offset..offset + 4])
    }

    pub fn page_type(&self) -> TreePageType {
        TreePageType::from_u32(LittleEndian::read_u32(
            &self.buf.as_ref()[PAGE_TYPE_OFFSET..PAGE_TYPE_OFFSET + 4],
        ))
    }

    pub fn is_leaf(&self) -> bool {
        self.page_type() == TreePageType::Leaf
    }

    pub fn size(&self) -> usize {
        self.read_i32(SIZE_OFFSET) as usize
    }

    pub fn max_size(&self) -> usize {
        self.read_i32(MAX_SIZE_OFFSET) as usize
    }

    /// Minimum legal size of a non-root node.
    pub fn min_size(&self) -> usize {
        if self.is_leaf() {
            // Leaves hold at most max_size - 1 entries.
            self.max_size() / 2
        } else {
            (self.max_size() + 1) / 2
        }
    }

    pub fn parent_page_id(&self) -> PageId {
        self.read_i32(PARENT_PAGE_ID_OFFSET)
    }

    pub fn page_id(&self) -> PageId {
        self.read_i32(PAGE_ID_OFFSET)
    }

    pub fn is_root(&self) -> bool {
        self.parent_page_id() == INVALID_PAGE_ID
    }

    /// A node is safe for an operation when the operation cannot overflow
    /// or underflow it, i.e. structural changes cannot propagate past it.
    pub fn is_safe(&self, op: AccessOp) -> bool {
        match op {
            AccessOp::Read => true,
            AccessOp::Insert => self.size() < self.max_size() - 1,
            AccessOp::Remove => self.size() > self.min_size(),
        }
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> TreePage<B> {
    fn write_i32(&mut self, offset: usize, value: i32) {
        LittleEndian::write_i32(&mut self.buf.as_mut()[offset..offset + 4], value);
    }

    pub fn init(&mut self, page_type: TreePageType, page_id: PageId, parent_page_id: PageId, max_size: usize) {
        LittleEndian::write_u32(
            &mut self.buf.as_mut()[PAGE_TYPE_OFFSET..PAGE_TYPE_OFFSET + 4],
            page_type.as_u32(),
        );
        LittleEndian::write_u32(&mut self.buf.as_mut()[LSN_OFFSET..LSN_OFFSET + 4], 0);
        self.write_i32(SIZE_OFFSET, 0);
        self.write_i32(MAX_SIZE_OFFSET, max_size as i32);
        self.write_i32(PARENT_PAGE_ID_OFFSET, parent_page_id);
        self.write_i32(PAGE_ID_OFFSET, page_id);
    }

    pub fn set_size(&mut self, size: usize) {
        self.write_i32(SIZE_OFFSET, size as i32);
    }

    pub fn set_parent_page_id(&mut self, parent_page_id: PageId) {
        self.write_i32(PARENT_PAGE_ID_OFFSET, parent_page_id);
    }
}
