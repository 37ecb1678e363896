use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{PageId, PAGE_SIZE};

// Directory page layout (page 0):
// - record_count: u32 (0)
// - records: fixed 36-byte slots of (name: 32 bytes zero-padded, root_page_id: i32)
const RECORD_COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;
const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4;
const MAX_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

/// View of the directory page mapping index names to their root page ids.
pub struct HeaderPage<B> {
    buf: B,
}

impl<B: AsRef<[u8]>> HeaderPage<B> {
    pub fn attach(buf: B) -> Self {
        Self { buf }
    }

    pub fn record_count(&self) -> usize {
        LittleEndian::read_u32(&self.buf.as_ref()[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4])
            as usize
    }

    fn record_offset(index: usize) -> usize {
        RECORDS_OFFSET + index * RECORD_SIZE
    }

    fn name_at(&self, index: usize) -> &[u8] {
        let offset = Self::record_offset(index);
        let name = &self.buf.as_ref()[offset..offset + NAME_SIZE];
        let end = name.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE);
        &name[..end]
    }

    fn find(&self, name: &str) -> Option<usize> {
        (0..self.record_count()).find(|&i| self.name_at(i) == name.as_bytes())
    }

    /// Root page id recorded for `name`, if the index exists.
    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        self.find(name).map(|index| {
            let offset = Self::record_offset(index) + NAME_SIZE;
            LittleEndian::read_i32(&self.buf.as_ref()[offset..offset + 4])
        })
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> HeaderPage<B> {
    fn set_record_count(&mut self, count: usize) {
        LittleEndian::write_u32(
            &mut self.buf.as_mut()[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4],
            count as u32,
        );
    }

    fn write_record(&mut self, index: usize, name: &str, root_page_id: PageId) {
        let offset = Self::record_offset(index);
        let buf = self.buf.as_mut();
        buf[offset..offset + NAME_SIZE].fill(0);
        buf[offset..offset + name.len()].copy_from_slice(name.as_bytes());
        LittleEndian::write_i32(
            &mut buf[offset + NAME_SIZE..offset + NAME_SIZE + 4],
            root_page_id,
        );
    }

    /// Add a record for a new index. Fails if the name is taken, too long,
    /// or the directory is full.
    pub fn insert_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        if name.len() > NAME_SIZE || name.is_empty() {
            return false;
        }
        let count = self.record_count();
        if count >= MAX_RECORDS || self.find(name).is_some() {
            return false;
        }
        self.write_record(count, name, root_page_id);
        self.set_record_count(count + 1);
        true
    }

    /// Update the root page id of an existing index.
    pub fn update_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        match self.find(name) {
            Some(index) => {
                let offset = Self::record_offset(index) + NAME_SIZE;
                LittleEndian::write_i32(&mut self.buf.as_mut()[offset..offset + 4], root_page_id);
                true
            }
            None => false,
        }
    }

    /// Drop an index's record, compacting the directory.
    pub fn delete_record(&mut self, name: &str) -> bool {
        let Some(index) = self.find(name) else {
            return false;
        };
        let count = self.record_count();
        let src = Self::record_offset(index + 1);
        let end = Self::record_offset(count);
        self.buf.as_mut().copy_within(src..end, Self::record_offset(index));
        self.set_record_count(count - 1);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_update_delete() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::attach(&mut data[..]);

        assert!(header.insert_record("orders_pk", 3));
        assert!(header.insert_record("users_pk", 9));
        assert!(!header.insert_record("orders_pk", 4));

        assert_eq!(header.get_root_id("orders_pk"), Some(3));
        assert_eq!(header.get_root_id("missing"), None);

        assert!(header.update_record("orders_pk", 12));
        assert_eq!(header.get_root_id("orders_pk"), Some(12));
        assert!(!header.update_record("missing", 1));

        assert!(header.delete_record("orders_pk"));
        assert_eq!(header.get_root_id("orders_pk"), None);
        assert_eq!(header.get_root_id("users_pk"), Some(9));
        assert_eq!(header.record_count(), 1);
    }

    #[test]
    fn test_rejects_oversized_names() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::attach(&mut data[..]);
        let long_name = "x".repeat(NAME_SIZE + 1);
        assert!(!header.insert_record(&long_name, 1));
        assert!(!header.insert_record("", 1));
    }
}
