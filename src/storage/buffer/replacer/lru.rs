use linked_hash_map::LinkedHashMap;
use parking_lot::Mutex;

use crate::common::types::FrameId;

/// LRU page replacement policy over unpinned frames.
///
/// The map keeps frames in unpin order: the front is the least recently
/// unpinned frame, the back the most recent. All operations are O(1).
pub struct LruReplacer {
    lru_list: Mutex<LinkedHashMap<FrameId, ()>>,
}

impl LruReplacer {
    pub fn new(pool_size: usize) -> Self {
        Self {
            lru_list: Mutex::new(LinkedHashMap::with_capacity(pool_size)),
        }
    }

    /// Remove and return the least recently unpinned frame, if any.
    pub fn victim(&self) -> Option<FrameId> {
        self.lru_list.lock().pop_front().map(|(frame_id, ())| frame_id)
    }

    /// A frame became pinned: it is no longer an eviction candidate.
    /// No effect if the frame is not tracked.
    pub fn pin(&self, frame_id: FrameId) {
        self.lru_list.lock().remove(&frame_id);
    }

    /// A frame's pin count dropped to zero: it becomes the most recently
    /// unpinned candidate. No effect if the frame is already tracked.
    pub fn unpin(&self, frame_id: FrameId) {
        let mut list = self.lru_list.lock();
        if !list.contains_key(&frame_id) {
            list.insert(frame_id, ());
        }
    }

    pub fn len(&self) -> usize {
        self.lru_list.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lru_list.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_victim_order_is_least_recently_unpinned() {
        let replacer = LruReplacer::new(7);
        replacer.unpin(1);
        replacer.unpin(2);
        replacer.unpin(3);

        assert_eq!(replacer.victim(), Some(1));
        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), Some(3));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_pin_removes_candidate() {
        let replacer = LruReplacer::new(7);
        replacer.unpin(1);
        replacer.unpin(2);
        replacer.pin(1);

        assert_eq!(replacer.len(), 1);
        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_unpin_is_idempotent() {
        let replacer = LruReplacer::new(7);
        replacer.unpin(5);
        replacer.unpin(6);
        // Re-unpinning must not refresh the frame's position.
        replacer.unpin(5);

        assert_eq!(replacer.len(), 2);
        assert_eq!(replacer.victim(), Some(5));
    }

    #[test]
    fn test_pin_absent_frame_is_noop() {
        let replacer = LruReplacer::new(3);
        replacer.pin(2);
        assert_eq!(replacer.len(), 0);
        assert_eq!(replacer.victim(), None);
    }
}
