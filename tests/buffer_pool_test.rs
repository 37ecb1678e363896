use anyhow::Result;

use karstdb::common::types::PageId;
use karstdb::storage::buffer::BufferPoolError;

mod common;
use common::create_test_buffer_pool;

#[test]
fn test_new_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page, page_id) = buffer_pool.new_page()?;

    // Page 0 is reserved for the index directory
    assert!(page_id > 0);
    {
        let page_guard = page.read();
        assert_eq!(page_guard.page_id, page_id);
        assert!(page_guard.data.iter().all(|&b| b == 0));
    }
    assert_eq!(buffer_pool.pin_count(page_id), Some(1));

    assert!(buffer_pool.unpin_page(page_id, false));
    Ok(())
}

#[test]
fn test_fetch_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (_, page_id) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(page_id, false);

    let fetched = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = fetched.read();
        assert_eq!(page_guard.page_id, page_id);
    }
    assert_eq!(buffer_pool.pin_count(page_id), Some(1));

    buffer_pool.unpin_page(page_id, false);
    Ok(())
}

#[test]
fn test_page_modification_survives_eviction() -> Result<()> {
    // Pool of 3 frames, 5 pages: fetching old pages must re-read the
    // bytes written when they were unpinned dirty.
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let mut page_ids: Vec<PageId> = Vec::new();
    for i in 0..5u8 {
        let (page, page_id) = buffer_pool.new_page()?;
        {
            let mut page_guard = page.write();
            page_guard.data[0..4].fill(i + 1);
        }
        buffer_pool.unpin_page(page_id, true);
        page_ids.push(page_id);
    }

    for (i, &page_id) in page_ids.iter().enumerate() {
        let page = buffer_pool.fetch_page(page_id)?;
        {
            let page_guard = page.read();
            assert_eq!(page_guard.page_id, page_id);
            assert!(page_guard.data[0..4].iter().all(|&b| b == i as u8 + 1));
        }
        buffer_pool.unpin_page(page_id, false);
    }
    Ok(())
}

#[test]
fn test_fetch_fails_when_all_frames_pinned() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let mut pinned = Vec::new();
    for _ in 0..3 {
        pinned.push(buffer_pool.new_page()?);
    }

    assert!(matches!(
        buffer_pool.new_page(),
        Err(BufferPoolError::BufferPoolFull)
    ));

    // Releasing one frame makes allocation possible again.
    let (_, page_id) = pinned.pop().unwrap();
    buffer_pool.unpin_page(page_id, false);
    assert!(buffer_pool.new_page().is_ok());
    Ok(())
}

#[test]
fn test_unpin_semantics() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    // Unpinning a page that was never resident is fine.
    assert!(buffer_pool.unpin_page(12345, false));

    let (_, page_id) = buffer_pool.new_page()?;
    assert!(buffer_pool.unpin_page(page_id, false));
    // The pin is gone; a second unpin is a caller bug.
    assert!(!buffer_pool.unpin_page(page_id, false));
    Ok(())
}

#[test]
fn test_dirty_flag_is_sticky() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let (page, page_id) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        page_guard.data[100] = 42;
    }
    // Pin twice, unpin once dirty and once clean: the dirty bit must
    // survive the clean unpin.
    buffer_pool.fetch_page(page_id)?;
    buffer_pool.unpin_page(page_id, true);
    buffer_pool.unpin_page(page_id, false);

    // Force the page out and back in.
    for _ in 0..3 {
        let (_, id) = buffer_pool.new_page()?;
        buffer_pool.unpin_page(id, false);
    }
    let page = buffer_pool.fetch_page(page_id)?;
    assert_eq!(page.read().data[100], 42);
    buffer_pool.unpin_page(page_id, false);
    Ok(())
}

#[test]
fn test_flush_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    assert!(!buffer_pool.flush_page(999)?);

    let (page, page_id) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        page_guard.data[10..20].fill(7);
    }
    buffer_pool.unpin_page(page_id, true);

    assert!(buffer_pool.flush_page(page_id)?);
    // Flushing again with no writes in between is a no-op rewrite of the
    // same bytes.
    assert!(buffer_pool.flush_page(page_id)?);

    let fetched = buffer_pool.fetch_page(page_id)?;
    assert!(fetched.read().data[10..20].iter().all(|&b| b == 7));
    buffer_pool.unpin_page(page_id, false);
    Ok(())
}

#[test]
fn test_flush_all_pages() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let mut page_ids = Vec::new();
    for i in 0..5u8 {
        let (page, page_id) = buffer_pool.new_page()?;
        page.write().data[0] = i;
        buffer_pool.unpin_page(page_id, true);
        page_ids.push(page_id);
    }

    buffer_pool.flush_all_pages()?;

    for (i, &page_id) in page_ids.iter().enumerate() {
        let page = buffer_pool.fetch_page(page_id)?;
        assert_eq!(page.read().data[0], i as u8);
        buffer_pool.unpin_page(page_id, false);
    }
    Ok(())
}

#[test]
fn test_delete_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    // Deleting a page that is not resident succeeds.
    assert!(buffer_pool.delete_page(999)?);

    let (_, page_id) = buffer_pool.new_page()?;
    // Pinned pages cannot be deleted.
    assert!(!buffer_pool.delete_page(page_id)?);

    buffer_pool.unpin_page(page_id, true);
    assert!(buffer_pool.delete_page(page_id)?);
    assert_eq!(buffer_pool.pin_count(page_id), None);
    Ok(())
}
