pub mod lru;
pub mod replacer;

use crate::storage::disk::{BlockFile, PageId};
use crate::storage::error::{StorageError, StorageResult};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use replacer::{FrameId, Replacer};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

struct Frame {
    data: Box<[u8]>,
    page_id: Option<PageId>,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
}

impl Frame {
    fn new(block_size: usize) -> Self {
        Self {
            data: vec![0u8; block_size].into_boxed_slice(),
            page_id: None,
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }

    fn reset(&mut self) {
        self.page_id = None;
        self.pin_count.store(0, Ordering::SeqCst);
        self.is_dirty.store(false, Ordering::SeqCst);
        self.data.fill(0);
    }
}

/// Fixed-capacity page cache over a [`BlockFile`].
///
/// The cache is the page supplier for the leaf layer: it hands out guards
/// that deref to the raw block bytes, pins the underlying frame for the
/// guard's lifetime, and marks the frame dirty whenever a write guard is
/// taken. Dirty frames are written back on eviction and on flush.
/// Exclusion between readers and writers of one page is the caller's
/// responsibility, the same way it is for the leaf routines themselves.
#[derive(Clone)]
pub struct PageCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    frames: RwLock<Vec<Frame>>,
    free_frames: Mutex<Vec<FrameId>>,
    page_table: DashMap<PageId, FrameId>,
    replacer: Mutex<Box<dyn Replacer>>,
    disk: Mutex<BlockFile>,
    block_size: usize,
}

impl CacheInner {
    fn unpin_frame(&self, frame_id: FrameId) {
        let frames = self.frames.read();
        let frame = &frames[frame_id];
        if frame.pin_count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.replacer.lock().unpin(frame_id);
        }
    }
}

impl PageCache {
    pub fn new(disk: BlockFile, replacer: Box<dyn Replacer>, capacity: usize) -> Self {
        let block_size = disk.block_size();
        let frames = (0..capacity).map(|_| Frame::new(block_size)).collect();
        Self {
            inner: Arc::new(CacheInner {
                frames: RwLock::new(frames),
                free_frames: Mutex::new((0..capacity).collect()),
                page_table: DashMap::new(),
                replacer: Mutex::new(replacer),
                disk: Mutex::new(disk),
                block_size,
            }),
        }
    }

    pub fn block_size(&self) -> usize {
        self.inner.block_size
    }

    pub fn fetch_page(&self, page_id: PageId) -> StorageResult<PageReadGuard> {
        let frame_id = match self.lookup_frame(page_id, false) {
            Some(frame_id) => frame_id,
            None => self.load_page(page_id, false)?,
        };
        let frames = self.inner.frames.read();
        Ok(PageReadGuard {
            inner: self.inner.clone(),
            frame_id,
            data: frames[frame_id].data.as_ptr(),
            len: self.inner.block_size,
        })
    }

    pub fn fetch_page_write(&self, page_id: PageId) -> StorageResult<PageWriteGuard> {
        let frame_id = match self.lookup_frame(page_id, true) {
            Some(frame_id) => frame_id,
            None => self.load_page(page_id, true)?,
        };
        let frames = self.inner.frames.read();
        Ok(PageWriteGuard {
            inner: self.inner.clone(),
            frame_id,
            data: frames[frame_id].data.as_ptr() as *mut u8,
            len: self.inner.block_size,
        })
    }

    /// Allocate a fresh block and pin it as a zeroed, dirty frame. This is
    /// what the leaf layer's `init` and `split_into` are handed.
    pub fn new_page(&self) -> StorageResult<(PageId, PageWriteGuard)> {
        let page_id = self.inner.disk.lock().allocate_block()?;
        let frame_id = self.take_frame()?;
        {
            let mut frames = self.inner.frames.write();
            let frame = &mut frames[frame_id];
            frame.page_id = Some(page_id);
            frame.pin_count.store(1, Ordering::SeqCst);
            frame.is_dirty.store(true, Ordering::SeqCst);
        }
        self.inner.page_table.insert(page_id, frame_id);
        self.inner.replacer.lock().pin(frame_id);
        trace!(page = page_id.0, frame = frame_id, "new page");

        let frames = self.inner.frames.read();
        Ok((
            page_id,
            PageWriteGuard {
                inner: self.inner.clone(),
                frame_id,
                data: frames[frame_id].data.as_ptr() as *mut u8,
                len: self.inner.block_size,
            },
        ))
    }

    /// Write a cached page back to disk if it is dirty.
    pub fn flush_page(&self, page_id: PageId) -> StorageResult<()> {
        if let Some(frame_id) = self.inner.page_table.get(&page_id).map(|e| *e.value()) {
            let frames = self.inner.frames.read();
            let frame = &frames[frame_id];
            if frame.is_dirty.swap(false, Ordering::SeqCst) {
                trace!(page = page_id.0, "flushing page");
                self.inner.disk.lock().write_block(page_id, &frame.data)?;
            }
        }
        Ok(())
    }

    /// Flush every dirty frame and sync the underlying file.
    pub fn flush_all(&self) -> StorageResult<()> {
        let pages: Vec<PageId> = self.inner.page_table.iter().map(|e| *e.key()).collect();
        for page_id in pages {
            self.flush_page(page_id)?;
        }
        self.inner.disk.lock().sync()?;
        Ok(())
    }

    /// Drop a page the tree driver no longer needs, such as the emptied
    /// left sibling after a merge. The page must be unpinned; its block
    /// goes back to the free list.
    pub fn free_page(&self, page_id: PageId) -> StorageResult<()> {
        if let Some((_, frame_id)) = self.inner.page_table.remove(&page_id) {
            {
                let frames = self.inner.frames.read();
                if frames[frame_id].pin_count.load(Ordering::SeqCst) != 0 {
                    self.inner.page_table.insert(page_id, frame_id);
                    return Err(StorageError::PagePinned(page_id));
                }
            }
            self.inner.replacer.lock().pin(frame_id);
            self.inner.frames.write()[frame_id].reset();
            self.inner.free_frames.lock().push(frame_id);
        }
        debug!(page = page_id.0, "freed page");
        self.inner.disk.lock().free_block(page_id);
        Ok(())
    }

    /// Pin an already-cached page, marking it dirty for writers.
    fn lookup_frame(&self, page_id: PageId, dirty: bool) -> Option<FrameId> {
        let frame_id = self.inner.page_table.get(&page_id).map(|e| *e.value())?;
        {
            let frames = self.inner.frames.read();
            let frame = &frames[frame_id];
            frame.pin_count.fetch_add(1, Ordering::SeqCst);
            if dirty {
                frame.is_dirty.store(true, Ordering::SeqCst);
            }
        }
        self.inner.replacer.lock().pin(frame_id);
        trace!(page = page_id.0, frame = frame_id, "cache hit");
        Some(frame_id)
    }

    fn load_page(&self, page_id: PageId, dirty: bool) -> StorageResult<FrameId> {
        let frame_id = self.take_frame()?;
        {
            let mut frames = self.inner.frames.write();
            let frame = &mut frames[frame_id];
            if let Err(err) = self.inner.disk.lock().read_block(page_id, &mut frame.data) {
                frame.reset();
                drop(frames);
                self.inner.free_frames.lock().push(frame_id);
                return Err(err);
            }
            frame.page_id = Some(page_id);
            frame.pin_count.store(1, Ordering::SeqCst);
            frame.is_dirty.store(dirty, Ordering::SeqCst);
        }
        self.inner.page_table.insert(page_id, frame_id);
        self.inner.replacer.lock().pin(frame_id);
        trace!(page = page_id.0, frame = frame_id, "loaded page from disk");
        Ok(frame_id)
    }

    /// A free frame, or an evicted one with its old contents written back.
    fn take_frame(&self) -> StorageResult<FrameId> {
        if let Some(frame_id) = self.inner.free_frames.lock().pop() {
            return Ok(frame_id);
        }

        let frame_id = self
            .inner
            .replacer
            .lock()
            .evict()
            .ok_or(StorageError::CacheFull)?;
        let mut frames = self.inner.frames.write();
        let frame = &mut frames[frame_id];
        if let Some(old_page) = frame.page_id {
            self.inner.page_table.remove(&old_page);
            if frame.is_dirty.load(Ordering::SeqCst) {
                trace!(page = old_page.0, frame = frame_id, "writing back dirty frame");
                self.inner.disk.lock().write_block(old_page, &frame.data)?;
            }
        }
        frame.reset();
        Ok(frame_id)
    }
}

pub struct PageReadGuard {
    inner: Arc<CacheInner>,
    frame_id: FrameId,
    data: *const u8,
    len: usize,
}

impl Deref for PageReadGuard {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: the pin taken at construction keeps the frame from being
        // evicted or reset, and the boxed block bytes never move.
        unsafe { std::slice::from_raw_parts(self.data, self.len) }
    }
}

impl Drop for PageReadGuard {
    fn drop(&mut self) {
        self.inner.unpin_frame(self.frame_id);
    }
}

pub struct PageWriteGuard {
    inner: Arc<CacheInner>,
    frame_id: FrameId,
    data: *mut u8,
    len: usize,
}

impl std::fmt::Debug for PageWriteGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageWriteGuard")
            .field("frame_id", &self.frame_id)
            .field("len", &self.len)
            .finish()
    }
}

impl Deref for PageWriteGuard {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: see PageReadGuard::deref.
        unsafe { std::slice::from_raw_parts(self.data, self.len) }
    }
}

impl DerefMut for PageWriteGuard {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: the pin keeps the frame alive; the caller holds the
        // exclusive latch on the page, per the leaf layer's contract.
        unsafe { std::slice::from_raw_parts_mut(self.data, self.len) }
    }
}

impl Drop for PageWriteGuard {
    fn drop(&mut self) {
        self.inner.unpin_frame(self.frame_id);
    }
}
