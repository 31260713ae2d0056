use super::replacer::{FrameId, Replacer};
use std::collections::HashMap;

/// Least-recently-used eviction. Every frame is stamped with a logical
/// clock when it becomes evictable; the victim is the oldest stamp.
#[derive(Debug, Default)]
pub struct LruReplacer {
    clock: u64,
    unpinned: HashMap<FrameId, u64>,
}

impl LruReplacer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Replacer for LruReplacer {
    fn evict(&mut self) -> Option<FrameId> {
        let frame_id = self
            .unpinned
            .iter()
            .min_by_key(|entry| *entry.1)
            .map(|entry| *entry.0)?;
        self.unpinned.remove(&frame_id);
        Some(frame_id)
    }

    fn pin(&mut self, frame_id: FrameId) {
        self.unpinned.remove(&frame_id);
    }

    fn unpin(&mut self, frame_id: FrameId) {
        self.clock += 1;
        let stamp = self.clock;
        // A frame unpinned twice keeps its original stamp.
        self.unpinned.entry(frame_id).or_insert(stamp);
    }

    fn size(&self) -> usize {
        self.unpinned.len()
    }
}
