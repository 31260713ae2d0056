use std::fmt::Debug;

pub type FrameId = usize;

/// Eviction policy seam for the page cache. The cache tells the policy
/// which frames are pinned; the policy picks victims among the rest.
pub trait Replacer: Send + Debug {
    /// Select a frame to reuse. Returns None when every frame is pinned.
    fn evict(&mut self) -> Option<FrameId>;

    /// Mark a frame as pinned (not evictable).
    fn pin(&mut self, frame_id: FrameId);

    /// Mark a frame as unpinned (evictable).
    fn unpin(&mut self, frame_id: FrameId);

    /// Number of evictable frames.
    fn size(&self) -> usize;
}
