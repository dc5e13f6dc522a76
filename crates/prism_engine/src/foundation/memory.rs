//! Tagged allocation tracking for GPU-side memory
//!
//! The backend reports every device-memory allocation it makes through an
//! [`AllocationTracker`] so usage can be broken down by category. The tracker
//! is an explicitly constructed context passed by reference; tags live in a
//! side table keyed by an opaque id rather than in bytes around the
//! allocation itself.

use std::collections::HashMap;

/// Usage category attached to each tracked allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryTag {
    /// Allocations with no more specific category
    Unknown,
    /// Core renderer objects (sync primitives, command storage)
    Renderer,
    /// Vertex/index/uniform buffer memory
    GpuBuffer,
    /// Image and sampler memory
    GpuTexture,
    /// Shader pipelines and descriptor storage
    Shader,
    /// CPU-side resource payloads (pixel data, config blobs)
    Resource,
}

impl MemoryTag {
    const ALL: [MemoryTag; 6] = [
        MemoryTag::Unknown,
        MemoryTag::Renderer,
        MemoryTag::GpuBuffer,
        MemoryTag::GpuTexture,
        MemoryTag::Shader,
        MemoryTag::Resource,
    ];

    fn label(self) -> &'static str {
        match self {
            MemoryTag::Unknown => "unknown",
            MemoryTag::Renderer => "renderer",
            MemoryTag::GpuBuffer => "gpu_buffer",
            MemoryTag::GpuTexture => "gpu_texture",
            MemoryTag::Shader => "shader",
            MemoryTag::Resource => "resource",
        }
    }
}

/// Opaque handle identifying one tracked allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocationId(u64);

/// Per-tag accounting of live allocations
///
/// Releasing with a tag that does not match the recorded one is a caller
/// contract violation; it is logged and the recorded tag wins.
#[derive(Debug, Default)]
pub struct AllocationTracker {
    live: HashMap<AllocationId, (MemoryTag, u64)>,
    in_use: HashMap<MemoryTag, u64>,
    next_id: u64,
}

impl AllocationTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new allocation of `size` bytes under `tag`
    pub fn track(&mut self, size: u64, tag: MemoryTag) -> AllocationId {
        let id = AllocationId(self.next_id);
        self.next_id += 1;
        self.live.insert(id, (tag, size));
        *self.in_use.entry(tag).or_insert(0) += size;
        id
    }

    /// Release a previously tracked allocation
    pub fn release(&mut self, id: AllocationId, tag: MemoryTag) {
        match self.live.remove(&id) {
            Some((recorded_tag, size)) => {
                if recorded_tag != tag {
                    log::warn!(
                        "Allocation {:?} released as {} but was tracked as {}",
                        id,
                        tag.label(),
                        recorded_tag.label()
                    );
                }
                if let Some(total) = self.in_use.get_mut(&recorded_tag) {
                    *total = total.saturating_sub(size);
                }
            }
            None => {
                log::warn!("Release of untracked allocation {id:?} ({})", tag.label());
            }
        }
    }

    /// Bytes currently live under `tag`
    pub fn in_use(&self, tag: MemoryTag) -> u64 {
        self.in_use.get(&tag).copied().unwrap_or(0)
    }

    /// Total bytes currently live across all tags
    pub fn total_in_use(&self) -> u64 {
        self.in_use.values().sum()
    }

    /// Number of live allocations
    pub fn allocation_count(&self) -> usize {
        self.live.len()
    }

    /// Log the per-tag usage table at debug level
    pub fn report(&self) {
        log::debug!("GPU memory in use ({} allocations):", self.live.len());
        for tag in MemoryTag::ALL {
            let bytes = self.in_use(tag);
            if bytes > 0 {
                log::debug!("  {:<12} {} bytes", tag.label(), bytes);
            }
        }
    }
}

impl Drop for AllocationTracker {
    fn drop(&mut self) {
        if !self.live.is_empty() {
            log::warn!(
                "AllocationTracker dropped with {} live allocations ({} bytes)",
                self.live.len(),
                self.total_in_use()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_and_release_balances_to_zero() {
        let mut tracker = AllocationTracker::new();
        let a = tracker.track(256, MemoryTag::GpuBuffer);
        let b = tracker.track(1024, MemoryTag::GpuTexture);

        assert_eq!(tracker.in_use(MemoryTag::GpuBuffer), 256);
        assert_eq!(tracker.in_use(MemoryTag::GpuTexture), 1024);
        assert_eq!(tracker.total_in_use(), 1280);

        tracker.release(a, MemoryTag::GpuBuffer);
        tracker.release(b, MemoryTag::GpuTexture);
        assert_eq!(tracker.total_in_use(), 0);
        assert_eq!(tracker.allocation_count(), 0);
    }

    #[test]
    fn test_mismatched_tag_release_uses_recorded_tag() {
        let mut tracker = AllocationTracker::new();
        let id = tracker.track(64, MemoryTag::Shader);
        tracker.release(id, MemoryTag::GpuBuffer);
        assert_eq!(tracker.in_use(MemoryTag::Shader), 0);
        assert_eq!(tracker.in_use(MemoryTag::GpuBuffer), 0);
    }

    #[test]
    fn test_release_of_unknown_id_is_ignored() {
        let mut tracker = AllocationTracker::new();
        let id = tracker.track(64, MemoryTag::Renderer);
        tracker.release(id, MemoryTag::Renderer);
        tracker.release(id, MemoryTag::Renderer);
        assert_eq!(tracker.total_in_use(), 0);
    }

    #[test]
    fn test_same_tag_accumulates() {
        let mut tracker = AllocationTracker::new();
        tracker.track(100, MemoryTag::GpuBuffer);
        tracker.track(200, MemoryTag::GpuBuffer);
        assert_eq!(tracker.in_use(MemoryTag::GpuBuffer), 300);
        assert_eq!(tracker.allocation_count(), 2);
    }
}
