//! Reference-counted physical frame allocator.
//!
//! Every tracked frame has a 16-bit count: `0` is free, `1` exclusively
//! owned, anything above is shared by that many page-table references.
//! [`USED`] marks frames that are never handed out.

use alloc::vec;
use alloc::vec::Vec;
use kernel_info::layout::MemoryLayout;
use kernel_info::memory::{PAGE_SIZE, USED};
use kernel_memory_addresses::{PhysicalPage, Size4K};
use kernel_vmem::FrameAlloc;

/// Chooses which free frame is handed out next.
pub trait AllocPolicy {
    /// Index of a zero entry in `counts`, or `None` if there is none.
    fn pick(&mut self, counts: &[u16]) -> Option<usize>;
}

/// Hand out the highest free frame first.
#[derive(Debug, Default, Copy, Clone)]
pub struct HighestFree;

/// Hand out the lowest free frame first.
#[derive(Debug, Default, Copy, Clone)]
pub struct LowestFree;

impl AllocPolicy for HighestFree {
    fn pick(&mut self, counts: &[u16]) -> Option<usize> {
        counts.iter().rposition(|c| *c == 0)
    }
}

impl AllocPolicy for LowestFree {
    fn pick(&mut self, counts: &[u16]) -> Option<usize> {
        counts.iter().position(|c| *c == 0)
    }
}

/// Frame usage summary.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FrameStats {
    /// Tracked frames.
    pub total: usize,
    /// Frames with a count of zero.
    pub free: usize,
    /// Frames handed out and still referenced.
    pub used: usize,
    /// Frames reserved at boot.
    pub reserved: usize,
}

pub struct RefCountFrameAlloc<P: AllocPolicy = HighestFree> {
    low_mem: u32,
    high_memory: u32,
    reserved: usize,
    counts: Vec<u16>,
    policy: P,
}

impl RefCountFrameAlloc<HighestFree> {
    #[must_use]
    pub fn new(layout: &MemoryLayout) -> Self {
        Self::with_policy(layout, HighestFree)
    }
}

impl<P: AllocPolicy> RefCountFrameAlloc<P> {
    /// Track `[low_mem, high_memory)`; everything below `main_memory_start`
    /// stays reserved.
    ///
    /// # Panics
    /// If `layout` does not pass [`MemoryLayout::validate`].
    #[must_use]
    pub fn with_policy(layout: &MemoryLayout, policy: P) -> Self {
        if let Err(err) = layout.validate() {
            panic!("invalid memory layout: {err}");
        }

        let reserved = ((layout.main_memory_start - layout.low_mem) / PAGE_SIZE) as usize;
        let mut counts = vec![USED; layout.tracked_frames()];
        counts[reserved..].fill(0);

        log::debug!(
            "{} of {} frames available for paging",
            counts.len() - reserved,
            counts.len()
        );

        Self {
            low_mem: layout.low_mem,
            high_memory: layout.high_memory,
            reserved,
            counts,
            policy,
        }
    }

    #[must_use]
    pub fn stats(&self) -> FrameStats {
        let free = self.counts.iter().filter(|c| **c == 0).count();
        FrameStats {
            total: self.counts.len(),
            free,
            used: self.counts.len() - free - self.reserved,
            reserved: self.reserved,
        }
    }

    /// The frame at `slot` of the count map.
    #[inline]
    fn page(&self, slot: usize) -> PhysicalPage<Size4K> {
        PhysicalPage::from_index(self.low_mem / PAGE_SIZE + slot as u32)
    }

    /// Count-map slot of `page`: `None` below `low_mem`.
    ///
    /// # Panics
    /// At or above `high_memory`.
    fn slot(&self, page: PhysicalPage<Size4K>, operation: &str) -> Option<usize> {
        let addr = page.base().as_u32();
        if addr < self.low_mem {
            return None;
        }
        assert!(
            addr < self.high_memory,
            "trying to {operation} nonexistent page {page}"
        );
        Some(((addr - self.low_mem) / PAGE_SIZE) as usize)
    }

    /// Frames handed out after boot, in map order. Used by the audit.
    pub fn allocated(&self) -> impl Iterator<Item = (PhysicalPage<Size4K>, u16)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .skip(self.reserved)
            .filter(|(_, c)| **c != 0)
            .map(|(slot, c)| (self.page(slot), *c))
    }
}

impl<P: AllocPolicy> FrameAlloc for RefCountFrameAlloc<P> {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        let slot = self.policy.pick(&self.counts)?;
        debug_assert_eq!(self.counts[slot], 0);
        self.counts[slot] = 1;
        let page = self.page(slot);
        log::trace!("alloc {page}");
        Some(page)
    }

    fn retain(&mut self, page: PhysicalPage<Size4K>) {
        let Some(slot) = self.slot(page, "retain") else {
            return;
        };
        let count = &mut self.counts[slot];
        assert_ne!(*count, 0, "trying to retain free page {page}");
        *count = count
            .checked_add(1)
            .unwrap_or_else(|| panic!("reference count overflow on {page}"));
    }

    fn release(&mut self, page: PhysicalPage<Size4K>) {
        let Some(slot) = self.slot(page, "free") else {
            return;
        };
        let count = &mut self.counts[slot];
        assert_ne!(*count, 0, "trying to free free page {page}");
        *count -= 1;
        if *count == 0 {
            log::trace!("free {page}");
        }
    }

    fn manages(&self, page: PhysicalPage<Size4K>) -> bool {
        (self.low_mem..self.high_memory).contains(&page.base().as_u32())
    }

    fn ref_count(&self, page: PhysicalPage<Size4K>) -> Option<u16> {
        if self.manages(page) {
            self.slot(page, "count").map(|slot| self.counts[slot])
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 1 MiB of tracked memory, the first 64 KiB reserved.
    fn layout() -> MemoryLayout {
        MemoryLayout::new(0x0020_0000).with_main_memory_start(0x0011_0000)
    }

    #[test]
    fn boot_reservation() {
        let frames = RefCountFrameAlloc::new(&layout());
        let stats = frames.stats();
        assert_eq!(stats.total, 256);
        assert_eq!(stats.reserved, 16);
        assert_eq!(stats.free, 240);
        assert_eq!(stats.used, 0);
        assert_eq!(frames.ref_count(PhysicalPage::from_index(0x100)), Some(USED));
        assert_eq!(frames.ref_count(PhysicalPage::from_index(0x110)), Some(0));
    }

    #[test]
    fn policies_pick_from_either_end() {
        let mut high = RefCountFrameAlloc::new(&layout());
        assert_eq!(high.alloc_4k(), Some(PhysicalPage::from_index(0x1FF)));
        assert_eq!(high.alloc_4k(), Some(PhysicalPage::from_index(0x1FE)));

        let mut low = RefCountFrameAlloc::with_policy(&layout(), LowestFree);
        assert_eq!(low.alloc_4k(), Some(PhysicalPage::from_index(0x110)));
        assert_eq!(low.alloc_4k(), Some(PhysicalPage::from_index(0x111)));
    }

    #[test]
    fn shared_frame_is_freed_by_last_release() {
        let mut frames = RefCountFrameAlloc::new(&layout());
        let page = frames.alloc_4k().unwrap();
        frames.retain(page);
        frames.retain(page);
        assert_eq!(frames.ref_count(page), Some(3));
        assert_eq!(frames.allocated().collect::<Vec<_>>(), vec![(page, 3)]);

        frames.release(page);
        frames.release(page);
        assert_eq!(frames.stats().used, 1);
        frames.release(page);
        assert_eq!(frames.stats().used, 0);

        // Freed frames are handed out again.
        assert_eq!(frames.alloc_4k(), Some(page));
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut frames = RefCountFrameAlloc::new(&layout());
        for _ in 0..240 {
            assert!(frames.alloc_4k().is_some());
        }
        assert_eq!(frames.alloc_4k(), None);
        assert_eq!(frames.stats().free, 0);
    }

    #[test]
    fn kernel_frames_are_not_counted() {
        let mut frames = RefCountFrameAlloc::new(&layout());
        let kernel = PhysicalPage::from_index(0x10);
        assert!(!frames.manages(kernel));
        frames.retain(kernel);
        frames.release(kernel);
        frames.release(kernel);
        assert_eq!(frames.ref_count(kernel), None);
        assert_eq!(frames.stats().used, 0);
    }

    #[test]
    #[should_panic(expected = "trying to free free page")]
    fn double_release_panics() {
        let mut frames = RefCountFrameAlloc::new(&layout());
        let page = frames.alloc_4k().unwrap();
        frames.release(page);
        frames.release(page);
    }

    #[test]
    #[should_panic(expected = "nonexistent page")]
    fn release_above_high_memory_panics() {
        let mut frames = RefCountFrameAlloc::new(&layout());
        frames.release(PhysicalPage::from_index(0x200));
    }

    #[test]
    #[should_panic(expected = "trying to retain free page")]
    fn retain_of_free_frame_panics() {
        let mut frames = RefCountFrameAlloc::new(&layout());
        frames.retain(PhysicalPage::from_index(0x150));
    }

    #[test]
    fn counts_go_past_one_byte() {
        let mut frames = RefCountFrameAlloc::new(&layout());
        let page = frames.alloc_4k().unwrap();
        for _ in 0..300 {
            frames.retain(page);
        }
        assert_eq!(frames.ref_count(page), Some(301));
        for _ in 0..300 {
            frames.release(page);
        }
        assert_eq!(frames.ref_count(page), Some(1));
    }

    #[test]
    #[should_panic(expected = "reference count overflow")]
    fn count_overflow_panics() {
        let mut frames = RefCountFrameAlloc::new(&layout());
        let page = frames.alloc_4k().unwrap();
        for _ in 0..u16::MAX {
            frames.retain(page);
        }
    }

    #[test]
    #[should_panic(expected = "invalid memory layout")]
    fn unordered_layout_is_rejected() {
        let layout = MemoryLayout::new(0x0020_0000).with_main_memory_start(0x0030_0000);
        let _ = RefCountFrameAlloc::new(&layout);
    }
}
