//! # Identity-mapped Physical Memory
//!
//! The kernel runs with physical memory identity mapped, so a frame number
//! is all it takes to reach a frame's bytes. [`PhysicalMemory`] models that
//! RAM as an arena of 4 KiB-aligned frames indexed by frame number and
//! implements [`PhysMapper`] and [`Tlb`] on top of it.
//!
//! Page directories and page tables are reinterpretations of the same frames
//! that hold user data; nothing but the caller's bookkeeping distinguishes a
//! table frame from a data frame.
//!
//! ## Example
//! ```rust
//! use kernel_alloc::phys_mapper::PhysicalMemory;
//! use kernel_memory_addresses::PhysicalPage;
//! use kernel_vmem::{PhysMapper, PtEntry, TableIndex};
//!
//! let mut ram = PhysicalMemory::new(0x0020_0000);
//! let frame = PhysicalPage::from_index(0x120);
//! ram.table_mut(frame).set(TableIndex::new(1), PtEntry::from_raw(0x0013_0007));
//! assert_eq!(&ram.frame(frame)[4..8], &[0x07, 0x00, 0x13, 0x00]);
//! ```

use alloc::vec;
use alloc::vec::Vec;
use kernel_info::memory::{PAGE_BYTES, PAGE_SIZE};
use kernel_memory_addresses::{PhysicalPage, Size4K};
use kernel_vmem::{FrameBytes, PageDirectory, PageTable, PhysMapper, Tlb};

/// One page frame of RAM.
#[repr(C, align(4096))]
#[derive(Clone)]
struct Frame(FrameBytes);

const _: () = {
    assert!(size_of::<Frame>() == PAGE_BYTES);
    assert!(size_of::<PageTable>() == size_of::<Frame>());
    assert!(size_of::<PageDirectory>() == size_of::<Frame>());
    assert!(align_of::<PageTable>() <= align_of::<Frame>());
    assert!(align_of::<PageDirectory>() <= align_of::<Frame>());
};

/// Physical RAM from address zero up to `high_memory`.
pub struct PhysicalMemory {
    frames: Vec<Frame>,
    flushes: u64,
}

impl PhysicalMemory {
    /// Zero-filled RAM of `high_memory` bytes (rounded down to whole frames).
    #[must_use]
    pub fn new(high_memory: u32) -> Self {
        let count = (high_memory / PAGE_SIZE) as usize;
        Self {
            frames: vec![Frame([0; PAGE_BYTES]); count],
            flushes: 0,
        }
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Number of full translation-cache flushes issued so far.
    #[must_use]
    pub const fn flush_count(&self) -> u64 {
        self.flushes
    }

    fn slot(&self, page: PhysicalPage<Size4K>) -> &Frame {
        self.frames
            .get(page.index() as usize)
            .unwrap_or_else(|| panic!("frame {page} is outside physical memory"))
    }

    fn slot_mut(&mut self, page: PhysicalPage<Size4K>) -> &mut Frame {
        self.frames
            .get_mut(page.index() as usize)
            .unwrap_or_else(|| panic!("frame {page} is outside physical memory"))
    }

    /// View a frame as a paging structure.
    ///
    /// ### Safety (internal)
    /// `T` must be one of the 4 KiB paging structures: the asserts above pin
    /// their size and alignment to a frame's, and every bit pattern is a
    /// valid (possibly non-present) entry.
    fn view<T>(&self, page: PhysicalPage<Size4K>) -> &T {
        let frame = self.slot(page);
        // SAFETY: see above; the shared borrow of the frame is carried over.
        unsafe { &*core::ptr::from_ref(frame).cast::<T>() }
    }

    fn view_mut<T>(&mut self, page: PhysicalPage<Size4K>) -> &mut T {
        let frame = self.slot_mut(page);
        // SAFETY: see `view`; the exclusive borrow of the frame is carried over.
        unsafe { &mut *core::ptr::from_mut(frame).cast::<T>() }
    }
}

impl PhysMapper for PhysicalMemory {
    fn frame(&self, page: PhysicalPage<Size4K>) -> &FrameBytes {
        &self.slot(page).0
    }

    fn frame_mut(&mut self, page: PhysicalPage<Size4K>) -> &mut FrameBytes {
        &mut self.slot_mut(page).0
    }

    fn table(&self, page: PhysicalPage<Size4K>) -> &PageTable {
        self.view(page)
    }

    fn table_mut(&mut self, page: PhysicalPage<Size4K>) -> &mut PageTable {
        self.view_mut(page)
    }

    fn directory(&self, page: PhysicalPage<Size4K>) -> &PageDirectory {
        self.view(page)
    }

    fn directory_mut(&mut self, page: PhysicalPage<Size4K>) -> &mut PageDirectory {
        self.view_mut(page)
    }

    fn copy_frame(&mut self, from: PhysicalPage<Size4K>, to: PhysicalPage<Size4K>) {
        let (from, to) = (from.index() as usize, to.index() as usize);
        if from != to {
            let source = self.frames[from].0;
            self.frames[to].0 = source;
        }
    }
}

impl Tlb for PhysicalMemory {
    fn flush_all(&mut self) {
        self.flushes += 1;
    }
}
