//! # Virtual Memory Support
//!
//! Two-level i386 paging structures and the per-process address-space
//! operations built on top of them.
//!
//! ## What you get
//! - An [`address space`](address_space) handle rooted at a page directory,
//!   with range cloning (for fork) and range teardown (for exit and exec).
//! - The 32-bit entry layout [`PageEntryBits`] with typed
//!   [`PdEntry`]/[`PtEntry`] wrappers.
//! - 4 KiB-aligned [`PageDirectory`]/[`PageTable`] views and index helpers.
//! - The seams towards the rest of the kernel: [`FrameAlloc`] (reference
//!   counted frames), [`PhysMapper`] (reaching frame contents) and [`Tlb`].
//!
//! ## Linear Address → Physical Address Walk
//!
//! ```text
//! | 31‒22 | 21‒12 | 11‒0   |
//! |  Dir  | Table | Offset |
//! ```
//!
//! ```text
//!  CR3 → Page Directory → Page Table → Frame
//!             │                │
//!             │                └───► PTE → maps one 4 KiB frame
//!             └────────────────────► PDE → links one page table (covers 4 MiB)
//! ```
//!
//! | Level | Table | Entry | Description |
//! |:------|:------|:------|:------------|
//! | 1 | **PD** (Page Directory) | **PDE** | One per address space. 1024 entries of 4 MiB each. |
//! | 2 | **PT** (Page Table) | **PTE** | 1024 entries, each mapping a 4 KiB frame. |
//!
//! Both the directory and every table occupy exactly one frame.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

extern crate alloc;

pub mod address_space;
mod page_entry_bits;
pub mod page_table;

pub use crate::address_space::{AddressSpace, AddressSpaceError, RootPage};
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::pd::{DirIndex, PageDirectory, PdEntry};
pub use crate::page_table::pt::{PageTable, PtEntry, TableIndex};
use kernel_info::memory::PAGE_BYTES;
use kernel_memory_addresses::{PhysicalPage, Size4K};

/// The contents of one page frame.
pub type FrameBytes = [u8; PAGE_BYTES];

/// Reference-counted source of **physical** 4 KiB frames.
///
/// Frames outside the managed range (kernel memory) may still appear in page
/// tables; for those [`manages`](Self::manages) is `false` and
/// [`retain`](Self::retain)/[`release`](Self::release) are no-ops.
pub trait FrameAlloc {
    /// Hand out one free frame with a reference count of 1.
    ///
    /// The frame contents are **not** cleared. Returns `None` on out-of-memory.
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>>;

    /// Add a reference to a frame the caller already holds a reference on.
    ///
    /// # Panics
    /// If the frame is free, outside physical memory, or the count overflows.
    fn retain(&mut self, page: PhysicalPage<Size4K>);

    /// Drop one reference; the frame is free again when none remain.
    ///
    /// # Panics
    /// If the frame is already free or outside physical memory.
    fn release(&mut self, page: PhysicalPage<Size4K>);

    /// Whether the frame is reference counted at all.
    fn manages(&self, page: PhysicalPage<Size4K>) -> bool;

    /// Current reference count of a managed frame.
    fn ref_count(&self, page: PhysicalPage<Size4K>) -> Option<u16>;
}

/// Access to the contents of physical frames.
///
/// The kernel reaches physical memory through an identity mapping; the
/// implementation decides how a frame number turns into a reference. Frames
/// are typed on access: the caller knows whether a frame holds a directory,
/// a table, or plain data.
pub trait PhysMapper {
    fn frame(&self, page: PhysicalPage<Size4K>) -> &FrameBytes;

    fn frame_mut(&mut self, page: PhysicalPage<Size4K>) -> &mut FrameBytes;

    fn table(&self, page: PhysicalPage<Size4K>) -> &PageTable;

    fn table_mut(&mut self, page: PhysicalPage<Size4K>) -> &mut PageTable;

    fn directory(&self, page: PhysicalPage<Size4K>) -> &PageDirectory;

    fn directory_mut(&mut self, page: PhysicalPage<Size4K>) -> &mut PageDirectory;

    /// Copy a whole frame.
    fn copy_frame(&mut self, from: PhysicalPage<Size4K>, to: PhysicalPage<Size4K>) {
        let source = *self.frame(from);
        self.frame_mut(to).copy_from_slice(&source);
    }

    fn zero_frame(&mut self, page: PhysicalPage<Size4K>) {
        self.frame_mut(page).fill(0);
    }
}

/// The local translation cache.
pub trait Tlb {
    /// Drop every cached translation (a `CR3` reload).
    fn flush_all(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;
    use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

    const FRAMES: usize = 96;
    /// Frames below this index play the role of unmanaged kernel memory.
    const FIRST_MANAGED: usize = 8;

    /// Reference-counting bump allocator that reuses freed frames.
    struct TestFrames {
        counts: Vec<u16>,
        limit: usize,
    }

    impl TestFrames {
        fn new() -> Self {
            Self {
                counts: vec![0; FRAMES],
                limit: FRAMES,
            }
        }

        fn count(&self, page: PhysicalPage<Size4K>) -> u16 {
            self.counts[page.index() as usize]
        }

        fn in_use(&self) -> usize {
            self.counts.iter().filter(|c| **c > 0).count()
        }
    }

    impl FrameAlloc for TestFrames {
        fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
            let idx = (FIRST_MANAGED..self.limit).find(|i| self.counts[*i] == 0)?;
            self.counts[idx] = 1;
            Some(PhysicalPage::from_index(idx as u32))
        }

        fn retain(&mut self, page: PhysicalPage<Size4K>) {
            if self.manages(page) {
                assert_ne!(self.count(page), 0, "retain of free frame");
                self.counts[page.index() as usize] += 1;
            }
        }

        fn release(&mut self, page: PhysicalPage<Size4K>) {
            if self.manages(page) {
                assert_ne!(self.count(page), 0, "trying to free free page");
                self.counts[page.index() as usize] -= 1;
            }
        }

        fn manages(&self, page: PhysicalPage<Size4K>) -> bool {
            (FIRST_MANAGED..FRAMES).contains(&(page.index() as usize))
        }

        fn ref_count(&self, page: PhysicalPage<Size4K>) -> Option<u16> {
            self.manages(page).then(|| self.count(page))
        }
    }

    /// A 4 KiB-aligned raw frame. We use this as our "physical RAM" backing store in tests.
    #[repr(C, align(4096))]
    struct Aligned4K([u8; 4096]);

    /// Tiny in-memory "RAM"; physical addresses are byte offsets from 0.
    struct TestPhys {
        frames: Vec<Aligned4K>,
        flushes: usize,
    }

    impl TestPhys {
        fn new() -> Self {
            let mut frames = Vec::with_capacity(FRAMES);
            for _ in 0..FRAMES {
                frames.push(Aligned4K([0; 4096]));
            }
            Self { frames, flushes: 0 }
        }

        fn cast<T>(&self, page: PhysicalPage<Size4K>) -> &T {
            let frame = &self.frames[page.index() as usize];
            // SAFETY: frames are 4 KiB sized and aligned; T is a paging structure of that size.
            unsafe { &*core::ptr::from_ref(frame).cast::<T>() }
        }

        fn cast_mut<T>(&mut self, page: PhysicalPage<Size4K>) -> &mut T {
            let frame = &mut self.frames[page.index() as usize];
            // SAFETY: as above, and the exclusive borrow of the frame is carried over.
            unsafe { &mut *core::ptr::from_mut(frame).cast::<T>() }
        }
    }

    impl PhysMapper for TestPhys {
        fn frame(&self, page: PhysicalPage<Size4K>) -> &FrameBytes {
            &self.frames[page.index() as usize].0
        }

        fn frame_mut(&mut self, page: PhysicalPage<Size4K>) -> &mut FrameBytes {
            &mut self.frames[page.index() as usize].0
        }

        fn table(&self, page: PhysicalPage<Size4K>) -> &PageTable {
            self.cast(page)
        }

        fn table_mut(&mut self, page: PhysicalPage<Size4K>) -> &mut PageTable {
            self.cast_mut(page)
        }

        fn directory(&self, page: PhysicalPage<Size4K>) -> &PageDirectory {
            self.cast(page)
        }

        fn directory_mut(&mut self, page: PhysicalPage<Size4K>) -> &mut PageDirectory {
            self.cast_mut(page)
        }
    }

    impl Tlb for TestPhys {
        fn flush_all(&mut self) {
            self.flushes += 1;
        }
    }

    const BASE: VirtualAddress = VirtualAddress::new(0x0400_0000);

    /// Space with `n` fresh frames mapped writable from `BASE`.
    fn populated(phys: &mut TestPhys, alloc: &mut TestFrames, n: u32) -> (AddressSpace, Vec<PhysicalPage<Size4K>>) {
        let space = AddressSpace::new(phys, alloc).expect("directory");
        let mut pages = Vec::new();
        for i in 0..n {
            let page = alloc.alloc_4k().expect("frame");
            phys.frame_mut(page)[0] = i as u8;
            space
                .map_one(phys, alloc, page, BASE + i * 4096, PageEntryBits::new_user_rw())
                .expect("map_one");
            pages.push(page);
        }
        (space, pages)
    }

    #[test]
    fn map_one_creates_table_and_leaf() {
        let mut phys = TestPhys::new();
        let mut alloc = TestFrames::new();
        let (space, pages) = populated(&mut phys, &mut alloc, 1);

        let va = BASE + 0x123;
        assert_eq!(space.query(&phys, va), Some(pages[0].join(va.offset::<Size4K>())));

        let table = space.table_of(&phys, va).expect("table linked");
        assert_eq!(alloc.count(table), 1);
        let pde = phys.directory(space.root_page()).get(DirIndex::from(va));
        assert!(pde.flags().user_access() && pde.flags().writable());

        let pte = space.entry(&phys, va).expect("entry");
        assert!(pte.is_present() && pte.is_writable() && pte.flags().user_access());
        assert_eq!(space.query(&phys, BASE + 0x0040_0000), None);
        assert_eq!(phys.flushes, 0);
    }

    #[test]
    fn clone_range_shares_read_only() {
        let mut phys = TestPhys::new();
        let mut alloc = TestFrames::new();
        let (parent, pages) = populated(&mut phys, &mut alloc, 3);
        let child = AddressSpace::new(&mut phys, &mut alloc).expect("directory");

        parent
            .clone_range(&child, &mut phys, &mut alloc, BASE, 0x0400_0000)
            .expect("clone");
        assert_eq!(phys.flushes, 1);

        for (i, page) in pages.iter().enumerate() {
            let va = BASE + i as u32 * 4096;
            assert_eq!(alloc.count(*page), 2);
            let (p, c) = (parent.entry(&phys, va).unwrap(), child.entry(&phys, va).unwrap());
            assert_eq!(p, c);
            assert!(!p.is_writable());
            assert_eq!(child.query(&phys, va), Some(PhysicalAddress::from(*page)));
        }

        // Separate tables, one reference each.
        let (pt, ct) = (parent.table_of(&phys, BASE).unwrap(), child.table_of(&phys, BASE).unwrap());
        assert_ne!(pt, ct);
        assert_eq!(alloc.count(ct), 1);
    }

    #[test]
    fn clone_then_free_restores_counts() {
        let mut phys = TestPhys::new();
        let mut alloc = TestFrames::new();
        let (parent, pages) = populated(&mut phys, &mut alloc, 5);
        let before = alloc.in_use();

        let child = AddressSpace::new(&mut phys, &mut alloc).expect("directory");
        parent
            .clone_range(&child, &mut phys, &mut alloc, BASE, 1)
            .expect("clone");
        child.free_range(&mut phys, &mut alloc, BASE, 1);
        child.release_root(&mut alloc);

        assert_eq!(alloc.in_use(), before);
        assert!(pages.iter().all(|p| alloc.count(*p) == 1));
        assert_eq!(phys.flushes, 2);

        parent.free_range(&mut phys, &mut alloc, BASE, 1);
        parent.release_root(&mut alloc);
        assert_eq!(alloc.in_use(), 0);
    }

    #[test]
    fn clone_from_zero_copies_low_entries_only() {
        let mut phys = TestPhys::new();
        let mut alloc = TestFrames::new();
        let kernel = AddressSpace::new(&mut phys, &mut alloc).expect("directory");

        // Identity-mapped unmanaged kernel frames plus one managed frame far up.
        for i in 0..FIRST_MANAGED as u32 {
            let page = PhysicalPage::from_index(i);
            kernel
                .map_one(&mut phys, &mut alloc, page, VirtualAddress::new(i * 4096), PageEntryBits::new_user_rw())
                .expect("map_one");
        }
        let high = alloc.alloc_4k().unwrap();
        let far = VirtualAddress::new(200 * 4096);
        kernel
            .map_one(&mut phys, &mut alloc, high, far, PageEntryBits::new_user_rw())
            .expect("map_one");

        let child = AddressSpace::new(&mut phys, &mut alloc).expect("directory");
        kernel
            .clone_range(&child, &mut phys, &mut alloc, VirtualAddress::zero(), 640 * 1024)
            .expect("clone");

        // Low frames: child read-only, parent untouched, nothing counted.
        let first = VirtualAddress::new(4096);
        assert!(!child.entry(&phys, first).unwrap().is_writable());
        assert!(kernel.entry(&phys, first).unwrap().is_writable());
        // Entry 200 lies past the first 160 and is not copied.
        assert!(!child.entry(&phys, far).unwrap().is_present());
        assert_eq!(alloc.count(high), 1);
    }

    #[test]
    fn clone_out_of_memory_rolls_back() {
        let mut phys = TestPhys::new();
        let mut alloc = TestFrames::new();
        let parent = AddressSpace::new(&mut phys, &mut alloc).expect("directory");
        let mut pages = Vec::new();
        for slot in 0..3u32 {
            let page = alloc.alloc_4k().unwrap();
            let va = BASE + slot * 0x0040_0000;
            parent
                .map_one(&mut phys, &mut alloc, page, va, PageEntryBits::new_user_rw())
                .expect("map_one");
            pages.push(page);
        }
        let child = AddressSpace::new(&mut phys, &mut alloc).expect("directory");

        // Room for exactly one more table.
        let used = alloc.in_use();
        alloc.limit = FIRST_MANAGED + used + 1;

        let err = parent.clone_range(&child, &mut phys, &mut alloc, BASE, 3 * 0x0040_0000);
        assert_eq!(err, Err(AddressSpaceError::OutOfMemory));
        assert_eq!(alloc.in_use(), used);
        assert!(pages.iter().all(|p| alloc.count(*p) == 1));
        assert!(child.table_of(&phys, BASE).is_none());
    }

    #[test]
    #[should_panic(expected = "already exists")]
    fn clone_into_linked_slot_panics() {
        let mut phys = TestPhys::new();
        let mut alloc = TestFrames::new();
        let (parent, _) = populated(&mut phys, &mut alloc, 1);
        let (child, _) = populated(&mut phys, &mut alloc, 1);
        let _ = parent.clone_range(&child, &mut phys, &mut alloc, BASE, 1);
    }

    #[test]
    #[should_panic(expected = "wrong alignment")]
    fn free_range_rejects_unaligned_start() {
        let mut phys = TestPhys::new();
        let mut alloc = TestFrames::new();
        let (space, _) = populated(&mut phys, &mut alloc, 1);
        space.free_range(&mut phys, &mut alloc, BASE + 4096, 1);
    }

    #[test]
    fn free_range_rounds_size_up() {
        let mut phys = TestPhys::new();
        let mut alloc = TestFrames::new();
        let (space, _) = populated(&mut phys, &mut alloc, 2);
        space.free_range(&mut phys, &mut alloc, BASE, 1);
        assert!(space.table_of(&phys, BASE).is_none());
        assert_eq!(alloc.in_use(), 1);
        assert_eq!(phys.flushes, 1);
    }

    #[test]
    fn update_entry_and_walkers() {
        let mut phys = TestPhys::new();
        let mut alloc = TestFrames::new();
        let (space, _) = populated(&mut phys, &mut alloc, 4);

        let updated = space.update_entry(&mut phys, BASE + 4096, |e| e.touched(true));
        assert!(updated.unwrap().flags().dirty());
        assert_eq!(space.update_entry(&mut phys, VirtualAddress::new(0x4000_0000), |e| e), None);

        let mut seen = Vec::new();
        space.for_each_mapping(&phys, |va, e| seen.push((va, e.flags().dirty())));
        assert_eq!(
            seen,
            vec![(BASE, false), (BASE + 4096, true), (BASE + 8192, false), (BASE + 12288, false)]
        );

        let mut tables = 0;
        space.for_each_table(&phys, |slot, _| {
            assert_eq!(slot.base(), BASE);
            tables += 1;
        });
        assert_eq!(tables, 1);
    }
}
