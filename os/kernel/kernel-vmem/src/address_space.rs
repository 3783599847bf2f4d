//! # Address Space (i386, directory-rooted)
//!
//! Strongly typed helpers to build, clone and tear down one linear address
//! space: a page directory frame plus the page tables it links.
//!
//! ## Highlights
//!
//! - [`AddressSpace::map_one`] installs one 4 KiB mapping, creating the page
//!   table on demand.
//! - [`AddressSpace::clone_range`] copies a range into another space for
//!   fork. Both copies end up read-only and every shared frame gains a
//!   reference, so the first write by either side faults and is resolved
//!   copy-on-write.
//! - [`AddressSpace::free_range`] drops every mapping and page table of a
//!   range and releases their frames.
//! - [`AddressSpace::query`] translates a linear address.
//!
//! ## Ranges
//!
//! Structural operations work in units of one directory entry (4 MiB). The
//! start of a range must be 4 MiB aligned and the size is rounded up to a
//! whole number of directory entries. Anything else is a caller bug and
//! panics.
//!
//! ## Reference counting
//!
//! Every present page-table entry holds one reference on its frame, every
//! present directory entry holds one reference on its page-table frame, and
//! the owner of the handle holds the reference on the directory frame.
//! Frames the allocator does not manage (kernel memory below `LOW_MEM`) are
//! never counted; cloning leaves the parent's entry for such a frame
//! untouched and only hands the child a read-only copy.
//!
//! ## Translation cache
//!
//! Bulk operations finish with exactly one [`Tlb::flush_all`].

use crate::page_table::join_indices;
use crate::page_table::pd::{DirIndex, PdEntry};
use crate::page_table::pt::{PtEntry, TableIndex};
use crate::{FrameAlloc, PageEntryBits, PhysMapper, Tlb};
use kernel_info::memory::{DIRECTORY_SPAN, ENTRIES_PER_TABLE, LOW_CLONE_ENTRIES};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, Size4M, VirtualAddress};

/// The page-directory frame of an [`AddressSpace`].
pub type RootPage = PhysicalPage<Size4K>;

/// Flags of every directory entry: the per-page entries decide access.
const TABLE_LINK: PageEntryBits = PageEntryBits::new_user_rw();

/// Handle to a single address space.
///
/// The handle is a plain frame number; the paging structures themselves live
/// in physical memory reached through a [`PhysMapper`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct AddressSpace {
    root: RootPage,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum AddressSpaceError {
    #[error("out of memory")]
    OutOfMemory,
}

impl AddressSpace {
    /// Allocate an empty page directory.
    ///
    /// # Errors
    /// [`AddressSpaceError::OutOfMemory`] if no frame is left.
    pub fn new<M: PhysMapper, A: FrameAlloc>(
        mapper: &mut M,
        alloc: &mut A,
    ) -> Result<Self, AddressSpaceError> {
        let root = alloc.alloc_4k().ok_or(AddressSpaceError::OutOfMemory)?;
        mapper.directory_mut(root).zero();
        Ok(Self { root })
    }

    /// Wrap an existing directory frame.
    #[inline]
    #[must_use]
    pub const fn from_root(root: RootPage) -> Self {
        Self { root }
    }

    #[inline]
    #[must_use]
    pub const fn root_page(&self) -> RootPage {
        self.root
    }

    /// Give up the owner's reference on the directory frame.
    ///
    /// The directory must already be empty, see [`free_range`](Self::free_range).
    pub fn release_root<A: FrameAlloc>(self, alloc: &mut A) {
        alloc.release(self.root);
    }

    /// The page table covering `va`, if one is linked.
    #[inline]
    #[must_use]
    pub fn table_of<M: PhysMapper>(&self, mapper: &M, va: VirtualAddress) -> Option<PhysicalPage<Size4K>> {
        mapper.directory(self.root).get(DirIndex::from(va)).table()
    }

    /// The page table covering `va`, allocating and linking an empty one if
    /// the directory slot is vacant.
    ///
    /// # Errors
    /// [`AddressSpaceError::OutOfMemory`] if a table is needed and no frame is left.
    pub fn ensure_table<M: PhysMapper, A: FrameAlloc>(
        &self,
        mapper: &mut M,
        alloc: &mut A,
        va: VirtualAddress,
    ) -> Result<PhysicalPage<Size4K>, AddressSpaceError> {
        if let Some(table) = self.table_of(mapper, va) {
            return Ok(table);
        }

        let table = alloc.alloc_4k().ok_or(AddressSpaceError::OutOfMemory)?;
        mapper.table_mut(table).zero();
        mapper
            .directory_mut(self.root)
            .set(DirIndex::from(va), PdEntry::make(table, TABLE_LINK));
        log::trace!("linked page table {table} for {va}");
        Ok(table)
    }

    /// The page-table entry for `va`, or `None` if no table covers it.
    #[must_use]
    pub fn entry<M: PhysMapper>(&self, mapper: &M, va: VirtualAddress) -> Option<PtEntry> {
        let table = self.table_of(mapper, va)?;
        Some(mapper.table(table).get(TableIndex::from(va)))
    }

    /// Rewrite the page-table entry for `va` in place and return the new value.
    ///
    /// Returns `None` without calling `f` if no table covers `va`. The caller
    /// flushes the translation cache if a live entry changed.
    pub fn update_entry<M: PhysMapper>(
        &self,
        mapper: &mut M,
        va: VirtualAddress,
        f: impl FnOnce(PtEntry) -> PtEntry,
    ) -> Option<PtEntry> {
        let table = self.table_of(mapper, va)?;
        let index = TableIndex::from(va);
        let table = mapper.table_mut(table);
        let entry = f(table.get(index));
        table.set(index, entry);
        Some(entry)
    }

    /// Translate `va` if it is mapped.
    #[must_use]
    pub fn query<M: PhysMapper>(&self, mapper: &M, va: VirtualAddress) -> Option<PhysicalAddress> {
        let page = self.entry(mapper, va)?.page()?;
        Some(page.join(va.offset::<Size4K>()))
    }

    /// Map the frame `page` at `va` with `flags`, overwriting whatever the
    /// slot held.
    ///
    /// The caller hands its reference on `page` over to the mapping. Mapping
    /// a frame that is unmanaged or not exclusively owned is reported but
    /// carried out.
    ///
    /// # Errors
    /// [`AddressSpaceError::OutOfMemory`] if a page table had to be allocated
    /// and no frame is left. Nothing is mapped in that case.
    pub fn map_one<M: PhysMapper + Tlb, A: FrameAlloc>(
        &self,
        mapper: &mut M,
        alloc: &mut A,
        page: PhysicalPage<Size4K>,
        va: VirtualAddress,
        flags: PageEntryBits,
    ) -> Result<(), AddressSpaceError> {
        if !alloc.manages(page) || alloc.ref_count(page) != Some(1) {
            log::warn!(
                "mapping frame {page} at {va} with reference count {:?}",
                alloc.ref_count(page)
            );
        }

        let table = self.ensure_table(mapper, alloc, va)?;
        let index = TableIndex::from(va);
        let previous = mapper.table(table).get(index);
        mapper.table_mut(table).set(index, PtEntry::make(page, flags));

        if previous.is_present() {
            log::warn!("replaced live mapping {previous:?} at {va}");
            mapper.flush_all();
        }
        Ok(())
    }

    /// Copy the mappings of `[from, from + size)` into `child`.
    ///
    /// For every directory slot of the range that is linked in `self`, a
    /// fresh table is allocated for `child` and each present entry is copied
    /// with the writable bit cleared. For managed frames the parent's entry is
    /// write-protected as well and the frame gains a reference. When `from`
    /// is zero (the kernel's own range) only the first 640 KiB of each table
    /// are copied.
    ///
    /// # Panics
    /// - `from` is not 4 MiB aligned or the range leaves the 4 GiB space.
    /// - A directory slot of the range is already linked in `child`. This is
    ///   checked before anything is modified.
    ///
    /// # Errors
    /// [`AddressSpaceError::OutOfMemory`] if a table cannot be allocated. The
    /// child's range is freed again, which drops every reference taken so far.
    pub fn clone_range<M: PhysMapper + Tlb, A: FrameAlloc>(
        &self,
        child: &Self,
        mapper: &mut M,
        alloc: &mut A,
        from: VirtualAddress,
        size: u32,
    ) -> Result<(), AddressSpaceError> {
        let slots = directory_slots("clone_range", from, size);
        for slot in slots.clone() {
            assert!(
                !mapper.directory(child.root).get(slot).is_present(),
                "clone_range: directory slot {} already exists",
                slot.as_usize()
            );
        }

        let entries = if from.as_u32() == 0 {
            LOW_CLONE_ENTRIES
        } else {
            ENTRIES_PER_TABLE
        };

        for slot in slots {
            let Some(source) = mapper.directory(self.root).get(slot).table() else {
                continue;
            };

            let Some(target) = alloc.alloc_4k() else {
                log::debug!("clone_range: out of memory at {}, rolling back", slot.base());
                child.free_range(mapper, alloc, from, size);
                return Err(AddressSpaceError::OutOfMemory);
            };
            mapper.table_mut(target).zero();
            mapper
                .directory_mut(child.root)
                .set(slot, PdEntry::make(target, TABLE_LINK));

            for index in TableIndex::iter().take(entries) {
                let entry = mapper.table(source).get(index);
                let Some(page) = entry.page() else {
                    continue;
                };

                let shared = entry.write_protected();
                mapper.table_mut(target).set(index, shared);
                if alloc.manages(page) {
                    mapper.table_mut(source).set(index, shared);
                    alloc.retain(page);
                }
            }
        }

        log::debug!("cloned {from}+{size:#x} from {:?} into {:?}", self.root, child.root);
        mapper.flush_all();
        Ok(())
    }

    /// Unmap `[from, from + size)` and release its frames and page tables.
    ///
    /// # Panics
    /// `from` is not 4 MiB aligned or the range leaves the 4 GiB space, or a
    /// released frame is already free (see [`FrameAlloc::release`]).
    pub fn free_range<M: PhysMapper + Tlb, A: FrameAlloc>(
        &self,
        mapper: &mut M,
        alloc: &mut A,
        from: VirtualAddress,
        size: u32,
    ) {
        for slot in directory_slots("free_range", from, size) {
            let Some(table) = mapper.directory(self.root).get(slot).table() else {
                continue;
            };

            for index in TableIndex::iter() {
                if let Some(page) = mapper.table(table).get(index).page() {
                    alloc.release(page);
                }
                mapper.table_mut(table).set(index, PtEntry::zero());
            }

            alloc.release(table);
            mapper.directory_mut(self.root).set(slot, PdEntry::zero());
        }

        log::debug!("freed {from}+{size:#x} in {:?}", self.root);
        mapper.flush_all();
    }

    /// Visit every linked page table.
    pub fn for_each_table<M: PhysMapper>(&self, mapper: &M, mut f: impl FnMut(DirIndex, PhysicalPage<Size4K>)) {
        let directory = mapper.directory(self.root);
        for slot in (0..ENTRIES_PER_TABLE as u16).map(DirIndex::new) {
            if let Some(table) = directory.get(slot).table() {
                f(slot, table);
            }
        }
    }

    /// Visit every present page-table entry with the address it maps.
    pub fn for_each_mapping<M: PhysMapper>(&self, mapper: &M, mut f: impl FnMut(VirtualAddress, PtEntry)) {
        self.for_each_table(mapper, |slot, table| {
            let table = mapper.table(table);
            for index in TableIndex::iter() {
                let entry = table.get(index);
                if entry.is_present() {
                    f(join_indices(slot, index), entry);
                }
            }
        });
    }
}

/// The directory slots covered by `[from, from + size)`, size rounded up to
/// whole 4 MiB spans.
fn directory_slots(
    operation: &str,
    from: VirtualAddress,
    size: u32,
) -> impl Iterator<Item = DirIndex> + Clone {
    assert!(
        from.is_aligned::<Size4M>(),
        "{operation} called with wrong alignment: {from}"
    );

    let first = from.page::<Size4M>().index() as usize;
    let count = size.div_ceil(DIRECTORY_SPAN) as usize;
    assert!(
        first + count <= ENTRIES_PER_TABLE,
        "{operation}: range {from}+{size:#x} exceeds the linear address space"
    );

    (first..first + count).map(|slot| DirIndex::new(slot as u16))
}
