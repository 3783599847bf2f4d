//! # Page Directory
//!
//! The top paging level, one per address space.
//!
//! - [`DirIndex`]: index type for linear-address bits `[31:22]`.
//! - [`PdEntry`]: a directory entry linking one page table (no 4 MiB pages).
//! - [`PageDirectory`]: a 4 KiB-aligned array of 1024 PDEs.

use crate::PageEntryBits;
use kernel_info::memory::ENTRIES_PER_TABLE;
use kernel_memory_addresses::{PhysicalPage, Size4K, Size4M, VirtualAddress};
use core::fmt;

/// Index into a page directory (linear-address bits `[31:22]`).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DirIndex(u16);

/// A single page-directory entry.
#[doc(alias = "PDE")]
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct PdEntry(u32);

/// A page directory: 1024 entries, 4 KiB-aligned.
#[doc(alias = "PD")]
#[repr(C, align(4096))]
pub struct PageDirectory {
    entries: [PdEntry; ENTRIES_PER_TABLE],
}

impl DirIndex {
    #[inline]
    #[must_use]
    pub const fn from(va: VirtualAddress) -> Self {
        Self::new(va.page::<Size4M>().index() as u16)
    }

    /// ### Debug assertions
    /// - Asserts `v < 1024` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!((v as usize) < ENTRIES_PER_TABLE);
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// First linear address covered by this slot.
    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress::new((self.0 as u32) << 22)
    }
}

impl PdEntry {
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.flags().present()
    }

    #[inline]
    #[must_use]
    pub const fn flags(self) -> PageEntryBits {
        PageEntryBits::from_bits(self.0)
    }

    /// The linked page table, if present.
    #[inline]
    #[must_use]
    pub const fn table(self) -> Option<PhysicalPage<Size4K>> {
        if self.is_present() {
            Some(self.flags().physical_page())
        } else {
            None
        }
    }

    /// Link the page table in frame `table`; forces `present=1` and `PS=0`.
    #[inline]
    #[must_use]
    pub const fn make(table: PhysicalPage<Size4K>, flags: PageEntryBits) -> Self {
        let bits = flags
            .with_present(true)
            .with_pat(false)
            .with_physical_page(table);
        Self(bits.into_bits())
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for PdEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PdEntry({:#010x})", self.0)
    }
}

impl PageDirectory {
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PdEntry::zero(); ENTRIES_PER_TABLE],
        }
    }

    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PdEntry::zero());
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, i: DirIndex) -> PdEntry {
        self.entries[i.as_usize()]
    }

    #[inline]
    pub const fn set(&mut self, i: DirIndex, e: PdEntry) {
        self.entries[i.as_usize()] = e;
    }

    #[inline]
    #[must_use]
    pub const fn index_of(va: VirtualAddress) -> DirIndex {
        DirIndex::from(va)
    }
}

const _: () = assert!(size_of::<PageDirectory>() == 4096);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pde_link() {
        let table = PhysicalPage::<Size4K>::from_index(0x301);
        let e = PdEntry::make(table, PageEntryBits::new_user_rw());
        assert_eq!(e.table(), Some(table));
        assert_eq!(e.raw(), 0x0030_1007);
        assert_eq!(PdEntry::zero().table(), None);
    }

    #[test]
    fn slot_bases() {
        let slot = DirIndex::from(VirtualAddress::new(0x0C12_3456));
        assert_eq!(slot.as_usize(), 0x30);
        assert_eq!(slot.base(), VirtualAddress::new(0x0C00_0000));
    }
}
