//! # Page Table
//!
//! The second paging level. Every present entry maps one 4 KiB frame.
//!
//! - [`TableIndex`]: index type for linear-address bits `[21:12]`.
//! - [`PtEntry`]: a page-table entry (PTE).
//! - [`PageTable`]: a 4 KiB-aligned array of 1024 PTEs, occupying exactly one frame.
//!
//! After modifying live mappings the caller must flush the translation cache.

use crate::PageEntryBits;
use kernel_info::memory::ENTRIES_PER_TABLE;
use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};
use core::fmt;

/// Index into a page table (linear-address bits `[21:12]`).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TableIndex(u16);

/// A single page-table entry.
#[doc(alias = "PTE")]
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct PtEntry(u32);

/// A page table: 1024 entries, 4 KiB-aligned.
#[doc(alias = "PT")]
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PtEntry; ENTRIES_PER_TABLE],
}

impl TableIndex {
    #[inline]
    #[must_use]
    pub const fn from(va: VirtualAddress) -> Self {
        Self::new(((va.as_u32() >> 12) & 0x3FF) as u16)
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

    /// All slots in ascending order.
    pub fn iter() -> impl Iterator<Item = Self> + Clone {
        (0..ENTRIES_PER_TABLE as u16).map(Self::new)
    }
}

impl PtEntry {
    /// A non-present entry.
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
    pub const fn is_writable(self) -> bool {
        self.flags().writable()
    }

    /// Decoded view of the entry.
    #[inline]
    #[must_use]
    pub const fn flags(self) -> PageEntryBits {
        PageEntryBits::from_bits(self.0)
    }

    /// The mapped frame, if present.
    #[inline]
    #[must_use]
    pub const fn page(self) -> Option<PhysicalPage<Size4K>> {
        if self.is_present() {
            Some(self.flags().physical_page())
        } else {
            None
        }
    }

    /// Map `page` with `flags`; forces `present=1` and `PAT=0`.
    #[inline]
    #[must_use]
    pub const fn make(page: PhysicalPage<Size4K>, flags: PageEntryBits) -> Self {
        let bits = flags
            .with_present(true)
            .with_pat(false)
            .with_physical_page(page);
        Self(bits.into_bits())
    }

    /// The same entry with the writable bit cleared. All other bits,
    /// including dirty, are kept.
    #[inline]
    #[must_use]
    pub const fn write_protected(self) -> Self {
        Self(self.flags().with_writable(false).into_bits())
    }

    /// The same entry with the writable bit set.
    #[inline]
    #[must_use]
    pub const fn make_writable(self) -> Self {
        Self(self.flags().with_writable(true).into_bits())
    }

    /// Record an access the way the MMU does.
    #[inline]
    #[must_use]
    pub const fn touched(self, write: bool) -> Self {
        let flags = self.flags().with_accessed(true);
        let flags = if write { flags.with_dirty(true) } else { flags };
        Self(flags.into_bits())
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn from_raw(v: u32) -> Self {
        Self(v)
    }
}

impl fmt::Debug for PtEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PtEntry({:#010x})", self.0)
    }
}

impl PageTable {
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PtEntry::zero(); ENTRIES_PER_TABLE],
        }
    }

    /// Mark every entry non-present.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PtEntry::zero());
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, i: TableIndex) -> PtEntry {
        self.entries[i.as_usize()]
    }

    /// Caller must flush the translation cache when changing live mappings.
    #[inline]
    pub const fn set(&mut self, i: TableIndex, e: PtEntry) {
        self.entries[i.as_usize()] = e;
    }

    #[inline]
    #[must_use]
    pub const fn index_of(va: VirtualAddress) -> TableIndex {
        TableIndex::from(va)
    }

    /// Number of present entries.
    #[must_use]
    pub fn present_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_present()).count()
    }
}

const _: () = assert!(size_of::<PageTable>() == 4096);
