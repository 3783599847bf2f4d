use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalPage, Size4K};

/// A single 32-bit i386 paging entry in its raw bitfield form.
///
/// The same layout is used for page-directory entries (pointing at a page
/// table) and page-table entries (mapping a 4 KiB frame). `dirty`,
/// `pat` and `global_translation` are only meaningful in page-table entries.
///
/// ### Bit layout
///
/// | Bits   | Name / Mnemonic | Meaning |
/// |--------|-----------------|----------|
/// | 0      | `P`             | Valid entry if set |
/// | 1      | `RW`            | Writable if set |
/// | 2      | `US`            | User-mode accessible if set |
/// | 3      | `PWT`           | Write-through caching |
/// | 4      | `PCD`           | Disable caching |
/// | 5      | `A`             | Accessed |
/// | 6      | `D`             | Dirty (page-table entries only) |
/// | 7      | `PAT` / `PS`    | Always 0: no 4 MiB pages |
/// | 8      | `G`             | Global |
/// | 9–11   | OS avail        | Reserved for OS use |
/// | 12–31  | frame           | Physical frame number |
///
/// ### Clean pages
/// A present entry whose `D` bit is clear has never been written through
/// *this* mapping, so its frame still holds exactly what was loaded from
/// the executable image. Page sharing relies on this: the bit is never
/// cleared by software and is carried over when an entry is cloned or
/// write-protected.
///
/// ### Example
/// ```rust
/// # use kernel_memory_addresses::{PhysicalPage, Size4K};
/// # use kernel_vmem::PageEntryBits;
/// let frame = PhysicalPage::<Size4K>::from_index(0x345);
/// let e = PageEntryBits::new_user_rw().with_physical_page(frame);
/// assert!(e.present() && e.writable() && e.user_access());
/// assert_eq!(e.into_bits(), 0x0034_5007);
/// assert!(e.is_clean());
/// ```
#[bitfield(u32)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    ///
    /// Clear for read-only. Only enforced for user-mode accesses: the
    /// supervisor writes straight through read-only entries on this CPU
    /// generation, which is why kernel writes into user memory are verified
    /// in software first.
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the MMU on any access.
    pub accessed: bool,

    /// Dirty (D, bit 6). Set by the MMU on the first write through a
    /// page-table entry.
    pub dirty: bool,

    /// PAT in a page-table entry, PS in a directory entry (bit 7).
    pub pat: bool,

    /// Global (G, bit 8).
    pub global_translation: bool,

    /// OS-available (bits 9..=11).
    #[bits(3)]
    pub os_available: u8,

    /// Physical frame number (bits 12..=31).
    #[bits(20)]
    frame_number: u32,
}

impl PageEntryBits {
    #[inline]
    #[must_use]
    pub const fn physical_page(&self) -> PhysicalPage<Size4K> {
        PhysicalPage::from_index(self.frame_number())
    }

    #[inline]
    pub const fn set_physical_page(&mut self, page: PhysicalPage<Size4K>) {
        self.set_frame_number(page.index());
    }

    #[inline]
    #[must_use]
    pub const fn with_physical_page(mut self, page: PhysicalPage<Size4K>) -> Self {
        self.set_physical_page(page);
        self
    }

    /// Present, writable, user: the flags of every link and private page.
    #[inline]
    #[must_use]
    pub const fn new_user_rw() -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(true)
    }

    /// Present, read-only, user: a shared or copy-on-write page.
    #[inline]
    #[must_use]
    pub const fn new_user_ro() -> Self {
        Self::new()
            .with_present(true)
            .with_writable(false)
            .with_user_access(true)
    }

    /// Present and never written through this mapping.
    #[inline]
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.present() && !self.dirty()
    }
}
