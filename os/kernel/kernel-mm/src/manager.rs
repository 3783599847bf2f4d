//! # The Memory Manager
//!
//! [`MemoryManager`] owns physical memory and the frame reference counts.
//! Address spaces are handles into that memory; creating, cloning and
//! destroying them goes through the manager so every frame reference is
//! accounted for.

use crate::{MmConfig, MmError};
use kernel_alloc::frame_alloc::{AllocPolicy, HighestFree, RefCountFrameAlloc};
use kernel_alloc::phys_mapper::PhysicalMemory;
use kernel_info::layout::LayoutError;
use kernel_info::memory::{ENTRIES_PER_TABLE, MAX_ARG_PAGES, PAGE_SIZE, TASK_SIZE};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use kernel_vmem::{
    AddressSpace, DirIndex, FrameAlloc, PageEntryBits, PdEntry, PhysMapper, PtEntry, TableIndex, Tlb,
};

/// Frame of the kernel's page directory.
const KERNEL_DIRECTORY: u32 = 0;

/// First frame of the kernel's identity-mapping page tables.
const KERNEL_TABLES: u32 = 1;

pub struct MemoryManager<P: AllocPolicy = HighestFree> {
    pub(crate) config: MmConfig,
    pub(crate) memory: PhysicalMemory,
    pub(crate) frames: RefCountFrameAlloc<P>,
}

impl MemoryManager<HighestFree> {
    /// # Errors
    /// The configured layout is inconsistent.
    pub fn new(config: MmConfig) -> Result<Self, LayoutError> {
        Self::with_policy(config, HighestFree)
    }
}

impl<P: AllocPolicy> MemoryManager<P> {
    /// # Errors
    /// The configured layout is inconsistent.
    pub fn with_policy(config: MmConfig, policy: P) -> Result<Self, LayoutError> {
        config.layout.validate()?;
        log::info!(
            "memory: {:#x} bytes, paging from {:#x}",
            config.layout.high_memory,
            config.layout.main_memory_start
        );

        Ok(Self {
            memory: PhysicalMemory::new(config.layout.high_memory),
            frames: RefCountFrameAlloc::with_policy(&config.layout, policy),
            config,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &MmConfig {
        &self.config
    }

    #[must_use]
    pub const fn memory(&self) -> &PhysicalMemory {
        &self.memory
    }

    pub const fn memory_mut(&mut self) -> &mut PhysicalMemory {
        &mut self.memory
    }

    #[must_use]
    pub const fn frames(&self) -> &RefCountFrameAlloc<P> {
        &self.frames
    }

    #[must_use]
    pub fn ref_count(&self, page: PhysicalPage<Size4K>) -> Option<u16> {
        self.frames.ref_count(page)
    }

    /// The entry mapping `va` in `space`, if its page table exists.
    #[must_use]
    pub fn entry(&self, space: AddressSpace, va: VirtualAddress) -> Option<PtEntry> {
        space.entry(&self.memory, va)
    }

    #[must_use]
    pub fn translate(&self, space: AddressSpace, va: VirtualAddress) -> Option<PhysicalAddress> {
        space.query(&self.memory, va)
    }

    /// Build the kernel's own address space in the reserved low frames.
    ///
    /// Identity maps `[0, low_mem)` with user, writable, present entries, the
    /// way the boot code leaves it. Neither the directory nor its tables are
    /// reference counted.
    pub fn init_kernel_space(&mut self) -> AddressSpace {
        let root = PhysicalPage::from_index(KERNEL_DIRECTORY);
        let space = AddressSpace::from_root(root);
        let flags = PageEntryBits::new_user_rw();
        let pages = self.config.layout.low_mem / PAGE_SIZE;

        self.memory.directory_mut(root).zero();
        for (n, first) in (0..pages).step_by(ENTRIES_PER_TABLE).enumerate() {
            let table = PhysicalPage::from_index(KERNEL_TABLES + n as u32);
            self.memory.table_mut(table).zero();
            for (index, frame) in TableIndex::iter().zip(first..pages) {
                self.memory
                    .table_mut(table)
                    .set(index, PtEntry::make(PhysicalPage::from_index(frame), flags));
            }
            self.memory
                .directory_mut(root)
                .set(DirIndex::new(n as u16), PdEntry::make(table, flags));
        }

        self.memory.flush_all();
        log::debug!("kernel space identity maps {:#x} bytes", self.config.layout.low_mem);
        space
    }

    /// A new address space, optionally populated from `parent`'s mappings of
    /// `[base, base + size)`.
    ///
    /// Shared pages end up read-only on both sides and are copied on the
    /// first write.
    ///
    /// # Errors
    /// [`MmError::OutOfMemory`]; nothing is left allocated in that case.
    pub fn create_address_space(
        &mut self,
        parent: Option<AddressSpace>,
        base: VirtualAddress,
        size: u32,
    ) -> Result<AddressSpace, MmError> {
        let child = AddressSpace::new(&mut self.memory, &mut self.frames)?;
        if let Some(parent) = parent {
            if let Err(err) = parent.clone_range(&child, &mut self.memory, &mut self.frames, base, size) {
                child.release_root(&mut self.frames);
                return Err(err.into());
            }
        }
        Ok(child)
    }

    /// Drop every mapping of `[base, base + size)` but keep the directory,
    /// as `exec` does before installing a new image.
    pub fn clear_address_space(&mut self, space: AddressSpace, base: VirtualAddress, size: u32) {
        space.free_range(&mut self.memory, &mut self.frames, base, size);
    }

    /// Tear down `space` completely; the handle is dead afterwards.
    pub fn destroy_address_space(&mut self, space: AddressSpace, base: VirtualAddress, size: u32) {
        self.clear_address_space(space, base, size);
        space.release_root(&mut self.frames);
    }

    /// A zeroed frame owned by the caller, e.g. for `exec` argument pages.
    ///
    /// # Errors
    /// [`MmError::OutOfMemory`].
    pub fn alloc_page(&mut self) -> Result<PhysicalPage<Size4K>, MmError> {
        let page = self.frames.alloc_4k().ok_or(MmError::OutOfMemory)?;
        self.memory.zero_frame(page);
        Ok(page)
    }

    /// Give up a reference obtained from [`alloc_page`](Self::alloc_page).
    pub fn free_page(&mut self, page: PhysicalPage<Size4K>) {
        self.frames.release(page);
    }

    /// Map the `exec` argument pages at the top of the task slot at `base`:
    /// `pages[i]` lands at `base + TASK_SIZE - (MAX_ARG_PAGES - i) * PAGE_SIZE`.
    ///
    /// Ownership of every page passes to the address space.
    ///
    /// # Panics
    /// More than [`MAX_ARG_PAGES`] pages.
    ///
    /// # Errors
    /// [`MmError::OutOfMemory`] if a page table cannot be allocated. Pages
    /// not mapped yet are released; mapped ones go with the address space.
    pub fn install_arg_pages(
        &mut self,
        space: AddressSpace,
        base: VirtualAddress,
        pages: &[Option<PhysicalPage<Size4K>>],
    ) -> Result<(), MmError> {
        assert!(pages.len() <= MAX_ARG_PAGES, "too many argument pages: {}", pages.len());

        for (i, page) in pages.iter().enumerate().rev() {
            let Some(page) = *page else {
                continue;
            };

            let va = base + (TASK_SIZE - (MAX_ARG_PAGES - i) as u32 * PAGE_SIZE);
            if let Err(err) = space.map_one(
                &mut self.memory,
                &mut self.frames,
                page,
                va,
                PageEntryBits::new_user_rw(),
            ) {
                for page in pages[..=i].iter().flatten() {
                    self.frames.release(*page);
                }
                return Err(err.into());
            }
        }
        Ok(())
    }
}
