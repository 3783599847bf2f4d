//! # Page Faults
//!
//! Two kinds of faults reach the memory manager:
//!
//! - **Write-protect**: a write hit a present, read-only page. If the frame
//!   has a single reference the entry simply becomes writable; otherwise the
//!   faulting process gets a private copy and drops its reference on the
//!   shared frame.
//! - **Not present**: nothing is mapped. Pages beyond the image's data (or of
//!   a process without an executable) become zero pages; image pages are
//!   first looked up in other processes running the same executable and
//!   otherwise read from storage.
//!
//! A fault the manager cannot resolve ends the faulting process through
//! [`ProcessTable::terminate_with_fault`](crate::env::ProcessTable::terminate_with_fault).

use crate::env::KernelEnv;
use crate::{MemoryManager, MmError};
use bitfield_struct::bitfield;
use kernel_alloc::frame_alloc::AllocPolicy;
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::{Size4K, VirtualAddress};
use kernel_vmem::{AddressSpace, FrameAlloc, PageEntryBits, PhysMapper, PtEntry, Tlb};

/// Error code pushed by the CPU on a page fault.
#[bitfield(u32)]
pub struct PageFaultError {
    /// 0 = non-present page.
    /// 1 = protection violation (page present but access disallowed).
    pub present: bool, // bit 0

    /// 0 = read or execute.
    /// 1 = write access.
    pub write: bool, // bit 1

    /// 0 = supervisor.
    /// 1 = user mode.
    pub user: bool, // bit 2

    /// 1 = caused by reserved bit set in a paging structure.
    pub reserved_bit: bool, // bit 3

    /// 1 = instruction fetch.
    pub instruction_fetch: bool, // bit 4

    #[bits(27)]
    __: u32,
}

impl PageFaultError {
    #[must_use]
    pub const fn explain(&self) -> &'static str {
        if !self.present() {
            "Non-present page"
        } else if self.write() {
            if self.user() {
                "User-mode write to read-only page"
            } else {
                "Kernel write to read-only page"
            }
        } else if self.reserved_bit() {
            "Reserved bit set in paging structure"
        } else {
            "Read access to protected page"
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FaultKind {
    /// Write to a present, read-only page.
    WriteProtect,
    /// Access to an unmapped page.
    NotPresent,
}

impl From<PageFaultError> for FaultKind {
    fn from(error: PageFaultError) -> Self {
        if error.present() {
            Self::WriteProtect
        } else {
            Self::NotPresent
        }
    }
}

/// How a fault was resolved.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Resolution {
    /// The only reference to the frame; the entry became writable in place.
    MadeWritable,
    /// The faulting process got a private copy of a shared frame.
    Copied,
    /// The entry was already writable; only the translation cache was flushed.
    Spurious,
    /// A zero page was mapped.
    Anonymous,
    /// A clean page of another process running the same executable was mapped.
    Shared,
    /// The page was read from the executable image.
    Loaded,
}

impl<P: AllocPolicy> MemoryManager<P> {
    /// Resolve a fault of the current process at `address`.
    ///
    /// # Errors
    /// The fault could not be resolved; the process has already been
    /// terminated through `env`.
    pub fn handle_fault<E: KernelEnv>(
        &mut self,
        env: &mut E,
        kind: FaultKind,
        address: VirtualAddress,
    ) -> Result<Resolution, MmError> {
        let pid = env.current();
        let result = self.resolve_fault(env, pid, kind, address);
        match result {
            Ok(resolution) => {
                log::trace!("{kind:?} fault at {address} in {pid:?}: {resolution:?}");
            }
            Err(err) => {
                log::error!("{kind:?} fault at {address} in {pid:?}: {err}");
                env.terminate_with_fault(pid, err);
            }
        }
        result
    }

    fn resolve_fault<E: KernelEnv>(
        &mut self,
        env: &mut E,
        pid: E::Pid,
        kind: FaultKind,
        address: VirtualAddress,
    ) -> Result<Resolution, MmError> {
        let space = env.address_space(pid).ok_or(MmError::UnknownProcess)?;
        if kind == FaultKind::WriteProtect {
            // The entry may have been unmapped since the fault was raised.
            if let Some(resolution) = self.unshare_page(space, address)? {
                return Ok(resolution);
            }
        } else if space.entry(&self.memory, address).is_some_and(PtEntry::is_present) {
            // Mapped since the fault was raised, or a stale TLB entry.
            self.memory.flush_all();
            return Ok(Resolution::Spurious);
        }
        self.fill_page(env, pid, space, address)
    }

    /// Make the page at `address` privately writable. `None` if nothing is
    /// mapped there.
    fn unshare_page(&mut self, space: AddressSpace, address: VirtualAddress) -> Result<Option<Resolution>, MmError> {
        let Some(entry) = space.entry(&self.memory, address) else {
            return Ok(None);
        };
        let Some(old) = entry.page() else {
            return Ok(None);
        };

        if entry.is_writable() {
            self.memory.flush_all();
            return Ok(Some(Resolution::Spurious));
        }

        if self.frames.ref_count(old) == Some(1) {
            space.update_entry(&mut self.memory, address, PtEntry::make_writable);
            self.memory.flush_all();
            return Ok(Some(Resolution::MadeWritable));
        }

        let new = self.frames.alloc_4k().ok_or(MmError::OutOfMemory)?;
        self.memory.copy_frame(old, new);
        // A copy of modified data must not pass as a clean image page.
        let flags = PageEntryBits::new_user_rw().with_dirty(entry.flags().dirty());
        space.update_entry(&mut self.memory, address, |_| PtEntry::make(new, flags));
        self.frames.release(old);
        self.memory.flush_all();
        Ok(Some(Resolution::Copied))
    }

    /// Map a page at `address`, which is unmapped in `space`.
    fn fill_page<E: KernelEnv>(
        &mut self,
        env: &mut E,
        pid: E::Pid,
        space: AddressSpace,
        address: VirtualAddress,
    ) -> Result<Resolution, MmError> {
        let address = address.align_down::<Size4K>();
        let image = env.image(pid).ok_or(MmError::UnknownProcess)?;

        let backing = image
            .offset_of(address)
            .and_then(|offset| image.backing(offset).map(|executable| (executable, offset)));
        let Some((executable, offset)) = backing else {
            self.get_empty_page(space, address)?;
            return Ok(Resolution::Anonymous);
        };

        if self.config.share_clean_pages && self.share_page(env, pid, space, &image, executable, offset)? {
            return Ok(Resolution::Shared);
        }

        let page = self.frames.alloc_4k().ok_or(MmError::OutOfMemory)?;
        if let Err(err) = self.load_image_page(env, &image, executable, offset, page) {
            self.frames.release(page);
            return Err(err);
        }
        if let Err(err) = space.map_one(
            &mut self.memory,
            &mut self.frames,
            page,
            address,
            PageEntryBits::new_user_rw(),
        ) {
            self.frames.release(page);
            return Err(err.into());
        }
        Ok(Resolution::Loaded)
    }

    /// Map a fresh page at `address`, zeroed unless configured otherwise.
    ///
    /// # Errors
    /// [`MmError::OutOfMemory`] for the frame or its page table.
    pub fn get_empty_page(&mut self, space: AddressSpace, address: VirtualAddress) -> Result<(), MmError> {
        let page = self.frames.alloc_4k().ok_or(MmError::OutOfMemory)?;
        if self.config.zero_fill_anonymous {
            self.memory.zero_frame(page);
        }
        if let Err(err) = space.map_one(
            &mut self.memory,
            &mut self.frames,
            page,
            address.align_down::<Size4K>(),
            PageEntryBits::new_user_rw(),
        ) {
            self.frames.release(page);
            return Err(err.into());
        }
        Ok(())
    }

    /// Prepare `[address, address + size)` of the current process for a
    /// kernel write: every present read-only page is unshared first, since
    /// writes from kernel mode do not fault on read-only pages.
    ///
    /// # Errors
    /// Unsharing failed; the process has been terminated.
    pub fn verify_area<E: KernelEnv>(&mut self, env: &mut E, address: VirtualAddress, size: u32) -> Result<(), MmError> {
        let pid = env.current();
        let space = env.address_space(pid).ok_or(MmError::UnknownProcess)?;

        let start = address.align_down::<Size4K>();
        let mut remaining = u64::from(size) + u64::from(address.as_u32() - start.as_u32());
        let mut va = start;
        while remaining > 0 {
            let read_only = space
                .entry(&self.memory, va)
                .is_some_and(|entry| entry.is_present() && !entry.is_writable());
            if read_only {
                self.handle_fault(env, FaultKind::WriteProtect, va)?;
            }

            remaining = remaining.saturating_sub(u64::from(PAGE_SIZE));
            match va.checked_add(PAGE_SIZE) {
                Some(next) => va = next,
                None => break,
            }
        }
        Ok(())
    }
}
