//! # Page Sharing
//!
//! Processes running the same executable can share the image pages neither
//! of them has written to. Before a page is read from storage, the other
//! processes of that executable are asked for a clean copy at the same image
//! offset. Sharing write-protects both entries, so a later write by either
//! side is resolved copy-on-write.

use crate::env::{ExecutableId, KernelEnv, ProcessImage};
use crate::{MemoryManager, MmError};
use kernel_alloc::frame_alloc::AllocPolicy;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::{AddressSpace, FrameAlloc, PhysMapper, TableIndex, Tlb};

impl<P: AllocPolicy> MemoryManager<P> {
    /// Look for a clean copy of the page at image offset `offset` in another
    /// process running `executable` and map it into `space`.
    pub(crate) fn share_page<E: KernelEnv>(
        &mut self,
        env: &E,
        pid: E::Pid,
        space: AddressSpace,
        image: &ProcessImage,
        executable: ExecutableId,
        offset: u32,
    ) -> Result<bool, MmError> {
        // Only this process holds the executable.
        if env.open_count(executable) < 2 {
            return Ok(false);
        }
        let Some(to) = image.start_code.checked_add(offset) else {
            return Ok(false);
        };

        for other in env.processes() {
            if other == pid {
                continue;
            }
            let Some(peer) = env.image(other) else {
                continue;
            };
            if peer.executable != Some(executable) {
                continue;
            }
            let (Some(peer_space), Some(from)) = (env.address_space(other), peer.start_code.checked_add(offset)) else {
                continue;
            };

            if self.try_to_share(peer_space, from, space, to)? {
                log::debug!("{pid:?} shares {executable:?}+{offset:#x} with {other:?}");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Share the page mapped at `from` in `from_space` into `to_space` at `to`.
    ///
    /// Only a present, clean page backed by a managed frame is shared. Both
    /// entries end up read-only and the frame gains a reference. Returns
    /// whether the page was shared.
    ///
    /// # Panics
    /// Something is already mapped at `to`.
    ///
    /// # Errors
    /// [`MmError::OutOfMemory`] if `to` needs a page table and no frame is left.
    pub fn try_to_share(
        &mut self,
        from_space: AddressSpace,
        from: VirtualAddress,
        to_space: AddressSpace,
        to: VirtualAddress,
    ) -> Result<bool, MmError> {
        let Some(entry) = from_space.entry(&self.memory, from) else {
            return Ok(false);
        };
        let Some(page) = entry.page() else {
            return Ok(false);
        };
        if !entry.flags().is_clean() || !self.frames.manages(page) {
            return Ok(false);
        }

        let to_table = to_space.ensure_table(&mut self.memory, &mut self.frames, to)?;
        let to_index = TableIndex::from(to);
        assert!(
            !self.memory.table(to_table).get(to_index).is_present(),
            "try_to_share: to_page already exists"
        );

        let shared = entry.write_protected();
        from_space.update_entry(&mut self.memory, from, |_| shared);
        self.memory.table_mut(to_table).set(to_index, shared);
        self.memory.flush_all();
        self.frames.retain(page);
        Ok(true)
    }
}
