//! User memory access as the MMU performs it.
//!
//! Every byte goes through the current process' page tables. A missing or
//! read-only page raises the same fault a user access would, after which the
//! access is retried. Successful accesses set the accessed bit, and writes
//! also set the dirty bit.

use crate::env::KernelEnv;
use crate::fault::FaultKind;
use crate::{MemoryManager, MmError};
use kernel_alloc::frame_alloc::AllocPolicy;
use kernel_info::memory::PAGE_BYTES;
use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};
use kernel_vmem::{PhysMapper, PtEntry};

/// A fault resolves with at most two retries: not present, then write-protect.
const MAX_FAULTS: usize = 3;

impl<P: AllocPolicy> MemoryManager<P> {
    /// Write `bytes` to the current process at `address`.
    ///
    /// # Errors
    /// A fault on the way could not be resolved; the process has been
    /// terminated and the write is incomplete.
    ///
    /// # Panics
    /// The range wraps around the end of the linear address space.
    pub fn copy_to_user<E: KernelEnv>(&mut self, env: &mut E, address: VirtualAddress, bytes: &[u8]) -> Result<(), MmError> {
        let mut va = address;
        for chunk in page_chunks(address, bytes.len()) {
            let page = self.access(env, va, true)?;
            let offset = va.offset::<Size4K>().as_usize();
            let source = &bytes[chunk.clone()];
            self.memory.frame_mut(page)[offset..offset + source.len()].copy_from_slice(source);
            va = advance(va, chunk.len());
        }
        Ok(())
    }

    /// Read `buf.len()` bytes of the current process at `address`.
    ///
    /// # Errors
    /// See [`copy_to_user`](Self::copy_to_user).
    ///
    /// # Panics
    /// The range wraps around the end of the linear address space.
    pub fn copy_from_user<E: KernelEnv>(&mut self, env: &mut E, address: VirtualAddress, buf: &mut [u8]) -> Result<(), MmError> {
        let mut va = address;
        for chunk in page_chunks(address, buf.len()) {
            let page = self.access(env, va, false)?;
            let offset = va.offset::<Size4K>().as_usize();
            let target = &mut buf[chunk.clone()];
            target.copy_from_slice(&self.memory.frame(page)[offset..offset + target.len()]);
            va = advance(va, chunk.len());
        }
        Ok(())
    }

    /// The frame backing `va`, faulting it in as needed.
    fn access<E: KernelEnv>(&mut self, env: &mut E, va: VirtualAddress, write: bool) -> Result<PhysicalPage<Size4K>, MmError> {
        let pid = env.current();
        for _ in 0..MAX_FAULTS {
            let space = env.address_space(pid).ok_or(MmError::UnknownProcess)?;
            let entry = space.entry(&self.memory, va).unwrap_or(PtEntry::zero());
            let kind = match entry.page() {
                None => FaultKind::NotPresent,
                Some(_) if write && !entry.is_writable() => FaultKind::WriteProtect,
                Some(page) => {
                    space.update_entry(&mut self.memory, va, |entry| entry.touched(write));
                    return Ok(page);
                }
            };
            self.handle_fault(env, kind, va)?;
        }
        panic!("fault at {va} keeps recurring");
    }
}

/// Byte ranges of a `len`-byte access at `address` that each stay within a page.
fn page_chunks(address: VirtualAddress, len: usize) -> impl Iterator<Item = core::ops::Range<usize>> {
    assert!(
        u64::from(address.as_u32()) + len as u64 <= 1 << 32,
        "user access at {address} wraps around"
    );

    let first = PAGE_BYTES - address.offset::<Size4K>().as_usize();
    let mut start = 0;
    core::iter::from_fn(move || {
        if start >= len {
            return None;
        }
        let room = if start == 0 { first } else { PAGE_BYTES };
        let end = (start + room).min(len);
        let chunk = start..end;
        start = end;
        Some(chunk)
    })
}

fn advance(va: VirtualAddress, by: usize) -> VirtualAddress {
    // The last chunk may end exactly at 4 GiB; nothing is accessed past it.
    va.checked_add(by as u32).unwrap_or(VirtualAddress::zero())
}
