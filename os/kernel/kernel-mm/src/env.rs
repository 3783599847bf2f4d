//! # Kernel Collaborators
//!
//! The memory manager does not own processes, executables or disks. It
//! reaches them through the traits in this module, which the rest of the
//! kernel (or a test harness) implements:
//!
//! - [`ProcessTable`]: the current process, every other live process, their
//!   address spaces and image layouts, and termination on fatal faults.
//! - [`ImageStore`]: open counts, devices and the logical-to-physical block
//!   map of executable images.
//! - [`BlockDevice`]: synchronous block reads.
//!
//! [`KernelEnv`] bundles all three for the fault path.

use crate::MmError;
use core::fmt;
use kernel_info::memory::{BLOCK_SIZE, BLOCKS_PER_PAGE};
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::{AddressSpace, FrameBytes};

/// Identity of an executable image (its inode).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ExecutableId(pub u32);

pub type DeviceId = u16;

/// Physical block number on a device. Zero means "hole": nothing allocated.
pub type BlockNumber = u32;

/// One storage block.
pub type Block = [u8; BLOCK_SIZE as usize];

/// Where a process' image lives in its linear address space.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ProcessImage {
    /// Executable the process was started from, if any.
    pub executable: Option<ExecutableId>,
    /// Linear address of the first code byte.
    pub start_code: VirtualAddress,
    /// Length of the code segment.
    pub end_code: u32,
    /// Length of code plus initialized data; image-backed pages end here.
    pub end_data: u32,
    /// Current program break.
    pub brk: u32,
}

impl ProcessImage {
    /// A process with no backing executable: every fault gets a zero page.
    #[must_use]
    pub const fn anonymous(start_code: VirtualAddress) -> Self {
        Self {
            executable: None,
            start_code,
            end_code: 0,
            end_data: 0,
            brk: 0,
        }
    }

    /// Offset of `address` from the start of the image, `None` below it.
    #[inline]
    #[must_use]
    pub const fn offset_of(&self, address: VirtualAddress) -> Option<u32> {
        address.checked_offset_from(self.start_code)
    }

    /// The executable backing the page at image offset `offset`, if the page
    /// lies within code or initialized data.
    #[inline]
    #[must_use]
    pub const fn backing(&self, offset: u32) -> Option<ExecutableId> {
        if offset < self.end_data {
            self.executable
        } else {
            None
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BlockError {
    #[error("I/O error on device {device:#06x}, block {block}")]
    Io { device: DeviceId, block: BlockNumber },
}

/// Synchronous block storage.
pub trait BlockDevice {
    /// Read one block.
    ///
    /// # Errors
    /// [`BlockError::Io`] if the device fails.
    fn read_block(&mut self, device: DeviceId, block: BlockNumber) -> Result<Block, BlockError>;

    /// Fill `page` from four blocks, in order. Holes (block `0`) read as zeros.
    ///
    /// # Errors
    /// The first failing block read; `page` is partially filled then.
    fn read_page(
        &mut self,
        device: DeviceId,
        blocks: [BlockNumber; BLOCKS_PER_PAGE],
        page: &mut FrameBytes,
    ) -> Result<(), BlockError> {
        for (chunk, block) in page.chunks_exact_mut(BLOCK_SIZE as usize).zip(blocks) {
            if block == 0 {
                chunk.fill(0);
            } else {
                chunk.copy_from_slice(&self.read_block(device, block)?);
            }
        }
        Ok(())
    }
}

/// Metadata of open executable images.
pub trait ImageStore {
    /// Number of live references (open files, running processes) to `executable`.
    fn open_count(&self, executable: ExecutableId) -> usize;

    fn device(&self, executable: ExecutableId) -> DeviceId;

    /// Physical block holding logical block `block` of `executable`, `0` for a hole.
    fn bmap(&self, executable: ExecutableId, block: u32) -> BlockNumber;
}

/// The process table as seen by the memory manager.
pub trait ProcessTable {
    type Pid: Copy + Eq + fmt::Debug;

    /// The process on whose behalf the kernel is running.
    fn current(&self) -> Self::Pid;

    /// Every live process, the current one included.
    fn processes(&self) -> impl Iterator<Item = Self::Pid> + '_;

    fn address_space(&self, pid: Self::Pid) -> Option<AddressSpace>;

    fn image(&self, pid: Self::Pid) -> Option<ProcessImage>;

    /// End `pid` after a fault it cannot survive. Its address space is torn
    /// down later through the normal exit path.
    fn terminate_with_fault(&mut self, pid: Self::Pid, error: MmError);
}

/// Everything the fault handler needs from the rest of the kernel.
pub trait KernelEnv: ProcessTable + ImageStore + BlockDevice {}

impl<T: ProcessTable + ImageStore + BlockDevice> KernelEnv for T {}
