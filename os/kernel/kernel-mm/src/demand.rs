//! Demand loading of executable pages.
//!
//! Page `n` of an image starts at logical block `1 + n * 4`: block zero
//! holds the executable header. Bytes of the last page past the end of the
//! initialized data are cleared so the bss starts out zero.

use crate::env::{BlockDevice, BlockNumber, ExecutableId, ImageStore, ProcessImage};
use crate::{MemoryManager, MmError};
use kernel_alloc::frame_alloc::AllocPolicy;
use kernel_info::memory::{BLOCK_SIZE, BLOCKS_PER_PAGE, PAGE_BYTES, PAGE_SIZE};
use kernel_memory_addresses::{PhysicalPage, Size4K};
use kernel_vmem::PhysMapper;

/// Logical blocks holding the page at image offset `offset`.
#[must_use]
pub const fn image_blocks(offset: u32) -> [u32; BLOCKS_PER_PAGE] {
    let first = 1 + offset / BLOCK_SIZE;
    let mut blocks = [0; BLOCKS_PER_PAGE];
    let mut i = 0;
    while i < BLOCKS_PER_PAGE {
        blocks[i] = first + i as u32;
        i += 1;
    }
    blocks
}

impl<P: AllocPolicy> MemoryManager<P> {
    /// Fill `page` with the image page at `offset` of `executable`.
    pub(crate) fn load_image_page<E: ImageStore + BlockDevice>(
        &mut self,
        env: &mut E,
        image: &ProcessImage,
        executable: ExecutableId,
        offset: u32,
        page: PhysicalPage<Size4K>,
    ) -> Result<(), MmError> {
        let device = env.device(executable);
        let blocks: [BlockNumber; BLOCKS_PER_PAGE] =
            image_blocks(offset).map(|block| env.bmap(executable, block));
        log::trace!("{executable:?}+{offset:#x}: reading blocks {blocks:?} from {device:#06x}");

        let frame = self.memory.frame_mut(page);
        env.read_page(device, blocks, frame)?;

        let end = offset.saturating_add(PAGE_SIZE);
        if end > image.end_data {
            let tail = ((end - image.end_data) as usize).min(PAGE_BYTES);
            frame[PAGE_BYTES - tail..].fill(0);
        }
        Ok(())
    }
}
