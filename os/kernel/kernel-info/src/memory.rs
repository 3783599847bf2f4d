//! # Memory Layout

/// Size of a page frame in bytes.
pub const PAGE_SIZE: u32 = 4096;

/// `PAGE_SIZE` as a `usize` for buffer lengths.
pub const PAGE_BYTES: usize = PAGE_SIZE as usize;

/// Number of entries in a page table and in a page directory.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// Linear span covered by a single page-directory entry.
pub const DIRECTORY_SPAN: u32 = PAGE_SIZE * ENTRIES_PER_TABLE as u32;

/// Frames below this physical address belong to the kernel and are never
/// reference counted.
pub const LOW_MEM: u32 = 0x0010_0000; // 1 MiB

/// Amount of memory managed by the frame allocator at most.
pub const PAGING_MEMORY: u32 = 15 * 1024 * 1024;

/// Number of frames that can be tracked.
pub const PAGING_PAGES: usize = (PAGING_MEMORY / PAGE_SIZE) as usize;

/// Default end of physical memory (exclusive).
pub const HIGH_MEMORY: u32 = LOW_MEM + PAGING_MEMORY; // 16 MiB

/// Reference count stored for frames that must never be handed out.
pub const USED: u16 = 100;

/// Linear size of one task slot (code, data and stack of one process).
pub const TASK_SIZE: u32 = 64 * 1024 * 1024;

/// Storage block size of executable images.
pub const BLOCK_SIZE: u32 = 1024;

/// Number of storage blocks that make up one page.
pub const BLOCKS_PER_PAGE: usize = (PAGE_SIZE / BLOCK_SIZE) as usize;

/// When cloning the kernel's own range (starting at linear address 0) only
/// this many entries per table are copied: the first 640 KiB.
pub const LOW_CLONE_ENTRIES: usize = 0xA0;

/// Pages reserved for `argv`/`envp` at the top of the data segment.
pub const MAX_ARG_PAGES: usize = 32;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(DIRECTORY_SPAN == 4 * 1024 * 1024);
    assert!(LOW_MEM.is_multiple_of(PAGE_SIZE));
    assert!(HIGH_MEMORY.is_multiple_of(PAGE_SIZE));
    assert!(TASK_SIZE.is_multiple_of(DIRECTORY_SPAN));
    assert!(LOW_CLONE_ENTRIES <= ENTRIES_PER_TABLE);
    assert!(BLOCKS_PER_PAGE * BLOCK_SIZE as usize == PAGE_BYTES);
    assert!(MAX_ARG_PAGES * PAGE_BYTES < TASK_SIZE as usize);
};
