//! # Memory Layout and Paging Configuration
//!
//! The authoritative source for the physical and linear layout constants used
//! by the frame allocator, the page-table code and the fault handler.
//!
//! ## Architecture
//!
//! ### Compile-time layout ([`memory`])
//! Fixed properties of two-level i386 paging and of the process model:
//! * **Paging geometry**: page size, entries per table, the 4 MiB directory span
//! * **Managed memory**: the `LOW_MEM` boundary below which frames are never tracked
//! * **Process images**: the 64 MiB task slot, the 1 KiB storage block, argument pages
//!
//! ### Boot-time layout ([`layout`])
//! The [`MemoryLayout`](layout::MemoryLayout) describes the machine the kernel
//! actually booted on: where the buffer cache ends and how much RAM exists.
//!
//! ```text
//! Physical Memory Layout:
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │  Kernel, page directory, BIOS   │  never tracked
//! LOW_MEM     ├─────────────────────────────────┤ 0x0010_0000 (1 MiB)
//!             │  Buffer cache / RAM disk        │  tracked, permanently USED
//! main_memory ├─────────────────────────────────┤
//!             │  Paging memory                  │  handed out by the frame allocator
//! high_memory └─────────────────────────────────┘
//! ```
//!
//! ```text
//! Linear Address Space (4 GiB):
//! 0x0000_0000 ┌──────────────┐
//!             │  task 0      │  kernel, identity mapped
//! 0x0400_0000 ├──────────────┤
//!             │  task 1      │  code | data | bss | ... | stack + args
//! 0x0800_0000 ├──────────────┤
//!             │  ...         │  one TASK_SIZE slot per task
//!             └──────────────┘
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod layout;
pub mod memory;
