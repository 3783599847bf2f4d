//! # Kernel Memory Manager
//!
//! Virtual memory for a small monolithic kernel on 32-bit two-level paging:
//! reference-counted frames, fork by copy-on-write, demand loading of
//! executable images and sharing of clean image pages between processes
//! running the same executable.
//!
//! ## Overview
//!
//! - [`MemoryManager`] owns physical memory and the frame counts. Address
//!   spaces are created, cloned and destroyed through it.
//! - [`MemoryManager::handle_fault`] resolves page faults of the current
//!   process:
//!
//! ```text
//!   write-protect ──► single reference? ──yes──► make writable
//!        │                  └──no──► copy frame, drop shared reference
//!        └─ nothing mapped ─┐
//!   not present ────────────┴─► beyond data / no executable? ──► zero page
//!                                   └─► clean copy in a peer? ──► share
//!                                           └─► read four blocks from storage
//! ```
//!
//! - [`env`] declares what the manager needs from the rest of the kernel:
//!   the process table, executable metadata and a block device.
//! - [`MemoryManager::copy_to_user`] and [`MemoryManager::copy_from_user`]
//!   access user memory the way the MMU does, faulting pages in as needed.
//! - [`MemoryManager::check_refcounts`] audits frame counts against the
//!   page tables.
//!
//! ## Example
//! ```rust
//! use kernel_info::layout::MemoryLayout;
//! use kernel_info::memory::TASK_SIZE;
//! use kernel_memory_addresses::VirtualAddress;
//! use kernel_mm::{MemoryManager, MmConfig};
//!
//! let mut mm = MemoryManager::new(MmConfig::new(MemoryLayout::new(0x0020_0000))).unwrap();
//! let base = VirtualAddress::new(TASK_SIZE);
//! let parent = mm.create_address_space(None, base, TASK_SIZE).unwrap();
//! let child = mm.create_address_space(Some(parent), base, TASK_SIZE).unwrap();
//! assert_eq!(mm.check_refcounts(&[parent, child]), Ok(()));
//!
//! mm.destroy_address_space(child, base, TASK_SIZE);
//! mm.destroy_address_space(parent, base, TASK_SIZE);
//! assert_eq!(mm.frames().stats().used, 0);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::cast_possible_truncation)]

extern crate alloc;

mod access;
mod audit;
mod config;
mod demand;
pub mod env;
mod error;
pub mod fault;
mod manager;
mod share;

pub use crate::audit::{MemoryReport, RefCountMismatch};
pub use crate::config::MmConfig;
pub use crate::demand::image_blocks;
pub use crate::error::MmError;
pub use crate::fault::{FaultKind, PageFaultError, Resolution};
pub use crate::manager::MemoryManager;
