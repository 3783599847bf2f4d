//! # Physical Memory Management
//!
//! The bottom layer of the memory subsystem: who owns which page frame, and
//! how the kernel reaches a frame's contents.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │       Address spaces, faults, sharing (kernel-mm)   │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ FrameAlloc / PhysMapper / Tlb
//! ┌─────────────────▼───────────────────────────────────┐
//! │  RefCountFrameAlloc          PhysicalMemory         │
//! │  • one u16 count per frame   • frame arena          │
//! │  • pluggable pick policy     • typed table views    │
//! │                              • flush accounting     │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Physical Frame Allocator ([`frame_alloc`])
//!
//! A byte map with one reference count per frame in `[LOW_MEM, high_memory)`.
//! Frames below `LOW_MEM` hold the kernel itself and are not tracked; frames
//! reserved for the buffer cache carry the `USED` marker forever.
//!
//! ## Physical Memory ([`phys_mapper`])
//!
//! Identity-mapped RAM modelled as an arena of 4 KiB frames addressed by
//! frame number. Page directories and page tables are typed views into the
//! same frames that hold user data.
//!
//! ## Usage
//! ```rust
//! use kernel_alloc::frame_alloc::RefCountFrameAlloc;
//! use kernel_info::layout::MemoryLayout;
//! use kernel_vmem::FrameAlloc;
//!
//! let layout = MemoryLayout::new(0x0020_0000);
//! let mut frames = RefCountFrameAlloc::new(&layout);
//! let frame = frames.alloc_4k().expect("free frame");
//! frames.retain(frame);
//! assert_eq!(frames.ref_count(frame), Some(2));
//! frames.release(frame);
//! frames.release(frame);
//! assert_eq!(frames.stats().free, 256);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod frame_alloc;
pub mod phys_mapper;
