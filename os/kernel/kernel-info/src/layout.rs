//! # Boot-time Memory Layout
//!
//! The physical layout detected at boot. The frame allocator tracks every
//! frame in `[low_mem, high_memory)` but only hands out frames at or above
//! `main_memory_start`; the frames in between hold the buffer cache.

use crate::memory::{HIGH_MEMORY, LOW_MEM, PAGE_SIZE, PAGING_MEMORY};

/// Physical memory layout.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryLayout {
    /// First tracked physical address.
    pub low_mem: u32,
    /// First address handed out by the frame allocator.
    pub main_memory_start: u32,
    /// End of physical memory (exclusive).
    pub high_memory: u32,
}

impl MemoryLayout {
    /// A layout with no reserved buffer cache.
    #[must_use]
    pub const fn new(high_memory: u32) -> Self {
        Self {
            low_mem: LOW_MEM,
            main_memory_start: LOW_MEM,
            high_memory,
        }
    }

    /// Reserve `[low_mem, main_memory_start)` for the buffer cache.
    #[must_use]
    pub const fn with_main_memory_start(mut self, main_memory_start: u32) -> Self {
        self.main_memory_start = main_memory_start;
        self
    }

    /// Number of tracked frames.
    #[must_use]
    pub const fn tracked_frames(&self) -> usize {
        ((self.high_memory - self.low_mem) / PAGE_SIZE) as usize
    }

    /// Checks alignment and ordering of the boundaries.
    ///
    /// # Errors
    /// Returns the first violated constraint.
    pub const fn validate(&self) -> Result<(), LayoutError> {
        if !self.low_mem.is_multiple_of(PAGE_SIZE)
            || !self.main_memory_start.is_multiple_of(PAGE_SIZE)
            || !self.high_memory.is_multiple_of(PAGE_SIZE)
        {
            return Err(LayoutError::Unaligned);
        }
        if self.low_mem > self.main_memory_start || self.main_memory_start > self.high_memory {
            return Err(LayoutError::Unordered);
        }
        if self.high_memory - self.low_mem > PAGING_MEMORY {
            return Err(LayoutError::TooLarge {
                high_memory: self.high_memory,
            });
        }
        Ok(())
    }
}

impl Default for MemoryLayout {
    fn default() -> Self {
        Self::new(HIGH_MEMORY)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum LayoutError {
    #[error("memory boundaries must be page aligned")]
    Unaligned,
    #[error("expected low_mem <= main_memory_start <= high_memory")]
    Unordered,
    #[error("high memory {high_memory:#x} exceeds the trackable paging memory")]
    TooLarge { high_memory: u32 },
}
