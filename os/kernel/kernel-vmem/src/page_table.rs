//! # Paging Structures

pub mod pd;
pub mod pt;

use crate::page_table::pd::DirIndex;
use crate::page_table::pt::TableIndex;
use kernel_memory_addresses::VirtualAddress;

/// Split a linear address into its directory and table slots.
#[inline]
#[must_use]
pub const fn split_indices(va: VirtualAddress) -> (DirIndex, TableIndex) {
    (DirIndex::from(va), TableIndex::from(va))
}

/// Linear address mapped by slot `table` of the table linked at `dir`.
#[inline]
#[must_use]
pub const fn join_indices(dir: DirIndex, table: TableIndex) -> VirtualAddress {
    VirtualAddress::new(((dir.as_usize() as u32) << 22) | ((table.as_usize() as u32) << 12))
}
