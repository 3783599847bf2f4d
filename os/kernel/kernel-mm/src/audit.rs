//! Reference-count audit and memory report.

use crate::MemoryManager;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use kernel_alloc::frame_alloc::{AllocPolicy, FrameStats};
use kernel_memory_addresses::{PhysicalPage, Size4K};
use kernel_vmem::{AddressSpace, DirIndex, FrameAlloc, PhysMapper};

/// A frame whose count disagrees with the references found in page tables.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("frame {page} has reference count {actual} but {expected} references")]
pub struct RefCountMismatch {
    pub page: PhysicalPage<Size4K>,
    /// Directory, table and page references found.
    pub expected: usize,
    /// Count kept by the allocator.
    pub actual: u16,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MemoryReport {
    pub frames: FrameStats,
    /// Present entries of each page table linked in the reported space.
    pub tables: Vec<(DirIndex, usize)>,
}

impl<P: AllocPolicy> MemoryManager<P> {
    /// Check that every managed frame's count equals the number of
    /// references to it in `spaces`: one per directory, one per linked
    /// table and one per present entry.
    ///
    /// `spaces` must be every live address space. Frames held outside page
    /// tables (e.g. argument pages not installed yet) show up as mismatches.
    ///
    /// # Errors
    /// The first frame found with a wrong count.
    pub fn check_refcounts(&self, spaces: &[AddressSpace]) -> Result<(), RefCountMismatch> {
        let mut expected = BTreeMap::<PhysicalPage<Size4K>, usize>::new();
        let mut count = |page: PhysicalPage<Size4K>| {
            if self.frames.manages(page) {
                *expected.entry(page).or_default() += 1;
            }
        };

        for space in spaces {
            count(space.root_page());
            space.for_each_table(&self.memory, |_, table| count(table));
            space.for_each_mapping(&self.memory, |_, entry| {
                if let Some(page) = entry.page() {
                    count(page);
                }
            });
        }

        for (page, actual) in self.frames.allocated() {
            let expected = expected.remove(&page).unwrap_or(0);
            if expected != usize::from(actual) {
                return Err(RefCountMismatch { page, expected, actual });
            }
        }

        // Referenced, but free or reserved.
        match expected.into_iter().next() {
            Some((page, expected)) => Err(RefCountMismatch {
                page,
                expected,
                actual: self.frames.ref_count(page).unwrap_or(0),
            }),
            None => Ok(()),
        }
    }

    /// Free frames and the page-table population of `space`, also written to
    /// the log.
    #[must_use]
    pub fn report(&self, space: AddressSpace) -> MemoryReport {
        let frames = self.frames.stats();
        log::info!("{}/{} free pages", frames.free, frames.total);

        let mut tables = Vec::new();
        space.for_each_table(&self.memory, |slot, table| {
            let used = self.memory.table(table).present_count();
            log::info!("Pg-dir[{}] uses {used} pages", slot.as_usize());
            tables.push((slot, used));
        });

        MemoryReport { frames, tables }
    }
}
