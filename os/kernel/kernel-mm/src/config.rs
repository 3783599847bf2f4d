//! Runtime configuration of the memory manager.

use kernel_info::layout::MemoryLayout;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MmConfig {
    /// Physical memory layout detected at boot.
    pub layout: MemoryLayout,
    /// Clear frames handed out for anonymous (zero-demand) pages.
    pub zero_fill_anonymous: bool,
    /// Look for a clean copy in processes running the same executable before
    /// reading a page from storage.
    pub share_clean_pages: bool,
}

impl MmConfig {
    #[must_use]
    pub const fn new(layout: MemoryLayout) -> Self {
        Self {
            layout,
            zero_fill_anonymous: true,
            share_clean_pages: true,
        }
    }

    #[must_use]
    pub const fn with_zero_fill(mut self, enabled: bool) -> Self {
        self.zero_fill_anonymous = enabled;
        self
    }

    #[must_use]
    pub const fn with_sharing(mut self, enabled: bool) -> Self {
        self.share_clean_pages = enabled;
        self
    }
}

impl Default for MmConfig {
    fn default() -> Self {
        Self::new(MemoryLayout::default())
    }
}
