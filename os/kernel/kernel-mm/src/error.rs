use crate::env::BlockError;
use kernel_vmem::AddressSpaceError;

/// Recoverable memory-management failures.
///
/// Each one ends the faulting process; the kernel keeps running. Invariant
/// violations (misaligned ranges, double frees, occupied slots) are not
/// represented here: they panic.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MmError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("cannot read executable image: {0}")]
    ImageRead(#[from] BlockError),
    #[error("no process descriptor for the current task")]
    UnknownProcess,
}

impl From<AddressSpaceError> for MmError {
    fn from(value: AddressSpaceError) -> Self {
        match value {
            AddressSpaceError::OutOfMemory => Self::OutOfMemory,
        }
    }
}
