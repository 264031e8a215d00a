//! Errors surfaced while constructing a table or binding an allocator.
//!
//! Lookups never fail: a missing element is reported as `None`. Allocation
//! failures after construction latch the table's out-of-memory flag instead
//! of producing an error, see [`HashTable::oom`](crate::HashTable::oom).

/// Error types for table construction and allocator configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone, Copy)]
pub enum TableError {
    /// The requested capacity cannot be represented as a power-of-two bucket
    /// count, or the bucket array would not fit in the address space.
    #[error("requested capacity overflows the addressable bucket count")]
    CapacityOverflow,

    /// The bound allocator returned no memory for the bucket array.
    #[error("allocation of {size} bytes (align {align}) failed")]
    AllocationFailed {
        /// Size of the rejected allocation in bytes.
        size: usize,
        /// Alignment of the rejected allocation.
        align: usize,
    },

    /// The process-wide default allocator has already been installed.
    #[error("a default allocator has already been installed")]
    AllocatorAlreadyInstalled,
}

/// Result type for table construction.
pub type Result<T> = core::result::Result<T, TableError>;
