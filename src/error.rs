use thiserror::Error;

use crate::properties::MemoryProperties;

/// Errors surfaced by a driver adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// The device rejected the allocation.
    #[error("out of device memory")]
    OutOfDeviceMemory,
    /// A handle passed to the driver was stale or unknown.
    #[error("invalid driver handle")]
    InvalidHandle,
    /// The memory object could not be mapped into host address space.
    #[error("mapping device memory failed")]
    MapFailed,
    /// Any other failure reported by the driver.
    #[error("driver call failed: {0}")]
    Other(&'static str),
}

/// Errors surfaced by the allocator.
///
/// Driver failures are wrapped so the caller can tell which driver operation
/// failed while keeping the underlying [`DriverError`] as the source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The caller passed a request or region the allocator cannot act on.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// No driver memory type satisfies the requested properties.
    #[error("no compatible memory type for {0}")]
    NoCompatibleMemoryType(MemoryProperties),
    /// Creating another block would exceed the configured ceiling.
    #[error("block limit of {0} reached")]
    BlockLimitReached(usize),
    /// No free range in the block can hold the request.
    #[error("no free range large enough in block")]
    OutOfBlock,
    /// Device memory allocation failed.
    #[error("device memory allocation failed")]
    DriverAllocationFailed(#[source] DriverError),
    /// Buffer creation failed.
    #[error("buffer creation failed")]
    DriverBufferCreationFailed(#[source] DriverError),
    /// Binding a buffer to its block's device memory failed.
    #[error("buffer bind failed")]
    DriverBindFailed(#[source] DriverError),
    /// Mapping the region's device memory failed.
    #[error("mapping region failed")]
    DriverMapFailed(#[source] DriverError),
    /// The region's block is not host visible.
    #[error("region is not mappable")]
    NotMappable,
    /// Bookkeeping drifted; counters were clamped and work continued.
    #[error("internal inconsistency: {0}")]
    InternalInconsistency(&'static str),
}
