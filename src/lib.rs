#![warn(missing_docs)]

//! Two-level GPU memory allocator.
//!
//! GPU drivers charge a high fixed cost per raw allocation and cap the number
//! of concurrent allocations. This crate amortizes both by acquiring large
//! **blocks** of device memory and carving smaller **regions** out of them;
//! every region comes with a buffer handle already bound at its offset inside
//! the parent block.
//!
//! The allocator is generic over a [`driver::DriverAdapter`], which wraps the
//! concrete GPU API. A host-memory [`driver::BytesDriver`] is provided for
//! exercising allocation policy without a device.
//!
//! Allocator instances expose no internal synchronization; embedders
//! serialize access at their own boundary. The only process-wide state is
//! the allocation callbacks cell in [`callbacks`].

#[macro_use]
extern crate derive_new;

mod id;

/// Process-wide allocation callbacks.
pub mod callbacks;
/// Runtime configuration of the block pool.
pub mod config;
/// Driver adapter interface.
pub mod driver;
/// Error types.
pub mod error;
/// Memory property triples and allocation requests.
pub mod properties;

mod allocator;
mod block;
mod memory_type;
mod region;
mod stats;

pub use allocator::{Allocator, Region};
pub use config::AllocatorConfig;
pub use error::{AllocError, DriverError};
pub use properties::{
    MemoryCaching, MemoryProperties, MemoryRequest, MemoryUsage, MemoryVisibility,
};
pub use stats::AllocatorStats;
