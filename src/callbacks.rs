//! Process-wide allocation callbacks.
//!
//! A single cell behind a spinlock holds the hooks a driver adapter may use
//! for its host-side bookkeeping allocations. The cell is process-wide;
//! [`Allocator::new`](crate::Allocator::new) snapshots it once, so changing
//! the callbacks mid-run only affects allocators created afterward.

/// Host-side allocation hooks handed to the driver adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationCallbacks {
    /// Allocate `size` bytes with the given alignment.
    pub allocate: fn(size: usize, alignment: usize) -> *mut u8,
    /// Free a pointer returned by `allocate`.
    pub free: fn(ptr: *mut u8),
}

static ALLOCATION_CALLBACKS: spin::Mutex<Option<AllocationCallbacks>> = spin::Mutex::new(None);

/// Install process-wide callbacks; `None` restores the driver defaults.
pub fn set_allocation_callbacks(callbacks: Option<AllocationCallbacks>) {
    *ALLOCATION_CALLBACKS.lock() = callbacks;
}

/// Snapshot the currently installed callbacks.
pub fn get_allocation_callbacks() -> Option<AllocationCallbacks> {
    *ALLOCATION_CALLBACKS.lock()
}
