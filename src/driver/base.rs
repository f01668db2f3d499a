use core::ptr::NonNull;

use enumset::{EnumSet, EnumSetType};

use crate::callbacks::AllocationCallbacks;
use crate::error::DriverError;

/// Property flags a driver memory type may carry.
#[derive(EnumSetType, Debug, Hash)]
pub enum MemoryPropertyFlag {
    /// Fastest memory for device access.
    DeviceLocal,
    /// Mappable into host address space.
    HostVisible,
    /// Host writes are visible to the device without explicit flushes.
    HostCoherent,
    /// Host reads go through the host cache.
    HostCached,
}

/// Set of [`MemoryPropertyFlag`]s.
pub type MemoryPropertyFlags = EnumSet<MemoryPropertyFlag>;

/// Usage flags a buffer is created with.
#[derive(EnumSetType, Debug, Hash)]
pub enum BufferUsageFlag {
    /// Bindable as a uniform buffer.
    UniformBuffer,
    /// Bindable as a storage buffer.
    StorageBuffer,
    /// Source of transfer commands.
    TransferSrc,
    /// Destination of transfer commands.
    TransferDst,
}

/// Set of [`BufferUsageFlag`]s.
pub type BufferUsageFlags = EnumSet<BufferUsageFlag>;

/// Opaque device memory handle minted by a driver adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceMemory {
    raw: u64,
}

impl DeviceMemory {
    /// Wrap a raw driver value.
    pub fn from_raw(raw: u64) -> Self {
        Self { raw }
    }

    /// The raw driver value.
    pub fn to_raw(self) -> u64 {
        self.raw
    }
}

/// Opaque buffer handle minted by a driver adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Buffer {
    raw: u64,
}

impl Buffer {
    /// Wrap a raw driver value.
    pub fn from_raw(raw: u64) -> Self {
        Self { raw }
    }

    /// The raw driver value.
    pub fn to_raw(self) -> u64 {
        self.raw
    }
}

/// One memory type reported by the driver. The position in the reported
/// list is the driver's memory-type index.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryType {
    /// Property flags of this type.
    pub flags: MemoryPropertyFlags,
}

/// Device limits relevant to sub-allocation.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Minimum offset alignment for uniform buffer bindings.
    pub min_uniform_buffer_offset_alignment: u64,
    /// Minimum offset alignment for storage buffer bindings.
    pub min_storage_buffer_offset_alignment: u64,
}

/// Memory requirements reported for buffers of a given usage.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRequirements {
    /// Required alignment of the bound memory offset.
    pub alignment: u64,
}

/// The opaque driver surface the allocator drives.
///
/// Implementations wrap a concrete GPU API; the allocator never sees raw
/// device objects, only the handles minted here. All calls are synchronous
/// and may fail, but never suspend.
pub trait DriverAdapter {
    /// Allocate `size` bytes of device memory from the given memory type.
    fn allocate_device_memory(
        &mut self,
        size: u64,
        memory_type: u32,
    ) -> Result<DeviceMemory, DriverError>;

    /// Return device memory to the driver.
    fn free_device_memory(&mut self, memory: DeviceMemory);

    /// Create an unbound buffer of `size` bytes.
    fn create_buffer(&mut self, size: u64, usage: BufferUsageFlags) -> Result<Buffer, DriverError>;

    /// Destroy a buffer.
    fn destroy_buffer(&mut self, buffer: Buffer);

    /// Bind a buffer at `offset` inside a device memory allocation.
    fn bind_buffer(
        &mut self,
        buffer: Buffer,
        memory: DeviceMemory,
        offset: u64,
    ) -> Result<(), DriverError>;

    /// Map `size` bytes at `offset` of a device memory allocation.
    fn map_memory(
        &mut self,
        memory: DeviceMemory,
        offset: u64,
        size: u64,
    ) -> Result<NonNull<u8>, DriverError>;

    /// Unmap a previously mapped allocation.
    fn unmap_memory(&mut self, memory: DeviceMemory);

    /// The memory types the device offers, in driver order.
    fn query_memory_types(&self) -> Vec<MemoryType>;

    /// Device limits relevant to sub-allocation.
    fn query_device_limits(&self) -> DeviceLimits;

    /// Memory requirements for buffers created with `usage`.
    fn query_buffer_requirements(&self, usage: BufferUsageFlags) -> BufferRequirements;

    /// Install host-side allocation callbacks for driver-internal
    /// bookkeeping. Adapters without such a notion ignore the call.
    fn install_callbacks(&mut self, _callbacks: Option<AllocationCallbacks>) {}
}
