use core::ptr::NonNull;

use hashbrown::HashMap;

use super::{
    Buffer, BufferRequirements, BufferUsageFlags, DeviceLimits, DeviceMemory, DriverAdapter,
    MemoryPropertyFlag, MemoryType,
};
use crate::error::DriverError;

/// Driver adapter backed by host memory.
///
/// Each device-memory allocation is a plain byte buffer and mapping returns a
/// pointer into it, so allocation policy can be exercised end to end without
/// a GPU. Failure injection hooks make the driver error paths reachable from
/// tests.
pub struct BytesDriver {
    memory_types: Vec<MemoryType>,
    limits: DeviceLimits,
    buffer_alignment: u64,
    allocations: HashMap<DeviceMemory, BytesAllocation>,
    buffers: HashMap<Buffer, BufferRecord>,
    next_memory: u64,
    next_buffer: u64,
    fail_next_allocation: bool,
    fail_next_buffer: bool,
    fail_next_bind: bool,
}

struct BytesAllocation {
    bytes: Box<[u8]>,
    memory_type: u32,
    mapped: bool,
}

#[derive(Debug, Clone, Copy)]
struct BufferRecord {
    size: u64,
    bound: Option<(DeviceMemory, u64)>,
}

impl Default for BytesDriver {
    /// A typical discrete-GPU memory-type table: one device-local heap, two
    /// host-visible staging types, and a small device-local host-visible
    /// window.
    fn default() -> Self {
        use MemoryPropertyFlag::*;
        Self::new(
            vec![
                MemoryType::new(DeviceLocal.into()),
                MemoryType::new(HostVisible | HostCoherent),
                MemoryType::new(HostVisible | HostCoherent | HostCached),
                MemoryType::new(DeviceLocal | HostVisible | HostCoherent),
            ],
            DeviceLimits::new(256, 256),
            256,
        )
    }
}

impl BytesDriver {
    /// A driver reporting the given memory types, limits, and buffer
    /// memory-requirement alignment.
    pub fn new(memory_types: Vec<MemoryType>, limits: DeviceLimits, buffer_alignment: u64) -> Self {
        Self {
            memory_types,
            limits,
            buffer_alignment,
            allocations: HashMap::new(),
            buffers: HashMap::new(),
            next_memory: 1,
            next_buffer: 1,
            fail_next_allocation: false,
            fail_next_buffer: false,
            fail_next_bind: false,
        }
    }

    /// Number of live device memory allocations.
    pub fn allocation_count(&self) -> usize {
        self.allocations.len()
    }

    /// Number of live buffers.
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Make the next `allocate_device_memory` call fail.
    pub fn fail_next_allocation(&mut self) {
        self.fail_next_allocation = true;
    }

    /// Make the next `create_buffer` call fail.
    pub fn fail_next_buffer(&mut self) {
        self.fail_next_buffer = true;
    }

    /// Make the next `bind_buffer` call fail.
    pub fn fail_next_bind(&mut self) {
        self.fail_next_bind = true;
    }

    /// Whether the allocation is currently mapped.
    pub fn is_mapped(&self, memory: DeviceMemory) -> bool {
        self.allocations
            .get(&memory)
            .is_some_and(|allocation| allocation.mapped)
    }

    /// Where a buffer is bound, as `(memory, offset)`.
    pub fn buffer_binding(&self, buffer: Buffer) -> Option<(DeviceMemory, u64)> {
        self.buffers.get(&buffer)?.bound
    }
}

impl DriverAdapter for BytesDriver {
    fn allocate_device_memory(
        &mut self,
        size: u64,
        memory_type: u32,
    ) -> Result<DeviceMemory, DriverError> {
        if core::mem::take(&mut self.fail_next_allocation) {
            return Err(DriverError::OutOfDeviceMemory);
        }
        if memory_type as usize >= self.memory_types.len() {
            return Err(DriverError::InvalidHandle);
        }
        let memory = DeviceMemory::from_raw(self.next_memory);
        self.next_memory += 1;
        self.allocations.insert(
            memory,
            BytesAllocation {
                bytes: vec![0u8; size as usize].into_boxed_slice(),
                memory_type,
                mapped: false,
            },
        );
        Ok(memory)
    }

    fn free_device_memory(&mut self, memory: DeviceMemory) {
        if self.allocations.remove(&memory).is_none() {
            log::error!("bytes driver: freeing unknown device memory {memory:?}");
        }
    }

    fn create_buffer(
        &mut self,
        size: u64,
        _usage: BufferUsageFlags,
    ) -> Result<Buffer, DriverError> {
        if core::mem::take(&mut self.fail_next_buffer) {
            return Err(DriverError::OutOfDeviceMemory);
        }
        let buffer = Buffer::from_raw(self.next_buffer);
        self.next_buffer += 1;
        self.buffers.insert(buffer, BufferRecord { size, bound: None });
        Ok(buffer)
    }

    fn destroy_buffer(&mut self, buffer: Buffer) {
        if self.buffers.remove(&buffer).is_none() {
            log::error!("bytes driver: destroying unknown buffer {buffer:?}");
        }
    }

    fn bind_buffer(
        &mut self,
        buffer: Buffer,
        memory: DeviceMemory,
        offset: u64,
    ) -> Result<(), DriverError> {
        if core::mem::take(&mut self.fail_next_bind) {
            return Err(DriverError::Other("bind rejected"));
        }
        let allocation = self
            .allocations
            .get(&memory)
            .ok_or(DriverError::InvalidHandle)?;
        let record = self
            .buffers
            .get_mut(&buffer)
            .ok_or(DriverError::InvalidHandle)?;
        if offset + record.size > allocation.bytes.len() as u64 {
            return Err(DriverError::Other("bind range outside allocation"));
        }
        record.bound = Some((memory, offset));
        Ok(())
    }

    fn map_memory(
        &mut self,
        memory: DeviceMemory,
        offset: u64,
        size: u64,
    ) -> Result<NonNull<u8>, DriverError> {
        let allocation = self
            .allocations
            .get_mut(&memory)
            .ok_or(DriverError::InvalidHandle)?;
        let flags = self.memory_types[allocation.memory_type as usize].flags;
        if !flags.contains(MemoryPropertyFlag::HostVisible) {
            return Err(DriverError::MapFailed);
        }
        if offset + size > allocation.bytes.len() as u64 {
            return Err(DriverError::MapFailed);
        }
        allocation.mapped = true;
        // The boxed slice never moves while the allocation is live.
        let ptr = unsafe { allocation.bytes.as_mut_ptr().add(offset as usize) };
        NonNull::new(ptr).ok_or(DriverError::MapFailed)
    }

    fn unmap_memory(&mut self, memory: DeviceMemory) {
        match self.allocations.get_mut(&memory) {
            Some(allocation) => allocation.mapped = false,
            None => log::error!("bytes driver: unmapping unknown device memory {memory:?}"),
        }
    }

    fn query_memory_types(&self) -> Vec<MemoryType> {
        self.memory_types.clone()
    }

    fn query_device_limits(&self) -> DeviceLimits {
        self.limits
    }

    fn query_buffer_requirements(&self, _usage: BufferUsageFlags) -> BufferRequirements {
        BufferRequirements::new(self.buffer_alignment)
    }
}
