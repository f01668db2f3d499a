/// Where an allocation must be reachable from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryVisibility {
    /// Host access only; device locality is irrelevant.
    HostOnly,
    /// Device access only; never mapped.
    DeviceOnly,
    /// Written by the device, read back by the host.
    DeviceToHost,
    /// Written by the host, consumed by the device.
    HostToDevice,
}

/// Host caching behaviour asked of the memory type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryCaching {
    /// Prefer host-cached memory.
    Cached,
    /// No caching preference beyond the defaults.
    Uncached,
    /// Prefer host-cached, host-coherent memory.
    CachedCoherent,
    /// Prefer host-coherent memory.
    UncachedCoherent,
    /// Leave the choice to the driver.
    #[default]
    Default,
}

/// How the buffers bound into the allocation will be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryUsage {
    /// Uniform buffer contents.
    UniformStorage,
    /// Storage buffer contents written once.
    StaticStorage,
    /// Storage buffer contents rewritten over time.
    DynamicStorage,
    /// Staging source for device uploads.
    TransferSrc,
    /// Staging destination for device downloads.
    TransferDst,
    /// Staging buffer used in both directions.
    TransferSrcDst,
}

/// The triple driving memory-type and buffer-usage selection.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryProperties {
    /// Required access directions.
    pub visibility: MemoryVisibility,
    /// Preferred host caching behaviour.
    pub caching: MemoryCaching,
    /// Buffer usage the regions will be bound for.
    pub usage: MemoryUsage,
}

impl core::fmt::Display for MemoryProperties {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "visibility={:?} caching={:?} usage={:?}",
            self.visibility, self.caching, self.usage
        )
    }
}

/// A single allocation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRequest {
    /// Number of bytes to reserve.
    pub size: u64,
    /// Required offset alignment of the region; zero means no constraint.
    pub alignment: u64,
    /// Properties driving memory-type and buffer-usage selection.
    pub properties: MemoryProperties,
    /// Demand a block exactly sized for this request, never shared.
    pub dedicated: bool,
}

impl MemoryRequest {
    /// A shared (pooled) request.
    pub fn new(size: u64, alignment: u64, properties: MemoryProperties) -> Self {
        Self {
            size,
            alignment,
            properties,
            dedicated: false,
        }
    }

    /// Demand a block exactly sized for this request.
    pub fn dedicated(mut self) -> Self {
        self.dedicated = true;
        self
    }
}
