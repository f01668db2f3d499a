use core::ptr::NonNull;

use crate::block::{Block, BlockPool};
use crate::callbacks;
use crate::config::AllocatorConfig;
use crate::driver::{Buffer, DriverAdapter, MemoryPropertyFlag};
use crate::error::AllocError;
use crate::id::{BlockId, RegionId};
use crate::memory_type;
use crate::properties::MemoryRequest;
use crate::region::{RegionAllocator, RegionEntry};
use crate::stats::{AllocatorStats, Counters};

/// Caller-visible descriptor of a sub-allocated region.
///
/// Descriptors are snapshots: the allocator reads them to find its own
/// bookkeeping but never trusts them as the source of truth. A descriptor
/// must be handed back through [`Allocator::release`] (or
/// [`Allocator::reclaim`] / [`Allocator::destroy_crop`]) before being
/// dropped; a leaked descriptor leaks its share of the block until
/// [`Allocator::destroy`].
#[derive(Debug, Clone)]
pub struct Region {
    id: RegionId,
    block: BlockId,
    offset: u64,
    size: u64,
    head_padding: u64,
    tail_padding: u64,
    buffer: Buffer,
    is_owner: bool,
    parent: Option<RegionId>,
}

impl Region {
    /// Buffer handle bound at this region's offset inside its block.
    pub fn buffer(&self) -> Buffer {
        self.buffer
    }

    /// Offset of the region inside its block.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Size of the region in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes skipped at the front of the payload window.
    pub fn head_padding(&self) -> u64 {
        self.head_padding
    }

    /// Bytes skipped at the back of the payload window.
    pub fn tail_padding(&self) -> u64 {
        self.tail_padding
    }

    /// False for crops, which alias an owner region's storage.
    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    /// Length of the payload window
    /// `[offset + head_padding, offset + size - tail_padding)`, or `None`
    /// when the paddings overlap.
    pub fn effective_size(&self) -> Option<u64> {
        self.size
            .checked_sub(self.head_padding)?
            .checked_sub(self.tail_padding)
    }

    fn owner_id(&self) -> Option<RegionId> {
        if self.is_owner {
            Some(self.id)
        } else {
            self.parent
        }
    }
}

/// Two-level device memory allocator.
///
/// Large blocks of device memory are acquired through the driver adapter and
/// sub-allocated into regions, each bound to a buffer at its offset inside
/// the parent block. Regions are reference counted: [`Allocator::retain`]
/// and [`Allocator::crop`] raise the count, [`Allocator::release`] lowers it
/// and returns the storage to the block's free-list at zero. Empty blocks
/// are only returned to the driver by [`Allocator::collect`],
/// [`Allocator::release_unused`], or teardown.
pub struct Allocator<D: DriverAdapter> {
    driver: D,
    pool: BlockPool,
    counters: Counters,
}

impl<D: DriverAdapter> Allocator<D> {
    /// Create an allocator over `driver` with the given constraints.
    ///
    /// The process-wide allocation callbacks are snapshotted here and
    /// installed into the adapter; later changes to the callbacks cell do
    /// not affect this instance.
    pub fn new(mut driver: D, config: AllocatorConfig) -> Self {
        driver.install_callbacks(callbacks::get_allocation_callbacks());
        log::debug!("creating allocator: {config:?}");
        Self {
            driver,
            pool: BlockPool::new(config),
            counters: Counters::default(),
        }
    }

    /// Create an allocator configured from the environment.
    pub fn from_env(driver: D) -> Self {
        Self::new(driver, AllocatorConfig::from_env())
    }

    /// The active block pool constraints.
    pub fn config(&self) -> &AllocatorConfig {
        self.pool.config()
    }

    /// Access the underlying driver adapter.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Mutable access to the underlying driver adapter.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Reserve a region satisfying `request`.
    ///
    /// Picks the first compatible block with a fitting free range, creating
    /// a new block when none exists or the request is dedicated. The
    /// returned region is an owner with a reference count of one.
    pub fn reserve(&mut self, request: &MemoryRequest) -> Result<Region, AllocError> {
        if request.size == 0 {
            return Err(AllocError::InvalidArgument("zero-size request"));
        }
        log::trace!(
            "reserving {} bytes (alignment={} dedicated={} {})",
            request.size,
            request.alignment,
            request.dedicated,
            request.properties
        );

        // Select the memory type up front so an impossible request creates
        // no block.
        let types = self.driver.query_memory_types();
        let (memory_type, type_flags) =
            memory_type::select_memory_type(&types, request.properties)?;
        let usage_flags = memory_type::buffer_usage_flags(request.properties.usage);

        if !request.dedicated {
            if let Some(block) = self.pool.find_fit(request) {
                return Self::carve(&mut self.driver, &mut self.counters, block, request);
            }
        }

        // No fitting block: grow the pool.
        self.pool.ensure_capacity()?;
        let requirements = self.driver.query_buffer_requirements(usage_flags);
        let limits = self.driver.query_device_limits();
        let alignment = memory_type::block_alignment(&limits, requirements, usage_flags);
        let size = self.pool.block_size_for(request, alignment)?;

        let memory = self
            .driver
            .allocate_device_memory(size, memory_type)
            .map_err(AllocError::DriverAllocationFailed)?;
        let block = Block {
            id: BlockId::new(),
            memory,
            size,
            alignment,
            memory_type,
            type_flags,
            properties: request.properties,
            usage_flags,
            dedicated: request.dedicated,
            regions: RegionAllocator::new(size),
        };
        log::debug!(
            "allocated block {}: size={size} memory_type={memory_type} alignment={alignment} dedicated={}",
            block.id,
            request.dedicated
        );
        self.counters.add_block(size);

        let block = self.pool.insert(block);
        let block_id = block.id;
        let result = Self::carve(&mut self.driver, &mut self.counters, block, request);
        if result.is_err() {
            // The fresh block never served anything; undo its creation
            // rather than leaving it for collect.
            if let Some(block) = self.pool.remove_if_empty(block_id) {
                Self::release_block(&mut self.driver, &mut self.counters, block);
            }
        }
        result
    }

    /// Increment the owner's reference count. Crops forward to their owner.
    pub fn retain(&mut self, region: &Region) {
        let Self { pool, .. } = self;
        let Some(entry) = Self::entry_mut(pool, region) else {
            log::error!("retain: stale region descriptor");
            return;
        };
        entry.refcount += 1;
    }

    /// Decrement the owner's reference count; at zero, destroy the buffer
    /// and return the storage to its block's free-list. The block itself is
    /// kept for reuse.
    pub fn release(&mut self, region: &Region) {
        let Self {
            pool,
            driver,
            counters,
        } = self;
        let Some(owner_id) = region.owner_id() else {
            log::error!("release: crop without an owner link");
            return;
        };
        let Some(block) = pool.get_mut(region.block) else {
            log::error!("release: unknown block for region");
            return;
        };
        let remaining = {
            let Some(entry) = block.regions.get_mut(owner_id) else {
                log::error!("release: region already freed");
                return;
            };
            entry.refcount -= 1;
            entry.refcount
        };
        if remaining > 0 {
            return;
        }
        match block.regions.free(owner_id) {
            Some(entry) => {
                log::trace!(
                    "released region at offset={} size={} in block {}",
                    entry.offset,
                    entry.size,
                    block.id
                );
                driver.destroy_buffer(entry.buffer);
                counters.remove_region(entry.size);
            }
            None => log::error!("release: region table out of sync"),
        }
    }

    /// Force the region's storage back to the free-list regardless of its
    /// reference count. Intended for error paths and explicit disposal.
    pub fn reclaim(&mut self, region: &Region) {
        let Self {
            pool,
            driver,
            counters,
        } = self;
        let Some(owner_id) = region.owner_id() else {
            log::error!("reclaim: crop without an owner link");
            return;
        };
        let Some(block) = pool.get_mut(region.block) else {
            log::error!("reclaim: unknown block for region");
            return;
        };
        match block.regions.free(owner_id) {
            Some(entry) => {
                driver.destroy_buffer(entry.buffer);
                counters.remove_region(entry.size);
            }
            None => log::error!("reclaim: region already freed"),
        }
    }

    /// Map the region's payload window into host memory.
    ///
    /// Fails with [`AllocError::NotMappable`] when the block's memory type
    /// is not host visible.
    pub fn map(&mut self, region: &Region) -> Result<NonNull<u8>, AllocError> {
        let Self { pool, driver, .. } = self;
        let owner_id = region
            .owner_id()
            .ok_or(AllocError::InvalidArgument("crop without an owner link"))?;
        let block = pool
            .get(region.block)
            .ok_or(AllocError::InternalInconsistency("missing allocator link"))?;
        if block.regions.get(owner_id).is_none() {
            return Err(AllocError::InvalidArgument("map of a freed region"));
        }
        if !block.type_flags.contains(MemoryPropertyFlag::HostVisible) {
            return Err(AllocError::NotMappable);
        }
        let effective_size = region
            .effective_size()
            .filter(|size| *size > 0)
            .ok_or(AllocError::InvalidArgument("empty payload window"))?;
        let effective_offset = region.offset + region.head_padding;
        driver
            .map_memory(block.memory, effective_offset, effective_size)
            .map_err(AllocError::DriverMapFailed)
    }

    /// Unmap the owner block's device memory.
    pub fn unmap(&mut self, region: &Region) {
        let Self { pool, driver, .. } = self;
        match pool.get(region.block) {
            Some(block) => driver.unmap_memory(block.memory),
            None => log::error!("unmap: unknown block for region"),
        }
    }

    /// Create a lightweight alias of `region` whose payload window starts
    /// `offset` bytes into the owner's window.
    ///
    /// The crop shares the owner's storage and buffer and raises the
    /// owner's reference count; destroy it with
    /// [`Allocator::destroy_crop`]. Cropping a crop aliases the same owner,
    /// with `offset` still relative to the owner's window.
    pub fn crop(&mut self, region: &Region, offset: u64) -> Result<Region, AllocError> {
        let Self { pool, .. } = self;
        let owner_id = region
            .owner_id()
            .ok_or(AllocError::InvalidArgument("crop without an owner link"))?;
        let block = pool
            .get_mut(region.block)
            .ok_or(AllocError::InternalInconsistency("missing allocator link"))?;
        let entry = block
            .regions
            .get_mut(owner_id)
            .ok_or(AllocError::InvalidArgument("crop of a freed region"))?;
        let window = entry
            .size
            .checked_sub(entry.head_padding)
            .and_then(|size| size.checked_sub(entry.tail_padding))
            .unwrap_or(0);
        if offset >= window {
            return Err(AllocError::InvalidArgument(
                "crop offset outside the payload window",
            ));
        }
        entry.refcount += 1;
        Ok(Region {
            id: RegionId::new(),
            block: region.block,
            offset: entry.offset,
            size: entry.size,
            head_padding: entry.head_padding + offset,
            tail_padding: entry.tail_padding,
            buffer: entry.buffer,
            is_owner: false,
            parent: Some(owner_id),
        })
    }

    /// Destroy a crop descriptor, decrementing its owner's reference count.
    pub fn destroy_crop(&mut self, region: Region) {
        if region.is_owner {
            log::error!("destroy_crop called on an owner region");
            return;
        }
        self.release(&region);
    }

    /// Resolve a descriptor to its owning region, or `None` when the owner
    /// was already freed.
    pub fn owner_of(&self, region: &Region) -> Option<Region> {
        let owner_id = region.owner_id()?;
        let block = self.pool.get(region.block)?;
        let entry = block.regions.get(owner_id)?;
        Some(Region {
            id: owner_id,
            block: region.block,
            offset: entry.offset,
            size: entry.size,
            head_padding: entry.head_padding,
            tail_padding: entry.tail_padding,
            buffer: entry.buffer,
            is_owner: true,
            parent: None,
        })
    }

    /// The reference count of a region's owner, or `None` when the owner
    /// was already freed.
    pub fn refcount(&self, region: &Region) -> Option<u32> {
        let owner_id = region.owner_id()?;
        let block = self.pool.get(region.block)?;
        Some(block.regions.get(owner_id)?.refcount)
    }

    /// Destroy every block that holds no live region. Returns true if any
    /// block was destroyed.
    pub fn collect(&mut self) -> bool {
        let Self {
            pool,
            driver,
            counters,
        } = self;
        let empty = pool.take_empty();
        let collected = !empty.is_empty();
        for block in empty {
            Self::release_block(driver, counters, block);
        }
        collected
    }

    /// Return unused memory to the driver: collects empty blocks and keeps
    /// populated ones intact.
    pub fn release_unused(&mut self) {
        self.collect();
    }

    /// Unconditionally free every block and reset the counters. Live
    /// region descriptors become stale.
    pub fn destroy(&mut self) {
        let Self { pool, driver, .. } = self;
        for mut block in pool.drain() {
            for (_, entry) in block.regions.drain_regions() {
                driver.destroy_buffer(entry.buffer);
            }
            log::debug!("destroying block {} ({} bytes)", block.id, block.size);
            driver.free_device_memory(block.memory);
        }
        self.counters.reset();
    }

    /// Snapshot of the bookkeeping counters.
    pub fn stats(&self) -> AllocatorStats {
        self.counters.snapshot()
    }

    fn carve(
        driver: &mut D,
        counters: &mut Counters,
        block: &mut Block,
        request: &MemoryRequest,
    ) -> Result<Region, AllocError> {
        let alignment = block.region_alignment(request);
        let offset = block.regions.allocate(request.size, alignment)?;

        let buffer = match driver.create_buffer(request.size, block.usage_flags) {
            Ok(buffer) => buffer,
            Err(err) => {
                block.regions.release_range(offset, request.size);
                return Err(AllocError::DriverBufferCreationFailed(err));
            }
        };
        if let Err(err) = driver.bind_buffer(buffer, block.memory, offset) {
            driver.destroy_buffer(buffer);
            block.regions.release_range(offset, request.size);
            return Err(AllocError::DriverBindFailed(err));
        }

        let id = RegionId::new();
        block
            .regions
            .insert(id, RegionEntry::new(offset, request.size, 0, 0, buffer, 1));
        counters.add_region(request.size);
        log::trace!(
            "carved region at offset={offset} size={} in block {}",
            request.size,
            block.id
        );
        Ok(Region {
            id,
            block: block.id,
            offset,
            size: request.size,
            head_padding: 0,
            tail_padding: 0,
            buffer,
            is_owner: true,
            parent: None,
        })
    }

    fn release_block(driver: &mut D, counters: &mut Counters, block: Block) {
        log::debug!("freeing block {} ({} bytes)", block.id, block.size);
        driver.free_device_memory(block.memory);
        counters.remove_block(block.size);
    }

    fn entry_mut<'a>(pool: &'a mut BlockPool, region: &Region) -> Option<&'a mut RegionEntry> {
        let owner_id = region.owner_id()?;
        pool.get_mut(region.block)?.regions.get_mut(owner_id)
    }
}

impl<D: DriverAdapter> core::fmt::Display for Allocator<D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(f, " - Block pool {}", self.stats())?;
        for block in self.pool.iter() {
            writeln!(
                f,
                "   - Block {} size={} free={} fragments={} regions={} memory_type={} dedicated={}",
                block.id,
                block.size,
                block.regions.free_bytes(),
                block.regions.free_ranges().len(),
                block.regions.live_regions(),
                block.memory_type,
                block.dedicated
            )?;
        }
        Ok(())
    }
}

impl<D: DriverAdapter> Drop for Allocator<D> {
    fn drop(&mut self) {
        self.destroy();
    }
}
