use crate::config::AllocatorConfig;
use crate::driver::{BufferUsageFlags, DeviceMemory, MemoryPropertyFlags};
use crate::error::AllocError;
use crate::id::BlockId;
use crate::memory_type;
use crate::properties::{MemoryProperties, MemoryRequest};
use crate::region::{align_up, lcm, RegionAllocator};

/// One driver-level allocation, sub-divided into regions.
#[derive(Debug)]
pub(crate) struct Block {
    pub id: BlockId,
    pub memory: DeviceMemory,
    pub size: u64,
    /// Offset alignment every region in this block must honour.
    pub alignment: u64,
    pub memory_type: u32,
    /// Property flags of the selected memory type.
    pub type_flags: MemoryPropertyFlags,
    pub properties: MemoryProperties,
    pub usage_flags: BufferUsageFlags,
    /// Dedicated blocks are never offered to other requests.
    pub dedicated: bool,
    pub regions: RegionAllocator,
}

impl Block {
    /// Whether this block can host a request with the given properties.
    ///
    /// Visibility and usage must match exactly; caching is satisfied as long
    /// as the block's memory type carries every flag the request needs or
    /// wants.
    fn is_compatible(&self, properties: MemoryProperties) -> bool {
        if self.dedicated {
            return false;
        }
        if self.properties.visibility != properties.visibility {
            return false;
        }
        if self.properties.usage != properties.usage {
            return false;
        }
        let selection = memory_type::select_flags(properties);
        self.type_flags.is_superset(selection.need | selection.want)
    }

    /// Effective region alignment for a request served from this block: the
    /// smallest alignment that satisfies both the request and the block, so
    /// offsets stay multiples of `request.alignment` even when neither
    /// alignment divides the other.
    pub(crate) fn region_alignment(&self, request: &MemoryRequest) -> u64 {
        lcm(request.alignment, self.alignment)
    }
}

/// Ordered collection of blocks plus the sizing and growth policy.
#[derive(Debug)]
pub(crate) struct BlockPool {
    blocks: Vec<Block>,
    config: AllocatorConfig,
}

impl BlockPool {
    pub(crate) fn new(config: AllocatorConfig) -> Self {
        Self {
            blocks: Vec::new(),
            config,
        }
    }

    pub(crate) fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// First block, in insertion order, able to host the request.
    pub(crate) fn find_fit(&mut self, request: &MemoryRequest) -> Option<&mut Block> {
        self.blocks.iter_mut().find(|block| {
            block.is_compatible(request.properties)
                && block
                    .regions
                    .can_allocate(request.size, block.region_alignment(request))
        })
    }

    /// Size a fresh block for the request.
    ///
    /// Non-dedicated blocks are at least `minimum_block_size` and at most
    /// `maximum_block_size` (when nonzero); dedicated blocks are exactly the
    /// rounded request.
    pub(crate) fn block_size_for(&self, request: &MemoryRequest, alignment: u64) -> Result<u64, AllocError> {
        let rounded = align_up(request.size, alignment);
        if request.dedicated {
            return Ok(rounded);
        }
        let mut size = rounded.max(self.config.minimum_block_size);
        if self.config.maximum_block_size > 0 {
            size = size.min(self.config.maximum_block_size);
        }
        if size < rounded {
            return Err(AllocError::InvalidArgument(
                "request exceeds maximum block size",
            ));
        }
        Ok(size)
    }

    /// Fail when another block would exceed the configured ceiling.
    pub(crate) fn ensure_capacity(&self) -> Result<(), AllocError> {
        let limit = self.config.maximum_block_count;
        if limit > 0 && self.blocks.len() >= limit {
            return Err(AllocError::BlockLimitReached(limit));
        }
        Ok(())
    }

    pub(crate) fn insert(&mut self, block: Block) -> &mut Block {
        self.blocks.push(block);
        self.blocks.last_mut().unwrap()
    }

    pub(crate) fn get(&self, id: BlockId) -> Option<&Block> {
        self.blocks.iter().find(|block| block.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.iter_mut().find(|block| block.id == id)
    }

    /// Remove the block if it holds no live region.
    pub(crate) fn remove_if_empty(&mut self, id: BlockId) -> Option<Block> {
        let index = self
            .blocks
            .iter()
            .position(|block| block.id == id && block.regions.is_empty())?;
        Some(self.blocks.remove(index))
    }

    /// Remove every block that holds no live region and whose free-list
    /// spans the whole block.
    pub(crate) fn take_empty(&mut self) -> Vec<Block> {
        let (empty, keep) = core::mem::take(&mut self.blocks)
            .into_iter()
            .partition(|block| block.regions.is_empty());
        self.blocks = keep;
        empty
    }

    /// Remove every block unconditionally.
    pub(crate) fn drain(&mut self) -> Vec<Block> {
        core::mem::take(&mut self.blocks)
    }

    pub(crate) fn iter(&self) -> core::slice::Iter<'_, Block> {
        self.blocks.iter()
    }
}
