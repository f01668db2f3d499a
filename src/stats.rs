use serde::{Deserialize, Serialize};

/// Snapshot of the allocator's bookkeeping counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorStats {
    /// Number of live blocks.
    pub blocks: usize,
    /// Bytes held in live blocks.
    pub block_bytes: u64,
    /// Number of live regions.
    pub regions: usize,
    /// Bytes reserved by live regions.
    pub region_bytes: u64,
}

impl core::fmt::Display for AllocatorStats {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{} blocks ({} bytes), {} regions ({} bytes)",
            self.blocks, self.block_bytes, self.regions, self.region_bytes
        )
    }
}

/// Counters updated in lockstep with successful (de)allocations.
///
/// Decrements clamp to zero: a drifted counter is logged as an internal
/// inconsistency but never aborts the process.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    stats: AllocatorStats,
}

impl Counters {
    pub(crate) fn snapshot(&self) -> AllocatorStats {
        self.stats
    }

    pub(crate) fn add_block(&mut self, bytes: u64) {
        self.stats.blocks += 1;
        self.stats.block_bytes += bytes;
    }

    pub(crate) fn remove_block(&mut self, bytes: u64) {
        if self.stats.blocks == 0 {
            log::error!("block counter underflow, clamping to zero");
        }
        self.stats.blocks = self.stats.blocks.saturating_sub(1);
        if self.stats.block_bytes < bytes {
            log::error!("block byte counter underflow, clamping to zero");
            self.stats.block_bytes = 0;
        } else {
            self.stats.block_bytes -= bytes;
        }
    }

    pub(crate) fn add_region(&mut self, bytes: u64) {
        self.stats.regions += 1;
        self.stats.region_bytes += bytes;
    }

    pub(crate) fn remove_region(&mut self, bytes: u64) {
        if self.stats.regions == 0 {
            log::error!("region counter underflow, clamping to zero");
        }
        self.stats.regions = self.stats.regions.saturating_sub(1);
        if self.stats.region_bytes < bytes {
            log::error!("region byte counter underflow, clamping to zero");
            self.stats.region_bytes = 0;
        } else {
            self.stats.region_bytes -= bytes;
        }
    }

    pub(crate) fn reset(&mut self) {
        self.stats = AllocatorStats::default();
    }
}
