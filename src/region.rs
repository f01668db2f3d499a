//! Free-list management for the interior of a single block.

use std::collections::BTreeMap;

use hashbrown::HashMap;

use crate::driver::Buffer;
use crate::error::AllocError;
use crate::id::RegionId;

/// Bookkeeping for one live region inside a block.
#[derive(new, Debug)]
pub(crate) struct RegionEntry {
    /// Offset of the region inside its block.
    pub offset: u64,
    /// Size of the region in bytes.
    pub size: u64,
    /// Bytes skipped at the front of the payload window.
    pub head_padding: u64,
    /// Bytes skipped at the back of the payload window.
    pub tail_padding: u64,
    /// Buffer bound at `offset` inside the block's device memory.
    pub buffer: Buffer,
    /// Live references, counting the owner and every crop.
    pub refcount: u32,
}

/// Carves regions out of one block and recycles them through an ordered
/// free-list.
///
/// Free ranges are kept sorted by offset, disjoint, and never
/// adjacent-contiguous: freeing coalesces with both neighbours
/// unconditionally, so fragmentation only reflects live regions.
#[derive(Debug)]
pub(crate) struct RegionAllocator {
    capacity: u64,
    /// Free ranges as offset -> length.
    free: BTreeMap<u64, u64>,
    regions: HashMap<RegionId, RegionEntry>,
}

impl RegionAllocator {
    pub(crate) fn new(capacity: u64) -> Self {
        let mut free = BTreeMap::new();
        if capacity > 0 {
            free.insert(0, capacity);
        }
        Self {
            capacity,
            free,
            regions: HashMap::new(),
        }
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    /// First-fit scan at the lowest offset. The chosen range is split into
    /// an aligned region plus leftover head and tail ranges.
    pub(crate) fn allocate(&mut self, size: u64, alignment: u64) -> Result<u64, AllocError> {
        debug_assert!(size > 0);
        let alignment = alignment.max(1);

        let candidate = self.free.iter().find_map(|(&offset, &length)| {
            let aligned = align_up(offset, alignment);
            let end = aligned.checked_add(size)?;
            (end <= offset + length).then_some((offset, length, aligned))
        });
        let Some((offset, length, aligned)) = candidate else {
            return Err(AllocError::OutOfBlock);
        };

        self.free.remove(&offset);
        if aligned > offset {
            self.free.insert(offset, aligned - offset);
        }
        let end = aligned + size;
        let range_end = offset + length;
        if range_end > end {
            self.free.insert(end, range_end - end);
        }
        Ok(aligned)
    }

    /// Whether a request could be carved out of the current free ranges.
    pub(crate) fn can_allocate(&self, size: u64, alignment: u64) -> bool {
        let alignment = alignment.max(1);
        self.free.iter().any(|(&offset, &length)| {
            let aligned = align_up(offset, alignment);
            aligned
                .checked_add(size)
                .is_some_and(|end| end <= offset + length)
        })
    }

    pub(crate) fn insert(&mut self, id: RegionId, entry: RegionEntry) {
        self.regions.insert(id, entry);
        debug_assert_eq!(
            self.live_bytes() + self.free_bytes(),
            self.capacity,
            "live regions plus free ranges must cover the block"
        );
    }

    pub(crate) fn get(&self, id: RegionId) -> Option<&RegionEntry> {
        self.regions.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: RegionId) -> Option<&mut RegionEntry> {
        self.regions.get_mut(&id)
    }

    /// Return a live region's range to the free-list, coalescing with both
    /// neighbours. The removed entry is handed back so the caller can
    /// destroy its buffer.
    pub(crate) fn free(&mut self, id: RegionId) -> Option<RegionEntry> {
        let entry = self.regions.remove(&id)?;
        self.release_range(entry.offset, entry.size);
        debug_assert_eq!(
            self.live_bytes() + self.free_bytes(),
            self.capacity,
            "live regions plus free ranges must cover the block"
        );
        Some(entry)
    }

    /// Give back a range that was carved by `allocate` but never recorded
    /// as a region.
    pub(crate) fn release_range(&mut self, mut offset: u64, mut size: u64) {
        if let Some((&left_offset, &left_size)) = self.free.range(..offset).next_back() {
            debug_assert!(left_offset + left_size <= offset);
            if left_offset + left_size == offset {
                self.free.remove(&left_offset);
                offset = left_offset;
                size += left_size;
            }
        }
        if let Some(&right_size) = self.free.get(&(offset + size)) {
            self.free.remove(&(offset + size));
            size += right_size;
        }
        self.free.insert(offset, size);
    }

    pub(crate) fn live_regions(&self) -> usize {
        self.regions.len()
    }

    fn live_bytes(&self) -> u64 {
        self.regions.values().map(|entry| entry.size).sum()
    }

    pub(crate) fn free_bytes(&self) -> u64 {
        self.free.values().sum()
    }

    /// True when no region is live and a single range spans the block.
    pub(crate) fn is_empty(&self) -> bool {
        self.regions.is_empty() && self.free.get(&0) == Some(&self.capacity)
    }

    /// Snapshot of the free ranges, sorted by offset.
    pub(crate) fn free_ranges(&self) -> Vec<(u64, u64)> {
        self.free.iter().map(|(&offset, &size)| (offset, size)).collect()
    }

    /// Remove and return every live region, leaving the free-list untouched.
    /// Only used on unconditional teardown.
    pub(crate) fn drain_regions(&mut self) -> HashMap<RegionId, RegionEntry> {
        core::mem::take(&mut self.regions)
    }
}

pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    value.next_multiple_of(alignment)
}

/// Smallest alignment satisfying both inputs; zeros count as no constraint.
pub(crate) fn lcm(a: u64, b: u64) -> u64 {
    let a = a.max(1);
    let b = b.max(1);
    a / gcd(a, b) * b
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> Buffer {
        Buffer::from_raw(0)
    }

    fn assert_invariants(allocator: &RegionAllocator) {
        let ranges = allocator.free_ranges();
        for pair in ranges.windows(2) {
            assert!(
                pair[0].0 + pair[0].1 < pair[1].0,
                "free ranges must be disjoint and non-adjacent: {ranges:?}"
            );
        }
        assert_eq!(
            allocator.capacity(),
            allocator.live_bytes() + allocator.free_bytes(),
            "live regions plus free ranges must cover the block"
        );
    }

    fn reserve(allocator: &mut RegionAllocator, size: u64, alignment: u64) -> RegionId {
        let offset = allocator.allocate(size, alignment).unwrap();
        let id = RegionId::new();
        allocator.insert(id, RegionEntry::new(offset, size, 0, 0, buffer(), 1));
        assert_invariants(allocator);
        id
    }

    #[test]
    fn first_fit_picks_lowest_offset() {
        let mut allocator = RegionAllocator::new(1024);
        let first = reserve(&mut allocator, 128, 1);
        let _second = reserve(&mut allocator, 128, 1);
        allocator.free(first).unwrap();
        assert_invariants(&allocator);

        // Both the hole at 0 and the tail at 256 fit; the hole wins.
        assert_eq!(allocator.allocate(64, 1).unwrap(), 0);
    }

    #[test]
    fn alignment_split_leaves_pad_range_free() {
        let mut allocator = RegionAllocator::new(4096);
        let first = reserve(&mut allocator, 100, 1);
        let offset = allocator.allocate(100, 256).unwrap();
        assert_eq!(offset, 256);
        let id = RegionId::new();
        allocator.insert(id, RegionEntry::new(offset, 100, 0, 0, buffer(), 1));
        assert_eq!(allocator.free_ranges(), vec![(100, 156), (356, 3740)]);

        // Releasing the first region coalesces with the pad range.
        allocator.free(first).unwrap();
        assert_eq!(allocator.free_ranges(), vec![(0, 256), (356, 3740)]);
        assert_invariants(&allocator);
    }

    #[test]
    fn exact_fit_empties_free_list() {
        let mut allocator = RegionAllocator::new(512);
        let id = reserve(&mut allocator, 512, 1);
        assert!(allocator.free_ranges().is_empty());
        assert!(!allocator.can_allocate(1, 1));

        allocator.free(id).unwrap();
        assert!(allocator.is_empty());
    }

    #[test]
    fn oversized_requests_fail() {
        let mut allocator = RegionAllocator::new(512);
        assert_eq!(allocator.allocate(513, 1), Err(AllocError::OutOfBlock));
        // An aligned candidate that would overhang also fails.
        reserve(&mut allocator, 1, 1);
        assert_eq!(allocator.allocate(512, 256), Err(AllocError::OutOfBlock));
    }

    #[test]
    fn coalesces_with_both_neighbours() {
        let mut allocator = RegionAllocator::new(1024);
        let first = reserve(&mut allocator, 256, 1);
        let second = reserve(&mut allocator, 256, 1);
        let third = reserve(&mut allocator, 256, 1);

        allocator.free(first).unwrap();
        allocator.free(third).unwrap();
        assert_eq!(allocator.free_ranges(), vec![(0, 256), (512, 512)]);

        // Freeing the middle region merges all three into one range.
        allocator.free(second).unwrap();
        assert_eq!(allocator.free_ranges(), vec![(0, 1024)]);
        assert!(allocator.is_empty());
    }

    #[test]
    fn reserve_release_round_trip_restores_free_list() {
        let mut allocator = RegionAllocator::new(4096);
        reserve(&mut allocator, 100, 1);
        let before = allocator.free_ranges();

        let id = reserve(&mut allocator, 100, 256);
        allocator.free(id).unwrap();
        assert_eq!(allocator.free_ranges(), before);
        assert_invariants(&allocator);
    }

    #[test]
    fn lcm_combines_alignments_that_do_not_divide() {
        assert_eq!(lcm(3, 4), 12);
        assert_eq!(lcm(6, 4), 12);
        assert_eq!(lcm(8, 2), 8);
        assert_eq!(lcm(0, 4), 4);
        assert_eq!(lcm(0, 0), 1);
    }

    #[test]
    fn release_range_returns_unrecorded_carves() {
        let mut allocator = RegionAllocator::new(1024);
        let offset = allocator.allocate(256, 1).unwrap();
        allocator.release_range(offset, 256);
        assert!(allocator.is_empty());
    }
}
