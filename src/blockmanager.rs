//! Single size-class packing engine: appends fixed-size slots to the
//! tail of a pseudo-heap, relocates the tail slot on any deletion
//! (`SPEC_FULL.md` §4.6).

use crate::config::Heuristics;
use crate::pool::{GarbageList, SlotPool};
use crate::pseudoheap::PseudoHeap;
use crate::stats::Stats;
use crate::vspace::VirtualSpaceReserver;

/// One size class's worth of tightly packed, fixed-size objects. Object
/// `k` occupies bytes `[k*T, (k+1)*T)` of the backing pseudo-heap; the
/// first `bid_width` bytes of each object are the owning BID header
/// (I4 in `SPEC_FULL.md` §3), the rest is client payload.
#[derive(Debug)]
pub struct BlockManager {
    heap: PseudoHeap,
    object_size: usize,
    bid_width: u8,
    count: u32,
}

impl BlockManager {
    pub fn new(object_size: usize, bid_width: u8) -> Self {
        BlockManager { heap: PseudoHeap::new(), object_size, bid_width, count: 0 }
    }

    pub fn len(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn object_size(&self) -> usize {
        self.object_size
    }

    pub fn bid_width(&self) -> u8 {
        self.bid_width
    }

    /// Payload length available to the client (object size minus the
    /// BID header).
    pub fn payload_len(&self) -> usize {
        self.object_size - self.bid_width as usize
    }

    /// Append a new slot at index `count`, growing the backing heap.
    /// Returns the new object's index.
    pub fn append(
        &mut self,
        vspace: &mut VirtualSpaceReserver,
        pool: &mut SlotPool,
        stats: &mut Stats,
    ) -> u32 {
        let idx = self.count;
        self.count += 1;
        self.heap.bulge((self.count as usize) * self.object_size, vspace, pool, stats);
        idx
    }

    /// Retire the tail slot, shrinking the backing heap. Callers must
    /// already have relocated anything living at the tail before
    /// calling this (the relocation rule is enforced by the engine,
    /// which owns the block directory this manager does not see).
    pub fn remove(
        &mut self,
        heuristics: Heuristics,
        vspace: &mut VirtualSpaceReserver,
        pool: &mut SlotPool,
        garbage: &mut GarbageList,
        stats: &mut Stats,
    ) {
        debug_assert!(self.count > 0);
        self.count -= 1;
        self.heap.shrink(
            (self.count as usize) * self.object_size,
            heuristics,
            vspace,
            pool,
            garbage,
            stats,
        );
    }

    /// Address of object `index`. Only valid while `index < len()`.
    pub fn address_of(&self, index: u32) -> *mut u8 {
        debug_assert!(index < self.count);
        unsafe { self.heap.address().add(index as usize * self.object_size) }
    }

    pub fn last_index(&self) -> Option<u32> {
        if self.count == 0 { None } else { Some(self.count - 1) }
    }

    /// The full `object_size`-byte slot at `index`, as a mutable slice.
    /// # Safety
    /// The caller must ensure no other alias to the same slot is live
    /// for the duration of the borrow.
    pub unsafe fn slot_mut(&self, index: u32) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.address_of(index), self.object_size)
    }

    pub unsafe fn slot(&self, index: u32) -> &[u8] {
        std::slice::from_raw_parts(self.address_of(index), self.object_size)
    }

    /// Unconditionally release the backing pseudo-heap (engine teardown).
    pub fn destroy(&mut self, vspace: &mut VirtualSpaceReserver, stats: &mut Stats) {
        self.heap.destroy(vspace, stats);
        self.count = 0;
    }
}
