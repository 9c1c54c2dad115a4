//! Heap-backed (MF) engine: one contiguous pseudo-heap per size class,
//! new objects appended at the tail, the tail relocated onto any hole
//! left by a delete (`SPEC_FULL.md` §4.8).

use crate::bitcodec::{field_width, read_uint, required_bytes, write_uint};
use crate::blockdirectory::MfBlockDirectory;
use crate::blockmanager::BlockManager;
use crate::config::{Config, CopyMode, Workload};
use crate::error::ConfigError;
use crate::pool::{GarbageList, SlotPool};
use crate::sizeclass::SizeClassTable;
use crate::stats::Stats;
use crate::vspace::VirtualSpaceReserver;

/// A relocating, size-class allocator over a single contiguous virtual
/// range per class. `!Sync`/`!Send`: see `SPEC_FULL.md` §5.
pub struct MfEngine {
    classes: SizeClassTable,
    managers: Vec<BlockManager>,
    directory: MfBlockDirectory,
    vspace: VirtualSpaceReserver,
    pool: SlotPool,
    garbage: GarbageList,
    stats: Stats,
    config: Config,
    bid_width: u8,
    n_max: u32,
}

impl MfEngine {
    pub fn new(workload: Workload, config: Config) -> Result<Self, ConfigError> {
        workload.validate()?;
        let classes = SizeClassTable::build(config.class_mode, workload.mem_min, workload.mem_max);
        let bid_width = field_width(required_bytes(workload.n_max as u64), config.metadata_mode);

        let max_object_size = classes.class2size(classes.num_classes() - 1) + bid_width as usize;
        let per_class_budget = workload.total_budget.max(max_object_size);
        let vspace = VirtualSpaceReserver::new(classes.num_classes(), per_class_budget)?;

        let directory =
            MfBlockDirectory::new(workload.n_max, classes.num_classes(), workload.n_max, config.metadata_mode);

        let managers = (0..classes.num_classes())
            .map(|i| BlockManager::new(classes.class2size(i) + bid_width as usize, bid_width))
            .collect();

        Ok(MfEngine {
            classes,
            managers,
            directory,
            vspace,
            pool: SlotPool::new(match config.heuristics {
                crate::config::Heuristics::Enabled { pool_num_threshold, .. } => pool_num_threshold,
                crate::config::Heuristics::Off => 0,
            }),
            garbage: GarbageList::new(match config.heuristics {
                crate::config::Heuristics::Enabled { garbage_num_max, .. } => garbage_num_max,
                crate::config::Heuristics::Off => 0,
            }),
            stats: Stats::default(),
            config,
            bid_width,
            n_max: workload.n_max,
        })
    }

    fn check_bid(&self, bid: u32) {
        assert!(bid < self.n_max, "bid {} out of range (n_max = {})", bid, self.n_max);
    }

    /// Move the tail object of `class_idx` onto the hole at `offset`
    /// (if `offset` is not already the tail), then retire the tail,
    /// shrinking the class's pseudo-heap. Any BID moved by this call
    /// has its directory offset updated; the caller owns updating the
    /// directory entry for the BID originally at `offset`.
    fn retire_slot(&mut self, class_idx: usize, offset: u32) {
        let bm = &mut self.managers[class_idx];
        let copy_len = match self.config.copy_mode {
            CopyMode::HeaderOnly => self.bid_width as usize,
            CopyMode::FullSlot => bm.object_size(),
        };
        if let Some(tail) = bm.last_index() {
            if tail != offset {
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        bm.address_of(tail),
                        bm.address_of(offset),
                        copy_len,
                    );
                    let moved_bid = read_uint(bm.slot(offset), self.bid_width) as u32;
                    self.directory.put_offset(moved_bid, offset);
                }
            }
        }
        self.managers[class_idx].remove(
            self.config.heuristics,
            &mut self.vspace,
            &mut self.pool,
            &mut self.garbage,
            &mut self.stats,
        );
    }

    /// Bind `bid` to a freshly allocated block of at least `size` bytes.
    /// `bid` must not currently be live.
    pub fn allocate(&mut self, bid: u32, size: usize) {
        self.check_bid(bid);
        assert!(!self.directory.is_live(bid), "bid {} already live", bid);
        assert!(
            size >= 1 && size <= self.classes.class2size(self.classes.num_classes() - 1),
            "size {} out of workload range",
            size
        );
        let class_idx = self.classes.size2class(size);
        let offset = self.managers[class_idx].append(&mut self.vspace, &mut self.pool, &mut self.stats);
        let header = unsafe { self.managers[class_idx].slot_mut(offset) };
        write_uint(header, self.bid_width, bid as u64);
        self.directory.put(bid, (class_idx + 1) as u32, offset);
    }

    pub fn deallocate(&mut self, bid: u32) {
        self.check_bid(bid);
        let rec = self.directory.get(bid);
        assert!(rec.is_live(), "bid {} is not allocated", bid);
        let class_idx = (rec.class - 1) as usize;
        self.retire_slot(class_idx, rec.offset);
        self.directory.clear(bid);
    }

    pub fn reallocate(&mut self, bid: u32, new_size: usize) {
        self.check_bid(bid);
        let rec = self.directory.get(bid);
        assert!(rec.is_live(), "bid {} is not allocated", bid);
        let old_class_idx = (rec.class - 1) as usize;
        let new_class_idx = self.classes.size2class(new_size);
        if new_class_idx == old_class_idx {
            return;
        }

        let old_payload_len = self.managers[old_class_idx].payload_len();
        let old_payload = unsafe {
            self.managers[old_class_idx].address_of(rec.offset).add(self.bid_width as usize)
        };

        let new_offset =
            self.managers[new_class_idx].append(&mut self.vspace, &mut self.pool, &mut self.stats);
        let new_header = unsafe { self.managers[new_class_idx].slot_mut(new_offset) };
        write_uint(new_header, self.bid_width, bid as u64);
        let new_payload_len = self.managers[new_class_idx].payload_len();
        let new_payload = unsafe {
            self.managers[new_class_idx].address_of(new_offset).add(self.bid_width as usize)
        };

        let copy_len = old_payload_len.min(new_payload_len);
        unsafe {
            std::ptr::copy_nonoverlapping(old_payload, new_payload, copy_len);
        }

        self.retire_slot(old_class_idx, rec.offset);
        self.directory.put(bid, (new_class_idx + 1) as u32, new_offset);
    }

    pub fn dereference(&self, bid: u32) -> Option<*mut u8> {
        self.check_bid(bid);
        let rec = self.directory.get(bid);
        if !rec.is_live() {
            return None;
        }
        let bm = &self.managers[(rec.class - 1) as usize];
        Some(unsafe { bm.address_of(rec.offset).add(self.bid_width as usize) })
    }

    /// Internal size in bytes available at `bid` (may exceed the size
    /// requested at allocate/reallocate time).
    pub fn length(&self, bid: u32) -> Option<usize> {
        self.check_bid(bid);
        let rec = self.directory.get(bid);
        if !rec.is_live() {
            return None;
        }
        Some(self.managers[(rec.class - 1) as usize].payload_len())
    }

    pub fn dereference_and_length(&self, bid: u32) -> Option<(*mut u8, usize)> {
        self.check_bid(bid);
        let rec = self.directory.get(bid);
        if !rec.is_live() {
            return None;
        }
        let bm = &self.managers[(rec.class - 1) as usize];
        let addr = unsafe { bm.address_of(rec.offset).add(self.bid_width as usize) };
        Some((addr, bm.payload_len()))
    }

    pub fn using_mem(&self) -> u64 {
        self.stats.using_mem()
    }
}

impl Drop for MfEngine {
    fn drop(&mut self) {
        for bm in &mut self.managers {
            bm.destroy(&mut self.vspace, &mut self.stats);
        }
        for pooled in self.pool.drain() {
            let addr = self.vspace.slot_addr(pooled.slot_idx);
            crate::os::decommit(addr, pooled.mapped_pages * crate::os::page_size());
            self.vspace.release_slot(pooled.slot_idx);
        }
    }
}
