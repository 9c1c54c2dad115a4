//! Monotone table mapping a requested size to a size-class index and
//! back (`SPEC_FULL.md` §4.2).

use crate::bitcodec::align_up;
use crate::config::ClassMode;

/// `size2class`/`class2size` over a fixed table of class boundaries.
///
/// Table entries are `S_0 < S_1 < ... < S_{n-1}`; `size2class(s)` is the
/// least `i` with `S_i >= s`, found by the fixed-iteration binary search
/// the original uses (`BINARY_SEARCH_COUNT`) so the loop is
/// unroll-friendly and its cost does not depend on the actual table
/// size at runtime.
#[derive(Debug, Clone)]
pub struct SizeClassTable {
    sizes: Vec<usize>,
    search_iters: u32,
}

impl SizeClassTable {
    /// Build a table covering at least `[mem_min, mem_max]`.
    pub fn build(mode: ClassMode, mem_min: usize, mem_max: usize) -> Self {
        let sizes = match mode {
            ClassMode::Exact { align } => {
                let align = align.max(1);
                let first = align_up(mem_min.max(align), align);
                let mut sizes = Vec::new();
                let mut s = first;
                while s < mem_max || sizes.is_empty() {
                    sizes.push(s);
                    if s >= mem_max {
                        break;
                    }
                    s += align;
                }
                sizes
            }
            ClassMode::Geometric { k, max_classes } => {
                let mut sizes = Vec::new();
                let mut s = mem_min.max(1);
                sizes.push(s);
                while s < mem_max && sizes.len() < max_classes {
                    let next = ((s as f64) * (1.0 + k)).ceil() as usize;
                    s = next.max(s + 1);
                    sizes.push(s);
                }
                sizes
            }
        };
        debug_assert!(!sizes.is_empty());
        debug_assert!(*sizes.last().unwrap() >= mem_max);
        // SIZE_CLASS_MAX entries require a search depth of
        // ceil(log2(len)) fixed iterations; 7 covers up to 128 entries
        // (original_source's BINARY_SEARCH_COUNT), generalized here so
        // an Exact table larger than 128 entries still converges.
        let mut iters = 0u32;
        while (1usize << iters) < sizes.len() {
            iters += 1;
        }
        SizeClassTable { sizes, search_iters: iters.max(7) }
    }

    pub fn num_classes(&self) -> usize {
        self.sizes.len()
    }

    /// Internal block size for class index `i` (0-based).
    pub fn class2size(&self, i: usize) -> usize {
        self.sizes[i]
    }

    /// Least index `i` with `class2size(i) >= s`. `s` must be `<=` the
    /// table's maximum; the engine enforces `mem_min <= s <= mem_max` at
    /// the public boundary.
    pub fn size2class(&self, s: usize) -> usize {
        debug_assert!(s <= *self.sizes.last().unwrap());
        let mut lo: usize = 0;
        let mut hi: usize = self.sizes.len(); // exclusive
        for _ in 0..self.search_iters {
            if lo + 1 >= hi {
                break;
            }
            let mid = lo + (hi - lo) / 2;
            if self.sizes[mid] >= s {
                hi = mid + 1;
            } else {
                lo = mid + 1;
            }
        }
        // lo..hi now brackets the answer to within the fixed iteration
        // budget; finish with a short linear scan bounded by the same
        // window so correctness never depends on table size either.
        let mut i = lo;
        while i < self.sizes.len() && self.sizes[i] < s {
            i += 1;
        }
        debug_assert!(i < self.sizes.len());
        i
    }
}
