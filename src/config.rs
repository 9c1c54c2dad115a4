//! Runtime configuration.
//!
//! The original implementation wired its behavior through compile-time
//! `#ifdef`s (`COPYLESS`, `EXACT_SIZE_CLASS`, `FIXED_LENGTH_INTEGER`,
//! `ENABLE_HEURISTIC`). `SPEC_FULL.md` §9 turns each of those into a
//! field of this `Config`, passed once at `init`.

use crate::error::ConfigError;

/// How much of a slot is copied during tail relocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMode {
    /// Copy only the BID header; the rest of the relocated slot is left
    /// stale (`COPYLESS` in the original).
    HeaderOnly,
    /// Copy the full slot, header and payload.
    FullSlot,
}

/// How requested sizes map onto size-class indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassMode {
    /// S_i = (i+1) * align.
    Exact { align: usize },
    /// S_i = ceil(S_{i-1} * (1+k)), capped at `max_classes` entries.
    Geometric { k: f64, max_classes: usize },
}

impl Default for ClassMode {
    fn default() -> Self {
        // SIZE_CLASS_CONST / SIZE_CLASS_MAX, grounded on
        // original_source/multiheap_fit/src/multiheap_fit.c.
        ClassMode::Geometric { k: 0.1232, max_classes: 128 }
    }
}

/// Width of bit-packed metadata fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataMode {
    /// Every field is a fixed 4 bytes (`FIXED_LENGTH_INTEGER` in the
    /// original); simplest, largest.
    Fixed32,
    /// Every field's width is computed from workload bounds at init.
    Packed,
}

/// Heuristic caching of pages/slots to avoid remap churn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Heuristics {
    Enabled {
        pool_num_threshold: usize,
        garbage_num_max: usize,
        /// Numerator/denominator of the extra-page retention ratio,
        /// e.g. (9, 8) for the original's `9 / 8`.
        extra_page_rate: (usize, usize),
    },
    Off,
}

impl Default for Heuristics {
    fn default() -> Self {
        // POOL_NUM_THRESHOLD, GARBAGE_NUM_MAX, EXTRA_PAGE_RATE, grounded
        // on original_source/multiheap_fit/src/multiheap_fit.c.
        Heuristics::Enabled {
            pool_num_threshold: 16,
            garbage_num_max: 6,
            extra_page_rate: (9, 8),
        }
    }
}

/// Full engine configuration, passed to `MfEngine::new` / `VmfEngine::new`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub copy_mode: CopyMode,
    pub class_mode: ClassMode,
    pub metadata_mode: MetadataMode,
    pub heuristics: Heuristics,
    /// Track byte-accurate usage via `Stats` rather than recomputing
    /// `using_mem()` on demand from live metadata.
    pub self_accounting: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            copy_mode: CopyMode::FullSlot,
            class_mode: ClassMode::default(),
            metadata_mode: MetadataMode::Packed,
            heuristics: Heuristics::default(),
            self_accounting: true,
        }
    }
}

/// Workload bounds shared by both engines' `init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Workload {
    pub mem_min: usize,
    pub mem_max: usize,
    pub n_max: u32,
    pub total_budget: usize,
}

impl Workload {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mem_min == 0 || self.mem_min > self.mem_max {
            return Err(ConfigError::BadSizeRange {
                mem_min: self.mem_min,
                mem_max: self.mem_max,
            });
        }
        if self.n_max == 0 {
            return Err(ConfigError::ZeroElementBudget);
        }
        Ok(())
    }
}
