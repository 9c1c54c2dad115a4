//! The one checked, `Result`-returning error surface of this crate.
//!
//! Per `SPEC_FULL.md` §7, everything else (programmer-contract
//! violations, hot-path exhaustion) stays an `assert!`/process abort;
//! `ConfigError` covers only the "configuration" error kind.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `mem_min` was zero or greater than `mem_max`.
    BadSizeRange { mem_min: usize, mem_max: usize },
    /// `n_max` was zero, so no BID could ever be valid.
    ZeroElementBudget,
    /// The largest contiguous reservation the OS would grant is smaller
    /// than a single slot would need to be.
    ReservationTooSmall { needed: usize, available: usize },
    /// `PageFrameService::configure` was called while frames were live.
    PageSizeChangeWhileLive,
    /// A requested page-size order was out of the service's supported
    /// range.
    UnsupportedPageSizeOrder(u32),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::BadSizeRange { mem_min, mem_max } => write!(
                f,
                "mem_min ({}) must be nonzero and <= mem_max ({})",
                mem_min, mem_max
            ),
            ConfigError::ZeroElementBudget => {
                write!(f, "n_max must be greater than zero")
            }
            ConfigError::ReservationTooSmall { needed, available } => write!(
                f,
                "virtual space reservation too small: needed at least {} bytes per slot, OS granted {}",
                needed, available
            ),
            ConfigError::PageSizeChangeWhileLive => write!(
                f,
                "cannot change the page-frame service's page size while frames are allocated"
            ),
            ConfigError::UnsupportedPageSizeOrder(order) => {
                write!(f, "unsupported page size order: {}", order)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
