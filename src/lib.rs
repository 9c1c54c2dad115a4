//! A space-saving, relocating size-class allocator for embedded and
//! constrained environments.
//!
//! The client never holds a raw pointer to a block across allocator
//! calls. Instead it holds an opaque block identifier (a `u32` BID,
//! assigned by the client itself) and asks an engine to dereference it
//! into a transient address whenever it needs to touch the block's
//! bytes. The engine is free to relocate a block's bytes on any other
//! call, which is what buys the low fragmentation: each size class packs
//! its live objects contiguously and moves the tail object into any hole
//! left by a deletion.
//!
//! Two engines share this design:
//!
//! - [`MfEngine`]: each size class owns its own contiguous pseudo-heap,
//!   grown and shrunk in whole OS pages within a large reserved virtual
//!   range.
//! - [`VmfEngine`]: each size class threads a linked list of logical
//!   pages, each backed by one physical page frame obtained from a
//!   [`pageframe::PageFrameService`]; logical ordering is decoupled from
//!   physical placement through a per-process remap table.
//!
//! Both engines are `!Send`/`!Sync`: there is no internal locking,
//! because every allocation can reshuffle the tail of another class's
//! packing. A caller that needs to share an engine across threads must
//! wrap it in its own exclusive lock.

pub mod bitcodec;
pub mod blockdirectory;
pub mod blockmanager;
pub mod config;
pub mod error;
pub mod os;
pub mod pagedirectory;
pub mod pageframe;
pub mod pool;
pub mod pseudoheap;
pub mod sizeclass;
pub mod stats;
pub mod vspace;

mod mf;
mod vmf;

pub use config::{ClassMode, Config, CopyMode, Heuristics, MetadataMode, Workload};
pub use error::ConfigError;
pub use mf::MfEngine;
pub use vmf::VmfEngine;
