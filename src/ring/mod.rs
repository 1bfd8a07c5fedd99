//! The ring-buffer command allocator and its checkpoint protocol.
//!
//! This module is the core of the crate: amortized-O(1) allocation of
//! variable-sized, tightly packed command records, with reclamation
//! deferred until the consumer (the GPU, or a command-block replay)
//! signals completion via a [`Checkpoint`].
//!
//! # Architecture
//!
//! - [`RingAllocator`]: single-producer allocator over a generation-
//!   counted storage, with fragment-based wraparound and adaptive
//!   capacity growth/shrink
//! - [`FragmentListener`]: callback capability letting a consumer react
//!   to fragment transitions (e.g. terminate a command block)
//! - [`Checkpoint`]: immutable "safe to reclaim up to here" snapshot
//! - [`SharedRingAllocator`]: adds the one mutex-guarded pending slot
//!   used to defer a release to the GPU-submission thread
//!
//! # Example
//!
//! ```rust
//! use cmdring::ring::RingAllocator;
//!
//! let mut ring = RingAllocator::with_capacity(1024).unwrap();
//!
//! // Record a command.
//! let bytes = ring.allocate(16);
//! bytes.fill(0x2A);
//!
//! // Hand the checkpoint to the consumer; release once it is done.
//! let cp = ring.release_checkpoint();
//! ring.release(cp);
//! assert_eq!(ring.live_bytes(), 0);
//! ```

mod allocator;
mod checkpoint;
mod shared;
mod storage;

pub use allocator::{
    FragmentListener, RingAllocator, DEFAULT_DECAY_SPEED_FACTOR, DEFAULT_MIN_CAPACITY,
};
pub use checkpoint::Checkpoint;
pub use shared::{CheckpointGuard, SharedRingAllocator};
