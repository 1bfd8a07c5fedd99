//! # cmdring
//!
//! A ring-buffer command allocator with checkpoint-based reclamation,
//! built to back per-frame GPU command buffers.
//!
//! A producer thread packs variable-sized binary command records into a
//! ring with amortized-O(1) allocations; reclamation is deferred until
//! the consumer (the GPU, or a command-block replay) releases a
//! checkpoint, guaranteeing that live command data is never overwritten
//! before it has been read.
//!
//! ## Features
//!
//! - **Fast-path allocation**: a bounds check and a cursor bump
//! - **Fragment wraparound**: freed leading space is reused before any
//!   memory is grown, with listener callbacks so a recorder can
//!   terminate the block it was writing
//! - **Adaptive capacity**: 1.5x growth on exhaustion, decaying
//!   high-water margin for shrink-back on sustained low usage
//! - **Deferred release**: a single mutex-guarded checkpoint slot lets
//!   the GPU-submission thread release when a fence fires
//!
//! ## Quick Start
//!
//! ```rust
//! use cmdring::prelude::*;
//!
//! let mut stream = CommandStream::new(4096)?;
//!
//! // Record a block of commands.
//! stream.push(1, &[0x10, 0x20])?;
//! stream.push(2, b"viewport")?;
//! let checkpoint = stream.finish_block();
//!
//! // ... submit to the GPU; once the fence fires:
//! stream.release(checkpoint);
//! # Ok::<(), cmdring::Error>(())
//! ```
//!
//! ## Error model
//!
//! Construction and configuration are fallible ([`Error`]); the
//! per-record hot paths are not. Contract violations there (releasing
//! an invalid or out-of-order checkpoint, allocating from an
//! uninitialized allocator) are caller bugs checked by debug
//! assertions, a deliberate trade-off for per-frame code.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod error;
pub mod observability;
pub mod ring;
pub mod stream;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::ring::{Checkpoint, FragmentListener, RingAllocator, SharedRingAllocator};
    pub use crate::stream::CommandStream;
}

pub use error::{Error, Result};
