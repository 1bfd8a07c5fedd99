//! Command-stream recording on top of the ring allocator.
//!
//! A [`CommandStream`] packs variable-sized command records into the
//! ring and tracks the block boundaries a replay loop needs. It is the
//! canonical consumer of the allocator's fragment-listener protocol:
//! every fragment keeps a reserve large enough for the end-of-block
//! sentinel, and the listener writes that sentinel the moment a
//! fragment is abandoned, while its bytes are still addressable.
//!
//! # Record format
//!
//! Each record starts with a little-endian `u32` header packing the
//! command id (low 16 bits, non-zero) and the payload length in bytes
//! (high 16 bits), followed by the payload padded to 4-byte alignment.
//! A header of all zeroes is the end-of-block sentinel.

mod recorder;

pub use recorder::{CommandStream, MAX_PAYLOAD_LEN};
