//! Error types for cmdring.

use thiserror::Error;

/// Result type alias using cmdring's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for cmdring operations.
///
/// Errors are only produced by fallible construction and configuration.
/// The allocation and release hot paths are assertion-checked instead:
/// a contract violation there is a caller bug, not a recoverable
/// condition (see the crate-level docs).
#[derive(Error, Debug)]
pub enum Error {
    /// A capacity of zero was requested.
    #[error("capacity must be greater than 0")]
    ZeroCapacity,

    /// The fragment reserve does not fit in the current capacity, so no
    /// fragment could ever hold an allocation.
    #[error("fragment reserve {reserve} exceeds capacity {capacity}")]
    ReserveTooLarge {
        /// The requested reserve in bytes.
        reserve: usize,
        /// The capacity the reserve was checked against.
        capacity: usize,
    },

    /// A command record does not fit the stream's record header format.
    #[error("command payload of {0} bytes exceeds the record size limit")]
    PayloadTooLarge(usize),
}
