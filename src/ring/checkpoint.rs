//! Checkpoint value type for deferred reclamation.

/// An immutable snapshot of "how much has been allocated so far".
///
/// A checkpoint pairs the generation id of the storage it refers to with
/// the write offset at capture time. Handing it back to
/// [`RingAllocator::release`] tells the allocator that everything before
/// that point has been consumed and can be reclaimed.
///
/// A default-constructed checkpoint is invalid (`buffer_id == 0`) and
/// must never be passed to `release`; this is cheap to copy and safe to
/// hold across threads.
///
/// [`RingAllocator::release`]: super::RingAllocator::release
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checkpoint {
    pub(crate) buffer_id: u64,
    pub(crate) release_offset: usize,
}

impl Checkpoint {
    /// Whether this checkpoint refers to an actual storage generation.
    pub fn is_valid(&self) -> bool {
        self.buffer_id != 0
    }

    /// Generation id of the storage this checkpoint refers to.
    pub fn buffer_id(&self) -> u64 {
        self.buffer_id
    }

    /// Byte offset within that storage marking "everything before this
    /// is now free".
    pub fn release_offset(&self) -> usize {
        self.release_offset
    }
}
