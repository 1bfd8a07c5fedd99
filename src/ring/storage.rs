//! Backing storage for the ring allocator.

/// Padding reserved at the front of every storage allocation so that
/// offset 0 of the usable region sits `BASE_ALIGNMENT` bytes into the
/// allocation. Command records are packed at 4-byte granularity on top
/// of this base.
pub(crate) const BASE_ALIGNMENT: usize = 16;

/// A single contiguous byte storage with a generation id.
///
/// Generation ids are assigned by the owning [`RingAllocator`] from a
/// strictly increasing counter; id 0 is reserved to mean "unallocated".
/// Resizing replaces the backing bytes without preserving contents: the
/// allocator only resizes after the old contents have been retired into
/// its old-storage list, where the original allocation stays alive.
///
/// All addressing is done with offsets into the usable region rather
/// than raw pointers, so a resize can never leave a dangling cursor.
///
/// [`RingAllocator`]: super::RingAllocator
#[derive(Debug, Default)]
pub(crate) struct Storage {
    /// Generation counter. 0 means no storage has been allocated yet.
    id: u64,
    /// Owned bytes, including the `BASE_ALIGNMENT` front pad.
    data: Box<[u8]>,
}

impl Storage {
    /// Allocate a fresh storage of `capacity` usable bytes with the
    /// given generation id.
    pub(crate) fn with_capacity(capacity: usize, id: u64) -> Self {
        debug_assert!(id != 0, "generation id 0 is reserved");
        let data = vec![0u8; capacity + BASE_ALIGNMENT].into_boxed_slice();
        Self { id, data }
    }

    /// The generation id, or 0 if unallocated.
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Usable bytes (excludes the front pad).
    pub(crate) fn capacity(&self) -> usize {
        self.data.len().saturating_sub(BASE_ALIGNMENT)
    }

    /// Borrow the usable region `[start, end)`.
    pub(crate) fn bytes(&self, start: usize, end: usize) -> &[u8] {
        &self.data[BASE_ALIGNMENT + start..BASE_ALIGNMENT + end]
    }

    /// Mutably borrow the usable region `[start, end)`.
    pub(crate) fn bytes_mut(&mut self, start: usize, end: usize) -> &mut [u8] {
        &mut self.data[BASE_ALIGNMENT + start..BASE_ALIGNMENT + end]
    }
}

/// `offset - amount`, clamped at the start of the usable region.
pub(crate) fn sub_clamped(offset: usize, amount: usize) -> usize {
    offset.saturating_sub(amount)
}
