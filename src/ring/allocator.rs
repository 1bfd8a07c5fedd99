//! The ring-buffer command allocator.

use smallvec::SmallVec;

use super::checkpoint::Checkpoint;
use super::storage::{sub_clamped, Storage};
use crate::error::{Error, Result};
use crate::observability;

/// Default floor capacity in bytes.
pub const DEFAULT_MIN_CAPACITY: usize = 1024;

/// Default damping constant for the allocation-margin decay.
pub const DEFAULT_DECAY_SPEED_FACTOR: usize = 10;

/// Shrink is considered when live usage is under `1/6` of capacity.
const SHRINK_UTILIZATION_FACTOR: usize = 6;

/// Shrink keeps `3x` headroom over the usage observed at release time.
const SHRINK_HEADROOM_FACTOR: usize = 3;

/// Callback pair that lets a consumer react to fragment transitions
/// without polling.
///
/// The allocator invokes these synchronously from inside
/// [`RingAllocator::allocate`] when the current fragment cannot satisfy
/// a request:
///
/// - [`on_fragment_end`] fires first, while the abandoned fragment's
///   bytes are still addressable. `tail` is the unallocated span at the
///   end of that fragment (it always includes the configured fragment
///   reserve), which is where a recorder writes its end-of-block
///   terminator.
/// - [`on_new_fragment`] fires once the allocator has repositioned its
///   write cursor into a wrapped or freshly grown fragment.
///
/// Within a single slow-path allocation each callback runs at most
/// once, and `on_fragment_end` strictly before `on_new_fragment`.
///
/// [`on_fragment_end`]: FragmentListener::on_fragment_end
/// [`on_new_fragment`]: FragmentListener::on_new_fragment
pub trait FragmentListener {
    /// The current fragment is about to be abandoned.
    fn on_fragment_end(&mut self, tail: &mut [u8]);

    /// The allocator is about to start writing into a new fragment.
    fn on_new_fragment(&mut self);
}

/// Ring-buffer allocator for variable-sized, tightly packed command
/// records, with checkpoint-based deferred reclamation.
///
/// A single producer thread appends records with [`allocate`]; space is
/// reclaimed only when a [`Checkpoint`] previously captured with
/// [`release_checkpoint`] is handed back to [`release`], typically after
/// the GPU has finished consuming the recorded range. When the current
/// fragment runs out the allocator wraps into freed space at the start
/// of the storage, or grows into a fresh storage while the old one is
/// *retired* (kept alive until a later checkpoint supersedes it), so no
/// live command data is ever overwritten.
///
/// Capacity adapts in both directions: growth is at least 1.5x on
/// exhaustion, and a decaying high-water margin shrinks capacity back
/// down when usage stays low (see [`set_decay_speed_factor`]).
///
/// # Concurrency
///
/// Not internally synchronized; all methods assume an exclusive owner.
/// For deferred cross-thread release, wrap it in a
/// [`SharedRingAllocator`](super::SharedRingAllocator).
///
/// # Contract violations
///
/// This is hot-path, per-frame code: misuse (allocating from an
/// uninitialized allocator, releasing an invalid or out-of-order
/// checkpoint) is a caller bug and is checked with debug assertions
/// rather than surfaced as [`Error`].
///
/// [`allocate`]: RingAllocator::allocate
/// [`release`]: RingAllocator::release
/// [`release_checkpoint`]: RingAllocator::release_checkpoint
/// [`set_decay_speed_factor`]: RingAllocator::set_decay_speed_factor
pub struct RingAllocator {
    storage: Storage,
    /// Retired storages, ascending by generation id. Only ever appended,
    /// so release can drop superseded entries from the front.
    retired: SmallVec<[Storage; 4]>,
    /// Last generation id handed out; never reset.
    last_id: u64,

    /// Oldest live byte.
    data_begin: usize,
    /// Next write position.
    data_end: usize,
    /// End of the currently writable fragment.
    fragment_end: usize,
    /// `fragment_end` minus the reserve margin.
    fragment_end_reserved: usize,
    /// Bytes held back at the end of every fragment.
    fragment_reserve: usize,

    min_capacity: usize,
    /// Adaptive high-water mark used to decide when to shrink.
    allocation_margin: usize,
    decay_speed_factor: usize,

    listener: Option<Box<dyn FragmentListener>>,
}

impl RingAllocator {
    /// Create an uninitialized allocator.
    ///
    /// The allocator is invalid until [`reset`](Self::reset) or
    /// [`reset_with_capacity`](Self::reset_with_capacity) is called.
    pub fn new() -> Self {
        Self {
            storage: Storage::default(),
            retired: SmallVec::new(),
            last_id: 0,
            data_begin: 0,
            data_end: 0,
            fragment_end: 0,
            fragment_end_reserved: 0,
            fragment_reserve: 0,
            min_capacity: DEFAULT_MIN_CAPACITY,
            allocation_margin: 0,
            decay_speed_factor: DEFAULT_DECAY_SPEED_FACTOR,
            listener: None,
        }
    }

    /// Create an allocator initialized with the given floor capacity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroCapacity`] if `min_capacity` is 0.
    pub fn with_capacity(min_capacity: usize) -> Result<Self> {
        let mut allocator = Self::new();
        allocator.reset_with_capacity(min_capacity)?;
        Ok(allocator)
    }

    /// Reinitialize to an empty state with the default floor capacity
    /// ([`DEFAULT_MIN_CAPACITY`]).
    ///
    /// Clears the listener, the fragment reserve, and all retired
    /// storages, and restores the default decay speed factor.
    pub fn reset(&mut self) {
        self.reset_with_capacity(DEFAULT_MIN_CAPACITY)
            .expect("default capacity is non-zero");
    }

    /// Reinitialize to an empty state with the given floor capacity.
    ///
    /// See [`reset`](Self::reset). Generation ids keep increasing across
    /// resets.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroCapacity`] if `min_capacity` is 0.
    pub fn reset_with_capacity(&mut self, min_capacity: usize) -> Result<()> {
        if min_capacity == 0 {
            return Err(Error::ZeroCapacity);
        }
        self.listener = None;
        self.fragment_reserve = 0;
        self.decay_speed_factor = DEFAULT_DECAY_SPEED_FACTOR;
        self.retired.clear();
        self.min_capacity = min_capacity;
        // Drop the current storage outright rather than retiring it.
        self.storage = Storage::default();
        self.resize(min_capacity);
        Ok(())
    }

    /// Whether a current storage exists.
    pub fn is_valid(&self) -> bool {
        self.storage.id() != 0
    }

    /// Install or clear the single allowed fragment listener.
    ///
    /// # Panics
    ///
    /// Panics if a listener is already installed and `listener` is not
    /// `None`. Clear the existing listener first.
    pub fn set_listener(&mut self, listener: Option<Box<dyn FragmentListener>>) {
        assert!(
            self.listener.is_none() || listener.is_none(),
            "a fragment listener is already installed"
        );
        self.listener = listener;
    }

    /// Set the damping constant for the allocation-margin decay.
    ///
    /// Clamped to a floor of 1. Larger values make the adaptive shrink
    /// slower and smoother, avoiding resize thrash on bursty workloads.
    pub fn set_decay_speed_factor(&mut self, factor: usize) {
        self.decay_speed_factor = factor.max(1);
    }

    /// Set how many trailing bytes of every fragment stay unallocated.
    ///
    /// Consumers use the reserve to guarantee room for a terminator
    /// record at the end of each fragment (see
    /// [`fragment_tail_mut`](Self::fragment_tail_mut)). The reserved
    /// boundary of the current fragment is recomputed immediately.
    pub fn set_fragment_reserve(&mut self, reserve: usize) {
        self.fragment_reserve = reserve;
        self.fragment_end_reserved = sub_clamped(self.fragment_end, reserve);
    }

    /// Validating form of [`set_fragment_reserve`](Self::set_fragment_reserve).
    ///
    /// A reserve larger than the current capacity can never leave room to
    /// allocate; reject it instead of silently clamping.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReserveTooLarge`] if `reserve` exceeds
    /// [`capacity`](Self::capacity). The configured reserve is left
    /// unchanged on error.
    pub fn try_set_fragment_reserve(&mut self, reserve: usize) -> Result<()> {
        if reserve > self.capacity() {
            return Err(Error::ReserveTooLarge {
                reserve,
                capacity: self.capacity(),
            });
        }
        self.set_fragment_reserve(reserve);
        Ok(())
    }

    /// Allocate `size` bytes, advancing the write cursor.
    ///
    /// Returns the newly allocated span. The fast path is a bounds check
    /// and a cursor bump; when the current fragment cannot satisfy the
    /// request the allocator wraps into freed leading space or grows,
    /// notifying the listener either way.
    ///
    /// The returned bytes are zero-initialized only for fresh storage;
    /// wrapped fragments may contain stale record data.
    pub fn allocate(&mut self, size: usize) -> &mut [u8] {
        debug_assert!(self.is_valid(), "allocate on an uninitialized allocator");
        if self.data_end + size <= self.fragment_end_reserved {
            let start = self.data_end;
            self.data_end += size;
            return self.storage.bytes_mut(start, self.data_end);
        }
        self.allocate_in_new_fragment(size)
    }

    /// Current write offset within the current storage.
    pub fn cursor(&self) -> usize {
        self.data_end
    }

    /// Generation id of the current storage (0 if uninitialized).
    pub fn buffer_id(&self) -> u64 {
        self.storage.id()
    }

    /// Bytes remaining in the currently writable fragment, including
    /// the reserve.
    pub fn fragment_remaining(&self) -> usize {
        self.fragment_end - self.data_end
    }

    /// Usable capacity of the current storage in bytes.
    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    /// The configured floor capacity in bytes.
    pub fn min_capacity(&self) -> usize {
        self.min_capacity
    }

    /// Number of retired storages pending release.
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    /// Live byte count in the current storage.
    ///
    /// In the wrapped layout this includes the abandoned tail of the
    /// previous fragment, which stays unreclaimable until the release
    /// cursor passes it.
    pub fn live_bytes(&self) -> usize {
        if self.data_begin == self.fragment_end {
            // Wrapped: one free gap [data_end, data_begin) in the middle.
            self.storage.capacity() - (self.data_begin - self.data_end)
        } else {
            self.data_end - self.data_begin
        }
    }

    /// Snapshot a checkpoint at the current write position.
    ///
    /// Pure query; releasing the returned checkpoint reclaims everything
    /// allocated up to this call.
    pub fn release_checkpoint(&self) -> Checkpoint {
        debug_assert!(self.is_valid(), "checkpoint on an uninitialized allocator");
        Checkpoint {
            buffer_id: self.storage.id(),
            release_offset: self.data_end,
        }
    }

    /// The unallocated tail of the current fragment, including the
    /// reserved bytes.
    ///
    /// Writing here does not advance the cursor; a later allocation in
    /// the same fragment may overwrite it. Recorders use this to place a
    /// terminator record after the last allocated command.
    pub fn fragment_tail_mut(&mut self) -> &mut [u8] {
        debug_assert!(self.is_valid(), "tail access on an uninitialized allocator");
        let (start, end) = (self.data_end, self.fragment_end);
        self.storage.bytes_mut(start, end)
    }

    /// Read the full usable region of the storage with the given
    /// generation id, if it is still alive (current or retired).
    pub fn storage_bytes(&self, buffer_id: u64) -> Option<&[u8]> {
        if buffer_id == self.storage.id() && self.is_valid() {
            return Some(self.storage.bytes(0, self.storage.capacity()));
        }
        self.retired
            .iter()
            .find(|s| s.id() == buffer_id)
            .map(|s| s.bytes(0, s.capacity()))
    }

    /// Reclaim everything allocated before `checkpoint`.
    ///
    /// Retired storages entirely superseded by the checkpoint are freed,
    /// and if the checkpoint refers to the current storage the release
    /// cursor advances and the adaptive capacity heuristic runs: shrink
    /// when usage sits under 1/6 of capacity at the high-water margin,
    /// otherwise let the margin decay toward observed usage.
    ///
    /// Checkpoints must be released in capture order; releasing an older
    /// checkpoint after a newer one is a contract violation (checked by
    /// debug assertions where cheaply detectable).
    pub fn release(&mut self, checkpoint: Checkpoint) {
        debug_assert!(self.is_valid(), "release on an uninitialized allocator");
        debug_assert!(checkpoint.is_valid(), "release of an invalid checkpoint");
        debug_assert!(
            checkpoint.buffer_id <= self.storage.id(),
            "checkpoint refers to a storage generation that does not exist yet"
        );

        // Everything in a retired storage older than the checkpoint's
        // generation is already fully consumed.
        while self
            .retired
            .first()
            .is_some_and(|s| s.id() < checkpoint.buffer_id)
        {
            let dropped = self.retired.remove(0);
            tracing::trace!(buffer_id = dropped.id(), "dropped retired storage");
            observability::record_storage_dropped();
        }

        if checkpoint.buffer_id != self.storage.id() {
            // The checkpoint lands in a retired storage; its contents
            // are entirely before the current storage.
            return;
        }

        let allocated_before = self.live_bytes();
        self.release_at(checkpoint.release_offset);

        if allocated_before >= self.allocation_margin {
            if self.capacity() > self.min_capacity
                && allocated_before * SHRINK_UTILIZATION_FACTOR <= self.capacity()
            {
                let target = (allocated_before * SHRINK_HEADROOM_FACTOR).max(self.min_capacity);
                self.resize(target);
            } else {
                self.allocation_margin = self.capacity();
            }
        } else {
            let num_released = allocated_before - self.live_bytes();
            let distance_to_margin = self.allocation_margin - allocated_before;
            let step = (num_released * distance_to_margin
                / self.allocation_margin
                / self.decay_speed_factor)
                .max(1);
            self.allocation_margin = self.allocation_margin.saturating_sub(step);
        }
        observability::record_live_bytes(self.live_bytes());
    }

    /// Slow allocation path: the current fragment cannot satisfy `size`.
    fn allocate_in_new_fragment(&mut self, size: usize) -> &mut [u8] {
        // Let the consumer terminate the fragment it was writing into
        // while its bytes are still the active fragment.
        self.notify_fragment_end();

        if self.fragment_end != self.data_begin {
            // Single live region: the leading free span is [0, data_begin).
            if size + self.fragment_reserve <= self.data_begin {
                self.data_end = 0;
                self.fragment_end = self.data_begin;
                self.fragment_end_reserved = self.fragment_end - self.fragment_reserve;
                self.notify_new_fragment();
                self.data_end = size;
                return self.storage.bytes_mut(0, size);
            }
        }

        // No reachable fragment fits: grow by at least 50%, or enough
        // for the request plus the reserve.
        let grown = (self.capacity() + self.capacity() / 2).max(size + self.fragment_reserve);
        self.resize(grown);
        self.notify_new_fragment();
        let start = self.data_end;
        self.data_end += size;
        self.storage.bytes_mut(start, self.data_end)
    }

    /// Advance the release cursor to `offset` within the current
    /// storage, re-deriving the fragment layout.
    fn release_at(&mut self, offset: usize) {
        debug_assert!(offset <= self.storage.capacity());

        if offset == self.data_end {
            // Completely empty again.
            self.reset_positions();
            return;
        }

        if self.data_begin == self.fragment_end {
            // Wrapped layout: the free gap sits in the middle.
            if offset >= self.data_begin {
                // Still within the tail region near the storage end.
                self.data_begin = offset;
                self.fragment_end = offset;
            } else {
                // The tail is fully consumed; back to one live region
                // [offset, data_end) with the fragment running to the
                // physical end.
                debug_assert!(
                    offset < self.data_end,
                    "release offset outside the live region"
                );
                self.data_begin = offset;
                self.fragment_end = self.storage.capacity();
            }
            self.fragment_end_reserved = sub_clamped(self.fragment_end, self.fragment_reserve);
        } else {
            debug_assert!(
                offset >= self.data_begin && offset < self.data_end,
                "release offset outside the live region"
            );
            self.data_begin = offset;
        }
    }

    /// Reset all positions to an empty, full-capacity single fragment.
    fn reset_positions(&mut self) {
        self.data_begin = 0;
        self.data_end = 0;
        self.fragment_end = self.storage.capacity();
        self.fragment_end_reserved = sub_clamped(self.fragment_end, self.fragment_reserve);
    }

    /// Retire the current storage (if any) and start a fresh one.
    ///
    /// The requested capacity is rounded up to a multiple of the floor
    /// capacity to keep resize targets stable across small fluctuations.
    fn resize(&mut self, new_capacity: usize) {
        let old_capacity = self.capacity();
        let new_capacity = round_up(new_capacity, self.min_capacity);

        if self.is_valid() {
            let old = std::mem::take(&mut self.storage);
            tracing::trace!(buffer_id = old.id(), "retired storage pending release");
            observability::record_storage_retired();
            self.retired.push(old);
        }

        self.last_id += 1;
        self.storage = Storage::with_capacity(new_capacity, self.last_id);
        self.allocation_margin = new_capacity;
        self.reset_positions();

        tracing::debug!(
            old_capacity,
            new_capacity,
            buffer_id = self.last_id,
            "resized ring storage"
        );
        observability::record_resize(old_capacity, new_capacity);
    }

    fn notify_fragment_end(&mut self) {
        if let Some(mut listener) = self.listener.take() {
            let (start, end) = (self.data_end, self.fragment_end);
            listener.on_fragment_end(self.storage.bytes_mut(start, end));
            self.listener = Some(listener);
        }
    }

    fn notify_new_fragment(&mut self) {
        if let Some(listener) = self.listener.as_mut() {
            listener.on_new_fragment();
        }
    }
}

impl Default for RingAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Round `value` up to the next multiple of `step`.
fn round_up(value: usize, step: usize) -> usize {
    debug_assert!(step > 0);
    value.div_ceil(step) * step
}
