//! Deferred cross-thread checkpoint release.
//!
//! The ring allocator itself is single-producer and not synchronized.
//! What *is* shared is the moment of reclamation: the producer finishes
//! recording a batch and knows the checkpoint value, but only the
//! GPU-submission side knows when it is safe to release it. The slot
//! must be reserved *before* the batch is finished so the submission
//! thread can be told "a release will arrive here" without a race.
//!
//! The protocol is two-step:
//!
//! 1. [`SharedRingAllocator::acquire_checkpoint_guard`] reserves the
//!    single pending slot and hands back a [`CheckpointGuard`]. The
//!    guard's existence is the proof of the one allowed outstanding
//!    acquisition; a second acquire before the first is consumed trips
//!    a debug assertion.
//! 2. Once the producer knows the checkpoint value, any thread holding
//!    the guard calls [`CheckpointGuard::release_and_update`] to store
//!    it into the slot.
//! 3. The owner later drains the slot with
//!    [`SharedRingAllocator::release_pending`], which performs the real
//!    [`RingAllocator::release`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::allocator::RingAllocator;
use super::checkpoint::Checkpoint;

/// The mutex-guarded pending slot, shared between the owning allocator
/// and at most one outstanding [`CheckpointGuard`].
#[derive(Debug)]
struct SharedSlot {
    /// Pending checkpoint; invalid when the slot is empty.
    pending: Mutex<Checkpoint>,
    /// Reference count for debug checking only: 1 when no acquisition
    /// is outstanding, 2 while a guard is alive.
    handles: AtomicUsize,
}

/// A [`RingAllocator`] whose release can be deferred to another thread
/// through a single shared checkpoint slot.
///
/// Allocation stays on the producer thread via [`ring_mut`]; the only
/// synchronization in the subsystem is the mutex around the one pending
/// slot.
///
/// [`ring_mut`]: SharedRingAllocator::ring_mut
pub struct SharedRingAllocator {
    ring: RingAllocator,
    /// Lazily created on first acquisition; once shared, always shared.
    slot: Option<Arc<SharedSlot>>,
}

impl SharedRingAllocator {
    /// Wrap an allocator for deferred release.
    pub fn new(ring: RingAllocator) -> Self {
        Self { ring, slot: None }
    }

    /// Direct access to the wrapped allocator.
    pub fn ring(&self) -> &RingAllocator {
        &self.ring
    }

    /// Mutable access to the wrapped allocator, for allocation and
    /// checkpoint capture on the producer thread.
    pub fn ring_mut(&mut self) -> &mut RingAllocator {
        &mut self.ring
    }

    /// Whether a checkpoint guard has ever been acquired.
    ///
    /// One-way transition: never reverts to `false`.
    pub fn is_shared(&self) -> bool {
        self.slot.is_some()
    }

    /// Reserve the pending slot and return the guard proving the
    /// acquisition.
    ///
    /// The slot is created on first call. At most one guard may be
    /// outstanding at a time; re-acquiring before the previous guard is
    /// consumed (or dropped) trips a debug assertion.
    pub fn acquire_checkpoint_guard(&mut self) -> CheckpointGuard {
        let slot = self.slot.get_or_insert_with(|| {
            Arc::new(SharedSlot {
                pending: Mutex::new(Checkpoint::default()),
                handles: AtomicUsize::new(1),
            })
        });
        debug_assert_eq!(
            slot.handles.load(Ordering::Acquire),
            1,
            "a checkpoint guard is already outstanding for this allocator"
        );
        slot.handles.fetch_add(1, Ordering::AcqRel);
        CheckpointGuard {
            slot: Arc::clone(slot),
        }
    }

    /// Pop the pending checkpoint and, if one was stored, perform the
    /// real release on the wrapped allocator.
    ///
    /// Returns the checkpoint that was released, if any.
    pub fn release_pending(&mut self) -> Option<Checkpoint> {
        let slot = self.slot.as_ref()?;
        let pending = {
            let mut guard = slot.pending.lock().unwrap();
            std::mem::take(&mut *guard)
        };
        if pending.is_valid() {
            self.ring.release(pending);
            Some(pending)
        } else {
            None
        }
    }
}

impl Drop for SharedRingAllocator {
    fn drop(&mut self) {
        // Skip the check while unwinding so a failed assertion elsewhere
        // does not turn into an abort.
        if std::thread::panicking() {
            return;
        }
        if let Some(slot) = self.slot.as_ref() {
            debug_assert_eq!(
                slot.handles.load(Ordering::Acquire),
                1,
                "dropping a shared allocator while a checkpoint guard is outstanding"
            );
        }
    }
}

/// Proof of the single outstanding checkpoint acquisition.
///
/// May be sent to another thread. Consume it with
/// [`release_and_update`](Self::release_and_update) once the checkpoint
/// value is known; dropping it without storing abandons the acquisition
/// (the pending slot stays empty).
#[derive(Debug)]
pub struct CheckpointGuard {
    slot: Arc<SharedSlot>,
}

impl CheckpointGuard {
    /// Store `checkpoint` into the pending slot, consuming the guard.
    ///
    /// Overwrites any prior pending value and resets the source to
    /// invalid, so the same checkpoint cannot be released twice.
    pub fn release_and_update(self, checkpoint: &mut Checkpoint) {
        debug_assert!(
            checkpoint.is_valid(),
            "storing an invalid checkpoint into the shared slot"
        );
        let mut pending = self.slot.pending.lock().unwrap();
        *pending = std::mem::take(checkpoint);
        // The guard drops here, returning the handle count to 1.
    }
}

impl Drop for CheckpointGuard {
    fn drop(&mut self) {
        self.slot.handles.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared_with_capacity(capacity: usize) -> SharedRingAllocator {
        SharedRingAllocator::new(RingAllocator::with_capacity(capacity).unwrap())
    }

    #[test]
    fn test_is_shared_is_one_way() {
        let mut shared = shared_with_capacity(1024);
        assert!(!shared.is_shared());

        let guard = shared.acquire_checkpoint_guard();
        assert!(shared.is_shared());
        let mut cp = shared.ring().release_checkpoint();
        guard.release_and_update(&mut cp);
        let _ = shared.release_pending();
        assert!(shared.is_shared());
    }

    #[test]
    fn test_deferred_release_reclaims_allocation() {
        let mut shared = shared_with_capacity(1024);
        let guard = shared.acquire_checkpoint_guard();

        shared.ring_mut().allocate(600);
        let mut cp = shared.ring().release_checkpoint();
        guard.release_and_update(&mut cp);
        assert!(!cp.is_valid(), "the stored checkpoint must be reset");
        assert_eq!(shared.ring().live_bytes(), 600, "not yet released");

        let released = shared.release_pending();
        assert!(released.is_some());
        assert_eq!(shared.ring().live_bytes(), 0);
    }

    #[test]
    fn test_release_pending_without_store_is_a_no_op() {
        let mut shared = shared_with_capacity(1024);
        shared.ring_mut().allocate(100);
        assert!(shared.release_pending().is_none()); // no slot yet

        let guard = shared.acquire_checkpoint_guard();
        drop(guard); // abandoned acquisition
        assert!(shared.release_pending().is_none()); // slot exists but holds nothing
        assert_eq!(shared.ring().live_bytes(), 100);
    }

    #[test]
    fn test_guard_can_be_reacquired_after_consumption() {
        let mut shared = shared_with_capacity(1024);
        for _ in 0..3 {
            let guard = shared.acquire_checkpoint_guard();
            shared.ring_mut().allocate(50);
            let mut cp = shared.ring().release_checkpoint();
            guard.release_and_update(&mut cp);
            let _ = shared.release_pending();
        }
        assert_eq!(shared.ring().live_bytes(), 0);
    }

    #[test]
    #[should_panic(expected = "already outstanding")]
    fn test_double_acquire_panics() {
        let mut shared = shared_with_capacity(1024);
        let _first = shared.acquire_checkpoint_guard();
        let _second = shared.acquire_checkpoint_guard();
    }

    #[test]
    fn test_guard_crosses_threads() {
        let mut shared = shared_with_capacity(1024);
        let guard = shared.acquire_checkpoint_guard();

        shared.ring_mut().allocate(256);
        let mut cp = shared.ring().release_checkpoint();
        std::thread::spawn(move || {
            guard.release_and_update(&mut cp);
        })
        .join()
        .unwrap();

        let _ = shared.release_pending();
        assert_eq!(shared.ring().live_bytes(), 0);
    }
}
