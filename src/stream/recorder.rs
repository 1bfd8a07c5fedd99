//! The command recorder and its block bookkeeping.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::ring::{
    Checkpoint, CheckpointGuard, FragmentListener, RingAllocator, SharedRingAllocator,
};

/// Record header size in bytes.
const HEADER_SIZE: usize = 4;

/// Record payloads are padded to this alignment.
const RECORD_ALIGN: usize = 4;

/// End-of-block sentinel header (command id 0).
const SENTINEL: u32 = 0;

/// Largest payload a single record can carry.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// A contiguous run of records within one storage generation.
#[derive(Debug, Clone, Copy)]
struct Block {
    buffer_id: u64,
    start: usize,
    end: usize,
}

/// Listener state shared between the recorder and the allocator.
#[derive(Debug, Default)]
struct TrackerState {
    /// Set when the allocator repositions into a new fragment; consumed
    /// by the next push to start a new block.
    new_fragment: bool,
    /// Total fragments begun, for diagnostics.
    fragments_begun: usize,
}

/// The installed [`FragmentListener`]: terminates abandoned fragments
/// and flags fragment transitions for the recorder.
struct BlockTracker {
    state: Rc<RefCell<TrackerState>>,
}

impl FragmentListener for BlockTracker {
    fn on_fragment_end(&mut self, tail: &mut [u8]) {
        // The fragment reserve guarantees room for the sentinel except
        // in degenerate tiny-capacity configurations.
        if tail.len() >= HEADER_SIZE {
            tail[..HEADER_SIZE].copy_from_slice(&SENTINEL.to_le_bytes());
        }
    }

    fn on_new_fragment(&mut self) {
        let mut state = self.state.borrow_mut();
        state.new_fragment = true;
        state.fragments_begun += 1;
    }
}

/// Records binary command records into a ring allocator and replays
/// them block by block.
///
/// The producer thread pushes records and finishes blocks; each
/// finished block yields a [`Checkpoint`] that the submission side
/// releases once the GPU is done, either directly with
/// [`release`](Self::release) or deferred through
/// [`acquire_guard`](Self::acquire_guard) /
/// [`release_pending`](Self::release_pending).
///
/// # Example
///
/// ```rust
/// use cmdring::stream::CommandStream;
///
/// let mut stream = CommandStream::new(1024).unwrap();
/// stream.push(7, b"draw").unwrap();
/// stream.push(9, &[1, 2, 3, 4, 5]).unwrap();
/// let cp = stream.finish_block();
///
/// let mut seen = Vec::new();
/// stream.replay(|id, payload| seen.push((id, payload.len())));
/// assert_eq!(seen, vec![(7, 4), (9, 5)]);
///
/// stream.release(cp);
/// ```
pub struct CommandStream {
    ring: SharedRingAllocator,
    state: Rc<RefCell<TrackerState>>,
    blocks: Vec<Block>,
    /// Set by `finish_block` so the next push starts a new block.
    block_closed: bool,
}

impl CommandStream {
    /// Create a stream over a fresh allocator with the given floor
    /// capacity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroCapacity`] for a zero capacity, or
    /// [`Error::ReserveTooLarge`] if the capacity cannot hold even the
    /// sentinel reserve.
    pub fn new(min_capacity: usize) -> Result<Self> {
        let mut ring = RingAllocator::with_capacity(min_capacity)?;
        ring.try_set_fragment_reserve(HEADER_SIZE)?;

        let state = Rc::new(RefCell::new(TrackerState::default()));
        ring.set_listener(Some(Box::new(BlockTracker {
            state: Rc::clone(&state),
        })));

        Ok(Self {
            ring: SharedRingAllocator::new(ring),
            state,
            blocks: Vec::new(),
            block_closed: false,
        })
    }

    /// Read-only access to the underlying allocator.
    pub fn ring(&self) -> &RingAllocator {
        self.ring.ring()
    }

    /// Append one command record.
    ///
    /// `id` must be non-zero (0 is the sentinel). The payload is padded
    /// to 4-byte alignment inside the ring.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PayloadTooLarge`] if the payload exceeds
    /// [`MAX_PAYLOAD_LEN`].
    pub fn push(&mut self, id: u16, payload: &[u8]) -> Result<()> {
        debug_assert!(id != 0, "command id 0 is reserved for the sentinel");
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(Error::PayloadTooLarge(payload.len()));
        }

        let padded = (payload.len() + (RECORD_ALIGN - 1)) & !(RECORD_ALIGN - 1);
        let total = HEADER_SIZE + padded;

        let header = u32::from(id) | ((payload.len() as u32) << 16);
        let bytes = self.ring.ring_mut().allocate(total);
        bytes[..HEADER_SIZE].copy_from_slice(&header.to_le_bytes());
        bytes[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(payload);
        // Wrapped fragments may hold stale data; keep the pad clean.
        bytes[HEADER_SIZE + payload.len()..].fill(0);

        let end = self.ring.ring().cursor();
        let start = end - total;
        let buffer_id = self.ring.ring().buffer_id();

        let fragment_changed = std::mem::take(&mut self.state.borrow_mut().new_fragment);
        let block_closed = std::mem::take(&mut self.block_closed);
        match self.blocks.last_mut() {
            Some(last)
                if !fragment_changed
                    && !block_closed
                    && last.buffer_id == buffer_id
                    && last.end == start =>
            {
                last.end = end;
            }
            _ => self.blocks.push(Block {
                buffer_id,
                start,
                end,
            }),
        }
        Ok(())
    }

    /// Terminate the current block with a sentinel and snapshot the
    /// checkpoint that releases everything recorded so far.
    ///
    /// The sentinel is written into the fragment reserve without
    /// allocating; the next push starts a new block at the same cursor.
    pub fn finish_block(&mut self) -> Checkpoint {
        let tail = self.ring.ring_mut().fragment_tail_mut();
        if tail.len() >= HEADER_SIZE {
            tail[..HEADER_SIZE].copy_from_slice(&SENTINEL.to_le_bytes());
        }
        self.block_closed = true;
        self.ring.ring().release_checkpoint()
    }

    /// Release a checkpoint immediately on the producer thread.
    ///
    /// Blocks covered by the checkpoint are pruned from replay.
    pub fn release(&mut self, checkpoint: Checkpoint) {
        self.ring.ring_mut().release(checkpoint);
        self.prune_blocks(checkpoint);
    }

    /// Reserve the shared slot for a deferred release (see
    /// [`SharedRingAllocator::acquire_checkpoint_guard`]).
    pub fn acquire_guard(&mut self) -> CheckpointGuard {
        self.ring.acquire_checkpoint_guard()
    }

    /// Perform any release stored through a guard, pruning the blocks
    /// it covered.
    pub fn release_pending(&mut self) {
        if let Some(released) = self.ring.release_pending() {
            self.prune_blocks(released);
        }
    }

    /// Number of blocks currently tracked.
    pub fn blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Total fragments the allocator has begun for this stream.
    pub fn fragments_begun(&self) -> usize {
        self.state.borrow().fragments_begun
    }

    /// Walk every live record in recording order.
    ///
    /// Records in storages already freed by a release are skipped;
    /// within a block, replay stops early at a sentinel.
    pub fn replay(&self, mut visit: impl FnMut(u16, &[u8])) {
        for block in &self.blocks {
            let Some(bytes) = self.ring.ring().storage_bytes(block.buffer_id) else {
                continue;
            };
            let mut offset = block.start;
            while offset + HEADER_SIZE <= block.end {
                let header = u32::from_le_bytes([
                    bytes[offset],
                    bytes[offset + 1],
                    bytes[offset + 2],
                    bytes[offset + 3],
                ]);
                if header == SENTINEL {
                    break;
                }
                let id = (header & 0xFFFF) as u16;
                let len = (header >> 16) as usize;
                let payload_start = offset + HEADER_SIZE;
                visit(id, &bytes[payload_start..payload_start + len]);
                let padded = (len + (RECORD_ALIGN - 1)) & !(RECORD_ALIGN - 1);
                offset += HEADER_SIZE + padded;
            }
        }
    }

    /// Drop the prefix of blocks covered by a released checkpoint, plus
    /// any block whose backing storage has been freed.
    ///
    /// Checkpoints handed to [`release`](Self::release) come from
    /// [`finish_block`](Self::finish_block), so a released checkpoint
    /// always lands on a block boundary.
    fn prune_blocks(&mut self, released: Checkpoint) {
        if let Some(index) = self.blocks.iter().position(|block| {
            block.buffer_id == released.buffer_id() && block.end == released.release_offset()
        }) {
            self.blocks.drain(..=index);
        }
        let ring = self.ring.ring();
        self.blocks
            .retain(|block| ring.storage_bytes(block.buffer_id).is_some());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(stream: &CommandStream) -> Vec<(u16, Vec<u8>)> {
        let mut seen = Vec::new();
        stream.replay(|id, payload| seen.push((id, payload.to_vec())));
        seen
    }

    #[test]
    fn test_push_and_replay_round_trip() {
        let mut stream = CommandStream::new(1024).unwrap();
        stream.push(1, b"bind").unwrap();
        stream.push(2, b"").unwrap();
        stream.push(3, &[0xFF; 9]).unwrap();

        let seen = collect(&stream);
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], (1, b"bind".to_vec()));
        assert_eq!(seen[1], (2, Vec::new()));
        assert_eq!(seen[2], (3, vec![0xFF; 9]));
        assert_eq!(stream.blocks(), 1);
    }

    #[test]
    fn test_records_are_word_aligned() {
        let mut stream = CommandStream::new(1024).unwrap();
        stream.push(1, &[1]).unwrap();
        assert_eq!(stream.ring().cursor() % 4, 0);
        stream.push(2, &[1, 2, 3]).unwrap();
        assert_eq!(stream.ring().cursor() % 4, 0);
    }

    #[test]
    fn test_capacity_below_sentinel_reserve_is_rejected() {
        assert!(matches!(CommandStream::new(0), Err(Error::ZeroCapacity)));
        assert!(matches!(
            CommandStream::new(2),
            Err(Error::ReserveTooLarge {
                reserve: 4,
                capacity: 2
            })
        ));
        assert!(CommandStream::new(HEADER_SIZE).is_ok());
    }

    #[test]
    fn test_oversized_payload_is_rejected() {
        let mut stream = CommandStream::new(1024).unwrap();
        let payload = vec![0u8; MAX_PAYLOAD_LEN + 1];
        assert!(matches!(
            stream.push(1, &payload),
            Err(Error::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn test_finish_block_writes_sentinel_and_splits_blocks() {
        let mut stream = CommandStream::new(1024).unwrap();
        stream.push(1, b"a").unwrap();
        let cp = stream.finish_block();
        assert!(cp.is_valid());

        // The sentinel sits at the cursor, in reserved space.
        let cursor = stream.ring().cursor();
        let bytes = stream.ring().storage_bytes(stream.ring().buffer_id()).unwrap();
        assert_eq!(&bytes[cursor..cursor + 4], &SENTINEL.to_le_bytes());

        stream.push(2, b"b").unwrap();
        assert_eq!(stream.blocks(), 2);
        assert_eq!(collect(&stream).len(), 2);
    }

    #[test]
    fn test_records_survive_growth() {
        let mut stream = CommandStream::new(64).unwrap();
        let payloads: Vec<Vec<u8>> = (0..20u8).map(|i| vec![i; 50]).collect();
        for (i, payload) in payloads.iter().enumerate() {
            stream.push(i as u16 + 1, payload).unwrap();
        }
        // Growth retired at least one storage and began new fragments.
        assert!(stream.fragments_begun() >= 1);

        let seen = collect(&stream);
        assert_eq!(seen.len(), payloads.len());
        for (i, (id, payload)) in seen.iter().enumerate() {
            assert_eq!(*id as usize, i + 1);
            assert_eq!(payload, &payloads[i]);
        }
    }

    #[test]
    fn test_records_survive_wraparound() {
        let mut stream = CommandStream::new(256).unwrap();

        // Fill most of the ring, release it, then keep pushing so the
        // allocator wraps instead of growing.
        stream.push(1, &[0xAA; 150]).unwrap();
        let cp = stream.finish_block();
        let id_before = stream.ring().buffer_id();
        stream.push(2, &[0xBB; 40]).unwrap();
        stream.release(cp);

        stream.push(3, &[0xCC; 100]).unwrap();
        assert_eq!(stream.ring().buffer_id(), id_before, "must wrap, not grow");

        let seen = collect(&stream);
        let ids: Vec<u16> = seen.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(seen[1].1, vec![0xCC; 100]);
    }

    #[test]
    fn test_release_prunes_dead_blocks() {
        let mut stream = CommandStream::new(64).unwrap();
        stream.push(1, &[1; 50]).unwrap();
        stream.push(2, &[2; 200]).unwrap(); // forces growth
        assert!(stream.ring().retired_count() >= 1);

        let cp = stream.finish_block();
        stream.release(cp);
        assert_eq!(stream.ring().retired_count(), 0);
        assert!(stream.blocks() <= 1);
    }

    #[test]
    fn test_deferred_release_via_guard() {
        let mut stream = CommandStream::new(1024).unwrap();
        let guard = stream.acquire_guard();
        stream.push(1, b"frame").unwrap();
        let mut cp = stream.finish_block();

        guard.release_and_update(&mut cp);
        assert_eq!(stream.ring().live_bytes(), 12, "not yet released");
        stream.release_pending();
        assert_eq!(stream.ring().live_bytes(), 0);
    }
}
