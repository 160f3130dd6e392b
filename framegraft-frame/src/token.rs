//! Frame tokens. A small ring of stable slots, one per frame in flight;
//! a token stays valid for every call bearing its frame id.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// Opaque per-frame id. The host treats the pointer as stable for at
/// least `MAX_FRAMES_IN_FLIGHT` frames.
#[derive(Debug, Default)]
pub struct FrameToken {
    counter: AtomicU32,
}

impl FrameToken {
    pub fn frame_id(&self) -> u32 {
        self.counter.load(Ordering::Acquire)
    }
}

struct RingState {
    head: usize,
    counter: u32,
}

pub struct FrameTokenRing {
    slots: [Arc<FrameToken>; MAX_FRAMES_IN_FLIGHT],
    state: Mutex<RingState>,
}

impl Default for FrameTokenRing {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameTokenRing {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| Arc::new(FrameToken::default())),
            state: Mutex::new(RingState { head: 0, counter: 0 }),
        }
    }

    /// Two cases: with no index the ring advances and stores the next
    /// internal counter value; with an index the current head is reused
    /// when the index matches (multiple tokens per frame are fine),
    /// otherwise the ring advances and the oldest slot is evicted. An
    /// out-of-order index is deliberately treated the same way: new slot,
    /// oldest evicted.
    pub fn get(&self, frame_index: Option<u32>) -> Arc<FrameToken> {
        let mut state = self.state.lock().unwrap();
        let head_matches = frame_index
            .map(|index| self.slots[state.head].frame_id() == index)
            .unwrap_or(false);
        if !head_matches {
            state.head = (state.head + 1) % MAX_FRAMES_IN_FLIGHT;
            let value = match frame_index {
                Some(index) => index,
                None => {
                    state.counter = state.counter.wrapping_add(1);
                    state.counter
                }
            };
            self.slots[state.head].counter.store(value, Ordering::Release);
        }
        self.slots[state.head].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_come_from_a_fixed_set_of_slots() {
        let ring = FrameTokenRing::new();
        let mut seen: Vec<*const FrameToken> = Vec::new();
        for _ in 0..32 {
            let token = ring.get(None);
            let ptr = Arc::as_ptr(&token);
            if !seen.contains(&ptr) {
                seen.push(ptr);
            }
        }
        assert_eq!(seen.len(), MAX_FRAMES_IN_FLIGHT);
    }

    #[test]
    fn implicit_tokens_count_monotonically() {
        let ring = FrameTokenRing::new();
        let a = ring.get(None).frame_id();
        let b = ring.get(None).frame_id();
        let c = ring.get(None).frame_id();
        assert_eq!(b, a + 1);
        assert_eq!(c, b + 1);
    }

    #[test]
    fn same_explicit_index_reuses_the_head_slot() {
        let ring = FrameTokenRing::new();
        let first = ring.get(Some(90));
        let second = ring.get(Some(90));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.frame_id(), 90);

        let third = ring.get(Some(91));
        assert!(!Arc::ptr_eq(&second, &third));
        assert_eq!(third.frame_id(), 91);
    }

    #[test]
    fn explicit_index_is_stored_verbatim() {
        let ring = FrameTokenRing::new();
        assert_eq!(ring.get(Some(1000)).frame_id(), 1000);
        // Out-of-order index takes a fresh slot and sticks.
        assert_eq!(ring.get(Some(7)).frame_id(), 7);
    }

    #[test]
    fn token_outlives_ring_rotation() {
        let ring = FrameTokenRing::new();
        let token = ring.get(Some(5));
        for i in 6..6 + MAX_FRAMES_IN_FLIGHT as u32 {
            ring.get(Some(i));
        }
        // The slot was reused, but the Arc keeps the allocation alive.
        assert!(token.frame_id() >= 5);
    }
}
