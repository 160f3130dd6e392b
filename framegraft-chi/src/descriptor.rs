//! Descriptor heap slot allocation with wrap-around double buffering.
//!
//! One shader-visible heap holds `MAX_DESCRIPTORS × WRAPAROUND_CAPACITY`
//! slots. The allocation index advances monotonically inside the active
//! generation; filling a generation rotates to the next one and clears the
//! cached-view map, since every cached slot now points at stale data.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

pub const MAX_DESCRIPTORS: u32 = 1024;
pub const WRAPAROUND_CAPACITY: u32 = 2;

#[derive(Debug, Default)]
struct RingState {
    offset: u32,
    generation: u32,
    wrap_count: u64,
}

/// Slot allocator for the heap. Binding is serialized by the owning
/// context, but the allocator stays internally consistent regardless.
#[derive(Default)]
pub struct DescriptorRing {
    state: Mutex<RingState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorSlot {
    /// Absolute heap index: `generation * MAX_DESCRIPTORS + offset`.
    pub index: u32,
    /// True when this allocation rotated the generation.
    pub wrapped: bool,
}

impl DescriptorRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self) -> DescriptorSlot {
        let mut state = self.state.lock().unwrap();
        let mut wrapped = false;
        if state.offset == MAX_DESCRIPTORS {
            state.generation = (state.generation + 1) % WRAPAROUND_CAPACITY;
            state.offset = 0;
            state.wrap_count += 1;
            wrapped = true;
        }
        let index = state.generation * MAX_DESCRIPTORS + state.offset;
        state.offset += 1;
        DescriptorSlot { index, wrapped }
    }

    pub fn wrap_count(&self) -> u64 {
        self.state.lock().unwrap().wrap_count
    }
}

/// Cached views living in the descriptor heap, keyed by whatever makes a
/// view unique on the backend (resource, mip range, uav-ness).
pub struct ViewCache<K: Eq + Hash + Clone> {
    ring: DescriptorRing,
    map: Mutex<HashMap<K, u32>>,
}

impl<K: Eq + Hash + Clone> Default for ViewCache<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> ViewCache<K> {
    pub fn new() -> Self {
        Self { ring: DescriptorRing::new(), map: Mutex::new(HashMap::new()) }
    }

    /// Cached slot for `key`, or a fresh slot with `create(slot_index)`
    /// run to populate it. A wrap clears the whole cache first.
    pub fn get_or_create(&self, key: K, create: impl FnOnce(u32)) -> u32 {
        if let Some(&index) = self.map.lock().unwrap().get(&key) {
            return index;
        }
        let slot = self.ring.allocate();
        if slot.wrapped {
            tracing::warn!(
                "descriptor heap generation wrapped ({} slots); clearing cached views",
                MAX_DESCRIPTORS
            );
            self.map.lock().unwrap().clear();
        }
        create(slot.index);
        self.map.lock().unwrap().insert(key, slot.index);
        slot.index
    }

    /// Drop every cached view, e.g. before a swap-chain resize releases
    /// the resources the views point at.
    pub fn clear(&self) {
        self.map.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.map.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().unwrap().is_empty()
    }

    pub fn wrap_count(&self) -> u64 {
        self.ring.wrap_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_advance_monotonically_within_generation() {
        let ring = DescriptorRing::new();
        for expected in 0..MAX_DESCRIPTORS {
            let slot = ring.allocate();
            assert_eq!(slot.index, expected);
            assert!(!slot.wrapped);
        }
    }

    #[test]
    fn wrap_rotates_generation_and_counts() {
        let ring = DescriptorRing::new();
        for _ in 0..MAX_DESCRIPTORS {
            ring.allocate();
        }
        let slot = ring.allocate();
        assert!(slot.wrapped);
        assert_eq!(slot.index, MAX_DESCRIPTORS); // generation 1, offset 0
        assert_eq!(ring.wrap_count(), 1);

        for _ in 1..MAX_DESCRIPTORS {
            ring.allocate();
        }
        let slot = ring.allocate();
        assert!(slot.wrapped);
        assert_eq!(slot.index, 0); // back to generation 0
        assert_eq!(ring.wrap_count(), 2);
    }

    #[test]
    fn cache_clears_once_per_wrap_and_keeps_working() {
        let cache: ViewCache<u64> = ViewCache::new();
        for key in 0..MAX_DESCRIPTORS as u64 {
            cache.get_or_create(key, |_| {});
        }
        assert_eq!(cache.len(), MAX_DESCRIPTORS as usize);
        assert_eq!(cache.wrap_count(), 0);

        // The next distinct view wraps: cache cleared, allocation succeeds.
        let index = cache.get_or_create(u64::MAX, |_| {});
        assert_eq!(cache.wrap_count(), 1);
        assert_eq!(index, MAX_DESCRIPTORS);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_hits_do_not_allocate() {
        let cache: ViewCache<u64> = ViewCache::new();
        let a = cache.get_or_create(7, |_| {});
        let b = cache.get_or_create(7, |_| {});
        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);
    }
}
