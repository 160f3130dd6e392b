//! Resource pool. Clones are keyed by the content hash of the source
//! description; recycled entries are reused before anything new is
//! allocated, with a short wait for a recycle when the same description was
//! allocated before.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::compute::Compute;
use crate::error::ComputeResult;
use crate::resource::{Resource, ResourceState};

/// Wait heuristics. The defaults are the empirically tuned production
/// values; hosts with unusual frame pacing can override them.
#[derive(Debug, Clone, Copy)]
pub struct PoolTuning {
    /// Wait for a recycle while VRAM is ample and the queue is short.
    pub ample_wait: Duration,
    /// Wait for a recycle under VRAM pressure or a long queue.
    pub pressure_wait: Duration,
    pub max_queue_size: usize,
}

impl Default for PoolTuning {
    fn default() -> Self {
        Self {
            ample_wait: Duration::from_micros(500),
            pressure_wait: Duration::from_millis(100),
            max_queue_size: 2,
        }
    }
}

/// A pooled clone plus the description hash it is filed under.
#[derive(Debug, Clone, PartialEq)]
pub struct HashedResource {
    pub hash: u64,
    pub resource: Resource,
}

#[derive(Default)]
struct PoolState {
    free: HashMap<u64, Vec<(Instant, Resource)>>,
    allocated: HashMap<u64, Vec<(Instant, Resource)>>,
}

pub struct ResourcePool {
    compute: Arc<dyn Compute>,
    vram_segment: String,
    tuning: PoolTuning,
    max_queue_size: AtomicUsize,
    state: Mutex<PoolState>,
    freed: Condvar,
}

impl ResourcePool {
    pub fn new(compute: Arc<dyn Compute>, vram_segment: &str) -> Self {
        Self::with_tuning(compute, vram_segment, PoolTuning::default())
    }

    pub fn with_tuning(compute: Arc<dyn Compute>, vram_segment: &str, tuning: PoolTuning) -> Self {
        Self {
            compute,
            vram_segment: vram_segment.to_string(),
            max_queue_size: AtomicUsize::new(tuning.max_queue_size),
            tuning,
            state: Mutex::new(PoolState::default()),
            freed: Condvar::new(),
        }
    }

    pub fn set_max_queue_size(&self, size: usize) {
        self.max_queue_size.store(size, Ordering::Relaxed);
    }

    /// Clone `source` (or reuse a recycled clone with the same
    /// description). The clone starts in `COPY_DESTINATION` state.
    pub fn allocate(&self, source: &Resource, name: &str) -> ComputeResult<HashedResource> {
        let hash = source.desc.content_hash();
        let footprint = source.desc.total_bytes();

        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(free) = state.free.get_mut(&hash) {
                if let Some((_, resource)) = free.pop() {
                    state.allocated.entry(hash).or_default().push((Instant::now(), resource.clone()));
                    return Ok(HashedResource { hash, resource });
                }
            }
            let in_flight = state.allocated.get(&hash).map(Vec::len).unwrap_or(0);
            if in_flight == 0 {
                break; // never allocated, nothing will come back
            }
            // This description was allocated before, so a recycle may be
            // imminent; endless new clones are worse than a short wait.
            let ample = match self.compute.vram_headroom() {
                Ok(headroom) => headroom > footprint,
                Err(_) => true, // no budget reported yet
            };
            let wait = if ample && in_flight < self.max_queue_size.load(Ordering::Relaxed) {
                self.tuning.ample_wait
            } else {
                self.tuning.pressure_wait
            };
            let (guard, timeout) = self
                .freed
                .wait_timeout_while(state, wait, |s| {
                    s.free.get(&hash).map(Vec::is_empty).unwrap_or(true)
                })
                .unwrap();
            state = guard;
            if timeout.timed_out() {
                break;
            }
        }
        drop(state);

        self.compute.begin_vram_segment(&self.vram_segment);
        let result = self.compute.clone_resource(source, name, ResourceState::COPY_DESTINATION);
        self.compute.end_vram_segment();
        let resource = result?;
        tracing::trace!("pool alloc {hash:#x} '{name}'");

        let mut state = self.state.lock().unwrap();
        state.allocated.entry(hash).or_default().push((Instant::now(), resource.clone()));
        Ok(HashedResource { hash, resource })
    }

    /// Return a clone to the pool for reuse.
    pub fn recycle(&self, res: &HashedResource) {
        let mut state = self.state.lock().unwrap();
        if let Some(list) = state.allocated.get_mut(&res.hash) {
            list.retain(|(_, r)| r.native != res.resource.native);
        }
        state.free.entry(res.hash).or_default().push((Instant::now(), res.resource.clone()));
        self.freed.notify_all();
    }

    /// Destroy free entries unused for longer than `age`.
    pub fn collect_garbage(&self, age: Duration) -> ComputeResult<()> {
        let now = Instant::now();
        let stale: Vec<Resource> = {
            let mut state = self.state.lock().unwrap();
            let mut stale = Vec::new();
            for list in state.free.values_mut() {
                list.retain(|(freed_at, resource)| {
                    if now.duration_since(*freed_at) > age {
                        stale.push(resource.clone());
                        false
                    } else {
                        true
                    }
                });
            }
            state.free.retain(|_, list| !list.is_empty());
            stale
        };
        for resource in stale {
            self.compute.destroy_resource(&resource, 3)?;
        }
        Ok(())
    }

    /// Destroy everything, allocated entries included.
    pub fn clear(&self) -> ComputeResult<()> {
        let all: Vec<Resource> = {
            let mut state = self.state.lock().unwrap();
            let mut all = Vec::new();
            for (_, list) in state.free.drain() {
                all.extend(list.into_iter().map(|(_, r)| r));
            }
            for (_, list) in state.allocated.drain() {
                all.extend(list.into_iter().map(|(_, r)| r));
            }
            all
        };
        for resource in all {
            self.compute.destroy_resource(&resource, 0)?;
        }
        Ok(())
    }

    pub fn free_count(&self) -> usize {
        self.state.lock().unwrap().free.values().map(Vec::len).sum()
    }

    pub fn allocated_count(&self) -> usize {
        self.state.lock().unwrap().allocated.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::RenderApi;
    use crate::format::Format;
    use crate::resource::{ResourceDescription, ResourceFlags};
    use crate::testing::RecordingCompute;

    fn source(compute: &RecordingCompute) -> Resource {
        let desc = ResourceDescription::texture2d(
            1920,
            1080,
            Format::Rgba16Float,
            ResourceFlags::SHADER_RESOURCE,
        );
        compute.create_texture2d(&desc, "color").unwrap()
    }

    #[test]
    fn allocate_recycle_cycles_reuse_one_clone() {
        let compute = Arc::new(RecordingCompute::new(RenderApi::D3d12));
        let pool = ResourcePool::new(compute.clone(), "pool-test");
        let src = source(&compute);

        let first = pool.allocate(&src, "clone").unwrap();
        let first_native = first.resource.native;
        pool.recycle(&first);
        for _ in 0..100 {
            let r = pool.allocate(&src, "clone").unwrap();
            assert_eq!(r.resource.native, first_native);
            pool.recycle(&r);
        }
        assert_eq!(pool.free_count(), 1);
        assert_eq!(pool.allocated_count(), 0);
    }

    #[test]
    fn different_descriptions_get_different_clones() {
        let compute = Arc::new(RecordingCompute::new(RenderApi::D3d12));
        let pool = ResourcePool::new(compute.clone(), "pool-test");
        let a = source(&compute);
        let mut b = a.clone();
        b.desc.format = Format::Rgba32Float;

        let ra = pool.allocate(&a, "a").unwrap();
        let rb = pool.allocate(&b, "b").unwrap();
        assert_ne!(ra.hash, rb.hash);
        assert_ne!(ra.resource.native, rb.resource.native);
    }

    #[test]
    fn clones_start_in_copy_destination_state() {
        let compute = Arc::new(RecordingCompute::new(RenderApi::D3d12));
        let pool = ResourcePool::new(compute.clone(), "pool-test");
        let src = source(&compute);
        let clone = pool.allocate(&src, "clone").unwrap();
        assert_eq!(clone.resource.desc.state, ResourceState::COPY_DESTINATION);
    }

    #[test]
    fn garbage_collection_destroys_stale_entries() {
        let compute = Arc::new(RecordingCompute::new(RenderApi::D3d12));
        let pool = ResourcePool::new(compute.clone(), "pool-test");
        let src = source(&compute);
        let r = pool.allocate(&src, "clone").unwrap();
        pool.recycle(&r);
        std::thread::sleep(Duration::from_millis(2));
        pool.collect_garbage(Duration::from_millis(1)).unwrap();
        assert_eq!(pool.free_count(), 0);
        // Destruction is frame-deferred through the compute layer.
        compute.collect_garbage(10).unwrap();
        assert_eq!(compute.destroyed(), vec![r.resource.native]);
    }

    #[test]
    fn allocation_records_into_the_pool_segment() {
        let compute = Arc::new(RecordingCompute::new(RenderApi::D3d12));
        let pool = ResourcePool::new(compute.clone(), "upscaler.pool");
        let src = source(&compute);
        let _ = pool.allocate(&src, "clone").unwrap();
        assert!(compute.allocated_bytes("upscaler.pool") > 0);
    }
}
