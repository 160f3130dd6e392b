//! Bookkeeping shared by every backend: kernel interning, VRAM segment
//! accounting, tracked resources and frame-delayed destruction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::thread::ThreadId;

use crate::compute::{AllocateCallback, ReleaseCallback};
use crate::error::{ComputeError, ComputeResult};
use crate::kernel::{Kernel, KernelDesc};
use crate::resource::{Resource, ResourceDescription};

/// Name of the segment every allocation lands in regardless of scope.
pub const GLOBAL_VRAM_SEGMENT: &str = "global";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VramSegment {
    pub alloc_count: u64,
    pub total_allocated_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VramOperation {
    Alloc,
    Free,
}

struct DeferredResource {
    resource: Resource,
    frame: u32,
    frame_delay: u32,
}

/// Embedded by each backend; the `Compute` trait's provided methods route
/// here.
#[derive(Default)]
pub struct GenericState {
    kernels: Mutex<HashMap<Kernel, KernelDesc>>,
    finished_frame: AtomicU32,
    tracked: Mutex<HashMap<u32, u64>>,
    deferred: Mutex<Vec<DeferredResource>>,
    segments: Mutex<HashMap<String, VramSegment>>,
    current_segment: Mutex<HashMap<ThreadId, Vec<String>>>,
    vram_budget: AtomicU64,
    vram_usage: AtomicU64,
    host_allocator: RwLock<Option<(AllocateCallback, ReleaseCallback)>>,
}

impl GenericState {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- kernels -------------------------------------------------------

    /// Intern a kernel; identical descriptions map to one id.
    pub fn register_kernel(&self, desc: &KernelDesc) -> Kernel {
        let id = desc.id();
        let mut kernels = self.kernels.lock().unwrap();
        if !kernels.contains_key(&id) {
            tracing::debug!("interning kernel '{}' ({} bytes)", desc.name, desc.bytecode.len());
            kernels.insert(id, desc.clone());
        }
        id
    }

    pub fn kernel_desc(&self, kernel: Kernel) -> Option<KernelDesc> {
        self.kernels.lock().unwrap().get(&kernel).cloned()
    }

    pub fn forget_kernel(&self, kernel: Kernel) -> ComputeResult<()> {
        match self.kernels.lock().unwrap().remove(&kernel) {
            Some(_) => Ok(()),
            None => Err(ComputeError::InvalidArgument(format!("unknown kernel {:#x}", kernel.0))),
        }
    }

    // ---- VRAM segments -------------------------------------------------

    pub fn begin_vram_segment(&self, name: &str) {
        let mut current = self.current_segment.lock().unwrap();
        current
            .entry(std::thread::current().id())
            .or_default()
            .push(name.to_string());
    }

    pub fn end_vram_segment(&self) {
        let mut current = self.current_segment.lock().unwrap();
        if let Some(stack) = current.get_mut(&std::thread::current().id()) {
            stack.pop();
        }
    }

    fn current_segment_name(&self) -> Option<String> {
        let current = self.current_segment.lock().unwrap();
        current
            .get(&std::thread::current().id())
            .and_then(|stack| stack.last().cloned())
    }

    /// Update accounting for one allocation or free. Both the current
    /// thread's segment and the global segment move together.
    pub fn manage_vram(&self, bytes: u64, op: VramOperation) -> VramSegment {
        let mut segments = self.segments.lock().unwrap();
        let mut apply = |name: &str| {
            let segment = segments.entry(name.to_string()).or_default();
            match op {
                VramOperation::Alloc => {
                    segment.alloc_count += 1;
                    segment.total_allocated_size += bytes;
                }
                VramOperation::Free => {
                    segment.alloc_count = segment.alloc_count.saturating_sub(1);
                    segment.total_allocated_size =
                        segment.total_allocated_size.saturating_sub(bytes);
                }
            }
            *segment
        };
        let global = apply(GLOBAL_VRAM_SEGMENT);
        match self.current_segment_name() {
            Some(name) => apply(&name),
            None => global,
        }
    }

    pub fn allocated_bytes(&self, segment: &str) -> u64 {
        self.segments
            .lock()
            .unwrap()
            .get(segment)
            .map(|s| s.total_allocated_size)
            .unwrap_or(0)
    }

    pub fn set_vram_budget(&self, current_usage: u64, budget: u64) {
        self.vram_usage.store(current_usage, Ordering::Relaxed);
        self.vram_budget.store(budget, Ordering::Relaxed);
    }

    pub fn vram_headroom(&self) -> ComputeResult<u64> {
        let budget = self.vram_budget.load(Ordering::Relaxed);
        if budget == 0 {
            return Err(ComputeError::NotReady);
        }
        Ok(budget.saturating_sub(self.vram_usage.load(Ordering::Relaxed)))
    }

    // ---- host allocator ------------------------------------------------

    /// Hand allocation to the host. Engines with pool allocators need the
    /// layer to go through them instead of the heap.
    pub fn set_host_allocator(&self, allocate: AllocateCallback, release: ReleaseCallback) {
        *self.host_allocator.write().unwrap() = Some((allocate, release));
    }

    /// Delegate one allocation to the host, if a host allocator is set
    /// and produced a usable resource.
    pub fn host_allocate(&self, desc: &ResourceDescription, name: &str) -> Option<Resource> {
        let guard = self.host_allocator.read().unwrap();
        let (allocate, _) = guard.as_ref()?;
        let resource = allocate(desc, name);
        if resource.is_null() {
            tracing::warn!("host allocator returned null for '{name}'");
            return None;
        }
        self.manage_vram(desc.total_bytes(), VramOperation::Alloc);
        Some(resource)
    }

    /// Delegate a release to the host. True when the host took it.
    pub fn host_release(&self, resource: &Resource) -> bool {
        let guard = self.host_allocator.read().unwrap();
        let Some((_, release)) = guard.as_ref() else { return false };
        release(resource);
        self.manage_vram(resource.desc.total_bytes(), VramOperation::Free);
        true
    }

    // ---- tracked resources ---------------------------------------------

    pub fn start_tracking(&self, id: u32, native: u64) {
        self.tracked.lock().unwrap().insert(id, native);
    }

    pub fn stop_tracking(&self, id: u32) {
        self.tracked.lock().unwrap().remove(&id);
    }

    pub fn tracked(&self, id: u32) -> Option<u64> {
        self.tracked.lock().unwrap().get(&id).copied()
    }

    /// True when `native` is still the pointer recorded under any tag id.
    /// The shared-resource cache uses this to detect driver pointer reuse.
    pub fn is_tracked_pointer(&self, native: u64) -> bool {
        self.tracked.lock().unwrap().values().any(|&v| v == native)
    }

    // ---- frame / deferred destruction ----------------------------------

    pub fn finished_frame(&self) -> u32 {
        self.finished_frame.load(Ordering::Relaxed)
    }

    pub fn advance_finished_frame(&self) {
        self.finished_frame.fetch_add(1, Ordering::Relaxed);
    }

    /// Queue `resource` for destruction `frame_delay` frames from now.
    pub fn defer_destruction(&self, resource: Resource, frame_delay: u32) {
        let frame = self.finished_frame();
        self.deferred.lock().unwrap().push(DeferredResource { resource, frame, frame_delay });
    }

    /// Drain every deferred resource whose delay elapsed at
    /// `finished_frame`.
    pub fn due_for_destruction(&self, finished_frame: u32) -> Vec<Resource> {
        let mut deferred = self.deferred.lock().unwrap();
        let mut due = Vec::new();
        deferred.retain(|entry| {
            if finished_frame.wrapping_sub(entry.frame) >= entry.frame_delay {
                due.push(entry.resource.clone());
                false
            } else {
                true
            }
        });
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Format;
    use crate::resource::{ResourceDescription, ResourceFlags};

    #[test]
    fn vram_updates_thread_segment_and_global() {
        let state = GenericState::new();
        state.begin_vram_segment("upscaler");
        state.manage_vram(1024, VramOperation::Alloc);
        state.manage_vram(512, VramOperation::Alloc);
        state.end_vram_segment();
        // Outside the bracket only the global segment moves.
        state.manage_vram(256, VramOperation::Alloc);

        assert_eq!(state.allocated_bytes("upscaler"), 1536);
        assert_eq!(state.allocated_bytes(GLOBAL_VRAM_SEGMENT), 1792);

        state.begin_vram_segment("upscaler");
        state.manage_vram(512, VramOperation::Free);
        state.end_vram_segment();
        assert_eq!(state.allocated_bytes("upscaler"), 1024);
        assert_eq!(state.allocated_bytes(GLOBAL_VRAM_SEGMENT), 1280);
    }

    #[test]
    fn vram_headroom_requires_budget() {
        let state = GenericState::new();
        assert_eq!(state.vram_headroom(), Err(ComputeError::NotReady));
        state.set_vram_budget(3 << 30, 4 << 30);
        assert_eq!(state.vram_headroom().unwrap(), 1 << 30);
        state.set_vram_budget(5 << 30, 4 << 30);
        assert_eq!(state.vram_headroom().unwrap(), 0);
    }

    #[test]
    fn deferred_resources_wait_out_their_delay() {
        let state = GenericState::new();
        let resource = Resource {
            native: 11,
            desc: ResourceDescription::texture2d(8, 8, Format::Rgba8Unorm, ResourceFlags::empty()),
            ..Default::default()
        };
        state.defer_destruction(resource, 3);
        assert!(state.due_for_destruction(1).is_empty());
        assert!(state.due_for_destruction(2).is_empty());
        let due = state.due_for_destruction(3);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].native, 11);
        assert!(state.due_for_destruction(10).is_empty());
    }

    #[test]
    fn tracked_pointer_lookup() {
        let state = GenericState::new();
        state.start_tracking(4, 0xaa);
        assert!(state.is_tracked_pointer(0xaa));
        assert_eq!(state.tracked(4), Some(0xaa));
        state.stop_tracking(4);
        assert!(!state.is_tracked_pointer(0xaa));
    }
}
