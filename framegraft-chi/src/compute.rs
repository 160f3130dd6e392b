//! The compute interface every backend implements and every plugin records
//! against. One imperative recording API across D3D11, D3D12 and Vulkan;
//! backend-specific operations default to `NoImplementation` exactly like
//! state transitions default to nothing on D3D11.

use std::sync::Arc;

use crate::error::{ComputeError, ComputeResult};
use crate::generic::GenericState;
use crate::kernel::{Kernel, KernelDesc};
use crate::resource::{Resource, ResourceDescription, ResourceState, ResourceTransition};

/// Backend-native command list, type-erased.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CommandList(pub u64);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CommandQueue(pub u64);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Device(pub u64);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SwapChain(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderApi {
    D3d11,
    D3d12,
    Vulkan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandQueueType {
    Graphics,
    Compute,
    Copy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Sampler {
    #[default]
    PointClamp,
    PointMirror,
    LinearClamp,
    LinearMirror,
}

/// Latency-reduction options forwarded to the driver collaborator.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReflexOptions {
    pub low_latency_mode: bool,
    pub low_latency_boost: bool,
    pub minimum_interval_us: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReflexState {
    pub low_latency_available: bool,
    pub sleeping: bool,
    pub frame_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReflexMarker {
    SimulationStart,
    SimulationEnd,
    RenderSubmitStart,
    RenderSubmitEnd,
    PresentStart,
    PresentEnd,
    TriggerFlash,
}

/// Host-provided resource allocator, used instead of heap allocation when
/// the engine owns a pool allocator.
pub type AllocateCallback = Arc<dyn Fn(&ResourceDescription, &str) -> Resource + Send + Sync>;
pub type ReleaseCallback = Arc<dyn Fn(&Resource) + Send + Sync>;

/// Tasks run in reverse order when the scope exits; used to balance
/// resource transitions around a copy or dispatch region.
#[derive(Default)]
pub struct ScopedTasks<'a> {
    tasks: Vec<Box<dyn FnOnce() + 'a>>,
}

impl<'a> ScopedTasks<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: impl FnOnce() + 'a) {
        self.tasks.push(Box::new(task));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl Drop for ScopedTasks<'_> {
    fn drop(&mut self) {
        for task in self.tasks.drain(..).rev() {
            task();
        }
    }
}

/// The unified compute interface.
///
/// Binding calls accumulate per-thread dispatch state; `dispatch` resolves
/// it against the backend's pipeline/descriptor caches. Recording against
/// one command list must be serialized by the caller; everything else is
/// internally synchronized.
pub trait Compute: Send + Sync {
    fn render_api(&self) -> RenderApi;
    fn device(&self) -> Device;

    /// Shared bookkeeping state (kernels, VRAM, tracking, deferred frees).
    fn generic(&self) -> &GenericState;

    // ---- kernels -------------------------------------------------------

    fn create_kernel(&self, desc: &KernelDesc) -> ComputeResult<Kernel>;
    fn destroy_kernel(&self, kernel: Kernel) -> ComputeResult<()>;

    // ---- resources -----------------------------------------------------

    fn create_buffer(&self, desc: &ResourceDescription, name: &str) -> ComputeResult<Resource>;
    fn create_texture2d(&self, desc: &ResourceDescription, name: &str) -> ComputeResult<Resource>;

    /// Clone with identical dimensions/format; `initial_state` replaces the
    /// source state on the new description.
    fn clone_resource(
        &self,
        source: &Resource,
        name: &str,
        initial_state: ResourceState,
    ) -> ComputeResult<Resource>;

    /// Queue destruction `frame_delay` frames after the current finished
    /// frame, so in-flight work never loses its resources.
    fn destroy_resource(&self, resource: &Resource, frame_delay: u32) -> ComputeResult<()>;

    fn get_resource_footprint(&self, resource: &Resource) -> ComputeResult<u64> {
        Ok(resource.desc.total_bytes())
    }

    /// Portable → native state value.
    fn get_native_resource_state(&self, _state: ResourceState) -> ComputeResult<u32> {
        Err(ComputeError::NoImplementation)
    }

    /// Native → portable state value.
    fn get_resource_state(&self, _native: u32) -> ComputeResult<ResourceState> {
        Err(ComputeError::NoImplementation)
    }

    // ---- recording -----------------------------------------------------

    fn bind_shared_state(&self, cmd: CommandList) -> ComputeResult<()>;
    fn bind_kernel(&self, kernel: Kernel) -> ComputeResult<()>;
    fn bind_consts(&self, slot: u32, data: &[u8]) -> ComputeResult<()>;
    fn bind_texture(
        &self,
        slot: u32,
        resource: &Resource,
        mip_offset: u32,
        mip_levels: u32,
    ) -> ComputeResult<()>;
    fn bind_rw_texture(&self, slot: u32, resource: &Resource, mip_offset: u32)
        -> ComputeResult<()>;
    fn bind_sampler(&self, _slot: u32, _sampler: Sampler) -> ComputeResult<()> {
        Ok(())
    }
    fn dispatch(&self, groups_x: u32, groups_y: u32, groups_z: u32) -> ComputeResult<()>;

    fn copy_resource(&self, cmd: CommandList, dst: &Resource, src: &Resource)
        -> ComputeResult<()>;

    fn clear_view(
        &self,
        _cmd: CommandList,
        _resource: &Resource,
        _value: [f32; 4],
    ) -> ComputeResult<()> {
        Err(ComputeError::NoImplementation)
    }

    /// Emit one native barrier batch for the given transitions. No-op
    /// entries are already filtered out by `transition_resources`.
    fn transition_resources_impl(
        &self,
        _cmd: CommandList,
        _transitions: &[ResourceTransition],
    ) -> ComputeResult<()> {
        Err(ComputeError::NoImplementation)
    }

    /// Collect, dedupe and emit state transitions. `from == to` entries and
    /// null resources never reach the backend.
    fn transition_resources(
        &self,
        cmd: CommandList,
        transitions: &[ResourceTransition],
    ) -> ComputeResult<()> {
        let filtered: Vec<ResourceTransition> = transitions
            .iter()
            .copied()
            .filter(|t| !t.is_noop() && t.native != 0)
            .collect();
        if filtered.is_empty() {
            return Ok(());
        }
        self.transition_resources_impl(cmd, &filtered)
    }

    /// UAV barrier between overlapping storage writes.
    fn insert_gpu_barrier(&self, cmd: CommandList, resource: &Resource) -> ComputeResult<()>;

    fn insert_gpu_barrier_list(
        &self,
        cmd: CommandList,
        resources: &[&Resource],
    ) -> ComputeResult<()> {
        for resource in resources {
            self.insert_gpu_barrier(cmd, resource)?;
        }
        Ok(())
    }

    /// Capture the engine's bindings before core-issued dispatches (D3D11).
    fn push_state(&self, _cmd: CommandList) -> ComputeResult<()> {
        Ok(())
    }

    /// Restore the engine's bindings captured by `push_state` (D3D11).
    fn pop_state(&self, _cmd: CommandList) -> ComputeResult<()> {
        Ok(())
    }

    /// Restore the host's pipeline after the core used the command list.
    fn restore_pipeline(&self, _cmd: CommandList) -> ComputeResult<()> {
        Ok(())
    }

    /// Route resource creation through the host's allocator from now on.
    fn set_resource_callbacks(&self, allocate: AllocateCallback, release: ReleaseCallback) {
        self.generic().set_host_allocator(allocate, release);
    }

    // ---- VRAM ----------------------------------------------------------

    fn begin_vram_segment(&self, name: &str) {
        self.generic().begin_vram_segment(name);
    }

    fn end_vram_segment(&self) {
        self.generic().end_vram_segment();
    }

    fn allocated_bytes(&self, segment: &str) -> u64 {
        self.generic().allocated_bytes(segment)
    }

    fn set_vram_budget(&self, current_usage: u64, budget: u64) {
        self.generic().set_vram_budget(current_usage, budget);
    }

    /// Remaining VRAM headroom; `NotReady` until the host supplied a budget.
    fn vram_headroom(&self) -> ComputeResult<u64> {
        self.generic().vram_headroom()
    }

    // ---- tracking ------------------------------------------------------

    fn start_tracking_resource(&self, id: u32, resource: &Resource) {
        self.generic().start_tracking(id, resource.native);
    }

    fn stop_tracking_resource(&self, id: u32) {
        self.generic().stop_tracking(id);
    }

    fn tracked_resource(&self, id: u32) -> Option<u64> {
        self.generic().tracked(id)
    }

    // ---- frame / garbage collection ------------------------------------

    fn finished_frame(&self) -> u32 {
        self.generic().finished_frame()
    }

    fn advance_finished_frame(&self) {
        self.generic().advance_finished_frame();
    }

    /// Destroy deferred resources whose delay has elapsed.
    fn collect_garbage(&self, finished_frame: u32) -> ComputeResult<()> {
        for resource in self.generic().due_for_destruction(finished_frame) {
            self.destroy_resource_now(&resource)?;
        }
        Ok(())
    }

    /// Immediate destruction; only the garbage collector calls this.
    fn destroy_resource_now(&self, resource: &Resource) -> ComputeResult<()>;

    // ---- sharing -------------------------------------------------------

    /// Create an OS shared handle for `resource`.
    fn create_shared_handle(&self, _resource: &Resource) -> ComputeResult<u64> {
        Err(ComputeError::NoImplementation)
    }

    /// Open a resource shared by another backend.
    fn open_shared_resource(&self, _handle: u64, _name: &str) -> ComputeResult<Resource> {
        Err(ComputeError::NoImplementation)
    }

    // ---- reflex (driver collaborator) ----------------------------------

    fn set_sleep_mode(&self, _options: &ReflexOptions) -> ComputeResult<()> {
        Err(ComputeError::NoImplementation)
    }

    fn get_sleep_status(&self) -> ComputeResult<ReflexState> {
        Err(ComputeError::NoImplementation)
    }

    fn get_latency_report(&self) -> ComputeResult<ReflexState> {
        Err(ComputeError::NoImplementation)
    }

    fn sleep(&self) -> ComputeResult<()> {
        Err(ComputeError::NoImplementation)
    }

    fn set_reflex_marker(&self, _marker: ReflexMarker, _frame_id: u64) -> ComputeResult<()> {
        Err(ComputeError::NoImplementation)
    }
}

/// View a plain-old-data constants struct as the byte slice `bind_consts`
/// takes.
pub fn consts_bytes<T: bytemuck::Pod>(consts: &T) -> &[u8] {
    bytemuck::bytes_of(consts)
}

/// Transition with automatic reversal: the reverse transitions are pushed
/// onto `tasks` and run when the caller's scope exits.
pub fn transition_scoped<'a>(
    compute: &'a dyn Compute,
    cmd: CommandList,
    transitions: &[ResourceTransition],
    tasks: &mut ScopedTasks<'a>,
) -> ComputeResult<()> {
    let filtered: Vec<ResourceTransition> = transitions
        .iter()
        .copied()
        .filter(|t| !t.is_noop() && t.native != 0)
        .collect();
    if filtered.is_empty() {
        return Ok(());
    }
    compute.transition_resources_impl(cmd, &filtered)?;
    let reverse: Vec<ResourceTransition> = filtered.iter().map(|t| t.reversed()).collect();
    tasks.push(move || {
        if let Err(e) = compute.transition_resources(cmd, &reverse) {
            tracing::warn!("failed to reverse transitions: {e}");
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingCompute;
    use crate::resource::ResourceState;

    #[test]
    fn noop_transitions_emit_no_barriers() {
        let compute = RecordingCompute::new(RenderApi::D3d12);
        let res = Resource { native: 1, ..Default::default() };
        let transitions = [
            ResourceTransition::new(&res, ResourceState::TEXTURE_READ, ResourceState::TEXTURE_READ),
            ResourceTransition::new(&res, ResourceState::COPY_SOURCE, ResourceState::COPY_SOURCE),
        ];
        compute.transition_resources(CommandList(1), &transitions).unwrap();
        assert!(compute.recorded_transitions().is_empty());
    }

    #[test]
    fn mixed_batch_keeps_only_real_transitions() {
        let compute = RecordingCompute::new(RenderApi::D3d12);
        let res = Resource { native: 1, ..Default::default() };
        let transitions = [
            ResourceTransition::new(&res, ResourceState::TEXTURE_READ, ResourceState::TEXTURE_READ),
            ResourceTransition::new(&res, ResourceState::COPY_SOURCE, ResourceState::TEXTURE_READ),
        ];
        compute.transition_resources(CommandList(1), &transitions).unwrap();
        let recorded = compute.recorded_transitions();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].to, ResourceState::COPY_SOURCE);
    }

    #[test]
    fn consts_bytes_views_pod_structs() {
        #[repr(C)]
        #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
        struct UpscaleConsts {
            input_width: u32,
            input_height: u32,
            sharpness: f32,
            _pad: u32,
        }
        let consts =
            UpscaleConsts { input_width: 1920, input_height: 1080, sharpness: 0.8, _pad: 0 };
        let bytes = consts_bytes(&consts);
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..4], &1920u32.to_le_bytes());

        let compute = RecordingCompute::new(RenderApi::D3d12);
        compute.bind_consts(0, bytes).unwrap();
        assert!(compute
            .commands()
            .iter()
            .any(|c| matches!(c, crate::testing::RecordedCommand::BindConsts { slot: 0, bytes: 16 })));
    }

    #[test]
    fn scoped_transitions_reverse_on_drop() {
        let compute = RecordingCompute::new(RenderApi::D3d12);
        let res = Resource { native: 9, ..Default::default() };
        {
            let mut tasks = ScopedTasks::new();
            transition_scoped(
                &compute,
                CommandList(1),
                &[ResourceTransition::new(&res, ResourceState::COPY_SOURCE, ResourceState::DEPTH_STENCIL_WRITE)],
                &mut tasks,
            )
            .unwrap();
            assert_eq!(compute.recorded_transitions().len(), 1);
        }
        let recorded = compute.recorded_transitions();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[1].to, ResourceState::DEPTH_STENCIL_WRITE);
        assert_eq!(recorded[1].from, ResourceState::COPY_SOURCE);
    }
}
