//! A recording backend. Implements the full compute interface against no
//! device at all, logging every command it would have recorded; the higher
//! layers use it to assert on command streams without a GPU.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::compute::{CommandList, Compute, Device, RenderApi, Sampler};
use crate::error::{ComputeError, ComputeResult};
use crate::generic::{GenericState, VramOperation};
use crate::kernel::{Kernel, KernelDesc};
use crate::resource::{Resource, ResourceState, ResourceTransition};

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    Transition(ResourceTransition),
    Copy { cmd: CommandList, dst: u64, src: u64 },
    ClearView { cmd: CommandList, resource: u64 },
    Barrier { cmd: CommandList, resource: u64 },
    BindSharedState { cmd: CommandList },
    BindKernel(Kernel),
    BindConsts { slot: u32, bytes: usize },
    BindTexture { slot: u32, resource: u64 },
    BindRwTexture { slot: u32, resource: u64 },
    BindSampler { slot: u32, sampler: Sampler },
    Dispatch { x: u32, y: u32, z: u32 },
    PushState { cmd: CommandList },
    PopState { cmd: CommandList },
}

pub struct RecordingCompute {
    api: RenderApi,
    generic: GenericState,
    next_native: AtomicU64,
    commands: Mutex<Vec<RecordedCommand>>,
    destroyed: Mutex<Vec<u64>>,
}

impl RecordingCompute {
    pub fn new(api: RenderApi) -> Self {
        Self {
            api,
            generic: GenericState::new(),
            next_native: AtomicU64::new(0x1000),
            commands: Mutex::new(Vec::new()),
            destroyed: Mutex::new(Vec::new()),
        }
    }

    fn next_handle(&self) -> u64 {
        self.next_native.fetch_add(1, Ordering::Relaxed)
    }

    fn record(&self, command: RecordedCommand) {
        self.commands.lock().unwrap().push(command);
    }

    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.commands.lock().unwrap().clone()
    }

    pub fn clear_commands(&self) {
        self.commands.lock().unwrap().clear();
    }

    pub fn recorded_transitions(&self) -> Vec<ResourceTransition> {
        self.commands()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCommand::Transition(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub fn recorded_copies(&self) -> Vec<(u64, u64)> {
        self.commands()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCommand::Copy { dst, src, .. } => Some((dst, src)),
                _ => None,
            })
            .collect()
    }

    pub fn destroyed(&self) -> Vec<u64> {
        self.destroyed.lock().unwrap().clone()
    }
}

impl Compute for RecordingCompute {
    fn render_api(&self) -> RenderApi {
        self.api
    }

    fn device(&self) -> Device {
        Device(1)
    }

    fn generic(&self) -> &GenericState {
        &self.generic
    }

    fn create_kernel(&self, desc: &KernelDesc) -> ComputeResult<Kernel> {
        Ok(self.generic.register_kernel(desc))
    }

    fn destroy_kernel(&self, kernel: Kernel) -> ComputeResult<()> {
        self.generic.forget_kernel(kernel)
    }

    fn create_buffer(
        &self,
        desc: &crate::resource::ResourceDescription,
        name: &str,
    ) -> ComputeResult<Resource> {
        if let Some(resource) = self.generic.host_allocate(desc, name) {
            return Ok(resource);
        }
        let resource = Resource {
            native: self.next_handle(),
            kind: crate::resource::ResourceType::Buffer,
            desc: desc.clone(),
            debug_name: name.to_string(),
        };
        self.generic.manage_vram(desc.total_bytes(), VramOperation::Alloc);
        Ok(resource)
    }

    fn create_texture2d(
        &self,
        desc: &crate::resource::ResourceDescription,
        name: &str,
    ) -> ComputeResult<Resource> {
        if let Some(resource) = self.generic.host_allocate(desc, name) {
            return Ok(resource);
        }
        let resource = Resource {
            native: self.next_handle(),
            kind: crate::resource::ResourceType::Texture2d,
            desc: desc.clone(),
            debug_name: name.to_string(),
        };
        self.generic.manage_vram(desc.total_bytes(), VramOperation::Alloc);
        Ok(resource)
    }

    fn clone_resource(
        &self,
        source: &Resource,
        name: &str,
        initial_state: ResourceState,
    ) -> ComputeResult<Resource> {
        if source.is_null() {
            return Err(ComputeError::InvalidArgument("cloning a null resource".into()));
        }
        let mut desc = source.desc.clone();
        desc.state = initial_state;
        self.generic.manage_vram(desc.total_bytes(), VramOperation::Alloc);
        Ok(Resource {
            native: self.next_handle(),
            kind: source.kind,
            desc,
            debug_name: name.to_string(),
        })
    }

    fn destroy_resource(&self, resource: &Resource, frame_delay: u32) -> ComputeResult<()> {
        self.generic.defer_destruction(resource.clone(), frame_delay);
        Ok(())
    }

    fn destroy_resource_now(&self, resource: &Resource) -> ComputeResult<()> {
        if !self.generic.host_release(resource) {
            self.generic.manage_vram(resource.desc.total_bytes(), VramOperation::Free);
        }
        self.destroyed.lock().unwrap().push(resource.native);
        Ok(())
    }

    fn get_native_resource_state(&self, state: ResourceState) -> ComputeResult<u32> {
        Ok(state.bits())
    }

    fn get_resource_state(&self, native: u32) -> ComputeResult<ResourceState> {
        ResourceState::from_bits(native)
            .ok_or_else(|| ComputeError::InvalidArgument(format!("bad state bits {native:#x}")))
    }

    fn bind_shared_state(&self, cmd: CommandList) -> ComputeResult<()> {
        self.record(RecordedCommand::BindSharedState { cmd });
        Ok(())
    }

    fn bind_kernel(&self, kernel: Kernel) -> ComputeResult<()> {
        if self.generic.kernel_desc(kernel).is_none() {
            return Err(ComputeError::MissingBinding(format!("kernel {:#x}", kernel.0)));
        }
        self.record(RecordedCommand::BindKernel(kernel));
        Ok(())
    }

    fn bind_consts(&self, slot: u32, data: &[u8]) -> ComputeResult<()> {
        self.record(RecordedCommand::BindConsts { slot, bytes: data.len() });
        Ok(())
    }

    fn bind_texture(
        &self,
        slot: u32,
        resource: &Resource,
        _mip_offset: u32,
        _mip_levels: u32,
    ) -> ComputeResult<()> {
        self.record(RecordedCommand::BindTexture { slot, resource: resource.native });
        Ok(())
    }

    fn bind_rw_texture(&self, slot: u32, resource: &Resource, _mip_offset: u32) -> ComputeResult<()> {
        self.record(RecordedCommand::BindRwTexture { slot, resource: resource.native });
        Ok(())
    }

    fn bind_sampler(&self, slot: u32, sampler: Sampler) -> ComputeResult<()> {
        self.record(RecordedCommand::BindSampler { slot, sampler });
        Ok(())
    }

    fn dispatch(&self, groups_x: u32, groups_y: u32, groups_z: u32) -> ComputeResult<()> {
        self.record(RecordedCommand::Dispatch { x: groups_x, y: groups_y, z: groups_z });
        Ok(())
    }

    fn copy_resource(&self, cmd: CommandList, dst: &Resource, src: &Resource) -> ComputeResult<()> {
        self.record(RecordedCommand::Copy { cmd, dst: dst.native, src: src.native });
        Ok(())
    }

    fn clear_view(&self, cmd: CommandList, resource: &Resource, _value: [f32; 4]) -> ComputeResult<()> {
        self.record(RecordedCommand::ClearView { cmd, resource: resource.native });
        Ok(())
    }

    fn transition_resources_impl(
        &self,
        _cmd: CommandList,
        transitions: &[ResourceTransition],
    ) -> ComputeResult<()> {
        for transition in transitions {
            self.record(RecordedCommand::Transition(*transition));
        }
        Ok(())
    }

    fn insert_gpu_barrier(&self, cmd: CommandList, resource: &Resource) -> ComputeResult<()> {
        self.record(RecordedCommand::Barrier { cmd, resource: resource.native });
        Ok(())
    }

    fn push_state(&self, cmd: CommandList) -> ComputeResult<()> {
        self.record(RecordedCommand::PushState { cmd });
        Ok(())
    }

    fn pop_state(&self, cmd: CommandList) -> ComputeResult<()> {
        self.record(RecordedCommand::PopState { cmd });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use crate::format::Format;
    use crate::resource::{ResourceDescription, ResourceFlags};

    #[test]
    fn host_allocator_takes_over_creation_and_release() {
        let compute = RecordingCompute::new(RenderApi::D3d12);
        let released = Arc::new(AtomicUsize::new(0));
        {
            let released = released.clone();
            compute.set_resource_callbacks(
                Arc::new(|desc: &crate::resource::ResourceDescription, name: &str| Resource {
                    native: 0x4242,
                    desc: desc.clone(),
                    debug_name: name.to_string(),
                    ..Default::default()
                }),
                Arc::new(move |_resource: &Resource| {
                    released.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        let desc = ResourceDescription::texture2d(
            128,
            128,
            Format::Rgba8Unorm,
            ResourceFlags::SHADER_RESOURCE,
        );
        let resource = compute.create_texture2d(&desc, "engine-pool").unwrap();
        assert_eq!(resource.native, 0x4242);

        compute.destroy_resource(&resource, 0).unwrap();
        compute.collect_garbage(1).unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
