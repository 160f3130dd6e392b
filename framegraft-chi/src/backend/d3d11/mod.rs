//! D3D11 backend. Binding goes straight to the immediate context, states
//! are meaningless (transitions are no-ops), and `push_state`/`pop_state`
//! bracket core dispatches so the engine's bindings survive untouched.
//! The D3D11-on-D3D12 bridge creates a real D3D12 device on the same
//! adapter for plugins that require one; resources cross over through the
//! shared-handle cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use windows::core::Interface;
use windows::Win32::Foundation::HANDLE;
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Direct3D12::{D3D12CreateDevice, ID3D12Device};
use windows::Win32::Graphics::Dxgi::*;

use framegraft_core::thread::ThreadContext;

use crate::compute::{CommandList, Compute, Device, RenderApi, Sampler};
use crate::error::{ComputeError, ComputeResult};
use crate::format::Format;
use crate::generic::{GenericState, VramOperation};
use crate::kernel::{Kernel, KernelDesc};
use crate::resource::{
    Resource, ResourceDescription, ResourceFlags, ResourceState, ResourceType,
};
use crate::shared::TranslatedResource;

use super::d3d12::{map_format, Dx12Compute};

const CONSTANT_SLOTS: usize = 8;
const COPY_GROUP_SIZE: u32 = 8;

/// Engine bindings captured around a core dispatch.
#[derive(Default)]
struct SavedState {
    shader: Option<ID3D11ComputeShader>,
    constant_buffers: [Option<ID3D11Buffer>; CONSTANT_SLOTS],
    srvs: [Option<ID3D11ShaderResourceView>; 8],
    uavs: [Option<ID3D11UnorderedAccessView>; 8],
    samplers: [Option<ID3D11SamplerState>; 4],
}

#[derive(Default)]
pub(crate) struct DispatchState {
    kernel: Option<Kernel>,
    srvs: HashMap<u32, ID3D11ShaderResourceView>,
    uavs: HashMap<u32, ID3D11UnorderedAccessView>,
    samplers: HashMap<u32, Sampler>,
    saved: Vec<SavedState>,
}

unsafe impl Send for DispatchState {}

pub struct D3d11Compute {
    device: ID3D11Device,
    immediate: ID3D11DeviceContext,
    generic: GenericState,
    shaders: Mutex<HashMap<Kernel, ID3D11ComputeShader>>,
    /// One dynamic buffer per constant slot, rewritten with write-discard.
    constant_buffers: Mutex<HashMap<u32, ID3D11Buffer>>,
    samplers: Mutex<HashMap<Sampler, ID3D11SamplerState>>,
    views: Mutex<HashMap<(u64, bool), (Option<ID3D11ShaderResourceView>, Option<ID3D11UnorderedAccessView>)>>,
    dispatch_state: ThreadContext<DispatchState>,
    copy_kernel: Mutex<Option<Kernel>>,
}

unsafe impl Send for D3d11Compute {}
unsafe impl Sync for D3d11Compute {}

impl D3d11Compute {
    pub fn new(device: ID3D11Device) -> ComputeResult<Self> {
        let immediate = unsafe { device.GetImmediateContext() }
            .map_err(|e| ComputeError::DriverError(format!("immediate context: {e}")))?;
        tracing::info!("d3d11 compute ready");
        Ok(Self {
            device,
            immediate,
            generic: GenericState::new(),
            shaders: Mutex::new(HashMap::new()),
            constant_buffers: Mutex::new(HashMap::new()),
            samplers: Mutex::new(HashMap::new()),
            views: Mutex::new(HashMap::new()),
            dispatch_state: ThreadContext::new(),
            copy_kernel: Mutex::new(None),
        })
    }

    pub fn d3d11_device(&self) -> &ID3D11Device {
        &self.device
    }

    /// Create the bridged D3D12 device on the same adapter, for plugins
    /// that record D3D12 inside a D3D11 host.
    pub fn create_bridged_d3d12(&self) -> ComputeResult<Arc<Dx12Compute>> {
        unsafe {
            let dxgi_device: IDXGIDevice = self
                .device
                .cast()
                .map_err(|e| ComputeError::DriverError(format!("dxgi device: {e}")))?;
            let adapter = dxgi_device
                .GetAdapter()
                .map_err(|e| ComputeError::DriverError(format!("adapter: {e}")))?;
            let mut device12: Option<ID3D12Device> = None;
            D3D12CreateDevice(
                &adapter,
                windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL_11_0,
                &mut device12,
            )
            .map_err(|e| ComputeError::DriverError(format!("bridged d3d12 device: {e}")))?;
            let device12 = device12.unwrap();
            tracing::info!("created bridged d3d12 device for d3d11 host");
            Ok(Arc::new(Dx12Compute::new(device12)?))
        }
    }

    /// The compiled copy shader used to fill shareable clones of formats
    /// `CopyResource` cannot handle (depth reads as r32f writes).
    pub fn set_copy_kernel(&self, kernel: Kernel) {
        *self.copy_kernel.lock().unwrap() = Some(kernel);
    }

    /// Issue the per-frame copies for translated resources that need one:
    /// a `copy_cs` dispatch reading the source and writing its shareable
    /// clone.
    pub fn prepare_translated_resources(
        &self,
        cmd: CommandList,
        resources: &[TranslatedResource],
    ) -> ComputeResult<()> {
        let copy_kernel = self
            .copy_kernel
            .lock()
            .unwrap()
            .ok_or_else(|| ComputeError::MissingBinding("copy kernel not registered".into()))?;
        for translated in resources {
            let Some(clone) = &translated.clone else { continue };
            self.bind_shared_state(cmd)?;
            self.bind_kernel(copy_kernel)?;
            self.bind_texture(0, &translated.source, 0, 1)?;
            self.bind_rw_texture(0, clone, 0)?;
            let groups_x = translated.source.desc.width.div_ceil(COPY_GROUP_SIZE);
            let groups_y = translated.source.desc.height.div_ceil(COPY_GROUP_SIZE);
            self.dispatch(groups_x, groups_y, 1)?;
        }
        Ok(())
    }

    fn borrow_texture(native: u64) -> std::mem::ManuallyDrop<ID3D11Resource> {
        std::mem::ManuallyDrop::new(unsafe { ID3D11Resource::from_raw(native as *mut _) })
    }

    fn srv(&self, resource: &Resource) -> ComputeResult<ID3D11ShaderResourceView> {
        let mut views = self.views.lock().unwrap();
        let entry = views.entry((resource.native, false)).or_default();
        if let Some(view) = &entry.0 {
            return Ok(view.clone());
        }
        unsafe {
            let desc = D3D11_SHADER_RESOURCE_VIEW_DESC {
                Format: map_format(resource.desc.format.correct_format()),
                ViewDimension: windows::Win32::Graphics::Direct3D::D3D_SRV_DIMENSION_TEXTURE2D,
                Anonymous: D3D11_SHADER_RESOURCE_VIEW_DESC_0 {
                    Texture2D: D3D11_TEX2D_SRV { MostDetailedMip: 0, MipLevels: u32::MAX },
                },
            };
            let mut view = None;
            self.device
                .CreateShaderResourceView(
                    &*Self::borrow_texture(resource.native),
                    Some(&desc),
                    Some(&mut view),
                )
                .map_err(|e| ComputeError::ResourceCreationFailed(format!("srv: {e}")))?;
            let view = view.unwrap();
            entry.0 = Some(view.clone());
            Ok(view)
        }
    }

    fn uav(&self, resource: &Resource) -> ComputeResult<ID3D11UnorderedAccessView> {
        let mut views = self.views.lock().unwrap();
        let entry = views.entry((resource.native, true)).or_default();
        if let Some(view) = &entry.1 {
            return Ok(view.clone());
        }
        unsafe {
            let desc = D3D11_UNORDERED_ACCESS_VIEW_DESC {
                Format: map_format(resource.desc.format.correct_format()),
                ViewDimension: D3D11_UAV_DIMENSION_TEXTURE2D,
                Anonymous: D3D11_UNORDERED_ACCESS_VIEW_DESC_0 {
                    Texture2D: D3D11_TEX2D_UAV { MipSlice: 0 },
                },
            };
            let mut view = None;
            self.device
                .CreateUnorderedAccessView(
                    &*Self::borrow_texture(resource.native),
                    Some(&desc),
                    Some(&mut view),
                )
                .map_err(|e| ComputeError::ResourceCreationFailed(format!("uav: {e}")))?;
            let view = view.unwrap();
            entry.1 = Some(view.clone());
            Ok(view)
        }
    }

    fn sampler_state(&self, sampler: Sampler) -> ComputeResult<ID3D11SamplerState> {
        let mut samplers = self.samplers.lock().unwrap();
        if let Some(state) = samplers.get(&sampler) {
            return Ok(state.clone());
        }
        unsafe {
            let (filter, address) = match sampler {
                Sampler::PointClamp => (D3D11_FILTER_MIN_MAG_MIP_POINT, D3D11_TEXTURE_ADDRESS_CLAMP),
                Sampler::PointMirror => {
                    (D3D11_FILTER_MIN_MAG_MIP_POINT, D3D11_TEXTURE_ADDRESS_MIRROR)
                }
                Sampler::LinearClamp => {
                    (D3D11_FILTER_MIN_MAG_MIP_LINEAR, D3D11_TEXTURE_ADDRESS_CLAMP)
                }
                Sampler::LinearMirror => {
                    (D3D11_FILTER_MIN_MAG_MIP_LINEAR, D3D11_TEXTURE_ADDRESS_MIRROR)
                }
            };
            let desc = D3D11_SAMPLER_DESC {
                Filter: filter,
                AddressU: address,
                AddressV: address,
                AddressW: address,
                MaxLOD: f32::MAX,
                ..Default::default()
            };
            let mut state = None;
            self.device
                .CreateSamplerState(&desc, Some(&mut state))
                .map_err(|e| ComputeError::ResourceCreationFailed(format!("sampler: {e}")))?;
            let state = state.unwrap();
            samplers.insert(sampler, state.clone());
            Ok(state)
        }
    }
}

impl Compute for D3d11Compute {
    fn render_api(&self) -> RenderApi {
        RenderApi::D3d11
    }

    fn device(&self) -> Device {
        Device(self.device.as_raw() as u64)
    }

    fn generic(&self) -> &GenericState {
        &self.generic
    }

    fn create_kernel(&self, desc: &KernelDesc) -> ComputeResult<Kernel> {
        let id = self.generic.register_kernel(desc);
        let mut shaders = self.shaders.lock().unwrap();
        if shaders.contains_key(&id) {
            return Ok(id);
        }
        unsafe {
            let mut shader = None;
            self.device
                .CreateComputeShader(&desc.bytecode, None, Some(&mut shader))
                .map_err(|e| {
                    tracing::error!("failed to create compute shader '{}': {e}", desc.name);
                    ComputeError::KernelCreationFailed(format!("'{}': {e}", desc.name))
                })?;
            shaders.insert(id, shader.unwrap());
        }
        Ok(id)
    }

    fn destroy_kernel(&self, kernel: Kernel) -> ComputeResult<()> {
        self.shaders.lock().unwrap().remove(&kernel);
        self.generic.forget_kernel(kernel)
    }

    fn create_buffer(&self, desc: &ResourceDescription, name: &str) -> ComputeResult<Resource> {
        unsafe {
            let mut bind_flags = 0u32;
            if desc.flags.contains(ResourceFlags::CONSTANT_BUFFER) {
                bind_flags |= D3D11_BIND_CONSTANT_BUFFER.0 as u32;
            }
            if desc.flags.contains(ResourceFlags::RAW_OR_STRUCTURED_BUFFER) {
                bind_flags |=
                    D3D11_BIND_SHADER_RESOURCE.0 as u32 | D3D11_BIND_UNORDERED_ACCESS.0 as u32;
            }
            let buffer_desc = D3D11_BUFFER_DESC {
                ByteWidth: desc.width,
                Usage: D3D11_USAGE_DEFAULT,
                BindFlags: bind_flags,
                ..Default::default()
            };
            let mut buffer = None;
            self.device
                .CreateBuffer(&buffer_desc, None, Some(&mut buffer))
                .map_err(|e| ComputeError::ResourceCreationFailed(format!("'{name}': {e}")))?;
            let buffer = buffer.unwrap();
            let native = buffer.as_raw() as u64;
            std::mem::forget(buffer);
            self.generic.manage_vram(desc.total_bytes(), VramOperation::Alloc);
            Ok(Resource {
                native,
                kind: ResourceType::Buffer,
                desc: desc.clone(),
                debug_name: name.to_string(),
            })
        }
    }

    fn create_texture2d(&self, desc: &ResourceDescription, name: &str) -> ComputeResult<Resource> {
        unsafe {
            let mut bind_flags = 0u32;
            if desc.flags.contains(ResourceFlags::SHADER_RESOURCE) {
                bind_flags |= D3D11_BIND_SHADER_RESOURCE.0 as u32;
            }
            if desc.flags.contains(ResourceFlags::SHADER_RESOURCE_STORAGE) {
                bind_flags |=
                    D3D11_BIND_SHADER_RESOURCE.0 as u32 | D3D11_BIND_UNORDERED_ACCESS.0 as u32;
            }
            if desc.flags.contains(ResourceFlags::COLOR_ATTACHMENT) {
                bind_flags |= D3D11_BIND_RENDER_TARGET.0 as u32;
            }
            if desc.flags.contains(ResourceFlags::DEPTH_STENCIL_ATTACHMENT) {
                bind_flags |= D3D11_BIND_DEPTH_STENCIL.0 as u32;
            }
            let misc_flags = if desc.flags.contains(ResourceFlags::SHARED_RESOURCE) {
                D3D11_RESOURCE_MISC_SHARED_NTHANDLE.0 as u32
            } else {
                0
            };
            let texture_desc = D3D11_TEXTURE2D_DESC {
                Width: desc.width,
                Height: desc.height,
                MipLevels: desc.mips.max(1),
                ArraySize: 1,
                Format: map_format(desc.format),
                SampleDesc: windows::Win32::Graphics::Dxgi::Common::DXGI_SAMPLE_DESC {
                    Count: 1,
                    Quality: 0,
                },
                Usage: D3D11_USAGE_DEFAULT,
                BindFlags: bind_flags,
                MiscFlags: misc_flags,
                ..Default::default()
            };
            let mut texture = None;
            self.device
                .CreateTexture2D(&texture_desc, None, Some(&mut texture))
                .map_err(|e| ComputeError::ResourceCreationFailed(format!("'{name}': {e}")))?;
            let texture = texture.unwrap();
            let native = texture.as_raw() as u64;
            std::mem::forget(texture);
            self.generic.manage_vram(desc.total_bytes(), VramOperation::Alloc);
            Ok(Resource {
                native,
                kind: ResourceType::Texture2d,
                desc: desc.clone(),
                debug_name: name.to_string(),
            })
        }
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
        match source.kind {
            ResourceType::Buffer => self.create_buffer(&desc, name),
            _ => self.create_texture2d(&desc, name),
        }
    }

    fn destroy_resource(&self, resource: &Resource, frame_delay: u32) -> ComputeResult<()> {
        self.generic.defer_destruction(resource.clone(), frame_delay);
        Ok(())
    }

    fn destroy_resource_now(&self, resource: &Resource) -> ComputeResult<()> {
        self.views.lock().unwrap().remove(&(resource.native, false));
        self.views.lock().unwrap().remove(&(resource.native, true));
        let owned: ID3D11Resource = unsafe { ID3D11Resource::from_raw(resource.native as *mut _) };
        drop(owned);
        self.generic.manage_vram(resource.desc.total_bytes(), VramOperation::Free);
        Ok(())
    }

    /// The engine's states are irrelevant on the D3D11 compute path; a
    /// tagged resource always reads back as the common state.
    fn get_native_resource_state(&self, _state: ResourceState) -> ComputeResult<u32> {
        Ok(0)
    }

    fn get_resource_state(&self, _native: u32) -> ComputeResult<ResourceState> {
        Ok(ResourceState::GENERAL)
    }

    fn bind_shared_state(&self, _cmd: CommandList) -> ComputeResult<()> {
        let state = self.dispatch_state.context();
        let mut state = state.lock().unwrap();
        state.kernel = None;
        state.srvs.clear();
        state.uavs.clear();
        state.samplers.clear();
        Ok(())
    }

    fn bind_kernel(&self, kernel: Kernel) -> ComputeResult<()> {
        if !self.shaders.lock().unwrap().contains_key(&kernel) {
            return Err(ComputeError::MissingBinding(format!("kernel {:#x}", kernel.0)));
        }
        let state = self.dispatch_state.context();
        state.lock().unwrap().kernel = Some(kernel);
        Ok(())
    }

    fn bind_consts(&self, slot: u32, data: &[u8]) -> ComputeResult<()> {
        unsafe {
            let buffer = {
                let mut buffers = self.constant_buffers.lock().unwrap();
                match buffers.get(&slot) {
                    Some(buffer) if {
                        let mut desc = D3D11_BUFFER_DESC::default();
                        buffer.GetDesc(&mut desc);
                        desc.ByteWidth as usize >= data.len()
                    } =>
                    {
                        buffer.clone()
                    }
                    _ => {
                        let desc = D3D11_BUFFER_DESC {
                            ByteWidth: ((data.len() + 255) & !255) as u32,
                            Usage: D3D11_USAGE_DYNAMIC,
                            BindFlags: D3D11_BIND_CONSTANT_BUFFER.0 as u32,
                            CPUAccessFlags: D3D11_CPU_ACCESS_WRITE.0 as u32,
                            ..Default::default()
                        };
                        let mut buffer = None;
                        self.device.CreateBuffer(&desc, None, Some(&mut buffer)).map_err(|e| {
                            ComputeError::ResourceCreationFailed(format!("constants: {e}"))
                        })?;
                        let buffer = buffer.unwrap();
                        buffers.insert(slot, buffer.clone());
                        buffer
                    }
                }
            };
            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            self.immediate
                .Map(&buffer, 0, D3D11_MAP_WRITE_DISCARD, 0, Some(&mut mapped))
                .map_err(|e| ComputeError::DriverError(format!("constants map: {e}")))?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.pData as *mut u8, data.len());
            self.immediate.Unmap(&buffer, 0);
            self.immediate.CSSetConstantBuffers(slot, Some(&[Some(buffer)]));
        }
        Ok(())
    }

    fn bind_texture(
        &self,
        slot: u32,
        resource: &Resource,
        _mip_offset: u32,
        _mip_levels: u32,
    ) -> ComputeResult<()> {
        let view = self.srv(resource)?;
        let state = self.dispatch_state.context();
        state.lock().unwrap().srvs.insert(slot, view);
        Ok(())
    }

    fn bind_rw_texture(&self, slot: u32, resource: &Resource, _mip_offset: u32) -> ComputeResult<()> {
        let view = self.uav(resource)?;
        let state = self.dispatch_state.context();
        state.lock().unwrap().uavs.insert(slot, view);
        Ok(())
    }

    fn bind_sampler(&self, slot: u32, sampler: Sampler) -> ComputeResult<()> {
        let state = self.dispatch_state.context();
        state.lock().unwrap().samplers.insert(slot, sampler);
        Ok(())
    }

    fn dispatch(&self, groups_x: u32, groups_y: u32, groups_z: u32) -> ComputeResult<()> {
        let state_arc = self.dispatch_state.context();
        let state = state_arc.lock().unwrap();
        let kernel =
            state.kernel.ok_or_else(|| ComputeError::MissingBinding("no kernel bound".into()))?;
        let shader = self
            .shaders
            .lock()
            .unwrap()
            .get(&kernel)
            .cloned()
            .ok_or_else(|| ComputeError::MissingBinding(format!("kernel {:#x}", kernel.0)))?;
        unsafe {
            self.immediate.CSSetShader(&shader, None);
            for (&slot, view) in &state.srvs {
                self.immediate.CSSetShaderResources(slot, Some(&[Some(view.clone())]));
            }
            for (&slot, view) in &state.uavs {
                self.immediate.CSSetUnorderedAccessViews(
                    slot,
                    1,
                    Some(&Some(view.clone())),
                    None,
                );
            }
            for (&slot, &sampler) in &state.samplers {
                let sampler_state = self.sampler_state(sampler)?;
                self.immediate.CSSetSamplers(slot, Some(&[Some(sampler_state)]));
            }
            self.immediate.Dispatch(groups_x, groups_y, groups_z);
        }
        Ok(())
    }

    fn copy_resource(&self, _cmd: CommandList, dst: &Resource, src: &Resource) -> ComputeResult<()> {
        unsafe {
            self.immediate.CopyResource(
                &*Self::borrow_texture(dst.native),
                &*Self::borrow_texture(src.native),
            );
        }
        Ok(())
    }

    /// Transitions do not exist on D3D11.
    fn transition_resources_impl(
        &self,
        _cmd: CommandList,
        _transitions: &[crate::resource::ResourceTransition],
    ) -> ComputeResult<()> {
        Ok(())
    }

    fn insert_gpu_barrier(&self, _cmd: CommandList, _resource: &Resource) -> ComputeResult<()> {
        Ok(()) // the runtime hazards-tracks UAV access
    }

    /// Capture the engine's compute bindings so core dispatches can be
    /// bracketed without the host noticing.
    fn push_state(&self, _cmd: CommandList) -> ComputeResult<()> {
        let mut saved = SavedState::default();
        unsafe {
            let mut class_instances = 0;
            self.immediate.CSGetShader(&mut saved.shader, None, Some(&mut class_instances));
            self.immediate.CSGetConstantBuffers(0, Some(&mut saved.constant_buffers));
            self.immediate.CSGetShaderResources(0, Some(&mut saved.srvs));
            self.immediate.CSGetUnorderedAccessViews(0, Some(&mut saved.uavs));
            self.immediate.CSGetSamplers(0, Some(&mut saved.samplers));
        }
        let state = self.dispatch_state.context();
        state.lock().unwrap().saved.push(saved);
        Ok(())
    }

    fn pop_state(&self, _cmd: CommandList) -> ComputeResult<()> {
        let state = self.dispatch_state.context();
        let saved = state.lock().unwrap().saved.pop();
        let Some(saved) = saved else {
            return Err(ComputeError::InvalidCall("pop_state without push_state".into()));
        };
        unsafe {
            self.immediate.CSSetShader(saved.shader.as_ref(), None);
            self.immediate.CSSetConstantBuffers(0, Some(&saved.constant_buffers));
            self.immediate.CSSetShaderResources(0, Some(&saved.srvs));
            for (slot, uav) in saved.uavs.iter().enumerate() {
                self.immediate.CSSetUnorderedAccessViews(slot as u32, 1, Some(uav), None);
            }
            self.immediate.CSSetSamplers(0, Some(&saved.samplers));
        }
        Ok(())
    }

    fn create_shared_handle(&self, resource: &Resource) -> ComputeResult<u64> {
        unsafe {
            let texture = Self::borrow_texture(resource.native);
            let dxgi: IDXGIResource1 = texture
                .cast()
                .map_err(|e| ComputeError::DriverError(format!("dxgi resource: {e}")))?;
            let handle: HANDLE = dxgi
                .CreateSharedHandle(None, DXGI_SHARED_RESOURCE_READ | DXGI_SHARED_RESOURCE_WRITE, None)
                .map_err(|e| ComputeError::DriverError(format!("shared handle: {e}")))?;
            Ok(handle.0 as u64)
        }
    }

    fn open_shared_resource(&self, handle: u64, name: &str) -> ComputeResult<Resource> {
        unsafe {
            let device1: ID3D11Device1 = self
                .device
                .cast()
                .map_err(|e| ComputeError::DriverError(format!("d3d11.1 device: {e}")))?;
            let mut opened: Option<ID3D11Texture2D> = None;
            device1
                .OpenSharedResource1(HANDLE(handle as isize), &mut opened)
                .map_err(|e| ComputeError::DriverError(format!("open shared '{name}': {e}")))?;
            let opened = opened.unwrap();
            let mut texture_desc = D3D11_TEXTURE2D_DESC::default();
            opened.GetDesc(&mut texture_desc);
            let desc = ResourceDescription {
                width: texture_desc.Width,
                height: texture_desc.Height,
                depth: 1,
                mips: texture_desc.MipLevels,
                format: super::d3d12::unmap_format(texture_desc.Format),
                flags: ResourceFlags::SHARED_RESOURCE,
                ..Default::default()
            };
            let native = opened.as_raw() as u64;
            std::mem::forget(opened);
            Ok(Resource {
                native,
                kind: ResourceType::Texture2d,
                desc,
                debug_name: name.to_string(),
            })
        }
    }
}

/// Formats D3D11 can reach; identical table to the DXGI one used by D3D12.
pub fn d3d11_supports_format(format: Format) -> bool {
    map_format(format) != windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT_UNKNOWN
        || format == Format::Unknown
}
