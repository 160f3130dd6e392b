//! D3D12 backend. One shader-visible CBV/SRV/UAV heap with wrap-around
//! generations, root signatures interned by parameter-content hash,
//! compute PSOs interned by (root signature, kernel), constants in an
//! upload-heap ring. Each bound SRV/UAV slot becomes its own
//! single-descriptor table parameter so cached views never need to be
//! contiguous in the heap.

use std::collections::HashMap;
use std::mem::ManuallyDrop;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use windows::core::Interface;
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::System::Threading::{CreateEventA, WaitForSingleObject, INFINITE};

use framegraft_core::thread::ThreadContext;

use crate::compute::{CommandList, Compute, Device, RenderApi, Sampler};
use crate::context::FenceOps;
use crate::descriptor::{ViewCache, MAX_DESCRIPTORS, WRAPAROUND_CAPACITY};
use crate::error::{ComputeError, ComputeResult};
use crate::format::Format;
use crate::generic::{GenericState, VramOperation};
use crate::kernel::{Kernel, KernelDesc};
use crate::resource::{
    HeapType, Resource, ResourceDescription, ResourceFlags, ResourceState, ResourceTransition,
    ResourceType,
};

mod fence;
mod state;

pub use fence::Dx12Fence;

const CONSTANTS_RING_BYTES: u64 = 4 << 20;

pub fn map_format(format: Format) -> DXGI_FORMAT {
    match format {
        Format::Unknown => DXGI_FORMAT_UNKNOWN,
        Format::R8Unorm => DXGI_FORMAT_R8_UNORM,
        Format::R16Float => DXGI_FORMAT_R16_FLOAT,
        Format::R16Uint => DXGI_FORMAT_R16_UINT,
        Format::R32Float => DXGI_FORMAT_R32_FLOAT,
        Format::R32Uint => DXGI_FORMAT_R32_UINT,
        Format::Rg16Float => DXGI_FORMAT_R16G16_FLOAT,
        Format::Rg32Float => DXGI_FORMAT_R32G32_FLOAT,
        Format::Rgba8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        Format::Srgba8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
        Format::Bgra8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
        Format::Sbgra8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM_SRGB,
        Format::Rgb10A2Unorm => DXGI_FORMAT_R10G10B10A2_UNORM,
        Format::Rg11B10Float => DXGI_FORMAT_R11G11B10_FLOAT,
        Format::Rgba16Float => DXGI_FORMAT_R16G16B16A16_FLOAT,
        Format::Rgba16Unorm => DXGI_FORMAT_R16G16B16A16_UNORM,
        Format::Rgba32Float => DXGI_FORMAT_R32G32B32A32_FLOAT,
        Format::D16Unorm => DXGI_FORMAT_D16_UNORM,
        Format::D24UnormS8Uint => DXGI_FORMAT_D24_UNORM_S8_UINT,
        Format::D32Float => DXGI_FORMAT_D32_FLOAT,
        Format::D32FloatS8X24Uint => DXGI_FORMAT_D32_FLOAT_S8X24_UINT,
    }
}

pub fn unmap_format(format: DXGI_FORMAT) -> Format {
    match format {
        DXGI_FORMAT_R8_UNORM => Format::R8Unorm,
        DXGI_FORMAT_R16_FLOAT => Format::R16Float,
        DXGI_FORMAT_R16_UINT => Format::R16Uint,
        DXGI_FORMAT_R32_FLOAT => Format::R32Float,
        DXGI_FORMAT_R32_UINT => Format::R32Uint,
        DXGI_FORMAT_R16G16_FLOAT => Format::Rg16Float,
        DXGI_FORMAT_R32G32_FLOAT => Format::Rg32Float,
        DXGI_FORMAT_R8G8B8A8_UNORM => Format::Rgba8Unorm,
        DXGI_FORMAT_R8G8B8A8_UNORM_SRGB => Format::Srgba8Unorm,
        DXGI_FORMAT_B8G8R8A8_UNORM => Format::Bgra8Unorm,
        DXGI_FORMAT_B8G8R8A8_UNORM_SRGB => Format::Sbgra8Unorm,
        DXGI_FORMAT_R10G10B10A2_UNORM => Format::Rgb10A2Unorm,
        DXGI_FORMAT_R11G11B10_FLOAT => Format::Rg11B10Float,
        DXGI_FORMAT_R16G16B16A16_FLOAT => Format::Rgba16Float,
        DXGI_FORMAT_R16G16B16A16_UNORM => Format::Rgba16Unorm,
        DXGI_FORMAT_R32G32B32A32_FLOAT => Format::Rgba32Float,
        DXGI_FORMAT_D16_UNORM => Format::D16Unorm,
        DXGI_FORMAT_D24_UNORM_S8_UINT => Format::D24UnormS8Uint,
        DXGI_FORMAT_D32_FLOAT => Format::D32Float,
        DXGI_FORMAT_D32_FLOAT_S8X24_UINT => Format::D32FloatS8X24Uint,
        _ => Format::Unknown,
    }
}

pub fn map_state(state: ResourceState) -> D3D12_RESOURCE_STATES {
    if state.contains(ResourceState::STORAGE_WRITE) || state.contains(ResourceState::STORAGE_RW) {
        return D3D12_RESOURCE_STATE_UNORDERED_ACCESS;
    }
    if state.contains(ResourceState::COPY_SOURCE) {
        return D3D12_RESOURCE_STATE_COPY_SOURCE;
    }
    if state.contains(ResourceState::COPY_DESTINATION) {
        return D3D12_RESOURCE_STATE_COPY_DEST;
    }
    if state.contains(ResourceState::COLOR_ATTACHMENT_WRITE) {
        return D3D12_RESOURCE_STATE_RENDER_TARGET;
    }
    if state.contains(ResourceState::DEPTH_STENCIL_WRITE) {
        return D3D12_RESOURCE_STATE_DEPTH_WRITE;
    }
    if state.contains(ResourceState::DEPTH_STENCIL_READ) {
        return D3D12_RESOURCE_STATE_DEPTH_READ;
    }
    if state.contains(ResourceState::PRESENT) {
        return D3D12_RESOURCE_STATE_PRESENT;
    }
    if state.contains(ResourceState::INDEX_BUFFER) {
        return D3D12_RESOURCE_STATE_INDEX_BUFFER;
    }
    if state.contains(ResourceState::ARGUMENT_BUFFER) {
        return D3D12_RESOURCE_STATE_INDIRECT_ARGUMENT;
    }
    if state.contains(ResourceState::VERTEX_BUFFER) || state.contains(ResourceState::CONSTANT_BUFFER)
    {
        return D3D12_RESOURCE_STATE_VERTEX_AND_CONSTANT_BUFFER;
    }
    D3D12_RESOURCE_STATE_NON_PIXEL_SHADER_RESOURCE | D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE
}

/// Borrow a resource interface from its raw handle without touching the
/// reference count.
fn borrow_resource(native: u64) -> ManuallyDrop<ID3D12Resource> {
    ManuallyDrop::new(unsafe { ID3D12Resource::from_raw(native as *mut _) })
}

fn borrow_list(cmd: CommandList) -> ManuallyDrop<ID3D12GraphicsCommandList> {
    ManuallyDrop::new(unsafe { ID3D12GraphicsCommandList::from_raw(cmd.0 as *mut _) })
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct ViewKey {
    resource: u64,
    mip_offset: u32,
    mip_levels: u32,
    uav: bool,
}

struct ConstantsRing {
    buffer: ID3D12Resource,
    mapped: *mut u8,
    offset: AtomicU64,
}

unsafe impl Send for ConstantsRing {}
unsafe impl Sync for ConstantsRing {}

pub struct Dx12Compute {
    device: ID3D12Device,
    generic: GenericState,
    heap: ID3D12DescriptorHeap,
    heap_start_cpu: D3D12_CPU_DESCRIPTOR_HANDLE,
    heap_start_gpu: D3D12_GPU_DESCRIPTOR_HANDLE,
    heap_increment: u32,
    views: ViewCache<ViewKey>,
    root_signatures: Mutex<HashMap<u64, ID3D12RootSignature>>,
    pipelines: Mutex<HashMap<u64, ID3D12PipelineState>>,
    constants: ConstantsRing,
    dispatch_state: ThreadContext<state::DispatchState>,
    typed_uav_loads: bool,
}

impl Dx12Compute {
    pub fn new(device: ID3D12Device) -> ComputeResult<Self> {
        unsafe {
            let heap_desc = D3D12_DESCRIPTOR_HEAP_DESC {
                Type: D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
                NumDescriptors: MAX_DESCRIPTORS * WRAPAROUND_CAPACITY,
                Flags: D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE,
                NodeMask: 0,
            };
            let heap: ID3D12DescriptorHeap = device
                .CreateDescriptorHeap(&heap_desc)
                .map_err(|e| ComputeError::ResourceCreationFailed(format!("descriptor heap: {e}")))?;
            let heap_start_cpu = heap.GetCPUDescriptorHandleForHeapStart();
            let heap_start_gpu = heap.GetGPUDescriptorHandleForHeapStart();
            let heap_increment =
                device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV);

            let mut options = D3D12_FEATURE_DATA_D3D12_OPTIONS::default();
            let typed_uav_loads = device
                .CheckFeatureSupport(
                    D3D12_FEATURE_D3D12_OPTIONS,
                    &mut options as *mut _ as *mut _,
                    std::mem::size_of::<D3D12_FEATURE_DATA_D3D12_OPTIONS>() as u32,
                )
                .map(|_| options.TypedUAVLoadAdditionalFormats.as_bool())
                .unwrap_or(false);

            let constants = Self::create_constants_ring(&device)?;
            tracing::info!("d3d12 compute ready (typed uav loads: {typed_uav_loads})");
            Ok(Self {
                device,
                generic: GenericState::new(),
                heap,
                heap_start_cpu,
                heap_start_gpu,
                heap_increment,
                views: ViewCache::new(),
                root_signatures: Mutex::new(HashMap::new()),
                pipelines: Mutex::new(HashMap::new()),
                constants,
                dispatch_state: ThreadContext::new(),
                typed_uav_loads,
            })
        }
    }

    pub fn d3d12_device(&self) -> &ID3D12Device {
        &self.device
    }

    pub fn create_fence(&self, name: &str) -> ComputeResult<Arc<dyn FenceOps>> {
        Ok(Dx12Fence::new(&self.device, name)? as Arc<dyn FenceOps>)
    }

    /// Drop every cached SRV/UAV. Called from the swap-chain resize
    /// pre-hook so no view holds a back buffer alive.
    pub fn clear_cached_views(&self) {
        self.views.clear();
    }

    pub fn cached_view_count(&self) -> usize {
        self.views.len()
    }

    pub fn heap_wrap_count(&self) -> u64 {
        self.views.wrap_count()
    }

    fn create_constants_ring(device: &ID3D12Device) -> ComputeResult<ConstantsRing> {
        unsafe {
            let heap_properties = D3D12_HEAP_PROPERTIES {
                Type: D3D12_HEAP_TYPE_UPLOAD,
                ..Default::default()
            };
            let desc = D3D12_RESOURCE_DESC {
                Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
                Width: CONSTANTS_RING_BYTES,
                Height: 1,
                DepthOrArraySize: 1,
                MipLevels: 1,
                SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
                Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
                ..Default::default()
            };
            let mut buffer: Option<ID3D12Resource> = None;
            device
                .CreateCommittedResource(
                    &heap_properties,
                    D3D12_HEAP_FLAG_NONE,
                    &desc,
                    D3D12_RESOURCE_STATE_GENERIC_READ,
                    None,
                    &mut buffer,
                )
                .map_err(|e| ComputeError::ResourceCreationFailed(format!("constants ring: {e}")))?;
            let buffer = buffer.unwrap();
            let mut mapped = std::ptr::null_mut();
            buffer
                .Map(0, None, Some(&mut mapped))
                .map_err(|e| ComputeError::ResourceCreationFailed(format!("constants map: {e}")))?;
            Ok(ConstantsRing { buffer, mapped: mapped as *mut u8, offset: AtomicU64::new(0) })
        }
    }

    fn cpu_handle(&self, index: u32) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: self.heap_start_cpu.ptr + (index as usize * self.heap_increment as usize),
        }
    }

    fn gpu_handle(&self, index: u32) -> D3D12_GPU_DESCRIPTOR_HANDLE {
        D3D12_GPU_DESCRIPTOR_HANDLE {
            ptr: self.heap_start_gpu.ptr + (index as u64 * self.heap_increment as u64),
        }
    }

    fn srv(&self, resource: &Resource, mip_offset: u32, mip_levels: u32) -> u32 {
        let key = ViewKey { resource: resource.native, mip_offset, mip_levels, uav: false };
        self.views.get_or_create(key, |index| unsafe {
            let desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
                Format: map_format(resource.desc.format.correct_format()),
                ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2D,
                Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
                Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                    Texture2D: D3D12_TEX2D_SRV {
                        MostDetailedMip: mip_offset,
                        MipLevels: if mip_levels == 0 { u32::MAX } else { mip_levels },
                        PlaneSlice: 0,
                        ResourceMinLODClamp: 0.0,
                    },
                },
            };
            self.device.CreateShaderResourceView(
                &*borrow_resource(resource.native),
                Some(&desc),
                self.cpu_handle(index),
            );
        })
    }

    fn uav(&self, resource: &Resource, mip_offset: u32) -> u32 {
        let key = ViewKey { resource: resource.native, mip_offset, mip_levels: 1, uav: true };
        self.views.get_or_create(key, |index| unsafe {
            let desc = D3D12_UNORDERED_ACCESS_VIEW_DESC {
                Format: map_format(resource.desc.format.correct_format()),
                ViewDimension: D3D12_UAV_DIMENSION_TEXTURE2D,
                Anonymous: D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                    Texture2D: D3D12_TEX2D_UAV { MipSlice: mip_offset, PlaneSlice: 0 },
                },
            };
            self.device.CreateUnorderedAccessView(
                &*borrow_resource(resource.native),
                None,
                Some(&desc),
                self.cpu_handle(index),
            );
        })
    }

    /// Root signature for a binding shape: one single-descriptor table per
    /// SRV/UAV slot, root CBVs, static samplers for the bound sampler
    /// slots. Interned by content hash at process scope.
    fn root_signature(
        &self,
        shape: &state::BindingShape,
    ) -> ComputeResult<(u64, ID3D12RootSignature)> {
        let hash = shape.hash();
        if let Some(signature) = self.root_signatures.lock().unwrap().get(&hash) {
            return Ok((hash, signature.clone()));
        }
        unsafe {
            // Each range lives as long as the serialize call; one per slot.
            let mut ranges: Vec<D3D12_DESCRIPTOR_RANGE> = Vec::new();
            for &slot in &shape.srv_slots {
                ranges.push(D3D12_DESCRIPTOR_RANGE {
                    RangeType: D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
                    NumDescriptors: 1,
                    BaseShaderRegister: slot,
                    RegisterSpace: 0,
                    OffsetInDescriptorsFromTableStart: 0,
                });
            }
            for &slot in &shape.uav_slots {
                ranges.push(D3D12_DESCRIPTOR_RANGE {
                    RangeType: D3D12_DESCRIPTOR_RANGE_TYPE_UAV,
                    NumDescriptors: 1,
                    BaseShaderRegister: slot,
                    RegisterSpace: 0,
                    OffsetInDescriptorsFromTableStart: 0,
                });
            }

            let mut parameters: Vec<D3D12_ROOT_PARAMETER> = Vec::new();
            for range in &ranges {
                parameters.push(D3D12_ROOT_PARAMETER {
                    ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
                    Anonymous: D3D12_ROOT_PARAMETER_0 {
                        DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                            NumDescriptorRanges: 1,
                            pDescriptorRanges: range,
                        },
                    },
                    ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
                });
            }
            for &slot in &shape.cbv_slots {
                parameters.push(D3D12_ROOT_PARAMETER {
                    ParameterType: D3D12_ROOT_PARAMETER_TYPE_CBV,
                    Anonymous: D3D12_ROOT_PARAMETER_0 {
                        Descriptor: D3D12_ROOT_DESCRIPTOR {
                            ShaderRegister: slot,
                            RegisterSpace: 0,
                        },
                    },
                    ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
                });
            }

            // Empty sampler slots are simply skipped.
            let samplers: Vec<D3D12_STATIC_SAMPLER_DESC> = shape
                .sampler_slots
                .iter()
                .map(|&(slot, sampler)| {
                    let filter = match sampler {
                        Sampler::PointClamp | Sampler::PointMirror => {
                            D3D12_FILTER_MIN_MAG_MIP_POINT
                        }
                        _ => D3D12_FILTER_MIN_MAG_MIP_LINEAR,
                    };
                    let address = match sampler {
                        Sampler::PointClamp | Sampler::LinearClamp => {
                            D3D12_TEXTURE_ADDRESS_MODE_CLAMP
                        }
                        _ => D3D12_TEXTURE_ADDRESS_MODE_MIRROR,
                    };
                    D3D12_STATIC_SAMPLER_DESC {
                        Filter: filter,
                        AddressU: address,
                        AddressV: address,
                        AddressW: address,
                        MaxLOD: f32::MAX,
                        ShaderRegister: slot,
                        ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
                        ..Default::default()
                    }
                })
                .collect();

            let desc = D3D12_ROOT_SIGNATURE_DESC {
                NumParameters: parameters.len() as u32,
                pParameters: parameters.as_ptr(),
                NumStaticSamplers: samplers.len() as u32,
                pStaticSamplers: samplers.as_ptr(),
                Flags: D3D12_ROOT_SIGNATURE_FLAG_NONE,
            };
            let mut blob = None;
            let mut error_blob = None;
            D3D12SerializeRootSignature(
                &desc,
                D3D_ROOT_SIGNATURE_VERSION_1,
                &mut blob,
                Some(&mut error_blob),
            )
            .map_err(|e| ComputeError::KernelCreationFailed(format!("root signature: {e}")))?;
            let blob = blob.unwrap();
            let signature: ID3D12RootSignature = self
                .device
                .CreateRootSignature(
                    0,
                    std::slice::from_raw_parts(
                        blob.GetBufferPointer() as *const u8,
                        blob.GetBufferSize(),
                    ),
                )
                .map_err(|e| ComputeError::KernelCreationFailed(format!("root signature: {e}")))?;
            self.root_signatures.lock().unwrap().insert(hash, signature.clone());
            Ok((hash, signature))
        }
    }

    fn pipeline(
        &self,
        kernel: Kernel,
        root_hash: u64,
        root_signature: &ID3D12RootSignature,
    ) -> ComputeResult<ID3D12PipelineState> {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        kernel.0.hash(&mut hasher);
        root_hash.hash(&mut hasher);
        let pso_hash = hasher.finish();
        if let Some(pipeline) = self.pipelines.lock().unwrap().get(&pso_hash) {
            return Ok(pipeline.clone());
        }
        let desc = self
            .generic
            .kernel_desc(kernel)
            .ok_or_else(|| ComputeError::MissingBinding(format!("kernel {:#x}", kernel.0)))?;
        unsafe {
            let pso_desc = D3D12_COMPUTE_PIPELINE_STATE_DESC {
                pRootSignature: ManuallyDrop::new(Some(root_signature.clone())),
                CS: D3D12_SHADER_BYTECODE {
                    pShaderBytecode: desc.bytecode.as_ptr() as *const _,
                    BytecodeLength: desc.bytecode.len(),
                },
                ..Default::default()
            };
            let pipeline: ID3D12PipelineState =
                self.device.CreateComputePipelineState(&pso_desc).map_err(|e| {
                    ComputeError::KernelCreationFailed(format!("pso '{}': {e}", desc.name))
                })?;
            self.pipelines.lock().unwrap().insert(pso_hash, pipeline.clone());
            Ok(pipeline)
        }
    }
}

impl Compute for Dx12Compute {
    fn render_api(&self) -> RenderApi {
        RenderApi::D3d12
    }

    fn device(&self) -> Device {
        Device(self.device.as_raw() as u64)
    }

    fn generic(&self) -> &GenericState {
        &self.generic
    }

    fn create_kernel(&self, desc: &KernelDesc) -> ComputeResult<Kernel> {
        if desc.bytecode.is_empty() {
            return Err(ComputeError::KernelCreationFailed(format!(
                "'{}': empty bytecode",
                desc.name
            )));
        }
        Ok(self.generic.register_kernel(desc))
    }

    fn destroy_kernel(&self, kernel: Kernel) -> ComputeResult<()> {
        self.generic.forget_kernel(kernel)
    }

    fn create_buffer(&self, desc: &ResourceDescription, name: &str) -> ComputeResult<Resource> {
        unsafe {
            let heap_properties = D3D12_HEAP_PROPERTIES {
                Type: match desc.heap_type {
                    HeapType::Upload => D3D12_HEAP_TYPE_UPLOAD,
                    HeapType::Readback => D3D12_HEAP_TYPE_READBACK,
                    HeapType::Default => D3D12_HEAP_TYPE_DEFAULT,
                },
                ..Default::default()
            };
            let mut flags = D3D12_RESOURCE_FLAG_NONE;
            if desc.flags.contains(ResourceFlags::SHADER_RESOURCE_STORAGE) {
                flags |= D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS;
            }
            let resource_desc = D3D12_RESOURCE_DESC {
                Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
                Width: desc.width as u64,
                Height: 1,
                DepthOrArraySize: 1,
                MipLevels: 1,
                SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
                Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
                Flags: flags,
                ..Default::default()
            };
            let mut created: Option<ID3D12Resource> = None;
            self.device
                .CreateCommittedResource(
                    &heap_properties,
                    D3D12_HEAP_FLAG_NONE,
                    &resource_desc,
                    map_state(desc.state),
                    None,
                    &mut created,
                )
                .map_err(|e| ComputeError::ResourceCreationFailed(format!("'{name}': {e}")))?;
            let created = created.unwrap();
            let native = created.as_raw() as u64;
            // Our stored handle owns this reference.
            std::mem::forget(created);
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
            let heap_properties =
                D3D12_HEAP_PROPERTIES { Type: D3D12_HEAP_TYPE_DEFAULT, ..Default::default() };
            let mut flags = D3D12_RESOURCE_FLAG_NONE;
            if desc.flags.contains(ResourceFlags::SHADER_RESOURCE_STORAGE) {
                flags |= D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS;
            }
            if desc.flags.contains(ResourceFlags::COLOR_ATTACHMENT) {
                flags |= D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET;
            }
            if desc.flags.contains(ResourceFlags::DEPTH_STENCIL_ATTACHMENT) {
                flags |= D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL;
            }
            let heap_flags = if desc.flags.contains(ResourceFlags::SHARED_RESOURCE) {
                D3D12_HEAP_FLAG_SHARED
            } else {
                D3D12_HEAP_FLAG_NONE
            };
            let resource_desc = D3D12_RESOURCE_DESC {
                Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
                Width: desc.width as u64,
                Height: desc.height,
                DepthOrArraySize: desc.depth.max(1) as u16,
                MipLevels: desc.mips.max(1) as u16,
                Format: map_format(desc.format),
                SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
                Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
                Flags: flags,
                ..Default::default()
            };
            let mut created: Option<ID3D12Resource> = None;
            self.device
                .CreateCommittedResource(
                    &heap_properties,
                    heap_flags,
                    &resource_desc,
                    map_state(desc.state),
                    None,
                    &mut created,
                )
                .map_err(|e| ComputeError::ResourceCreationFailed(format!("'{name}': {e}")))?;
            let created = created.unwrap();
            let native = created.as_raw() as u64;
            std::mem::forget(created);
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
        // Reclaim the reference held by the stored handle.
        let owned: ID3D12Resource = unsafe { ID3D12Resource::from_raw(resource.native as *mut _) };
        drop(owned);
        self.generic.manage_vram(resource.desc.total_bytes(), VramOperation::Free);
        Ok(())
    }

    fn get_native_resource_state(&self, state: ResourceState) -> ComputeResult<u32> {
        Ok(map_state(state).0 as u32)
    }

    fn get_resource_state(&self, native: u32) -> ComputeResult<ResourceState> {
        let state = D3D12_RESOURCE_STATES(native as i32);
        Ok(match state {
            D3D12_RESOURCE_STATE_UNORDERED_ACCESS => ResourceState::STORAGE_RW,
            D3D12_RESOURCE_STATE_COPY_SOURCE => ResourceState::COPY_SOURCE,
            D3D12_RESOURCE_STATE_COPY_DEST => ResourceState::COPY_DESTINATION,
            D3D12_RESOURCE_STATE_RENDER_TARGET => ResourceState::COLOR_ATTACHMENT_WRITE,
            D3D12_RESOURCE_STATE_DEPTH_WRITE => ResourceState::DEPTH_STENCIL_WRITE,
            D3D12_RESOURCE_STATE_DEPTH_READ => ResourceState::DEPTH_STENCIL_READ,
            D3D12_RESOURCE_STATE_PRESENT => ResourceState::PRESENT,
            _ => ResourceState::TEXTURE_READ,
        })
    }

    fn bind_shared_state(&self, cmd: CommandList) -> ComputeResult<()> {
        let state = self.dispatch_state.context();
        state.lock().unwrap().reset(cmd);
        Ok(())
    }

    fn bind_kernel(&self, kernel: Kernel) -> ComputeResult<()> {
        if self.generic.kernel_desc(kernel).is_none() {
            return Err(ComputeError::MissingBinding(format!("kernel {:#x}", kernel.0)));
        }
        let state = self.dispatch_state.context();
        state.lock().unwrap().kernel = Some(kernel);
        Ok(())
    }

    fn bind_consts(&self, slot: u32, data: &[u8]) -> ComputeResult<()> {
        let aligned = (data.len() as u64 + 255) & !255;
        if aligned > CONSTANTS_RING_BYTES {
            return Err(ComputeError::InvalidArgument("constants exceed the ring".into()));
        }
        let previous = self
            .constants
            .offset
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                let start = if current + aligned > CONSTANTS_RING_BYTES { 0 } else { current };
                Some(start + aligned)
            })
            .unwrap();
        let offset = if previous + aligned > CONSTANTS_RING_BYTES { 0 } else { previous };
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.constants.mapped.add(offset as usize),
                data.len(),
            );
        }
        let gpu_address = unsafe { self.constants.buffer.GetGPUVirtualAddress() } + offset;
        let state = self.dispatch_state.context();
        state.lock().unwrap().constants.insert(slot, gpu_address);
        Ok(())
    }

    fn bind_texture(
        &self,
        slot: u32,
        resource: &Resource,
        mip_offset: u32,
        mip_levels: u32,
    ) -> ComputeResult<()> {
        let index = self.srv(resource, mip_offset, mip_levels);
        let state = self.dispatch_state.context();
        state.lock().unwrap().srvs.insert(slot, self.gpu_handle(index).ptr);
        Ok(())
    }

    fn bind_rw_texture(&self, slot: u32, resource: &Resource, mip_offset: u32) -> ComputeResult<()> {
        if !self.typed_uav_loads && resource.desc.format.bytes_per_pixel() > 4 {
            tracing::warn!(
                "typed uav loads unsupported; '{}' may not be writable",
                resource.debug_name
            );
        }
        let index = self.uav(resource, mip_offset);
        let state = self.dispatch_state.context();
        state.lock().unwrap().uavs.insert(slot, self.gpu_handle(index).ptr);
        Ok(())
    }

    fn bind_sampler(&self, slot: u32, sampler: Sampler) -> ComputeResult<()> {
        let state = self.dispatch_state.context();
        state.lock().unwrap().samplers.insert(slot, sampler);
        Ok(())
    }

    fn dispatch(&self, groups_x: u32, groups_y: u32, groups_z: u32) -> ComputeResult<()> {
        let state = self.dispatch_state.context();
        let state = state.lock().unwrap();
        let kernel =
            state.kernel.ok_or_else(|| ComputeError::MissingBinding("no kernel bound".into()))?;
        let cmd = state
            .cmd
            .ok_or_else(|| ComputeError::MissingBinding("no command list bound".into()))?;
        let shape = state.shape();
        let (root_hash, root_signature) = self.root_signature(&shape)?;
        let pipeline = self.pipeline(kernel, root_hash, &root_signature)?;

        unsafe {
            let list = borrow_list(cmd);
            list.SetDescriptorHeaps(&[Some(self.heap.clone())]);
            list.SetComputeRootSignature(&root_signature);
            list.SetPipelineState(&pipeline);

            // Parameters in shape order: SRV tables, UAV tables, root CBVs.
            let mut parameter = 0;
            for slot in &shape.srv_slots {
                let handle = state.srvs[slot];
                list.SetComputeRootDescriptorTable(
                    parameter,
                    D3D12_GPU_DESCRIPTOR_HANDLE { ptr: handle },
                );
                parameter += 1;
            }
            for slot in &shape.uav_slots {
                let handle = state.uavs[slot];
                list.SetComputeRootDescriptorTable(
                    parameter,
                    D3D12_GPU_DESCRIPTOR_HANDLE { ptr: handle },
                );
                parameter += 1;
            }
            for slot in &shape.cbv_slots {
                list.SetComputeRootConstantBufferView(parameter, state.constants[slot]);
                parameter += 1;
            }
            list.Dispatch(groups_x, groups_y, groups_z);
        }
        Ok(())
    }

    fn copy_resource(&self, cmd: CommandList, dst: &Resource, src: &Resource) -> ComputeResult<()> {
        unsafe {
            let list = borrow_list(cmd);
            list.CopyResource(&*borrow_resource(dst.native), &*borrow_resource(src.native));
        }
        Ok(())
    }

    fn transition_resources_impl(
        &self,
        cmd: CommandList,
        transitions: &[ResourceTransition],
    ) -> ComputeResult<()> {
        unsafe {
            let list = borrow_list(cmd);
            let barriers: Vec<D3D12_RESOURCE_BARRIER> = transitions
                .iter()
                .map(|transition| {
                    if transition.from.contains(ResourceState::STORAGE_RW)
                        && transition.to.contains(ResourceState::STORAGE_RW)
                    {
                        D3D12_RESOURCE_BARRIER {
                            Type: D3D12_RESOURCE_BARRIER_TYPE_UAV,
                            Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
                            Anonymous: D3D12_RESOURCE_BARRIER_0 {
                                UAV: ManuallyDrop::new(D3D12_RESOURCE_UAV_BARRIER {
                                    pResource: ManuallyDrop::new(Some(ID3D12Resource::from_raw(
                                        transition.native as *mut _,
                                    ))),
                                }),
                            },
                        }
                    } else {
                        D3D12_RESOURCE_BARRIER {
                            Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
                            Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
                            Anonymous: D3D12_RESOURCE_BARRIER_0 {
                                Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                                    pResource: ManuallyDrop::new(Some(ID3D12Resource::from_raw(
                                        transition.native as *mut _,
                                    ))),
                                    Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                                    StateBefore: map_state(transition.from),
                                    StateAfter: map_state(transition.to),
                                }),
                            },
                        }
                    }
                })
                .collect();
            list.ResourceBarrier(&barriers);
        }
        Ok(())
    }

    fn insert_gpu_barrier(&self, cmd: CommandList, resource: &Resource) -> ComputeResult<()> {
        unsafe {
            let list = borrow_list(cmd);
            let barrier = D3D12_RESOURCE_BARRIER {
                Type: D3D12_RESOURCE_BARRIER_TYPE_UAV,
                Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
                Anonymous: D3D12_RESOURCE_BARRIER_0 {
                    UAV: ManuallyDrop::new(D3D12_RESOURCE_UAV_BARRIER {
                        pResource: ManuallyDrop::new(Some(ID3D12Resource::from_raw(
                            resource.native as *mut _,
                        ))),
                    }),
                },
            };
            list.ResourceBarrier(&[barrier]);
        }
        Ok(())
    }

    fn create_shared_handle(&self, resource: &Resource) -> ComputeResult<u64> {
        unsafe {
            let handle: HANDLE = self
                .device
                .CreateSharedHandle(
                    &*borrow_resource(resource.native),
                    None,
                    0x1000_0000, // GENERIC_ALL
                    None,
                )
                .map_err(|e| ComputeError::DriverError(format!("shared handle: {e}")))?;
            Ok(handle.0 as u64)
        }
    }

    fn open_shared_resource(&self, handle: u64, name: &str) -> ComputeResult<Resource> {
        unsafe {
            let mut opened: Option<ID3D12Resource> = None;
            self.device
                .OpenSharedHandle(HANDLE(handle as isize), &mut opened)
                .map_err(|e| ComputeError::DriverError(format!("open shared '{name}': {e}")))?;
            let opened = opened.unwrap();
            let native_desc = opened.GetDesc();
            let desc = ResourceDescription {
                width: native_desc.Width as u32,
                height: native_desc.Height,
                depth: 1,
                mips: native_desc.MipLevels as u32,
                format: unmap_format(native_desc.Format),
                state: ResourceState::COPY_DESTINATION,
                flags: ResourceFlags::SHARED_RESOURCE,
                ..Default::default()
            };
            let native = opened.as_raw() as u64;
            std::mem::forget(opened);
            let _ = CloseHandle(HANDLE(handle as isize));
            Ok(Resource {
                native,
                kind: ResourceType::Texture2d,
                desc,
                debug_name: name.to_string(),
            })
        }
    }
}

unsafe impl Send for Dx12Compute {}
unsafe impl Sync for Dx12Compute {}

pub(crate) fn wait_for_fence_event(
    fence: &ID3D12Fence,
    value: u64,
    timeout_ms: u32,
) -> ComputeResult<bool> {
    unsafe {
        if fence.GetCompletedValue() >= value {
            return Ok(true);
        }
        let event = CreateEventA(None, false, false, None)
            .map_err(|e| ComputeError::DriverError(format!("fence event: {e}")))?;
        fence
            .SetEventOnCompletion(value, event)
            .map_err(|e| ComputeError::DriverError(format!("fence wait: {e}")))?;
        let timeout = if timeout_ms == u32::MAX { INFINITE } else { timeout_ms };
        let result = WaitForSingleObject(event, timeout);
        let _ = CloseHandle(event);
        Ok(result.0 == 0)
    }
}
