//! Vulkan backend. Kernels compile to compute pipelines cached per
//! binding signature; constants ride in a host-visible ring buffer bound
//! with dynamic offsets; context fences are timeline semaphores.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use ash::vk;
use ash::vk::Handle;

use framegraft_core::thread::ThreadContext;

use crate::compute::{CommandList, Compute, Device, RenderApi};
use crate::context::FenceOps;
use crate::error::{ComputeError, ComputeResult};
use crate::format::Format;
use crate::generic::{GenericState, VramOperation};
use crate::kernel::{Kernel, KernelDesc};
use crate::resource::{
    Resource, ResourceDescription, ResourceFlags, ResourceState, ResourceTransition, ResourceType,
};

mod fence;
mod state;

pub use fence::TimelineSemaphore;

/// Binding-slot convention shared with the kernel bytecode: samplers at
/// 0..8, sampled images at 8..24, storage images at 24..40, uniform
/// buffers at 40..48, all in set 0.
const BINDING_SAMPLER_BASE: u32 = 0;
const BINDING_TEXTURE_BASE: u32 = 8;
const BINDING_RW_TEXTURE_BASE: u32 = 24;
const BINDING_CONSTS_BASE: u32 = 40;

const INITIAL_DESCRIPTOR_SETS: u32 = 64;
const CONSTANTS_RING_BYTES: u64 = 4 << 20;

pub fn map_format(format: Format) -> vk::Format {
    match format {
        Format::Unknown => vk::Format::UNDEFINED,
        Format::R8Unorm => vk::Format::R8_UNORM,
        Format::R16Float => vk::Format::R16_SFLOAT,
        Format::R16Uint => vk::Format::R16_UINT,
        Format::R32Float => vk::Format::R32_SFLOAT,
        Format::R32Uint => vk::Format::R32_UINT,
        Format::Rg16Float => vk::Format::R16G16_SFLOAT,
        Format::Rg32Float => vk::Format::R32G32_SFLOAT,
        Format::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        Format::Srgba8Unorm => vk::Format::R8G8B8A8_SRGB,
        Format::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        Format::Sbgra8Unorm => vk::Format::B8G8R8A8_SRGB,
        Format::Rgb10A2Unorm => vk::Format::A2B10G10R10_UNORM_PACK32,
        Format::Rg11B10Float => vk::Format::B10G11R11_UFLOAT_PACK32,
        Format::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        Format::Rgba16Unorm => vk::Format::R16G16B16A16_UNORM,
        Format::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        Format::D16Unorm => vk::Format::D16_UNORM,
        Format::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
        Format::D32Float => vk::Format::D32_SFLOAT,
        Format::D32FloatS8X24Uint => vk::Format::D32_SFLOAT_S8_UINT,
    }
}

pub fn unmap_format(format: vk::Format) -> Format {
    match format {
        vk::Format::R8_UNORM => Format::R8Unorm,
        vk::Format::R16_SFLOAT => Format::R16Float,
        vk::Format::R16_UINT => Format::R16Uint,
        vk::Format::R32_SFLOAT => Format::R32Float,
        vk::Format::R32_UINT => Format::R32Uint,
        vk::Format::R16G16_SFLOAT => Format::Rg16Float,
        vk::Format::R32G32_SFLOAT => Format::Rg32Float,
        vk::Format::R8G8B8A8_UNORM => Format::Rgba8Unorm,
        vk::Format::R8G8B8A8_SRGB => Format::Srgba8Unorm,
        vk::Format::B8G8R8A8_UNORM => Format::Bgra8Unorm,
        vk::Format::B8G8R8A8_SRGB => Format::Sbgra8Unorm,
        vk::Format::A2B10G10R10_UNORM_PACK32 => Format::Rgb10A2Unorm,
        vk::Format::B10G11R11_UFLOAT_PACK32 => Format::Rg11B10Float,
        vk::Format::R16G16B16A16_SFLOAT => Format::Rgba16Float,
        vk::Format::R16G16B16A16_UNORM => Format::Rgba16Unorm,
        vk::Format::R32G32B32A32_SFLOAT => Format::Rgba32Float,
        vk::Format::D16_UNORM => Format::D16Unorm,
        vk::Format::D24_UNORM_S8_UINT => Format::D24UnormS8Uint,
        vk::Format::D32_SFLOAT => Format::D32Float,
        vk::Format::D32_SFLOAT_S8_UINT => Format::D32FloatS8X24Uint,
        _ => Format::Unknown,
    }
}

/// Portable state → access mask, layout and pipeline stage.
pub fn map_state(state: ResourceState) -> (vk::AccessFlags, vk::ImageLayout, vk::PipelineStageFlags) {
    if state.contains(ResourceState::STORAGE_RW) || state.contains(ResourceState::STORAGE_WRITE) {
        return (
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            vk::ImageLayout::GENERAL,
            vk::PipelineStageFlags::COMPUTE_SHADER,
        );
    }
    if state.contains(ResourceState::COPY_SOURCE) {
        return (
            vk::AccessFlags::TRANSFER_READ,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::PipelineStageFlags::TRANSFER,
        );
    }
    if state.contains(ResourceState::COPY_DESTINATION) {
        return (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::PipelineStageFlags::TRANSFER,
        );
    }
    if state.contains(ResourceState::COLOR_ATTACHMENT_WRITE) {
        return (
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        );
    }
    if state.contains(ResourceState::DEPTH_STENCIL_WRITE) {
        return (
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        );
    }
    if state.contains(ResourceState::DEPTH_STENCIL_READ) {
        return (
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        );
    }
    if state.contains(ResourceState::PRESENT) {
        return (
            vk::AccessFlags::MEMORY_READ,
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        );
    }
    (
        vk::AccessFlags::SHADER_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        vk::PipelineStageFlags::COMPUTE_SHADER,
    )
}

struct ResourceData {
    memory: vk::DeviceMemory,
    views: HashMap<(u32, u32), vk::ImageView>,
    kind: ResourceType,
    bytes: u64,
}

struct PipelineVariant {
    set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    pools: Vec<vk::DescriptorPool>,
    sets_per_pool: u32,
}

struct VulkanKernel {
    module: vk::ShaderModule,
    entry_point: std::ffi::CString,
    variants: HashMap<u64, PipelineVariant>,
}

struct ConstantsRing {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    mapped: *mut u8,
    offset: AtomicU64,
}

// The mapped pointer is only written through per-thread offsets.
unsafe impl Send for ConstantsRing {}
unsafe impl Sync for ConstantsRing {}

pub struct VulkanCompute {
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queue_family_index: u32,
    queue: vk::Queue,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    generic: GenericState,
    resources: Mutex<HashMap<u64, ResourceData>>,
    kernels: Mutex<HashMap<Kernel, VulkanKernel>>,
    samplers: Mutex<HashMap<crate::compute::Sampler, vk::Sampler>>,
    constants: ConstantsRing,
    dispatch_state: ThreadContext<state::DispatchState>,
}

impl VulkanCompute {
    /// The host hands in its instance, physical device and device; the
    /// layer never owns the Vulkan loader.
    pub fn new(
        instance: ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
        queue_family_index: u32,
        queue: vk::Queue,
    ) -> ComputeResult<Self> {
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        let constants = Self::create_constants_ring(&device, &memory_properties)?;
        tracing::info!("vulkan compute ready (queue family {queue_family_index})");
        Ok(Self {
            instance,
            physical_device,
            device,
            queue_family_index,
            queue,
            memory_properties,
            generic: GenericState::new(),
            resources: Mutex::new(HashMap::new()),
            kernels: Mutex::new(HashMap::new()),
            samplers: Mutex::new(HashMap::new()),
            constants,
            dispatch_state: ThreadContext::new(),
        })
    }

    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn ash_device(&self) -> &ash::Device {
        &self.device
    }

    pub fn ash_instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn create_timeline_fence(&self, name: &str) -> ComputeResult<Arc<dyn FenceOps>> {
        Ok(TimelineSemaphore::new(self.device.clone(), name)? as Arc<dyn FenceOps>)
    }

    fn create_constants_ring(
        device: &ash::Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
    ) -> ComputeResult<ConstantsRing> {
        unsafe {
            let buffer_info = vk::BufferCreateInfo::default()
                .size(CONSTANTS_RING_BYTES)
                .usage(vk::BufferUsageFlags::UNIFORM_BUFFER)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);
            let buffer = device
                .create_buffer(&buffer_info, None)
                .map_err(|e| ComputeError::ResourceCreationFailed(format!("constants ring: {e}")))?;
            let requirements = device.get_buffer_memory_requirements(buffer);
            let memory_type = find_memory_type(
                memory_properties,
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )
            .ok_or_else(|| {
                ComputeError::ResourceCreationFailed("no host-visible memory type".into())
            })?;
            let alloc_info = vk::MemoryAllocateInfo::default()
                .allocation_size(requirements.size)
                .memory_type_index(memory_type);
            let memory = device
                .allocate_memory(&alloc_info, None)
                .map_err(|e| ComputeError::OutOfMemory(format!("constants ring: {e}")))?;
            device
                .bind_buffer_memory(buffer, memory, 0)
                .map_err(|e| ComputeError::ResourceCreationFailed(format!("constants ring: {e}")))?;
            let mapped = device
                .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                .map_err(|e| ComputeError::ResourceCreationFailed(format!("constants ring: {e}")))?
                as *mut u8;
            Ok(ConstantsRing { buffer, memory, mapped, offset: AtomicU64::new(0) })
        }
    }

    fn find_memory_type_index(&self, type_bits: u32, flags: vk::MemoryPropertyFlags) -> Option<u32> {
        find_memory_type(&self.memory_properties, type_bits, flags)
    }

    fn image_view(
        &self,
        resource: &Resource,
        mip_offset: u32,
        mip_levels: u32,
    ) -> ComputeResult<vk::ImageView> {
        let mut resources = self.resources.lock().unwrap();
        let data = resources.get_mut(&resource.native).ok_or_else(|| {
            ComputeError::InvalidArgument(format!("unknown resource {:#x}", resource.native))
        })?;
        if let Some(&view) = data.views.get(&(mip_offset, mip_levels)) {
            return Ok(view);
        }
        let format = map_format(resource.desc.format.correct_format());
        let create_info = vk::ImageViewCreateInfo::default()
            .image(vk::Image::from_raw(resource.native))
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: mip_offset,
                level_count: if mip_levels == 0 { vk::REMAINING_MIP_LEVELS } else { mip_levels },
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = unsafe { self.device.create_image_view(&create_info, None) }.map_err(|e| {
            tracing::error!("failed to create image view: {e}");
            ComputeError::ResourceCreationFailed(format!("image view: {e}"))
        })?;
        data.views.insert((mip_offset, mip_levels), view);
        Ok(view)
    }

    fn sampler(&self, sampler: crate::compute::Sampler) -> ComputeResult<vk::Sampler> {
        use crate::compute::Sampler as S;
        let mut samplers = self.samplers.lock().unwrap();
        if let Some(&existing) = samplers.get(&sampler) {
            return Ok(existing);
        }
        let (filter, address) = match sampler {
            S::PointClamp => (vk::Filter::NEAREST, vk::SamplerAddressMode::CLAMP_TO_EDGE),
            S::PointMirror => (vk::Filter::NEAREST, vk::SamplerAddressMode::MIRRORED_REPEAT),
            S::LinearClamp => (vk::Filter::LINEAR, vk::SamplerAddressMode::CLAMP_TO_EDGE),
            S::LinearMirror => (vk::Filter::LINEAR, vk::SamplerAddressMode::MIRRORED_REPEAT),
        };
        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(filter)
            .min_filter(filter)
            .address_mode_u(address)
            .address_mode_v(address)
            .address_mode_w(address)
            .max_lod(vk::LOD_CLAMP_NONE);
        let created = unsafe { self.device.create_sampler(&create_info, None) }
            .map_err(|e| ComputeError::ResourceCreationFailed(format!("sampler: {e}")))?;
        samplers.insert(sampler, created);
        Ok(created)
    }
}

fn find_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..properties.memory_type_count).find(|&i| {
        (type_bits & (1 << i)) != 0
            && properties.memory_types[i as usize].property_flags.contains(flags)
    })
}

impl Compute for VulkanCompute {
    fn render_api(&self) -> RenderApi {
        RenderApi::Vulkan
    }

    fn device(&self) -> Device {
        Device(self.device.handle().as_raw())
    }

    fn generic(&self) -> &GenericState {
        &self.generic
    }

    fn create_kernel(&self, desc: &KernelDesc) -> ComputeResult<Kernel> {
        let id = self.generic.register_kernel(desc);
        let mut kernels = self.kernels.lock().unwrap();
        if kernels.contains_key(&id) {
            return Ok(id);
        }
        if desc.bytecode.len() % 4 != 0 {
            return Err(ComputeError::KernelCreationFailed(format!(
                "'{}' bytecode is not SPIR-V aligned",
                desc.name
            )));
        }
        let words: Vec<u32> = desc
            .bytecode
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let create_info = vk::ShaderModuleCreateInfo::default().code(&words);
        let module = unsafe { self.device.create_shader_module(&create_info, None) }.map_err(|e| {
            tracing::error!("failed to create shader module '{}': {e}", desc.name);
            ComputeError::KernelCreationFailed(format!("'{}': {e}", desc.name))
        })?;
        let entry_point = std::ffi::CString::new(desc.entry_point.as_str())
            .map_err(|_| ComputeError::KernelCreationFailed("entry point contains NUL".into()))?;
        kernels.insert(id, VulkanKernel { module, entry_point, variants: HashMap::new() });
        Ok(id)
    }

    fn destroy_kernel(&self, kernel: Kernel) -> ComputeResult<()> {
        let removed = self.kernels.lock().unwrap().remove(&kernel);
        let Some(vk_kernel) = removed else {
            return Err(ComputeError::InvalidArgument(format!("unknown kernel {:#x}", kernel.0)));
        };
        unsafe {
            for variant in vk_kernel.variants.values() {
                self.device.destroy_pipeline(variant.pipeline, None);
                self.device.destroy_pipeline_layout(variant.pipeline_layout, None);
                self.device.destroy_descriptor_set_layout(variant.set_layout, None);
                for pool in &variant.pools {
                    self.device.destroy_descriptor_pool(*pool, None);
                }
            }
            self.device.destroy_shader_module(vk_kernel.module, None);
        }
        self.generic.forget_kernel(kernel)
    }

    fn create_buffer(&self, desc: &ResourceDescription, name: &str) -> ComputeResult<Resource> {
        if let Some(resource) = self.generic.host_allocate(desc, name) {
            return Ok(resource);
        }
        unsafe {
            let mut usage = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
            if desc.flags.contains(ResourceFlags::CONSTANT_BUFFER) {
                usage |= vk::BufferUsageFlags::UNIFORM_BUFFER;
            }
            if desc.flags.contains(ResourceFlags::RAW_OR_STRUCTURED_BUFFER) {
                usage |= vk::BufferUsageFlags::STORAGE_BUFFER;
            }
            let size = desc.width as u64;
            let buffer_info = vk::BufferCreateInfo::default()
                .size(size)
                .usage(usage)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);
            let buffer = self
                .device
                .create_buffer(&buffer_info, None)
                .map_err(|e| ComputeError::ResourceCreationFailed(format!("'{name}': {e}")))?;

            let requirements = self.device.get_buffer_memory_requirements(buffer);
            let flags = match desc.heap_type {
                crate::resource::HeapType::Default => vk::MemoryPropertyFlags::DEVICE_LOCAL,
                _ => vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            };
            let memory_type = self
                .find_memory_type_index(requirements.memory_type_bits, flags)
                .ok_or_else(|| {
                    ComputeError::ResourceCreationFailed(format!("'{name}': no memory type"))
                })?;
            let alloc_info = vk::MemoryAllocateInfo::default()
                .allocation_size(requirements.size)
                .memory_type_index(memory_type);
            let memory = self
                .device
                .allocate_memory(&alloc_info, None)
                .map_err(|e| ComputeError::OutOfMemory(format!("'{name}': {e}")))?;
            self.device
                .bind_buffer_memory(buffer, memory, 0)
                .map_err(|e| ComputeError::ResourceCreationFailed(format!("'{name}': {e}")))?;

            self.generic.manage_vram(requirements.size, VramOperation::Alloc);
            self.resources.lock().unwrap().insert(
                buffer.as_raw(),
                ResourceData {
                    memory,
                    views: HashMap::new(),
                    kind: ResourceType::Buffer,
                    bytes: requirements.size,
                },
            );
            Ok(Resource {
                native: buffer.as_raw(),
                kind: ResourceType::Buffer,
                desc: desc.clone(),
                debug_name: name.to_string(),
            })
        }
    }

    fn create_texture2d(&self, desc: &ResourceDescription, name: &str) -> ComputeResult<Resource> {
        if let Some(resource) = self.generic.host_allocate(desc, name) {
            return Ok(resource);
        }
        unsafe {
            let mut usage = vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
            if desc.flags.contains(ResourceFlags::SHADER_RESOURCE) {
                usage |= vk::ImageUsageFlags::SAMPLED;
            }
            if desc.flags.contains(ResourceFlags::SHADER_RESOURCE_STORAGE) {
                usage |= vk::ImageUsageFlags::STORAGE;
            }
            if desc.flags.contains(ResourceFlags::COLOR_ATTACHMENT) {
                usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
            }
            if desc.flags.contains(ResourceFlags::DEPTH_STENCIL_ATTACHMENT) {
                usage |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
            }
            let image_info = vk::ImageCreateInfo::default()
                .image_type(vk::ImageType::TYPE_2D)
                .format(map_format(desc.format))
                .extent(vk::Extent3D {
                    width: desc.width,
                    height: desc.height,
                    depth: desc.depth.max(1),
                })
                .mip_levels(desc.mips.max(1))
                .array_layers(1)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(vk::ImageTiling::OPTIMAL)
                .usage(usage)
                .sharing_mode(vk::SharingMode::EXCLUSIVE)
                .initial_layout(vk::ImageLayout::UNDEFINED);
            let image = self
                .device
                .create_image(&image_info, None)
                .map_err(|e| ComputeError::ResourceCreationFailed(format!("'{name}': {e}")))?;

            let requirements = self.device.get_image_memory_requirements(image);
            let memory_type = self
                .find_memory_type_index(
                    requirements.memory_type_bits,
                    vk::MemoryPropertyFlags::DEVICE_LOCAL,
                )
                .ok_or_else(|| {
                    ComputeError::ResourceCreationFailed(format!("'{name}': no memory type"))
                })?;
            let alloc_info = vk::MemoryAllocateInfo::default()
                .allocation_size(requirements.size)
                .memory_type_index(memory_type);
            let memory = self
                .device
                .allocate_memory(&alloc_info, None)
                .map_err(|e| ComputeError::OutOfMemory(format!("'{name}': {e}")))?;
            self.device
                .bind_image_memory(image, memory, 0)
                .map_err(|e| ComputeError::ResourceCreationFailed(format!("'{name}': {e}")))?;

            self.generic.manage_vram(requirements.size, VramOperation::Alloc);
            self.resources.lock().unwrap().insert(
                image.as_raw(),
                ResourceData {
                    memory,
                    views: HashMap::new(),
                    kind: ResourceType::Texture2d,
                    bytes: requirements.size,
                },
            );
            Ok(Resource {
                native: image.as_raw(),
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
        let data = self.resources.lock().unwrap().remove(&resource.native);
        let Some(data) = data else {
            // Not one of ours; a host allocator owns it, or the host does.
            self.generic.host_release(resource);
            return Ok(());
        };
        unsafe {
            for view in data.views.values() {
                self.device.destroy_image_view(*view, None);
            }
            match data.kind {
                ResourceType::Buffer => {
                    self.device.destroy_buffer(vk::Buffer::from_raw(resource.native), None)
                }
                _ => self.device.destroy_image(vk::Image::from_raw(resource.native), None),
            }
            self.device.free_memory(data.memory, None);
        }
        self.generic.manage_vram(data.bytes, VramOperation::Free);
        Ok(())
    }

    fn get_native_resource_state(&self, state: ResourceState) -> ComputeResult<u32> {
        Ok(map_state(state).1.as_raw() as u32)
    }

    fn get_resource_state(&self, native: u32) -> ComputeResult<ResourceState> {
        let layout = vk::ImageLayout::from_raw(native as i32);
        Ok(match layout {
            vk::ImageLayout::GENERAL => ResourceState::STORAGE_RW,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL => ResourceState::COPY_SOURCE,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL => ResourceState::COPY_DESTINATION,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => ResourceState::COLOR_ATTACHMENT_WRITE,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => ResourceState::DEPTH_STENCIL_WRITE,
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL => ResourceState::DEPTH_STENCIL_READ,
            vk::ImageLayout::PRESENT_SRC_KHR => ResourceState::PRESENT,
            _ => ResourceState::TEXTURE_READ,
        })
    }

    fn bind_shared_state(&self, cmd: CommandList) -> ComputeResult<()> {
        let state = self.dispatch_state.context();
        let mut state = state.lock().unwrap();
        state.reset(cmd);
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
        // Sub-allocate from the persistent ring; 256-byte alignment keeps
        // every backend happy with the same caller code.
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
        let state = self.dispatch_state.context();
        state.lock().unwrap().constants.insert(
            BINDING_CONSTS_BASE + slot,
            state::BoundConstants { offset: offset as u32, size: data.len() as u64 },
        );
        Ok(())
    }

    fn bind_texture(
        &self,
        slot: u32,
        resource: &Resource,
        mip_offset: u32,
        mip_levels: u32,
    ) -> ComputeResult<()> {
        let view = self.image_view(resource, mip_offset, mip_levels)?;
        let state = self.dispatch_state.context();
        state.lock().unwrap().textures.insert(BINDING_TEXTURE_BASE + slot, view);
        Ok(())
    }

    fn bind_rw_texture(&self, slot: u32, resource: &Resource, mip_offset: u32) -> ComputeResult<()> {
        let view = self.image_view(resource, mip_offset, 1)?;
        let state = self.dispatch_state.context();
        state.lock().unwrap().rw_textures.insert(BINDING_RW_TEXTURE_BASE + slot, view);
        Ok(())
    }

    fn bind_sampler(&self, slot: u32, sampler: crate::compute::Sampler) -> ComputeResult<()> {
        let vk_sampler = self.sampler(sampler)?;
        let state = self.dispatch_state.context();
        state.lock().unwrap().samplers.insert(BINDING_SAMPLER_BASE + slot, vk_sampler);
        Ok(())
    }

    fn dispatch(&self, groups_x: u32, groups_y: u32, groups_z: u32) -> ComputeResult<()> {
        let state = self.dispatch_state.context();
        let mut state = state.lock().unwrap();
        self.dispatch_locked(&mut state, groups_x, groups_y, groups_z)
    }

    fn copy_resource(&self, cmd: CommandList, dst: &Resource, src: &Resource) -> ComputeResult<()> {
        let command_buffer = vk::CommandBuffer::from_raw(cmd.0);
        unsafe {
            match (src.kind, dst.kind) {
                (ResourceType::Buffer, ResourceType::Buffer) => {
                    let region = vk::BufferCopy::default().size(src.desc.width as u64);
                    self.device.cmd_copy_buffer(
                        command_buffer,
                        vk::Buffer::from_raw(src.native),
                        vk::Buffer::from_raw(dst.native),
                        &[region],
                    );
                }
                _ => {
                    let subresource = vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    };
                    let region = vk::ImageCopy {
                        src_subresource: subresource,
                        src_offset: vk::Offset3D::default(),
                        dst_subresource: subresource,
                        dst_offset: vk::Offset3D::default(),
                        extent: vk::Extent3D {
                            width: src.desc.width,
                            height: src.desc.height,
                            depth: src.desc.depth.max(1),
                        },
                    };
                    self.device.cmd_copy_image(
                        command_buffer,
                        vk::Image::from_raw(src.native),
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        vk::Image::from_raw(dst.native),
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                    );
                }
            }
        }
        Ok(())
    }

    fn clear_view(&self, cmd: CommandList, resource: &Resource, value: [f32; 4]) -> ComputeResult<()> {
        let command_buffer = vk::CommandBuffer::from_raw(cmd.0);
        let range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: 1,
        };
        unsafe {
            self.device.cmd_clear_color_image(
                command_buffer,
                vk::Image::from_raw(resource.native),
                vk::ImageLayout::GENERAL,
                &vk::ClearColorValue { float32: value },
                &[range],
            );
        }
        Ok(())
    }

    fn transition_resources_impl(
        &self,
        cmd: CommandList,
        transitions: &[ResourceTransition],
    ) -> ComputeResult<()> {
        let command_buffer = vk::CommandBuffer::from_raw(cmd.0);
        let mut barriers = Vec::with_capacity(transitions.len());
        let mut src_stage = vk::PipelineStageFlags::empty();
        let mut dst_stage = vk::PipelineStageFlags::empty();
        for transition in transitions {
            // UAV-to-UAV needs a memory barrier, not a layout change.
            if transition.from.contains(ResourceState::STORAGE_RW)
                && transition.to.contains(ResourceState::STORAGE_RW)
            {
                self.insert_gpu_barrier(
                    cmd,
                    &Resource { native: transition.native, ..Default::default() },
                )?;
                continue;
            }
            let (src_access, old_layout, from_stage) = map_state(transition.from);
            let (dst_access, new_layout, to_stage) = map_state(transition.to);
            src_stage |= from_stage;
            dst_stage |= to_stage;
            barriers.push(
                vk::ImageMemoryBarrier::default()
                    .src_access_mask(src_access)
                    .dst_access_mask(dst_access)
                    .old_layout(old_layout)
                    .new_layout(new_layout)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(vk::Image::from_raw(transition.native))
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: vk::REMAINING_MIP_LEVELS,
                        base_array_layer: 0,
                        layer_count: 1,
                    }),
            );
        }
        if barriers.is_empty() {
            return Ok(());
        }
        unsafe {
            self.device.cmd_pipeline_barrier(
                command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &barriers,
            );
        }
        Ok(())
    }

    fn insert_gpu_barrier(&self, cmd: CommandList, _resource: &Resource) -> ComputeResult<()> {
        let command_buffer = vk::CommandBuffer::from_raw(cmd.0);
        let barrier = vk::MemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::SHADER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE);
        unsafe {
            self.device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        }
        Ok(())
    }
}

impl VulkanCompute {
    /// Resolve the accumulated bindings into a pipeline + descriptor set
    /// and record the dispatch.
    fn dispatch_locked(
        &self,
        state: &mut state::DispatchState,
        groups_x: u32,
        groups_y: u32,
        groups_z: u32,
    ) -> ComputeResult<()> {
        let kernel_id = state
            .kernel
            .ok_or_else(|| ComputeError::MissingBinding("no kernel bound".into()))?;
        let cmd = state
            .cmd
            .ok_or_else(|| ComputeError::MissingBinding("no command list bound".into()))?;
        let command_buffer = vk::CommandBuffer::from_raw(cmd.0);
        let signature = state.signature_hash();

        let mut kernels = self.kernels.lock().unwrap();
        let vk_kernel = kernels
            .get_mut(&kernel_id)
            .ok_or_else(|| ComputeError::MissingBinding(format!("kernel {:#x}", kernel_id.0)))?;

        if !vk_kernel.variants.contains_key(&signature) {
            let variant = self.build_variant(vk_kernel, state)?;
            vk_kernel.variants.insert(signature, variant);
        }
        let variant = vk_kernel.variants.get_mut(&signature).unwrap();

        // Identical bindings reuse the set written last time.
        let bindings = state.bindings_hash();
        let set = match state.last_set {
            Some((hash, set)) if hash == bindings => set,
            _ => {
                let set = self.allocate_set(variant)?;
                self.write_set(set, state);
                state.last_set = Some((bindings, set));
                set
            }
        };

        let dynamic_offsets: Vec<u32> = {
            let mut slots: Vec<_> = state.constants.iter().collect();
            slots.sort_by_key(|(binding, _)| **binding);
            slots.iter().map(|(_, c)| c.offset).collect()
        };
        unsafe {
            self.device.cmd_bind_pipeline(
                command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                variant.pipeline,
            );
            self.device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                variant.pipeline_layout,
                0,
                &[set],
                &dynamic_offsets,
            );
            self.device.cmd_dispatch(command_buffer, groups_x, groups_y, groups_z);
        }
        Ok(())
    }

    fn build_variant(
        &self,
        kernel: &VulkanKernel,
        state: &state::DispatchState,
    ) -> ComputeResult<PipelineVariant> {
        let mut bindings = Vec::new();
        for &binding in state.samplers.keys() {
            bindings.push(
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding)
                    .descriptor_type(vk::DescriptorType::SAMPLER)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::COMPUTE),
            );
        }
        for &binding in state.textures.keys() {
            bindings.push(
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding)
                    .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::COMPUTE),
            );
        }
        for &binding in state.rw_textures.keys() {
            bindings.push(
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding)
                    .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::COMPUTE),
            );
        }
        for &binding in state.constants.keys() {
            bindings.push(
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::COMPUTE),
            );
        }
        unsafe {
            let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
            let set_layout = self
                .device
                .create_descriptor_set_layout(&layout_info, None)
                .map_err(|e| ComputeError::KernelCreationFailed(format!("set layout: {e}")))?;
            let layouts = [set_layout];
            let pipeline_layout_info =
                vk::PipelineLayoutCreateInfo::default().set_layouts(&layouts);
            let pipeline_layout = self
                .device
                .create_pipeline_layout(&pipeline_layout_info, None)
                .map_err(|e| ComputeError::KernelCreationFailed(format!("pipeline layout: {e}")))?;
            let stage = vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::COMPUTE)
                .module(kernel.module)
                .name(&kernel.entry_point);
            let pipeline_info = vk::ComputePipelineCreateInfo::default()
                .stage(stage)
                .layout(pipeline_layout);
            let pipeline = self
                .device
                .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, e)| ComputeError::KernelCreationFailed(format!("pipeline: {e}")))?[0];
            Ok(PipelineVariant {
                set_layout,
                pipeline_layout,
                pipeline,
                pools: Vec::new(),
                sets_per_pool: INITIAL_DESCRIPTOR_SETS,
            })
        }
    }

    fn allocate_set(&self, variant: &mut PipelineVariant) -> ComputeResult<vk::DescriptorSet> {
        unsafe {
            if let Some(&pool) = variant.pools.last() {
                let layouts = [variant.set_layout];
                let alloc_info = vk::DescriptorSetAllocateInfo::default()
                    .descriptor_pool(pool)
                    .set_layouts(&layouts);
                if let Ok(sets) = self.device.allocate_descriptor_sets(&alloc_info) {
                    return Ok(sets[0]);
                }
                // Pool exhausted; grow.
                variant.sets_per_pool *= 2;
            }
            let sizes = [
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::SAMPLER,
                    descriptor_count: variant.sets_per_pool * 4,
                },
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::SAMPLED_IMAGE,
                    descriptor_count: variant.sets_per_pool * 8,
                },
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::STORAGE_IMAGE,
                    descriptor_count: variant.sets_per_pool * 8,
                },
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                    descriptor_count: variant.sets_per_pool * 4,
                },
            ];
            let pool_info = vk::DescriptorPoolCreateInfo::default()
                .max_sets(variant.sets_per_pool)
                .pool_sizes(&sizes);
            let pool = self
                .device
                .create_descriptor_pool(&pool_info, None)
                .map_err(|e| ComputeError::OutOfMemory(format!("descriptor pool: {e}")))?;
            variant.pools.push(pool);
            let layouts = [variant.set_layout];
            let alloc_info = vk::DescriptorSetAllocateInfo::default()
                .descriptor_pool(pool)
                .set_layouts(&layouts);
            let sets = self
                .device
                .allocate_descriptor_sets(&alloc_info)
                .map_err(|e| ComputeError::OutOfMemory(format!("descriptor set: {e}")))?;
            Ok(sets[0])
        }
    }

    fn write_set(&self, set: vk::DescriptorSet, state: &state::DispatchState) {
        // All infos first, then the writes referencing them; descriptor
        // writes hold slices into these vectors.
        let mut image_entries: Vec<(u32, vk::DescriptorType)> = Vec::new();
        let mut image_infos: Vec<vk::DescriptorImageInfo> = Vec::new();
        for (&binding, &sampler) in &state.samplers {
            image_entries.push((binding, vk::DescriptorType::SAMPLER));
            image_infos.push(vk::DescriptorImageInfo { sampler, ..Default::default() });
        }
        for (&binding, &view) in &state.textures {
            image_entries.push((binding, vk::DescriptorType::SAMPLED_IMAGE));
            image_infos.push(vk::DescriptorImageInfo {
                image_view: view,
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                ..Default::default()
            });
        }
        for (&binding, &view) in &state.rw_textures {
            image_entries.push((binding, vk::DescriptorType::STORAGE_IMAGE));
            image_infos.push(vk::DescriptorImageInfo {
                image_view: view,
                image_layout: vk::ImageLayout::GENERAL,
                ..Default::default()
            });
        }
        let buffer_entries: Vec<u32> = state.constants.keys().copied().collect();
        let buffer_infos: Vec<vk::DescriptorBufferInfo> = state
            .constants
            .values()
            .map(|constants| vk::DescriptorBufferInfo {
                buffer: self.constants.buffer,
                offset: 0, // dynamic offset supplies the real location
                range: constants.size.max(1),
            })
            .collect();

        let mut writes = Vec::with_capacity(image_entries.len() + buffer_entries.len());
        for (i, &(binding, descriptor_type)) in image_entries.iter().enumerate() {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(binding)
                    .descriptor_type(descriptor_type)
                    .image_info(std::slice::from_ref(&image_infos[i])),
            );
        }
        for (i, &binding) in buffer_entries.iter().enumerate() {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(binding)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
                    .buffer_info(std::slice::from_ref(&buffer_infos[i])),
            );
        }
        unsafe {
            self.device.update_descriptor_sets(&writes, &[]);
        }
    }
}

impl Drop for VulkanCompute {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            for (_, data) in self.resources.lock().unwrap().drain() {
                for view in data.views.values() {
                    self.device.destroy_image_view(*view, None);
                }
                self.device.free_memory(data.memory, None);
            }
            for (_, kernel) in self.kernels.lock().unwrap().drain() {
                for variant in kernel.variants.values() {
                    self.device.destroy_pipeline(variant.pipeline, None);
                    self.device.destroy_pipeline_layout(variant.pipeline_layout, None);
                    self.device.destroy_descriptor_set_layout(variant.set_layout, None);
                    for pool in &variant.pools {
                        self.device.destroy_descriptor_pool(*pool, None);
                    }
                }
                self.device.destroy_shader_module(kernel.module, None);
            }
            for (_, sampler) in self.samplers.lock().unwrap().drain() {
                self.device.destroy_sampler(sampler, None);
            }
            self.device.unmap_memory(self.constants.memory);
            self.device.destroy_buffer(self.constants.buffer, None);
            self.device.free_memory(self.constants.memory, None);
        }
    }
}
