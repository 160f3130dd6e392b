//! Vulkan interposition. No vtable proxies here: a dispatch table of
//! function pointers is captured when the host's device comes up, the
//! commands of interest are intercepted, and the host's previous binding
//! is re-applied after any core-issued pass.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ash::vk;
use ash::vk::Handle;

use framegraft_plugin::hooks::{ApiFunction, HookArgs, HookRegistry};

/// The entry points the layer may need to call back into. Captured once
/// per device; absent pointers simply skip the native call (headless
/// tests run exactly this way).
#[derive(Default)]
pub struct VulkanDispatch {
    pub queue_present: Option<vk::PFN_vkQueuePresentKHR>,
    pub begin_command_buffer: Option<vk::PFN_vkBeginCommandBuffer>,
    pub cmd_bind_pipeline: Option<vk::PFN_vkCmdBindPipeline>,
    pub cmd_bind_descriptor_sets: Option<vk::PFN_vkCmdBindDescriptorSets>,
}

impl VulkanDispatch {
    /// Pull every pointer the layer needs from the live device tables.
    pub fn capture(instance: &ash::Instance, device: &ash::Device) -> Self {
        let swapchain = ash::khr::swapchain::Device::new(instance, device);
        Self {
            queue_present: Some(swapchain.fp().queue_present_khr),
            begin_command_buffer: Some(device.fp_v1_0().begin_command_buffer),
            cmd_bind_pipeline: Some(device.fp_v1_0().cmd_bind_pipeline),
            cmd_bind_descriptor_sets: Some(device.fp_v1_0().cmd_bind_descriptor_sets),
        }
    }
}

/// The host's last compute binding on one command buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoundPipeline {
    pub pipeline: u64,
    pub layout: u64,
    pub first_set: u32,
    pub descriptor_set: u64,
}

/// The layer itself: dispatch table plus per-command-buffer binding
/// records and hook routing.
pub struct VulkanLayer {
    dispatch: VulkanDispatch,
    hooks: Arc<HookRegistry>,
    bindings: Mutex<HashMap<u64, BoundPipeline>>,
}

impl VulkanLayer {
    pub fn new(dispatch: VulkanDispatch, hooks: Arc<HookRegistry>) -> Self {
        Self { dispatch, hooks, bindings: Mutex::new(HashMap::new()) }
    }

    /// `vkBeginCommandBuffer`: binding records from the previous recording
    /// are stale.
    pub fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        begin_info: &vk::CommandBufferBeginInfo,
    ) -> vk::Result {
        let raw = command_buffer.as_raw();
        self.bindings.lock().unwrap().remove(&raw);
        self.hooks.dispatch_pre(
            ApiFunction::VkBeginCommandBuffer,
            &HookArgs::CommandBuffer { command_buffer: raw },
        );
        let result = match self.dispatch.begin_command_buffer {
            Some(fp) => unsafe { fp(command_buffer, begin_info) },
            None => vk::Result::SUCCESS,
        };
        self.hooks.dispatch_post(
            ApiFunction::VkBeginCommandBuffer,
            &HookArgs::CommandBuffer { command_buffer: raw },
        );
        result
    }

    /// `vkCmdBindPipeline`: compute binds are recorded so they can be
    /// restored after a core pass.
    pub fn cmd_bind_pipeline(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        if bind_point == vk::PipelineBindPoint::COMPUTE {
            let mut bindings = self.bindings.lock().unwrap();
            let entry = bindings.entry(command_buffer.as_raw()).or_default();
            entry.pipeline = pipeline.as_raw();
        }
        if let Some(fp) = self.dispatch.cmd_bind_pipeline {
            unsafe { fp(command_buffer, bind_point, pipeline) };
        }
    }

    /// `vkCmdBindDescriptorSets` for the compute bind point.
    pub fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        if bind_point == vk::PipelineBindPoint::COMPUTE {
            let mut bindings = self.bindings.lock().unwrap();
            let entry = bindings.entry(command_buffer.as_raw()).or_default();
            entry.layout = layout.as_raw();
            entry.first_set = first_set;
            entry.descriptor_set = sets.first().map(|s| s.as_raw()).unwrap_or(0);
        }
        if let Some(fp) = self.dispatch.cmd_bind_descriptor_sets {
            unsafe {
                fp(
                    command_buffer,
                    bind_point,
                    layout,
                    first_set,
                    sets.len() as u32,
                    sets.as_ptr(),
                    dynamic_offsets.len() as u32,
                    dynamic_offsets.as_ptr(),
                )
            };
        }
    }

    /// `vkQueuePresentKHR` with hook routing; a Replace hook suppresses
    /// the native present.
    pub fn queue_present(
        &self,
        queue: vk::Queue,
        present_info: &vk::PresentInfoKHR,
    ) -> vk::Result {
        let swap_chain = if present_info.p_swapchains.is_null() {
            0
        } else {
            unsafe { (*present_info.p_swapchains).as_raw() }
        };
        let args = HookArgs::Present { swap_chain, sync_interval: 1, flags: 0 };
        let skip = self.hooks.dispatch_pre(ApiFunction::VkQueuePresent, &args);
        let result = if skip {
            vk::Result::SUCCESS
        } else {
            match self.dispatch.queue_present {
                Some(fp) => unsafe { fp(queue, present_info) },
                None => vk::Result::SUCCESS,
            }
        };
        self.hooks.dispatch_post(ApiFunction::VkQueuePresent, &args);
        result
    }

    /// The host's last compute binding for a command buffer, to re-apply
    /// after a core pass.
    pub fn bound_state(&self, command_buffer: vk::CommandBuffer) -> Option<BoundPipeline> {
        self.bindings.lock().unwrap().get(&command_buffer.as_raw()).copied()
    }

    /// Re-apply the host's compute binding.
    pub fn restore(&self, command_buffer: vk::CommandBuffer) {
        let Some(state) = self.bound_state(command_buffer) else { return };
        if state.pipeline != 0 {
            if let Some(fp) = self.dispatch.cmd_bind_pipeline {
                unsafe {
                    fp(
                        command_buffer,
                        vk::PipelineBindPoint::COMPUTE,
                        vk::Pipeline::from_raw(state.pipeline),
                    )
                };
            }
        }
        if state.descriptor_set != 0 {
            if let Some(fp) = self.dispatch.cmd_bind_descriptor_sets {
                let sets = [vk::DescriptorSet::from_raw(state.descriptor_set)];
                unsafe {
                    fp(
                        command_buffer,
                        vk::PipelineBindPoint::COMPUTE,
                        vk::PipelineLayout::from_raw(state.layout),
                        state.first_set,
                        1,
                        sets.as_ptr(),
                        0,
                        std::ptr::null(),
                    )
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framegraft_plugin::hooks::{HookAction, HookPhase, HookRegistration};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn layer() -> VulkanLayer {
        VulkanLayer::new(VulkanDispatch::default(), Arc::new(HookRegistry::new()))
    }

    #[test]
    fn compute_binds_are_tracked_per_command_buffer() {
        let layer = layer();
        let cmd = vk::CommandBuffer::from_raw(0x10);
        layer.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, vk::Pipeline::from_raw(0xa));
        layer.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::COMPUTE,
            vk::PipelineLayout::from_raw(0xb),
            0,
            &[vk::DescriptorSet::from_raw(0xc)],
            &[],
        );
        let state = layer.bound_state(cmd).unwrap();
        assert_eq!(state.pipeline, 0xa);
        assert_eq!(state.layout, 0xb);
        assert_eq!(state.descriptor_set, 0xc);

        // Graphics binds are not our business.
        let other = vk::CommandBuffer::from_raw(0x20);
        layer.cmd_bind_pipeline(other, vk::PipelineBindPoint::GRAPHICS, vk::Pipeline::from_raw(0xf));
        assert!(layer.bound_state(other).is_none());
    }

    #[test]
    fn begin_clears_stale_bindings() {
        let layer = layer();
        let cmd = vk::CommandBuffer::from_raw(0x10);
        layer.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, vk::Pipeline::from_raw(0xa));
        let begin_info = vk::CommandBufferBeginInfo::default();
        assert_eq!(layer.begin_command_buffer(cmd, &begin_info), vk::Result::SUCCESS);
        assert!(layer.bound_state(cmd).is_none());
    }

    #[test]
    fn present_skip_suppresses_native_and_keeps_after_hooks() {
        let hooks = Arc::new(HookRegistry::new());
        let after = Arc::new(AtomicUsize::new(0));
        hooks.register(HookRegistration {
            api: ApiFunction::VkQueuePresent,
            phase: HookPhase::Replace,
            plugin: "frame-generation".into(),
            callback: Arc::new(|_| HookAction { skip_native: true }),
        });
        {
            let after = after.clone();
            hooks.register(HookRegistration {
                api: ApiFunction::VkQueuePresent,
                phase: HookPhase::After,
                plugin: "common".into(),
                callback: Arc::new(move |_| {
                    after.fetch_add(1, Ordering::SeqCst);
                    HookAction::default()
                }),
            });
        }
        let layer = VulkanLayer::new(VulkanDispatch::default(), hooks);
        let swapchains = [vk::SwapchainKHR::from_raw(0x77)];
        let present_info = vk::PresentInfoKHR::default().swapchains(&swapchains);
        let result = layer.queue_present(vk::Queue::from_raw(0x1), &present_info);
        assert_eq!(result, vk::Result::SUCCESS);
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }
}
