//! The interposer: proxy objects for the graphics APIs, the Vulkan layer
//! and the host-facing entry points.

pub mod api;
pub mod preferences;
pub mod proxy;

#[cfg(feature = "vulkan")]
pub mod vulkan_layer;

pub use api::{
    allocate_resources, evaluate_feature, free_resources, get_feature_function,
    get_feature_requirements, get_feature_version, get_native_interface, get_tag, init,
    is_feature_supported, new_frame_token, register_plugin, set_constants, set_d3d_device,
    set_feature_enabled, set_tag, set_vulkan_info, shutdown, ComputeHandle, HostAllocator,
    HostDevice, VulkanInfo,
};
pub use preferences::{PreferenceFlags, Preferences};
pub use proxy::command_list::{CommandListProxy, ComputeStateMirror, NativeCommandList};
pub use proxy::device::{
    CommandQueueProxy, DeviceProxy, FactoryProxy, NativeCommandQueue, NativeDevice, NativeFactory,
};
pub use proxy::swapchain::{DeviceRef, NativeSwapChain, SwapChainProxy};
pub use proxy::{HResult, NativeHandle, Proxied, ProxyBase, S_OK};
