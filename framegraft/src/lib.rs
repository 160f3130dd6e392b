//! Framegraft: a runtime injection layer that slots image-quality and
//! latency features between a game and its graphics API. The host keeps
//! calling D3D11/D3D12/Vulkan; proxied devices, swap chains and command
//! lists let loaded feature plugins observe, augment or replace every
//! frame.
//!
//! This crate re-exports the public surface of the member crates; hosts
//! normally depend on this one alone.

pub use framegraft_core::{
    BufferType, Error, Feature, Parameters, ResourceLifecycle, Result, Value, Version,
    ViewportHandle,
};

pub use framegraft_chi as chi;
pub use framegraft_chi::{
    CommandList, Compute, ComputeError, Extent, Format, Kernel, KernelDesc, RenderApi, Resource,
    ResourceDescription, ResourceFlags, ResourcePool, ResourceState,
};

pub use framegraft_plugin as plugin;
pub use framegraft_plugin::{
    AdapterInfo, ApiFunction, FeatureRequirements, HookAction, HookArgs, HookPhase, Plugin,
    PluginManifest, SystemCaps,
};

pub use framegraft_frame as frame;
pub use framegraft_frame::{
    CommonResource, Constants, EvaluateInputs, FrameToken, PrecisionInfo, ResourceTagEntry,
};

pub use framegraft_interposer as interposer;
pub use framegraft_interposer::{
    allocate_resources, evaluate_feature, free_resources, get_feature_function,
    get_feature_requirements, get_feature_version, get_native_interface, get_tag, init,
    is_feature_supported, new_frame_token, register_plugin, set_constants, set_d3d_device,
    set_feature_enabled, set_tag, set_vulkan_info, shutdown, HostDevice, PreferenceFlags,
    Preferences, VulkanInfo,
};
