//! Plugin discovery, gating, load ordering and dispatch plumbing.

pub mod caps;
pub mod error;
pub mod hooks;
pub mod manager;
pub mod manifest;
pub mod plugin;

pub use caps::{AdapterCaps, AdapterInfo, SystemCaps};
pub use error::{PluginError, PluginResult};
pub use hooks::{
    ApiFunction, HookAction, HookArgs, HookCallback, HookDeclaration, HookPhase,
    HookRegistration, HookRegistry,
};
pub use manager::{FeatureContext, FeatureRequirements, PluginManager};
pub use manifest::{PluginManifest, RenderApiName, RequiredTag, VulkanRequirements};
pub use plugin::{
    EvaluateCallback, EvaluateCallbacks, EventData, FeatureFunction, LoadReply, Plugin,
    ViewportCallback,
};
