//! The contract every feature plugin implements. Plugins live in-process
//! as trait objects registered with the manager; the manifest + gating
//! pipeline treats them exactly like externally discovered modules.

use std::any::Any;
use std::sync::Arc;

use serde_json::Value as Json;

use framegraft_core::types::ViewportHandle;
use framegraft_core::{Parameters, Result};
use framegraft_chi::compute::{CommandList, Device};

use crate::error::PluginResult;
use crate::hooks::HookRegistration;
use crate::manifest::PluginManifest;

/// Per-evaluate event handed to a feature's callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventData {
    pub viewport: ViewportHandle,
    pub frame_id: u32,
}

pub type EvaluateCallback = Arc<dyn Fn(&EventData, CommandList) -> Result<()> + Send + Sync>;

/// Explicit per-viewport resource management, optional per plugin.
pub type ViewportCallback = Arc<dyn Fn(ViewportHandle) -> Result<()> + Send + Sync>;

/// A feature-specific entry point resolved by name
/// (`get_feature_function`); the host downcasts to the concrete
/// signature it expects.
pub type FeatureFunction = Arc<dyn Any + Send + Sync>;

/// What a plugin reports back from `on_load`.
pub struct LoadReply {
    pub supported_adapters: u32,
    pub hooks: Vec<HookRegistration>,
}

/// The feature's evaluate pair plus optional resource callbacks, resolved
/// once at startup.
#[derive(Clone)]
pub struct EvaluateCallbacks {
    pub begin: EvaluateCallback,
    pub end: EvaluateCallback,
    pub allocate_resources: Option<ViewportCallback>,
    pub free_resources: Option<ViewportCallback>,
}

impl std::fmt::Debug for EvaluateCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluateCallbacks")
            .field("begin", &"<callback>")
            .field("end", &"<callback>")
            .field(
                "allocate_resources",
                &self.allocate_resources.as_ref().map(|_| "<callback>"),
            )
            .field(
                "free_resources",
                &self.free_resources.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

pub trait Plugin: Send + Sync {
    fn manifest(&self) -> &PluginManifest;

    /// First contact: the merged loader + embedded config. The plugin
    /// answers with its adapter mask (already gated) and hook callbacks.
    fn on_load(&self, config: &Json) -> PluginResult<LoadReply>;

    /// Runs once the host's device is known.
    fn startup(&self, device: Device, params: &Arc<Parameters>) -> Result<()>;

    fn shutdown(&self);

    /// The evaluate pair, for features that run on `evaluate_feature`.
    fn evaluate_callbacks(&self) -> Option<EvaluateCallbacks> {
        None
    }

    /// Named feature-specific entry point, if the plugin exports one.
    fn function(&self, _name: &str) -> Option<FeatureFunction> {
        None
    }
}
