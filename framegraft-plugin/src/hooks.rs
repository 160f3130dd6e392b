//! Hook registration and dispatch. A hook is a tagged variant over method
//! identity: `{ api, phase, callback }`, phase-ordered Before → Replace →
//! After; a Replace hook can short-circuit the native call.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

/// Every interceptable entry point on the graphics APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiFunction {
    // DXGI / D3D
    CreateSwapChain,
    CreateSwapChainForHwnd,
    Present,
    Present1,
    ResizeBuffers,
    ResizeBuffers1,
    SetFullscreenState,
    CreateCommandQueue,
    CreateCommandList,
    ExecuteCommandLists,
    // Vulkan
    VkCreateDevice,
    VkCreateInstance,
    VkBeginCommandBuffer,
    VkCmdBindPipeline,
    VkCmdBindDescriptorSets,
    VkQueuePresent,
    VkCreateSwapchain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HookPhase {
    Before,
    Replace,
    After,
}

/// Arguments handed to a hook. Variants mirror the methods worth
/// intercepting; everything else travels as `Generic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookArgs {
    Present { swap_chain: u64, sync_interval: u32, flags: u32 },
    ResizeBuffers { swap_chain: u64, count: u32, width: u32, height: u32, format: u32, flags: u32 },
    ExecuteCommandLists { queue: u64, count: u32 },
    CommandBuffer { command_buffer: u64 },
    Generic,
}

/// What the native call should do after the hook ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookAction {
    /// Replace-phase only: suppress the native call entirely.
    pub skip_native: bool,
}

pub type HookCallback = Arc<dyn Fn(&HookArgs) -> HookAction + Send + Sync>;

/// Declared in a plugin manifest; the callback arrives at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookDeclaration {
    pub api: ApiFunction,
    pub phase: HookPhase,
}

pub struct HookRegistration {
    pub api: ApiFunction,
    pub phase: HookPhase,
    pub plugin: String,
    pub callback: HookCallback,
}

/// Registry keyed by `(api, plugin)`; dispatch runs phases in order.
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<HashMap<ApiFunction, Vec<(HookPhase, String, HookCallback)>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, registration: HookRegistration) {
        let mut hooks = self.hooks.write().unwrap();
        let list = hooks.entry(registration.api).or_default();
        list.push((registration.phase, registration.plugin, registration.callback));
        list.sort_by_key(|(phase, _, _)| *phase);
    }

    pub fn unregister_plugin(&self, plugin: &str) {
        let mut hooks = self.hooks.write().unwrap();
        for list in hooks.values_mut() {
            list.retain(|(_, name, _)| name != plugin);
        }
    }

    pub fn has_hooks(&self, api: ApiFunction) -> bool {
        self.hooks.read().unwrap().get(&api).map(|l| !l.is_empty()).unwrap_or(false)
    }

    /// Run the Before and Replace phases. Returns true when any Replace
    /// hook asked to skip the native call.
    pub fn dispatch_pre(&self, api: ApiFunction, args: &HookArgs) -> bool {
        let hooks = self.hooks.read().unwrap();
        let Some(list) = hooks.get(&api) else { return false };
        let mut skip = false;
        for (phase, _, callback) in list {
            match phase {
                HookPhase::Before => {
                    callback(args);
                }
                HookPhase::Replace => {
                    skip |= callback(args).skip_native;
                }
                HookPhase::After => {}
            }
        }
        skip
    }

    /// Run the After phase.
    pub fn dispatch_post(&self, api: ApiFunction, args: &HookArgs) {
        let hooks = self.hooks.read().unwrap();
        let Some(list) = hooks.get(&api) else { return };
        for (phase, _, callback) in list {
            if *phase == HookPhase::After {
                callback(args);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_hook(counter: Arc<AtomicUsize>, skip: bool) -> HookCallback {
        Arc::new(move |_args| {
            counter.fetch_add(1, Ordering::SeqCst);
            HookAction { skip_native: skip }
        })
    }

    #[test]
    fn phases_run_in_order_and_replace_can_skip() {
        let registry = HookRegistry::new();
        let order = Arc::new(AtomicUsize::new(0));

        let before_seen = Arc::new(AtomicUsize::new(0));
        let replace_seen = Arc::new(AtomicUsize::new(0));
        {
            let order = order.clone();
            let seen = before_seen.clone();
            registry.register(HookRegistration {
                api: ApiFunction::Present,
                phase: HookPhase::Before,
                plugin: "frame-generation".into(),
                callback: Arc::new(move |_| {
                    seen.store(order.fetch_add(1, Ordering::SeqCst) + 1, Ordering::SeqCst);
                    HookAction::default()
                }),
            });
        }
        {
            let order = order.clone();
            let seen = replace_seen.clone();
            registry.register(HookRegistration {
                api: ApiFunction::Present,
                phase: HookPhase::Replace,
                plugin: "frame-generation".into(),
                callback: Arc::new(move |_| {
                    seen.store(order.fetch_add(1, Ordering::SeqCst) + 1, Ordering::SeqCst);
                    HookAction { skip_native: true }
                }),
            });
        }

        let args = HookArgs::Present { swap_chain: 1, sync_interval: 1, flags: 0 };
        assert!(registry.dispatch_pre(ApiFunction::Present, &args));
        assert_eq!(before_seen.load(Ordering::SeqCst), 1);
        assert_eq!(replace_seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn after_hooks_run_only_in_post() {
        let registry = HookRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        registry.register(HookRegistration {
            api: ApiFunction::ResizeBuffers,
            phase: HookPhase::After,
            plugin: "common".into(),
            callback: counting_hook(counter.clone(), false),
        });
        let args = HookArgs::Generic;
        assert!(!registry.dispatch_pre(ApiFunction::ResizeBuffers, &args));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        registry.dispatch_post(ApiFunction::ResizeBuffers, &args);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregister_removes_a_plugins_hooks() {
        let registry = HookRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        registry.register(HookRegistration {
            api: ApiFunction::Present,
            phase: HookPhase::Before,
            plugin: "reflex".into(),
            callback: counting_hook(counter.clone(), false),
        });
        assert!(registry.has_hooks(ApiFunction::Present));
        registry.unregister_plugin("reflex");
        assert!(!registry.has_hooks(ApiFunction::Present));
    }
}
