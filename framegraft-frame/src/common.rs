//! The common plugin: always loaded first, owns the frame core and the
//! vendor-SDK bootstrap contexts, and keeps per-frame housekeeping on a
//! present hook.

use std::sync::Arc;

use serde_json::Value as Json;

use framegraft_core::params::{keys, Value};
use framegraft_core::types::Feature;
use framegraft_core::{Parameters, Result, Version};
use framegraft_chi::compute::Device;
use framegraft_plugin::hooks::{ApiFunction, HookDeclaration, HookPhase, HookRegistration};
use framegraft_plugin::manifest::{PluginManifest, RenderApiName};
use framegraft_plugin::plugin::{LoadReply, Plugin};
use framegraft_plugin::PluginResult;

use crate::evaluate::FrameCore;
use crate::ngx::{DrsContext, NgxContext};

pub const COMMON_PLUGIN_NAME: &str = "graft.common";

pub struct CommonPlugin {
    manifest: PluginManifest,
    core: Arc<FrameCore>,
    adapter_count: usize,
    /// Present when some loaded plugin bridges D3D11 to D3D12.
    ngx_d3d12: Option<Arc<NgxContext>>,
}

impl CommonPlugin {
    pub fn new(core: Arc<FrameCore>, adapter_count: usize) -> Arc<Self> {
        Arc::new(Self {
            manifest: PluginManifest {
                name: COMMON_PLUGIN_NAME.into(),
                feature: Feature::COMMON,
                version: Version::new(2, 0, 0),
                api_version: Version::new(0, 0, 1),
                dependencies: vec![],
                render_apis: vec![
                    RenderApiName::D3d11,
                    RenderApiName::D3d12,
                    RenderApiName::Vulkan,
                ],
                hooks: vec![HookDeclaration {
                    api: ApiFunction::Present,
                    phase: HookPhase::After,
                }],
                required_tags: vec![],
                min_os: None,
                min_driver: None,
                ngx_feature_id: None,
                max_viewports: None,
                vulkan: Default::default(),
            },
            core,
            adapter_count,
            ngx_d3d12: None,
        })
    }

    pub fn with_d3d12_bridge(core: Arc<FrameCore>, adapter_count: usize) -> Arc<Self> {
        let mut plugin = Self::new(core, adapter_count);
        Arc::get_mut(&mut plugin).unwrap().ngx_d3d12 = Some(Arc::new(NgxContext::default()));
        plugin
    }

    pub fn core(&self) -> Arc<FrameCore> {
        self.core.clone()
    }
}

impl Plugin for CommonPlugin {
    fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    fn on_load(&self, _config: &Json) -> PluginResult<LoadReply> {
        let supported_adapters = if self.adapter_count >= 32 {
            u32::MAX
        } else {
            (1u32 << self.adapter_count) - 1
        };
        let core = self.core.clone();
        let present_hook = HookRegistration {
            api: ApiFunction::Present,
            phase: HookPhase::After,
            plugin: COMMON_PLUGIN_NAME.into(),
            callback: Arc::new(move |_args| {
                core.on_present();
                Default::default()
            }),
        };
        Ok(LoadReply { supported_adapters, hooks: vec![present_hook] })
    }

    fn startup(&self, _device: Device, params: &Arc<Parameters>) -> Result<()> {
        // Bootstrap contexts for downstream plugins. Real SDK bindings
        // replace the callbacks; the defaults fail the way an absent SDK
        // should.
        params.set(keys::NGX_CONTEXT, Value::Object(Arc::new(NgxContext::default())));
        params.set(keys::DRS_CONTEXT, Value::Object(Arc::new(DrsContext::default())));
        if let Some(ngx_d3d12) = &self.ngx_d3d12 {
            params.set(keys::NGX_CONTEXT_D3D12, Value::Object(ngx_d3d12.clone()));
        }
        tracing::info!("common plugin started");
        Ok(())
    }

    fn shutdown(&self) {
        self.core.tags.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framegraft_chi::compute::RenderApi;
    use framegraft_chi::testing::RecordingCompute;
    use framegraft_chi::Compute;
    use framegraft_core::Version;
    use framegraft_plugin::caps::{AdapterCaps, SystemCaps};
    use framegraft_plugin::manager::PluginManager;
    use framegraft_plugin::hooks::HookArgs;

    fn manager(adapters: usize) -> (Arc<RecordingCompute>, Arc<FrameCore>, PluginManager) {
        let compute = Arc::new(RecordingCompute::new(RenderApi::D3d12));
        let core = FrameCore::new(compute.clone());
        let caps = SystemCaps {
            os: Version::new(10, 0, 22621),
            driver: Version::new(530, 0, 0),
            hw_scheduling_enabled: true,
            adapters: vec![AdapterCaps::default(); adapters],
        };
        let manager = PluginManager::new(caps, Parameters::new(), serde_json::json!({}));
        (compute, core, manager)
    }

    #[test]
    fn loads_and_publishes_bootstrap_contexts() {
        let (_, core, manager) = manager(2);
        manager.register(CommonPlugin::new(core, 2));
        manager.load_all(RenderApiName::D3d12).unwrap();
        manager.initialize(Device(1)).unwrap();

        let params = manager.params();
        assert!(params.get_object::<NgxContext>(keys::NGX_CONTEXT).is_some());
        assert!(params.get_object::<DrsContext>(keys::DRS_CONTEXT).is_some());
        assert!(params.get_object::<NgxContext>(keys::NGX_CONTEXT_D3D12).is_none());

        let ctx = manager.feature_context(Feature::COMMON).unwrap();
        assert_eq!(ctx.supported_adapters, 0b11);
    }

    #[test]
    fn bridge_variant_publishes_the_d3d12_context() {
        let (_, core, manager) = manager(1);
        manager.register(CommonPlugin::with_d3d12_bridge(core, 1));
        manager.load_all(RenderApiName::D3d11).unwrap();
        manager.initialize(Device(1)).unwrap();
        assert!(manager
            .params()
            .get_object::<NgxContext>(keys::NGX_CONTEXT_D3D12)
            .is_some());
    }

    #[test]
    fn present_hook_drives_frame_housekeeping() {
        let (compute, core, manager) = manager(1);
        manager.register(CommonPlugin::new(core, 1));
        manager.load_all(RenderApiName::D3d12).unwrap();

        let hooks = manager.hooks();
        let args = HookArgs::Present { swap_chain: 1, sync_interval: 1, flags: 0 };
        assert!(!hooks.dispatch_pre(ApiFunction::Present, &args));
        hooks.dispatch_post(ApiFunction::Present, &args);
        hooks.dispatch_post(ApiFunction::Present, &args);
        assert_eq!(compute.finished_frame(), 2);
    }
}
