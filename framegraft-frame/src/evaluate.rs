//! The evaluate dispatcher and the per-frame bookkeeping around present.

use std::sync::Arc;
use std::time::Duration;

use framegraft_core::timing::IntervalTimer;
use framegraft_core::types::{BufferType, Feature, ResourceLifecycle, ViewportHandle};
use framegraft_core::{Error, Result};
use framegraft_chi::compute::{CommandList, Compute, RenderApi};
use framegraft_chi::pool::ResourcePool;
use framegraft_plugin::manager::PluginManager;
use framegraft_plugin::plugin::EventData;

use crate::constants::{Constants, ViewportFrameData};
use crate::state::FeatureStateMachine;
use crate::tags::{CommonResource, ResourceTagEntry, TagStore};
use crate::token::FrameTokenRing;

/// The message an evaluate call carries: which viewport, plus any tags
/// that live only for this call.
#[derive(Debug, Clone, Default)]
pub struct EvaluateInputs {
    pub viewport: ViewportHandle,
    pub tags: Vec<ResourceTagEntry>,
}

/// Owns every per-frame store and routes `evaluate` to feature callbacks.
pub struct FrameCore {
    compute: Arc<dyn Compute>,
    pool: Arc<ResourcePool>,
    pool_gc: IntervalTimer,
    pub tokens: FrameTokenRing,
    pub constants: ViewportFrameData<Constants>,
    pub tags: TagStore,
    pub states: FeatureStateMachine,
}

impl FrameCore {
    pub fn new(compute: Arc<dyn Compute>) -> Arc<Self> {
        let pool = Arc::new(ResourcePool::new(compute.clone(), "graft.tag.pool"));
        Arc::new(Self {
            tags: TagStore::new(compute.clone(), pool.clone()),
            tokens: FrameTokenRing::new(),
            constants: ViewportFrameData::new("common"),
            states: FeatureStateMachine::new(),
            pool_gc: IntervalTimer::new(Duration::from_secs(1)),
            compute,
            pool,
        })
    }

    pub fn compute(&self) -> &Arc<dyn Compute> {
        &self.compute
    }

    pub fn pool(&self) -> &Arc<ResourcePool> {
        &self.pool
    }

    pub fn set_constants(
        &self,
        constants: &Constants,
        frame_id: u32,
        viewport: ViewportHandle,
    ) -> Result<()> {
        self.constants.set(viewport, frame_id, constants.clone())
    }

    /// Record tags globally. Cloning decisions happen per tag inside the
    /// store.
    pub fn set_tags(
        &self,
        viewport: ViewportHandle,
        tags: &[ResourceTagEntry],
        cmd: Option<CommandList>,
    ) -> Result<()> {
        if tags.is_empty() {
            return Err(Error::InvalidParameter);
        }
        for entry in tags {
            self.tags.set_tag(viewport, entry, cmd, false)?;
        }
        Ok(())
    }

    pub fn get_tag(
        &self,
        viewport: ViewportHandle,
        tag_type: BufferType,
        during_evaluate: bool,
    ) -> CommonResource {
        self.tags.get_tag(viewport, tag_type, None, during_evaluate)
    }

    /// Run a feature against the host's command list: stage local tags,
    /// check constants, wrap the callbacks in state push/pop and hand the
    /// command list back in the state it arrived in.
    pub fn evaluate(
        &self,
        manager: &PluginManager,
        feature: Feature,
        frame_id: u32,
        inputs: &EvaluateInputs,
        cmd: CommandList,
    ) -> Result<()> {
        let ctx = manager.feature_context(feature)?;
        if !ctx.enabled {
            tracing::warn!("evaluate called for disabled feature '{}'", ctx.name);
            return Err(Error::FeatureNotSupported);
        }
        let callbacks = ctx.callbacks.as_ref().ok_or(Error::MissingOrInvalidApi)?;

        // Evaluate-local tags are valid only for this call.
        for entry in &inputs.tags {
            let local_entry = ResourceTagEntry {
                lifecycle: ResourceLifecycle::OnlyValidNow,
                ..entry.clone()
            };
            self.tags.set_tag(inputs.viewport, &local_entry, Some(cmd), true)?;
        }

        self.constants.get(inputs.viewport, frame_id).map_err(|e| {
            tracing::error!(
                "no constants for viewport {} frame {frame_id}: {e}",
                inputs.viewport.0
            );
            Error::MissingConstants
        })?;

        self.states.on_evaluate(inputs.viewport, feature)?;

        let engine_state_pushed = self.compute.render_api() == RenderApi::D3d11;
        if engine_state_pushed {
            self.compute.push_state(cmd).map_err(Error::from)?;
        }

        let event = EventData { viewport: inputs.viewport, frame_id };
        let result = (callbacks.begin)(&event, cmd).and_then(|()| (callbacks.end)(&event, cmd));

        if engine_state_pushed {
            if let Err(e) = self.compute.pop_state(cmd) {
                tracing::warn!("failed to restore engine state: {e}");
            }
        }
        if let Err(e) = self.compute.restore_pipeline(cmd) {
            tracing::warn!("failed to restore pipeline: {e}");
        }
        result
    }

    /// Per-present housekeeping: advance the finished-frame counter and
    /// collect garbage. Failures are logged, never propagated; a present
    /// hook must not fail the host.
    pub fn on_present(&self) {
        self.compute.advance_finished_frame();
        let finished = self.compute.finished_frame();
        if let Err(e) = self.compute.collect_garbage(finished) {
            tracing::warn!("garbage collection failed: {e}");
        }
        if self.pool_gc.tick() {
            if let Err(e) = self.pool.collect_garbage(Duration::from_secs(1)) {
                tracing::warn!("pool garbage collection failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use framegraft_core::{Parameters, Version};
    use framegraft_chi::compute::Device;
    use framegraft_chi::testing::RecordingCompute;
    use framegraft_plugin::caps::{AdapterCaps, SystemCaps};
    use framegraft_plugin::manifest::{PluginManifest, RenderApiName};
    use framegraft_plugin::plugin::{EvaluateCallbacks, LoadReply, Plugin};
    use framegraft_plugin::PluginResult;

    struct UpscalePlugin {
        manifest: PluginManifest,
        begin_calls: Arc<AtomicUsize>,
        end_calls: Arc<AtomicUsize>,
        events: Arc<Mutex<Vec<EventData>>>,
    }

    impl UpscalePlugin {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                manifest: PluginManifest {
                    name: "graft.upscale".into(),
                    feature: Feature::SUPER_RESOLUTION,
                    version: Version::new(1, 0, 0),
                    api_version: Version::new(0, 0, 1),
                    dependencies: vec![],
                    render_apis: vec![RenderApiName::D3d12],
                    hooks: vec![],
                    required_tags: vec![],
                    min_os: None,
                    min_driver: None,
                    ngx_feature_id: None,
                    max_viewports: None,
                    vulkan: Default::default(),
                },
                begin_calls: Arc::new(AtomicUsize::new(0)),
                end_calls: Arc::new(AtomicUsize::new(0)),
                events: Arc::new(Mutex::new(Vec::new())),
            })
        }
    }

    impl Plugin for UpscalePlugin {
        fn manifest(&self) -> &PluginManifest {
            &self.manifest
        }

        fn on_load(&self, _config: &serde_json::Value) -> PluginResult<LoadReply> {
            Ok(LoadReply { supported_adapters: 1, hooks: vec![] })
        }

        fn startup(&self, _device: Device, _params: &Arc<Parameters>) -> Result<()> {
            Ok(())
        }

        fn shutdown(&self) {}

        fn evaluate_callbacks(&self) -> Option<EvaluateCallbacks> {
            let begin_calls = self.begin_calls.clone();
            let events = self.events.clone();
            let end_calls = self.end_calls.clone();
            Some(EvaluateCallbacks {
                begin: Arc::new(move |event, _cmd| {
                    begin_calls.fetch_add(1, Ordering::SeqCst);
                    events.lock().unwrap().push(*event);
                    Ok(())
                }),
                end: Arc::new(move |_event, _cmd| {
                    end_calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
                allocate_resources: None,
                free_resources: None,
            })
        }
    }

    fn harness() -> (Arc<RecordingCompute>, Arc<FrameCore>, PluginManager, Arc<UpscalePlugin>) {
        let compute = Arc::new(RecordingCompute::new(framegraft_chi::compute::RenderApi::D3d12));
        let core = FrameCore::new(compute.clone());
        let caps = SystemCaps {
            os: Version::new(10, 0, 22621),
            driver: Version::new(530, 0, 0),
            hw_scheduling_enabled: true,
            adapters: vec![AdapterCaps::default()],
        };
        let manager = PluginManager::new(caps, Parameters::new(), serde_json::json!({}));
        let plugin = UpscalePlugin::new();
        manager.register(plugin.clone());
        manager.load_all(RenderApiName::D3d12).unwrap();
        manager.initialize(Device(1)).unwrap();
        (compute, core, manager, plugin)
    }

    #[test]
    fn evaluate_runs_begin_then_end_with_the_event() {
        let (_, core, manager, plugin) = harness();
        let viewport = ViewportHandle(0);
        let token = core.tokens.get(Some(1));
        core.set_constants(&Constants::default(), token.frame_id(), viewport).unwrap();

        let inputs = EvaluateInputs { viewport, tags: vec![] };
        core.evaluate(&manager, Feature::SUPER_RESOLUTION, token.frame_id(), &inputs, CommandList(7))
            .unwrap();

        assert_eq!(plugin.begin_calls.load(Ordering::SeqCst), 1);
        assert_eq!(plugin.end_calls.load(Ordering::SeqCst), 1);
        let events = plugin.events.lock().unwrap();
        assert_eq!(events[0], EventData { viewport, frame_id: 1 });
    }

    #[test]
    fn evaluate_without_constants_fails() {
        let (_, core, manager, plugin) = harness();
        let inputs = EvaluateInputs { viewport: ViewportHandle(0), tags: vec![] };
        assert_eq!(
            core.evaluate(&manager, Feature::SUPER_RESOLUTION, 9, &inputs, CommandList(7)),
            Err(Error::MissingConstants)
        );
        assert_eq!(plugin.begin_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn evaluate_unknown_feature_is_missing() {
        let (_, core, manager, _) = harness();
        let inputs = EvaluateInputs { viewport: ViewportHandle(0), tags: vec![] };
        assert_eq!(
            core.evaluate(&manager, Feature::FRAME_GENERATION, 1, &inputs, CommandList(7)),
            Err(Error::FeatureMissing)
        );
    }

    #[test]
    fn disabled_feature_refuses_to_run() {
        let (_, core, manager, plugin) = harness();
        let viewport = ViewportHandle(0);
        core.set_constants(&Constants::default(), 1, viewport).unwrap();
        manager.set_feature_enabled(Feature::SUPER_RESOLUTION, false).unwrap();
        let inputs = EvaluateInputs { viewport, tags: vec![] };
        assert_eq!(
            core.evaluate(&manager, Feature::SUPER_RESOLUTION, 1, &inputs, CommandList(7)),
            Err(Error::FeatureNotSupported)
        );
        assert_eq!(plugin.begin_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn present_advances_the_finished_frame_and_collects() {
        let (compute, core, _, _) = harness();
        assert_eq!(compute.finished_frame(), 0);
        core.on_present();
        core.on_present();
        assert_eq!(compute.finished_frame(), 2);
    }

    #[test]
    fn duplicate_constants_rejected_through_the_core() {
        let (_, core, _, _) = harness();
        let viewport = ViewportHandle(0);
        assert!(core.set_constants(&Constants::default(), 5, viewport).is_ok());
        assert_eq!(
            core.set_constants(&Constants::default(), 5, viewport),
            Err(Error::DuplicatedConstants)
        );
    }
}
