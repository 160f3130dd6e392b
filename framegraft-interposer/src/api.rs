//! The host-facing entry points. Every function validates init state,
//! contains panics behind the crash guard, and returns a stable error
//! kind.

use std::sync::{Arc, RwLock};

use framegraft_core::crash::guarded_unsafe_state;
use framegraft_core::logging::{init_logging, LogGuard, LoggingConfig};
use framegraft_core::params::{keys, Value};
use framegraft_core::types::{BufferType, Feature, ViewportHandle};
use framegraft_core::{Error, Parameters, Result, Version};
use framegraft_chi::compute::{CommandList, Compute, RenderApi};
use framegraft_plugin::caps::{AdapterInfo, SystemCaps};
use framegraft_plugin::manager::{FeatureRequirements, PluginManager};
use framegraft_plugin::manifest::RenderApiName;
use framegraft_plugin::plugin::{FeatureFunction, Plugin};
use framegraft_frame::common::CommonPlugin;
use framegraft_frame::constants::Constants;
use framegraft_frame::evaluate::{EvaluateInputs, FrameCore};
use framegraft_frame::tags::{CommonResource, ResourceTagEntry};
use framegraft_frame::token::FrameToken;

use crate::preferences::Preferences;
use crate::proxy::Proxied;

/// Wrapper so the compute interface can travel on the parameter bus.
pub struct ComputeHandle(pub Arc<dyn Compute>);

/// Host-supplied allocator pair, published on the bus when both callbacks
/// are present.
pub struct HostAllocator {
    pub allocate: framegraft_chi::compute::AllocateCallback,
    pub release: framegraft_chi::compute::ReleaseCallback,
}

/// What the host gives `set_d3d_device` / `set_vulkan_info`. The raw
/// variants are consumed by the platform glue; a pre-built compute comes
/// from bridges and tests.
pub enum HostDevice {
    Compute(Arc<dyn Compute>),
    #[cfg(all(windows, feature = "d3d12"))]
    D3d12(windows::Win32::Graphics::Direct3D12::ID3D12Device),
    #[cfg(all(windows, feature = "d3d11"))]
    D3d11(windows::Win32::Graphics::Direct3D11::ID3D11Device),
}

/// Everything `set_vulkan_info` needs. `compute` may be pre-built by the
/// layer that owns the ash objects.
pub struct VulkanInfo {
    pub instance: u64,
    pub physical_device: u64,
    pub device: u64,
    pub queue_family_index: u32,
    pub queue: u64,
    pub compute: Option<Arc<dyn Compute>>,
}

struct Sdk {
    preferences: Preferences,
    sdk_version: Version,
    params: Arc<Parameters>,
    manager: Arc<PluginManager>,
    frame: Option<Arc<FrameCore>>,
    compute: Option<Arc<dyn Compute>>,
    _log: Option<LogGuard>,
}

static SDK: RwLock<Option<Sdk>> = RwLock::new(None);

fn with_sdk<T>(f: impl FnOnce(&Sdk) -> Result<T>) -> Result<T> {
    let guard = SDK.read().unwrap();
    let sdk = guard.as_ref().ok_or(Error::InitNotCalled)?;
    f(sdk)
}

fn with_frame<T>(f: impl FnOnce(&Sdk, &Arc<FrameCore>) -> Result<T>) -> Result<T> {
    with_sdk(|sdk| {
        let frame = sdk.frame.as_ref().ok_or(Error::NotInitialized)?;
        f(sdk, frame)
    })
}

/// Configure logging, stand up the parameter bus and the plugin manager.
/// Plugins register after this; the device call completes initialization.
pub fn init(preferences: Preferences, sdk_version: Version) -> Result<()> {
    guarded_unsafe_state(|| {
        let mut guard = SDK.write().unwrap();
        if guard.is_some() {
            tracing::warn!("init called twice");
            return Ok(());
        }
        let log_config =
            LoggingConfig::resolve(preferences.config_file.as_deref(), &preferences.log);
        if let Some(path) = &log_config.file_output {
            framegraft_core::crash::set_active_log_file(Some(path.clone()));
        }
        let log_guard = init_logging(log_config).ok();

        let params = Parameters::new();
        let caps = preferences.system_caps.clone().unwrap_or_else(|| SystemCaps {
            adapters: vec![Default::default()],
            ..Default::default()
        });
        let loader_config = preferences
            .loader_config
            .clone()
            .unwrap_or_else(|| serde_json::json!({ "sdk": sdk_version.to_string() }));
        let manager = Arc::new(PluginManager::new(caps, params.clone(), loader_config));
        for path in &preferences.plugin_paths {
            manager.add_search_path(path.clone());
        }
        manager.discover_manifests();

        if let Some(api) = preferences.render_api {
            params.set(keys::RENDER_API, Value::UInt(api as u64));
        }
        tracing::info!("framegraft {sdk_version} initialized");
        *guard = Some(Sdk {
            preferences,
            sdk_version,
            params,
            manager,
            frame: None,
            compute: None,
            _log: log_guard,
        });
        Ok(())
    })
}

/// Unload plugins and tear everything down in reverse order.
pub fn shutdown() -> Result<()> {
    guarded_unsafe_state(|| {
        let mut guard = SDK.write().unwrap();
        let sdk = guard.take().ok_or(Error::InitNotCalled)?;
        sdk.manager.shutdown_all();
        sdk.params.clear();
        tracing::info!("framegraft shut down");
        Ok(())
    })
}

/// Make a feature plugin available; must run before the device call.
pub fn register_plugin(plugin: Arc<dyn Plugin>) -> Result<()> {
    guarded_unsafe_state(|| {
        with_sdk(|sdk| {
            if sdk.frame.is_some() {
                tracing::error!("plugins must register before the device is set");
                return Err(Error::InvalidIntegration);
            }
            sdk.manager.register(plugin);
            Ok(())
        })
    })
}

fn finish_device_setup(compute: Arc<dyn Compute>) -> Result<()> {
    let mut guard = SDK.write().unwrap();
    let sdk = guard.as_mut().ok_or(Error::InitNotCalled)?;
    if sdk.frame.is_some() {
        tracing::warn!("device already set");
        return Ok(());
    }
    if let (Some(allocate), Some(release)) = (
        sdk.preferences.allocate_callback.clone(),
        sdk.preferences.release_callback.clone(),
    ) {
        // The host owns allocation from here on.
        compute.set_resource_callbacks(allocate.clone(), release.clone());
        sdk.params.set(
            "host.allocator",
            Value::Object(Arc::new(HostAllocator { allocate, release })),
        );
    }

    let frame = FrameCore::new(compute.clone());
    let adapter_count = sdk.manager.caps().adapters.len();
    let common = if compute.render_api() == RenderApi::D3d11 {
        // D3D11 hosts may load plugins that record on D3D12; the bridge
        // context travels with the common plugin.
        CommonPlugin::with_d3d12_bridge(frame.clone(), adapter_count)
    } else {
        CommonPlugin::new(frame.clone(), adapter_count)
    };
    sdk.manager.register(common);

    // Published before startup so plugins can pick these up while they
    // initialize.
    sdk.params.set(keys::DEVICE, Value::UInt(compute.device().0));
    sdk.params
        .set(keys::COMPUTE, Value::Object(Arc::new(ComputeHandle(compute.clone()))));

    let api_name = match compute.render_api() {
        RenderApi::D3d11 => RenderApiName::D3d11,
        RenderApi::D3d12 => RenderApiName::D3d12,
        RenderApi::Vulkan => RenderApiName::Vulkan,
    };
    sdk.manager.load_all(api_name).map_err(Error::from)?;
    sdk.manager.initialize(compute.device())?;

    sdk.frame = Some(frame);
    sdk.compute = Some(compute);
    Ok(())
}

/// Complete per-plugin initialization now that the D3D device is known.
pub fn set_d3d_device(device: HostDevice) -> Result<()> {
    guarded_unsafe_state(|| {
        let compute: Arc<dyn Compute> = match device {
            HostDevice::Compute(compute) => compute,
            #[cfg(all(windows, feature = "d3d12"))]
            HostDevice::D3d12(device) => {
                Arc::new(framegraft_chi::backend::d3d12::Dx12Compute::new(device).map_err(Error::from)?)
            }
            #[cfg(all(windows, feature = "d3d11"))]
            HostDevice::D3d11(device) => {
                let d3d11 =
                    framegraft_chi::backend::d3d11::D3d11Compute::new(device).map_err(Error::from)?;
                Arc::new(d3d11)
            }
        };
        finish_device_setup(compute)
    })
}

/// Same as `set_d3d_device` for Vulkan hosts.
pub fn set_vulkan_info(info: VulkanInfo) -> Result<()> {
    guarded_unsafe_state(|| {
        let compute = info.compute.ok_or_else(|| {
            tracing::error!("vulkan info did not carry a compute interface; the layer must build it");
            Error::MissingInputParameter
        })?;
        finish_device_setup(compute)
    })
}

/// Ring-advance and hand back a stable token.
pub fn new_frame_token(frame_index: Option<u32>) -> Result<Arc<FrameToken>> {
    guarded_unsafe_state(|| with_frame(|_, frame| Ok(frame.tokens.get(frame_index))))
}

/// Record common constants; a second set for the same viewport and frame
/// fails.
pub fn set_constants(
    constants: &Constants,
    frame: &FrameToken,
    viewport: ViewportHandle,
) -> Result<()> {
    guarded_unsafe_state(|| {
        with_frame(|_, core| core.set_constants(constants, frame.frame_id(), viewport))
    })
}

/// Record per-viewport tags; volatile ones may be cloned against `cmd`.
pub fn set_tag(
    viewport: ViewportHandle,
    tags: &[ResourceTagEntry],
    cmd: Option<CommandList>,
) -> Result<()> {
    guarded_unsafe_state(|| with_frame(|_, core| core.set_tags(viewport, tags, cmd)))
}

pub fn get_tag(viewport: ViewportHandle, tag_type: BufferType) -> Result<CommonResource> {
    guarded_unsafe_state(|| with_frame(|_, core| Ok(core.get_tag(viewport, tag_type, false))))
}

/// Run a feature's begin/end against the caller's command list.
pub fn evaluate_feature(
    feature: Feature,
    frame: &FrameToken,
    inputs: &EvaluateInputs,
    cmd: CommandList,
) -> Result<()> {
    guarded_unsafe_state(|| {
        with_frame(|sdk, core| {
            core.evaluate(&sdk.manager, feature, frame.frame_id(), inputs, cmd)
        })
    })
}

pub fn is_feature_supported(feature: Feature, adapter: AdapterInfo) -> Result<()> {
    guarded_unsafe_state(|| with_sdk(|sdk| sdk.manager.is_feature_supported(feature, adapter)))
}

pub fn get_feature_requirements(feature: Feature) -> Result<FeatureRequirements> {
    guarded_unsafe_state(|| with_sdk(|sdk| sdk.manager.feature_requirements(feature)))
}

pub fn get_feature_version(feature: Feature) -> Result<Version> {
    guarded_unsafe_state(|| with_sdk(|sdk| sdk.manager.feature_version(feature)))
}

pub fn get_feature_function(feature: Feature, name: &str) -> Result<FeatureFunction> {
    guarded_unsafe_state(|| with_sdk(|sdk| sdk.manager.get_feature_function(feature, name)))
}

pub fn set_feature_enabled(feature: Feature, enabled: bool) -> Result<()> {
    guarded_unsafe_state(|| with_sdk(|sdk| sdk.manager.set_feature_enabled(feature, enabled)))
}

/// Ask a feature to allocate its per-viewport resources up front.
pub fn allocate_resources(feature: Feature, viewport: ViewportHandle) -> Result<()> {
    guarded_unsafe_state(|| {
        with_frame(|sdk, core| {
            let ctx = sdk.manager.feature_context(feature)?;
            let callbacks = ctx.callbacks.as_ref().ok_or(Error::MissingOrInvalidApi)?;
            let allocate = callbacks.allocate_resources.as_ref().ok_or_else(|| {
                tracing::warn!("'{}' does not support explicit resource allocation", ctx.name);
                Error::MissingOrInvalidApi
            })?;
            allocate(viewport)?;
            core.states.on_options_set(viewport, feature, false)
        })
    })
}

/// Ask a feature to release its per-viewport resources.
pub fn free_resources(feature: Feature, viewport: ViewportHandle) -> Result<()> {
    guarded_unsafe_state(|| {
        with_frame(|sdk, core| {
            let ctx = sdk.manager.feature_context(feature)?;
            let callbacks = ctx.callbacks.as_ref().ok_or(Error::MissingOrInvalidApi)?;
            let free = callbacks.free_resources.as_ref().ok_or_else(|| {
                tracing::warn!("'{}' does not support explicit resource release", ctx.name);
                Error::MissingOrInvalidApi
            })?;
            free(viewport)?;
            core.states.on_free_resources(viewport, feature)
        })
    })
}

/// Swap a proxy for the wrapped native pointer.
pub fn get_native_interface(proxy: &dyn Proxied) -> Result<u64> {
    guarded_unsafe_state(|| with_sdk(|_| Ok(proxy.native_base())))
}

/// The SDK version the host initialized with.
pub fn sdk_version() -> Result<Version> {
    with_sdk(|sdk| Ok(sdk.sdk_version))
}

/// The live compute interface; platform glue uses this to wire resize
/// listeners and bridges.
pub fn compute() -> Result<Arc<dyn Compute>> {
    with_sdk(|sdk| sdk.compute.clone().ok_or(Error::NotInitialized))
}

#[cfg(test)]
pub(crate) fn reset_for_tests() {
    *SDK.write().unwrap() = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use framegraft_chi::testing::RecordingCompute;
    use framegraft_plugin::manifest::PluginManifest;
    use framegraft_plugin::plugin::{EvaluateCallbacks, EventData, LoadReply};
    use framegraft_plugin::PluginResult;

    // The global SDK slot forces these tests to run one at a time.
    static SERIAL: Mutex<()> = Mutex::new(());

    struct DirectSrPlugin {
        manifest: PluginManifest,
        dispatches: Arc<AtomicUsize>,
    }

    impl DirectSrPlugin {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                manifest: PluginManifest {
                    name: "graft.directsr".into(),
                    feature: Feature::DIRECT_SR,
                    version: Version::new(1, 2, 0),
                    api_version: Version::new(0, 0, 1),
                    dependencies: vec!["graft.common".into()],
                    render_apis: vec![RenderApiName::D3d12],
                    hooks: vec![],
                    required_tags: vec![],
                    min_os: None,
                    min_driver: None,
                    ngx_feature_id: None,
                    max_viewports: Some(4),
                    vulkan: Default::default(),
                },
                dispatches: Arc::new(AtomicUsize::new(0)),
            })
        }
    }

    impl Plugin for DirectSrPlugin {
        fn manifest(&self) -> &PluginManifest {
            &self.manifest
        }

        fn on_load(&self, _config: &serde_json::Value) -> PluginResult<LoadReply> {
            Ok(LoadReply { supported_adapters: 1, hooks: vec![] })
        }

        fn startup(
            &self,
            _device: framegraft_chi::compute::Device,
            params: &Arc<Parameters>,
        ) -> Result<()> {
            // The compute interface published by the device call is the
            // one features record with.
            assert!(params.get_object::<ComputeHandle>(keys::COMPUTE).is_some());
            Ok(())
        }

        fn shutdown(&self) {}

        fn evaluate_callbacks(&self) -> Option<EvaluateCallbacks> {
            let dispatches = self.dispatches.clone();
            Some(EvaluateCallbacks {
                begin: Arc::new(|_: &EventData, _| Ok(())),
                end: Arc::new(move |_: &EventData, _| {
                    dispatches.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
                allocate_resources: None,
                free_resources: None,
            })
        }

        fn function(&self, name: &str) -> Option<FeatureFunction> {
            (name == "directsr_set_options").then(|| Arc::new(1u32) as FeatureFunction)
        }
    }

    fn boot() -> Arc<DirectSrPlugin> {
        reset_for_tests();
        init(Preferences::default(), Version::new(2, 0, 0)).unwrap();
        let plugin = DirectSrPlugin::new();
        register_plugin(plugin.clone()).unwrap();
        let compute = Arc::new(RecordingCompute::new(RenderApi::D3d12));
        set_d3d_device(HostDevice::Compute(compute)).unwrap();
        plugin
    }

    #[test]
    fn happy_path_evaluate_reaches_the_feature() {
        let _serial = SERIAL.lock().unwrap();
        let plugin = boot();

        let token = new_frame_token(Some(1)).unwrap();
        let viewport = ViewportHandle(0);
        let mut constants = Constants::default();
        constants.jitter_offset = nalgebra::Vector2::new(0.5, -0.25);
        constants.camera_near = 0.1;
        constants.camera_far = 1000.0;
        set_constants(&constants, &token, viewport).unwrap();

        let inputs = EvaluateInputs { viewport, tags: vec![] };
        evaluate_feature(Feature::DIRECT_SR, &token, &inputs, CommandList(3)).unwrap();
        assert_eq!(plugin.dispatches.load(Ordering::SeqCst), 1);

        let function = get_feature_function(Feature::DIRECT_SR, "directsr_set_options").unwrap();
        assert_eq!(*function.downcast::<u32>().unwrap(), 1);

        assert_eq!(get_feature_version(Feature::DIRECT_SR).unwrap(), Version::new(1, 2, 0));
        let requirements = get_feature_requirements(Feature::DIRECT_SR).unwrap();
        assert_eq!(requirements.max_viewports, 4);

        shutdown().unwrap();
    }

    #[test]
    fn duplicate_constants_second_set_fails() {
        let _serial = SERIAL.lock().unwrap();
        boot();
        let token = new_frame_token(Some(5)).unwrap();
        let viewport = ViewportHandle(0);
        assert!(set_constants(&Constants::default(), &token, viewport).is_ok());
        assert_eq!(
            set_constants(&Constants::default(), &token, viewport),
            Err(Error::DuplicatedConstants)
        );
        shutdown().unwrap();
    }

    #[test]
    fn calls_before_init_and_after_shutdown_are_rejected() {
        let _serial = SERIAL.lock().unwrap();
        reset_for_tests();
        assert_eq!(new_frame_token(None).unwrap_err(), Error::InitNotCalled);

        init(Preferences::default(), Version::new(2, 0, 0)).unwrap();
        // Device not set yet: frame-core calls are not ready.
        assert_eq!(new_frame_token(None).unwrap_err(), Error::NotInitialized);
        shutdown().unwrap();
        assert_eq!(new_frame_token(None).unwrap_err(), Error::InitNotCalled);
    }

    #[test]
    fn plugins_cannot_register_after_the_device_is_set() {
        let _serial = SERIAL.lock().unwrap();
        boot();
        assert_eq!(
            register_plugin(DirectSrPlugin::new()).unwrap_err(),
            Error::InvalidIntegration
        );
        shutdown().unwrap();
    }

    #[test]
    fn evaluate_panic_is_contained() {
        let _serial = SERIAL.lock().unwrap();
        reset_for_tests();
        init(Preferences::default(), Version::new(2, 0, 0)).unwrap();

        struct PanickyPlugin {
            manifest: PluginManifest,
        }
        impl Plugin for PanickyPlugin {
            fn manifest(&self) -> &PluginManifest {
                &self.manifest
            }
            fn on_load(&self, _config: &serde_json::Value) -> PluginResult<LoadReply> {
                Ok(LoadReply { supported_adapters: 1, hooks: vec![] })
            }
            fn startup(
                &self,
                _device: framegraft_chi::compute::Device,
                _params: &Arc<Parameters>,
            ) -> Result<()> {
                Ok(())
            }
            fn shutdown(&self) {}
            fn evaluate_callbacks(&self) -> Option<EvaluateCallbacks> {
                Some(EvaluateCallbacks {
                    begin: Arc::new(|_, _| panic!("simulated access violation")),
                    end: Arc::new(|_, _| Ok(())),
                    allocate_resources: None,
                    free_resources: None,
                })
            }
        }
        let mut manifest = DirectSrPlugin::new().manifest.clone();
        manifest.name = "graft.panicky".into();
        manifest.feature = Feature(77);
        manifest.dependencies.clear();
        register_plugin(Arc::new(PanickyPlugin { manifest })).unwrap();
        set_d3d_device(HostDevice::Compute(Arc::new(RecordingCompute::new(RenderApi::D3d12))))
            .unwrap();

        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(|_| {}));
        let token = new_frame_token(Some(1)).unwrap();
        set_constants(&Constants::default(), &token, ViewportHandle(0)).unwrap();
        let result = evaluate_feature(
            Feature(77),
            &token,
            &EvaluateInputs::default(),
            CommandList(1),
        );
        std::panic::set_hook(previous);
        assert_eq!(result, Err(Error::ExceptionHandler));
        shutdown().unwrap();
    }
}
