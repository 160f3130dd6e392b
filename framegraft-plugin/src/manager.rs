//! Plugin manager: discovery, gating, dependency-ordered load, per-feature
//! contexts and hook collection.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value as Json;

use framegraft_core::types::Feature;
use framegraft_core::{Error, Parameters, Result, Version};
use framegraft_chi::compute::Device;

use crate::caps::{AdapterInfo, SystemCaps};
use crate::error::{PluginError, PluginResult};
use crate::hooks::HookRegistry;
use crate::manifest::{PluginManifest, RenderApiName, RequiredTag, VulkanRequirements};
use crate::plugin::{EvaluateCallbacks, FeatureFunction, Plugin};

/// Everything the dispatcher needs to run one loaded feature.
#[derive(Debug, Clone)]
pub struct FeatureContext {
    pub feature: Feature,
    pub name: String,
    pub supported_adapters: u32,
    pub enabled: bool,
    pub version: Version,
    pub ngx_feature_id: Option<u32>,
    pub callbacks: Option<EvaluateCallbacks>,
}

/// Merged requirements surfaced to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRequirements {
    pub min_os: Option<Version>,
    pub min_driver: Option<Version>,
    pub supported_adapters: u32,
    pub render_apis: Vec<RenderApiName>,
    pub required_tags: Vec<RequiredTag>,
    pub max_viewports: u32,
    pub vulkan: VulkanRequirements,
}

struct LoadedPlugin {
    plugin: Arc<dyn Plugin>,
    supported_adapters: u32,
    enabled: bool,
    callbacks: Option<EvaluateCallbacks>,
}

#[derive(Default)]
struct ManagerState {
    loaded: Vec<LoadedPlugin>,
    gating_failures: HashMap<Feature, Error>,
    initialized: bool,
}

pub struct PluginManager {
    params: Arc<Parameters>,
    caps: SystemCaps,
    loader_config: Json,
    search_paths: Mutex<Vec<PathBuf>>,
    registered: Mutex<Vec<Arc<dyn Plugin>>>,
    hooks: Arc<HookRegistry>,
    state: RwLock<ManagerState>,
}

impl PluginManager {
    pub fn new(caps: SystemCaps, params: Arc<Parameters>, loader_config: Json) -> Self {
        let mut search_paths = Vec::new();
        if let Some(dir) = framegraft_core::files::module_directory() {
            search_paths.push(dir);
        }
        Self {
            params,
            caps,
            loader_config,
            search_paths: Mutex::new(search_paths),
            registered: Mutex::new(Vec::new()),
            hooks: Arc::new(HookRegistry::new()),
            state: RwLock::new(ManagerState::default()),
        }
    }

    pub fn caps(&self) -> &SystemCaps {
        &self.caps
    }

    pub fn hooks(&self) -> Arc<HookRegistry> {
        self.hooks.clone()
    }

    pub fn params(&self) -> Arc<Parameters> {
        self.params.clone()
    }

    pub fn add_search_path(&self, path: PathBuf) {
        self.search_paths.lock().unwrap().push(path);
    }

    pub fn register(&self, plugin: Arc<dyn Plugin>) {
        self.registered.lock().unwrap().push(plugin);
    }

    /// Scan the search paths for external manifests. Bad documents are
    /// skipped with a logged error; a missing directory is skipped with a
    /// warning (hosts often pass speculative paths).
    pub fn discover_manifests(&self) -> Vec<(PathBuf, PluginManifest)> {
        let mut found = Vec::new();
        for dir in self.search_paths.lock().unwrap().iter() {
            let entries = match std::fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(_) => {
                    tracing::warn!("plugin search path {} is not readable", dir.display());
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().map(|e| e == "json").unwrap_or(false) {
                    match PluginManifest::load_from_file(&path) {
                        Ok(manifest) => {
                            tracing::info!(
                                "discovered plugin '{}' ({}) at {}",
                                manifest.name,
                                manifest.version,
                                path.display()
                            );
                            found.push((path, manifest));
                        }
                        Err(e) => tracing::error!("{e}"),
                    }
                }
            }
        }
        found
    }

    /// Gate, order and load every registered plugin for `render_api`.
    pub fn load_all(&self, render_api: RenderApiName) -> PluginResult<()> {
        let registered = self.registered.lock().unwrap().clone();
        let mut state = self.state.write().unwrap();

        // Gate first so dependents of an unsupported plugin drop out too.
        let mut eligible: Vec<Arc<dyn Plugin>> = Vec::new();
        for plugin in &registered {
            let manifest = plugin.manifest();
            if !manifest.supports_api(render_api) {
                tracing::info!("'{}' does not support {:?}, skipping", manifest.name, render_api);
                state.gating_failures.insert(manifest.feature, Error::FeatureNotSupported);
                continue;
            }
            match self.caps.gate(manifest) {
                Ok(_) => eligible.push(plugin.clone()),
                Err(e) => {
                    tracing::warn!("'{}' not supported: {e}", manifest.name);
                    state.gating_failures.insert(manifest.feature, Error::from(e));
                }
            }
        }

        let ordered = Self::topological_order(&eligible)?;
        for plugin in ordered {
            let manifest = plugin.manifest();
            let merged = self.merge_config(manifest)?;
            let reply = plugin.on_load(&merged)?;
            if reply.supported_adapters == 0 {
                tracing::warn!("'{}' reported no supported adapters", manifest.name);
                state.gating_failures.insert(manifest.feature, Error::AdapterNotSupported);
                continue;
            }
            for hook in reply.hooks {
                self.hooks.register(hook);
            }
            tracing::info!(
                "loaded '{}' {} (adapters {:#x})",
                manifest.name,
                manifest.version,
                reply.supported_adapters
            );
            state.loaded.push(LoadedPlugin {
                plugin: plugin.clone(),
                supported_adapters: reply.supported_adapters,
                enabled: true,
                callbacks: None,
            });
        }
        Ok(())
    }

    /// Loader config merged over the plugin's embedded manifest document.
    fn merge_config(&self, manifest: &PluginManifest) -> PluginResult<Json> {
        let mut merged = serde_json::to_value(manifest).map_err(|e| {
            PluginError::Discovery(format!("manifest for '{}' not serializable: {e}", manifest.name))
        })?;
        if let (Json::Object(target), Json::Object(overlay)) =
            (&mut merged, &self.loader_config)
        {
            for (key, value) in overlay {
                target.insert(key.clone(), value.clone());
            }
        }
        Ok(merged)
    }

    /// Kahn's algorithm over declared dependencies; dependencies load
    /// before dependents, cycles are a load error.
    fn topological_order(
        plugins: &[Arc<dyn Plugin>],
    ) -> PluginResult<Vec<Arc<dyn Plugin>>> {
        let index_by_name: HashMap<&str, usize> = plugins
            .iter()
            .enumerate()
            .map(|(i, p)| (p.manifest().name.as_str(), i))
            .collect();

        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); plugins.len()];
        let mut in_degree = vec![0usize; plugins.len()];
        for (i, plugin) in plugins.iter().enumerate() {
            for dependency in &plugin.manifest().dependencies {
                match index_by_name.get(dependency.as_str()) {
                    Some(&dep) => {
                        dependents[dep].push(i);
                        in_degree[i] += 1;
                    }
                    None => {
                        // The dependency may have been gated out; the
                        // dependent cannot run either.
                        return Err(PluginError::UnknownDependency {
                            plugin: plugin.manifest().name.clone(),
                            dependency: dependency.clone(),
                        });
                    }
                }
            }
        }

        let mut queue: VecDeque<usize> =
            (0..plugins.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut ordered = Vec::with_capacity(plugins.len());
        while let Some(i) = queue.pop_front() {
            ordered.push(plugins[i].clone());
            for &dependent in &dependents[i] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }
        if ordered.len() != plugins.len() {
            let stuck = plugins
                .iter()
                .enumerate()
                .find(|(i, _)| in_degree[*i] > 0)
                .map(|(_, p)| p.manifest().name.clone())
                .unwrap_or_default();
            return Err(PluginError::DependencyCycle(stuck));
        }
        Ok(ordered)
    }

    /// Run `startup` on every loaded plugin now that the device exists,
    /// then resolve evaluate callbacks.
    pub fn initialize(&self, device: Device) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if state.initialized {
            return Ok(());
        }
        for loaded in state.loaded.iter_mut() {
            let name = loaded.plugin.manifest().name.clone();
            loaded
                .plugin
                .startup(device, &self.params)
                .map_err(|e| {
                    tracing::error!("'{name}' failed to start: {e}");
                    e
                })?;
            loaded.callbacks = loaded.plugin.evaluate_callbacks();
        }
        state.initialized = true;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.state.read().unwrap().initialized
    }

    /// Reverse-order shutdown; hooks are dropped with their plugins.
    pub fn shutdown_all(&self) {
        let mut state = self.state.write().unwrap();
        for loaded in state.loaded.iter().rev() {
            let manifest = loaded.plugin.manifest();
            tracing::info!("shutting down '{}'", manifest.name);
            self.hooks.unregister_plugin(&manifest.name);
            loaded.plugin.shutdown();
        }
        state.loaded.clear();
        state.gating_failures.clear();
        state.initialized = false;
    }

    pub fn feature_context(&self, feature: Feature) -> Result<FeatureContext> {
        let state = self.state.read().unwrap();
        let loaded = state
            .loaded
            .iter()
            .find(|l| l.plugin.manifest().feature == feature)
            .ok_or(Error::FeatureMissing)?;
        let manifest = loaded.plugin.manifest();
        Ok(FeatureContext {
            feature,
            name: manifest.name.clone(),
            supported_adapters: loaded.supported_adapters,
            enabled: loaded.enabled,
            version: manifest.version,
            ngx_feature_id: manifest.ngx_feature_id,
            callbacks: loaded.callbacks.clone(),
        })
    }

    pub fn set_feature_enabled(&self, feature: Feature, enabled: bool) -> Result<()> {
        let mut state = self.state.write().unwrap();
        let loaded = state
            .loaded
            .iter_mut()
            .find(|l| l.plugin.manifest().feature == feature)
            .ok_or(Error::FeatureMissing)?;
        loaded.enabled = enabled;
        Ok(())
    }

    /// Most specific support verdict for a feature on a given adapter.
    pub fn is_feature_supported(&self, feature: Feature, adapter: AdapterInfo) -> Result<()> {
        let state = self.state.read().unwrap();
        if let Some(loaded) =
            state.loaded.iter().find(|l| l.plugin.manifest().feature == feature)
        {
            let ordinal = self
                .caps
                .adapter_ordinal(adapter)
                .ok_or(Error::AdapterNotSupported)?;
            if loaded.supported_adapters & (1 << ordinal) == 0 {
                return Err(Error::AdapterNotSupported);
            }
            return Ok(());
        }
        // Not loaded: report the recorded gating reason if we have one.
        match state.gating_failures.get(&feature) {
            Some(error) => Err(*error),
            None => Err(Error::FeatureMissing),
        }
    }

    pub fn feature_requirements(&self, feature: Feature) -> Result<FeatureRequirements> {
        let registered = self.registered.lock().unwrap();
        let plugin = registered
            .iter()
            .find(|p| p.manifest().feature == feature)
            .ok_or(Error::FeatureMissing)?;
        let manifest = plugin.manifest();
        let supported_adapters = {
            let state = self.state.read().unwrap();
            state
                .loaded
                .iter()
                .find(|l| l.plugin.manifest().feature == feature)
                .map(|l| l.supported_adapters)
                .unwrap_or_else(|| self.caps.supported_adapter_mask(manifest))
        };
        Ok(FeatureRequirements {
            min_os: manifest.min_os,
            min_driver: manifest.min_driver,
            supported_adapters,
            render_apis: manifest.render_apis.clone(),
            required_tags: manifest.required_tags.clone(),
            max_viewports: manifest.max_viewports.unwrap_or(1),
            vulkan: manifest.vulkan.clone(),
        })
    }

    pub fn feature_version(&self, feature: Feature) -> Result<Version> {
        let registered = self.registered.lock().unwrap();
        registered
            .iter()
            .find(|p| p.manifest().feature == feature)
            .map(|p| p.manifest().version)
            .ok_or(Error::FeatureMissing)
    }

    pub fn get_feature_function(&self, feature: Feature, name: &str) -> Result<FeatureFunction> {
        let state = self.state.read().unwrap();
        let loaded = state
            .loaded
            .iter()
            .find(|l| l.plugin.manifest().feature == feature)
            .ok_or(Error::FeatureMissing)?;
        if !state.initialized {
            tracing::error!(
                "'{}' has not been initialized yet; set the device before resolving functions",
                loaded.plugin.manifest().name
            );
            return Err(Error::NotInitialized);
        }
        loaded.plugin.function(name).ok_or(Error::MissingOrInvalidApi)
    }

    /// Loaded plugins in load order; the frame core uses this to merge
    /// manifest-declared required tags.
    pub fn loaded_manifests(&self) -> Vec<PluginManifest> {
        self.state
            .read()
            .unwrap()
            .loaded
            .iter()
            .map(|l| l.plugin.manifest().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{ApiFunction, HookPhase, HookRegistration};
    use crate::plugin::LoadReply;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    static LOAD_ORDER: AtomicUsize = AtomicUsize::new(0);

    struct TestPlugin {
        manifest: PluginManifest,
        started: AtomicBool,
        load_rank: AtomicUsize,
        with_hook: bool,
    }

    impl TestPlugin {
        fn new(name: &str, feature: Feature, dependencies: Vec<String>, with_hook: bool) -> Arc<Self> {
            Arc::new(Self {
                manifest: PluginManifest {
                    name: name.into(),
                    feature,
                    version: Version::new(1, 0, 0),
                    api_version: Version::new(0, 0, 1),
                    dependencies,
                    render_apis: vec![RenderApiName::D3d12],
                    hooks: vec![],
                    required_tags: vec![],
                    min_os: None,
                    min_driver: None,
                    ngx_feature_id: None,
                    max_viewports: None,
                    vulkan: Default::default(),
                },
                started: AtomicBool::new(false),
                load_rank: AtomicUsize::new(usize::MAX),
                with_hook,
            })
        }
    }

    impl Plugin for TestPlugin {
        fn manifest(&self) -> &PluginManifest {
            &self.manifest
        }

        fn on_load(&self, config: &Json) -> PluginResult<LoadReply> {
            assert_eq!(config["name"], self.manifest.name);
            self.load_rank.store(LOAD_ORDER.fetch_add(1, Ordering::SeqCst), Ordering::SeqCst);
            let hooks = if self.with_hook {
                vec![HookRegistration {
                    api: ApiFunction::Present,
                    phase: HookPhase::Before,
                    plugin: self.manifest.name.clone(),
                    callback: Arc::new(|_| Default::default()),
                }]
            } else {
                vec![]
            };
            Ok(LoadReply { supported_adapters: 1, hooks })
        }

        fn startup(&self, _device: Device, _params: &Arc<Parameters>) -> Result<()> {
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn shutdown(&self) {
            self.started.store(false, Ordering::SeqCst);
        }

        fn function(&self, name: &str) -> Option<FeatureFunction> {
            (name == "set_options").then(|| Arc::new(42u32) as FeatureFunction)
        }
    }

    fn manager() -> PluginManager {
        let caps = SystemCaps {
            os: Version::new(10, 0, 22621),
            driver: Version::new(530, 0, 0),
            hw_scheduling_enabled: true,
            adapters: vec![Default::default()],
        };
        PluginManager::new(caps, Parameters::new(), serde_json::json!({"loader": true}))
    }

    #[test]
    fn dependencies_load_before_dependents() {
        let manager = manager();
        let feature_plugin =
            TestPlugin::new("graft.upscale", Feature::SUPER_RESOLUTION, vec!["graft.common".into()], false);
        let common = TestPlugin::new("graft.common", Feature::COMMON, vec![], false);
        // Registration order is reversed on purpose.
        manager.register(feature_plugin.clone());
        manager.register(common.clone());
        manager.load_all(RenderApiName::D3d12).unwrap();
        assert!(
            common.load_rank.load(Ordering::SeqCst)
                < feature_plugin.load_rank.load(Ordering::SeqCst)
        );
    }

    #[test]
    fn unknown_dependency_is_an_error() {
        let manager = manager();
        manager.register(TestPlugin::new(
            "graft.orphan",
            Feature::REFLEX,
            vec!["graft.nonexistent".into()],
            false,
        ));
        assert!(matches!(
            manager.load_all(RenderApiName::D3d12),
            Err(PluginError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn dependency_cycles_are_detected() {
        let manager = manager();
        manager.register(TestPlugin::new("a", Feature(100), vec!["b".into()], false));
        manager.register(TestPlugin::new("b", Feature(101), vec!["a".into()], false));
        assert!(matches!(
            manager.load_all(RenderApiName::D3d12),
            Err(PluginError::DependencyCycle(_))
        ));
    }

    #[test]
    fn wrong_render_api_records_not_supported() {
        let manager = manager();
        manager.register(TestPlugin::new("graft.dx-only", Feature::DIRECT_SR, vec![], false));
        manager.load_all(RenderApiName::Vulkan).unwrap();
        assert_eq!(
            manager.is_feature_supported(Feature::DIRECT_SR, AdapterInfo::Ordinal(0)),
            Err(Error::FeatureNotSupported)
        );
    }

    #[test]
    fn startup_and_function_resolution_require_initialize() {
        let manager = manager();
        let plugin = TestPlugin::new("graft.sr", Feature::SUPER_RESOLUTION, vec![], false);
        manager.register(plugin.clone());
        manager.load_all(RenderApiName::D3d12).unwrap();

        assert_eq!(
            manager.get_feature_function(Feature::SUPER_RESOLUTION, "set_options").unwrap_err(),
            Error::NotInitialized
        );

        manager.initialize(Device(0xd3d)).unwrap();
        assert!(plugin.started.load(Ordering::SeqCst));

        let function = manager
            .get_feature_function(Feature::SUPER_RESOLUTION, "set_options")
            .unwrap();
        assert_eq!(*function.downcast::<u32>().unwrap(), 42);
        assert_eq!(
            manager.get_feature_function(Feature::SUPER_RESOLUTION, "missing").unwrap_err(),
            Error::MissingOrInvalidApi
        );
    }

    #[test]
    fn hooks_arrive_with_load_and_leave_with_shutdown() {
        let manager = manager();
        manager.register(TestPlugin::new("graft.fg", Feature::FRAME_GENERATION, vec![], true));
        manager.load_all(RenderApiName::D3d12).unwrap();
        assert!(manager.hooks().has_hooks(ApiFunction::Present));
        manager.shutdown_all();
        assert!(!manager.hooks().has_hooks(ApiFunction::Present));
        assert_eq!(
            manager.feature_context(Feature::FRAME_GENERATION).unwrap_err(),
            Error::FeatureMissing
        );
    }

    #[test]
    fn enable_toggle_and_context() {
        let manager = manager();
        manager.register(TestPlugin::new("graft.sr", Feature::SUPER_RESOLUTION, vec![], false));
        manager.load_all(RenderApiName::D3d12).unwrap();
        let ctx = manager.feature_context(Feature::SUPER_RESOLUTION).unwrap();
        assert!(ctx.enabled);
        manager.set_feature_enabled(Feature::SUPER_RESOLUTION, false).unwrap();
        assert!(!manager.feature_context(Feature::SUPER_RESOLUTION).unwrap().enabled);
    }

    #[test]
    fn discovery_finds_valid_manifests_and_skips_broken_ones() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("graft.upscale.json"),
            r#"{
                "name": "graft.upscale",
                "feature": 1,
                "version": "3.1.4",
                "api_version": "0.0.1",
                "render_apis": ["d3d12", "vulkan"]
            }"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.json"), "not json {").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let manager = manager();
        manager.add_search_path(dir.path().to_path_buf());
        // A speculative path that does not exist is skipped, not fatal.
        manager.add_search_path(dir.path().join("missing"));

        let found: Vec<_> = manager
            .discover_manifests()
            .into_iter()
            .filter(|(path, _)| path.starts_with(dir.path()))
            .collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1.name, "graft.upscale");
        assert_eq!(found[0].1.version, Version::new(3, 1, 4));
    }

    #[test]
    fn requirements_merge_manifest_and_mask() {
        let manager = manager();
        manager.register(TestPlugin::new("graft.sr", Feature::SUPER_RESOLUTION, vec![], false));
        manager.load_all(RenderApiName::D3d12).unwrap();
        let requirements = manager.feature_requirements(Feature::SUPER_RESOLUTION).unwrap();
        assert_eq!(requirements.supported_adapters, 1);
        assert_eq!(requirements.render_apis, vec![RenderApiName::D3d12]);
        assert_eq!(requirements.max_viewports, 1);
    }
}
