//! Host preferences handed to `init`.

use std::path::PathBuf;
use std::sync::Arc;

use framegraft_core::logging::LoggingOverrides;
use framegraft_chi::compute::{AllocateCallback, ReleaseCallback, RenderApi};
use framegraft_plugin::caps::SystemCaps;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct PreferenceFlags: u32 {
        /// Hand out a DXGI factory proxy so swap-chain creation is seen.
        const USE_DXGI_FACTORY_PROXY = 1 << 0;
        /// Host upgrades interfaces itself instead of automatic hooking.
        const USE_MANUAL_HOOKING = 1 << 1;
        const BYPASS_OS_VERSION_CHECK = 1 << 2;
        const ALLOW_OTA = 1 << 3;
    }
}

#[derive(Clone, Default)]
pub struct Preferences {
    pub render_api: Option<RenderApi>,
    pub flags: PreferenceFlags,
    /// Logging overrides; beaten only by nothing, they win over env vars
    /// and the JSON config file.
    pub log: LoggingOverrides,
    /// Optional JSON config file with development overrides.
    pub config_file: Option<PathBuf>,
    pub frames_in_flight_hint: u32,
    /// Extra plugin search paths, tried after the module directory.
    pub plugin_paths: Vec<PathBuf>,
    /// Host-detected capabilities; a minimal single-adapter default is
    /// assumed when absent.
    pub system_caps: Option<SystemCaps>,
    pub allocate_callback: Option<AllocateCallback>,
    pub release_callback: Option<ReleaseCallback>,
    /// Loader configuration merged into every plugin's manifest document.
    pub loader_config: Option<serde_json::Value>,
}

impl std::fmt::Debug for Preferences {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Preferences")
            .field("render_api", &self.render_api)
            .field("flags", &self.flags)
            .field("config_file", &self.config_file)
            .field("frames_in_flight_hint", &self.frames_in_flight_hint)
            .field("plugin_paths", &self.plugin_paths)
            .field("allocate_callback", &self.allocate_callback.as_ref().map(Arc::as_ptr))
            .finish_non_exhaustive()
    }
}
