//! Plugin manifests: the JSON document each plugin embeds, describing
//! what it is, what it hooks, which tags it needs and what it requires
//! from the system.

use std::path::Path;

use serde::{Deserialize, Serialize};

use framegraft_core::types::{BufferType, Feature, ResourceLifecycle};
use framegraft_core::Version;

use crate::error::PluginError;
use crate::hooks::HookDeclaration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderApiName {
    D3d11,
    D3d12,
    Vulkan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredTag {
    #[serde(rename = "type")]
    pub tag_type: BufferType,
    pub lifecycle: ResourceLifecycle,
}

/// Vulkan-specific needs surfaced through `FeatureRequirements`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VulkanRequirements {
    pub instance_extensions: Vec<String>,
    pub device_extensions: Vec<String>,
    pub extra_graphics_queues: u32,
    pub extra_compute_queues: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub feature: Feature,
    pub version: Version,
    pub api_version: Version,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub render_apis: Vec<RenderApiName>,
    #[serde(default)]
    pub hooks: Vec<HookDeclaration>,
    #[serde(default)]
    pub required_tags: Vec<RequiredTag>,
    #[serde(default)]
    pub min_os: Option<Version>,
    #[serde(default)]
    pub min_driver: Option<Version>,
    /// Set for NGX-backed plugins; requirements are re-queried from NGX at
    /// startup and override the static minima.
    #[serde(default)]
    pub ngx_feature_id: Option<u32>,
    #[serde(default)]
    pub max_viewports: Option<u32>,
    #[serde(default)]
    pub vulkan: VulkanRequirements,
}

impl PluginManifest {
    pub fn load_from_file(path: &Path) -> Result<Self, PluginError> {
        let content = std::fs::read_to_string(path).map_err(|e| PluginError::ManifestIo {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::load_from_str(&content, path)
    }

    pub fn load_from_str(content: &str, source_path: &Path) -> Result<Self, PluginError> {
        serde_json::from_str(content).map_err(|e| PluginError::ManifestParse {
            path: source_path.to_path_buf(),
            source: e,
        })
    }

    pub fn supports_api(&self, api: RenderApiName) -> bool {
        self.render_apis.contains(&api)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn dummy_path() -> PathBuf {
        PathBuf::from("dummy/plugin.json")
    }

    #[test]
    fn parses_minimal_manifest() {
        let json = r#"{
            "name": "graft.directsr",
            "feature": 4,
            "version": "0.1.0",
            "api_version": "0.0.1",
            "render_apis": ["d3d12"]
        }"#;
        let manifest = PluginManifest::load_from_str(json, &dummy_path()).unwrap();
        assert_eq!(manifest.name, "graft.directsr");
        assert_eq!(manifest.feature, Feature::DIRECT_SR);
        assert_eq!(manifest.version, Version::new(0, 1, 0));
        assert!(manifest.dependencies.is_empty());
        assert!(manifest.supports_api(RenderApiName::D3d12));
        assert!(!manifest.supports_api(RenderApiName::Vulkan));
        assert!(manifest.min_os.is_none());
    }

    #[test]
    fn parses_full_manifest() {
        let json = r#"{
            "name": "graft.framegen",
            "feature": 2,
            "version": "2.4.11",
            "api_version": "0.0.1",
            "dependencies": ["graft.common"],
            "render_apis": ["d3d12", "vulkan"],
            "hooks": [
                {"api": "Present", "phase": "Replace"},
                {"api": "ResizeBuffers", "phase": "Before"}
            ],
            "required_tags": [
                {"type": "Depth", "lifecycle": "ValidUntilPresent"},
                {"type": "MotionVectors", "lifecycle": "ValidUntilPresent"}
            ],
            "min_os": "10.0.19041",
            "min_driver": "512.15.0",
            "ngx_feature_id": 11,
            "max_viewports": 4,
            "vulkan": {
                "device_extensions": ["VK_KHR_timeline_semaphore"],
                "extra_compute_queues": 1
            }
        }"#;
        let manifest = PluginManifest::load_from_str(json, &dummy_path()).unwrap();
        assert_eq!(manifest.dependencies, vec!["graft.common"]);
        assert_eq!(manifest.hooks.len(), 2);
        assert_eq!(manifest.required_tags[0].tag_type, BufferType::Depth);
        assert_eq!(manifest.required_tags[0].lifecycle, ResourceLifecycle::ValidUntilPresent);
        assert_eq!(manifest.min_driver, Some(Version::new(512, 15, 0)));
        assert_eq!(manifest.ngx_feature_id, Some(11));
        assert_eq!(manifest.vulkan.extra_compute_queues, 1);
        assert_eq!(manifest.vulkan.device_extensions, vec!["VK_KHR_timeline_semaphore"]);
    }

    #[test]
    fn missing_required_field_is_an_error() {
        let json = r#"{ "name": "broken", "version": "1.0.0" }"#;
        let result = PluginManifest::load_from_str(json, &dummy_path());
        match result {
            Err(PluginError::ManifestParse { path, .. }) => {
                assert_eq!(path, dummy_path());
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(PluginManifest::load_from_str("not json {", &dummy_path()).is_err());
    }
}
