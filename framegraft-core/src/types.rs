//! Host-facing vocabulary shared by every layer: feature ids, viewport
//! handles, buffer tag types and tag lifecycles.

use serde::{Deserialize, Serialize};

/// A loadable feature. The id is stable across versions; the well-known
/// ones live here, vendors allocate above `Feature::CUSTOM_BASE`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Feature(pub u32);

impl Feature {
    /// The frame-coordination core itself.
    pub const COMMON: Feature = Feature(0);
    pub const SUPER_RESOLUTION: Feature = Feature(1);
    pub const FRAME_GENERATION: Feature = Feature(2);
    pub const REFLEX: Feature = Feature(3);
    pub const DIRECT_SR: Feature = Feature(4);
    pub const CUSTOM_BASE: u32 = 0x1000_0000;
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Feature::COMMON => write!(f, "common"),
            Feature::SUPER_RESOLUTION => write!(f, "super-resolution"),
            Feature::FRAME_GENERATION => write!(f, "frame-generation"),
            Feature::REFLEX => write!(f, "reflex"),
            Feature::DIRECT_SR => write!(f, "directsr"),
            Feature(id) => write!(f, "feature-{id}"),
        }
    }
}

/// Host-chosen id partitioning per-frame state (split screen, multiple
/// cameras). Opaque to the layer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct ViewportHandle(pub u32);

/// Semantic role of a tagged resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferType {
    Depth,
    MotionVectors,
    HudlessColor,
    ScalingInputColor,
    ScalingOutputColor,
    ExposureTexture,
    NormalRoughness,
    AmbientOcclusionDenoised,
    ShadowDenoised,
    SpecularHitDenoised,
    DiffuseHitDenoised,
    UiColorAlpha,
    ReactiveMaskHint,
    TransparencyMask,
    BackBuffer,
}

impl BufferType {
    /// Output tags are written by features into engine resources; cloning
    /// them would write into a copy nobody reads.
    pub fn is_output(&self) -> bool {
        matches!(
            self,
            BufferType::ScalingOutputColor
                | BufferType::AmbientOcclusionDenoised
                | BufferType::ShadowDenoised
                | BufferType::SpecularHitDenoised
                | BufferType::DiffuseHitDenoised
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BufferType::Depth => "depth",
            BufferType::MotionVectors => "mvec",
            BufferType::HudlessColor => "hudless",
            BufferType::ScalingInputColor => "scaling-in",
            BufferType::ScalingOutputColor => "scaling-out",
            BufferType::ExposureTexture => "exposure",
            BufferType::NormalRoughness => "normal-roughness",
            BufferType::AmbientOcclusionDenoised => "ao-denoised",
            BufferType::ShadowDenoised => "shadow-denoised",
            BufferType::SpecularHitDenoised => "specular-denoised",
            BufferType::DiffuseHitDenoised => "diffuse-denoised",
            BufferType::UiColorAlpha => "ui-color-alpha",
            BufferType::ReactiveMaskHint => "reactive-mask",
            BufferType::TransparencyMask => "transparency-mask",
            BufferType::BackBuffer => "backbuffer",
        }
    }
}

/// How long a tagged resource stays dereferenceable for the layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceLifecycle {
    /// Valid only inside the call that supplied it.
    OnlyValidNow,
    /// Valid until the next evaluate on the same viewport.
    ValidUntilEvaluate,
    /// Valid until present; never cloned.
    ValidUntilPresent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_tags_are_never_clone_candidates() {
        assert!(BufferType::ScalingOutputColor.is_output());
        assert!(BufferType::ShadowDenoised.is_output());
        assert!(!BufferType::Depth.is_output());
        assert!(!BufferType::ScalingInputColor.is_output());
    }

    #[test]
    fn feature_serializes_as_bare_id() {
        let json = serde_json::to_string(&Feature::DIRECT_SR).unwrap();
        assert_eq!(json, "4");
        let back: Feature = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Feature::DIRECT_SR);
    }
}
