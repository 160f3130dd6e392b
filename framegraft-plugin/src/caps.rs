//! System capabilities and adapter gating. The common plugin detects
//! these once; every plugin's minima are merged against them to produce
//! its supported-adapter mask.

use serde::{Deserialize, Serialize};

use framegraft_core::Version;

use crate::error::PluginError;
use crate::manifest::PluginManifest;

pub const VENDOR_NVIDIA: u32 = 0x10de;
pub const VENDOR_AMD: u32 = 0x1002;
pub const VENDOR_INTEL: u32 = 0x8086;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterCaps {
    pub vendor: u32,
    pub device_id: u32,
    /// Vendor-specific architecture generation.
    pub architecture: u32,
    pub luid: u64,
    pub vram_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemCaps {
    pub os: Version,
    pub driver: Version,
    pub hw_scheduling_enabled: bool,
    pub adapters: Vec<AdapterCaps>,
}

/// What the host passes to `is_feature_supported`: either a LUID or an
/// adapter ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterInfo {
    Luid(u64),
    Ordinal(u32),
}

impl SystemCaps {
    /// Bitmask of adapters this manifest's requirements accept. NGX
    /// requirement queries may replace the static minima before this runs.
    pub fn supported_adapter_mask(&self, manifest: &PluginManifest) -> u32 {
        if let Some(min_os) = manifest.min_os {
            if self.os < min_os {
                return 0;
            }
        }
        if let Some(min_driver) = manifest.min_driver {
            if self.driver < min_driver {
                return 0;
            }
        }
        let mut mask = 0u32;
        for (ordinal, adapter) in self.adapters.iter().enumerate() {
            // NGX-backed features need hardware the vendor SDK supports.
            let vendor_ok = manifest.ngx_feature_id.is_none() || adapter.vendor == VENDOR_NVIDIA;
            if vendor_ok {
                mask |= 1 << ordinal;
            }
        }
        mask
    }

    /// The most specific gating error for a manifest, or `Ok` if at least
    /// one adapter is supported.
    pub fn gate(&self, manifest: &PluginManifest) -> Result<u32, PluginError> {
        if let Some(min_os) = manifest.min_os {
            if self.os < min_os {
                tracing::warn!(
                    "'{}' needs os {min_os}, running {}",
                    manifest.name,
                    self.os
                );
                return Err(PluginError::OsOutOfDate);
            }
        }
        if let Some(min_driver) = manifest.min_driver {
            if self.driver < min_driver {
                tracing::warn!(
                    "'{}' needs driver {min_driver}, running {}",
                    manifest.name,
                    self.driver
                );
                return Err(PluginError::DriverOutOfDate);
            }
        }
        let mask = self.supported_adapter_mask(manifest);
        if mask == 0 {
            return Err(PluginError::AdapterNotSupported);
        }
        Ok(mask)
    }

    pub fn adapter_ordinal(&self, info: AdapterInfo) -> Option<u32> {
        match info {
            AdapterInfo::Ordinal(ordinal) => {
                ((ordinal as usize) < self.adapters.len()).then_some(ordinal)
            }
            AdapterInfo::Luid(luid) => self
                .adapters
                .iter()
                .position(|a| a.luid == luid)
                .map(|p| p as u32),
        }
    }
}
