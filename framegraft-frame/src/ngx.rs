//! Collaborator seams for the vendor SDKs. The layer never links them;
//! it publishes callback tables on the parameter bus and whoever provides
//! the real implementation fills them in.

use std::sync::Arc;

use framegraft_core::{Error, Parameters, Result};
use framegraft_chi::compute::CommandList;

pub type NgxFeatureHandle = u64;

pub type NgxCreate =
    Arc<dyn Fn(u32, &Parameters) -> Result<NgxFeatureHandle> + Send + Sync>;
pub type NgxEvaluate =
    Arc<dyn Fn(NgxFeatureHandle, CommandList, &Parameters) -> Result<()> + Send + Sync>;
pub type NgxRelease = Arc<dyn Fn(NgxFeatureHandle) -> Result<()> + Send + Sync>;
pub type NgxUpdate = Arc<dyn Fn(u32, &Parameters) -> Result<()> + Send + Sync>;

/// The callback table NGX-backed plugins receive over the bus. Defaults
/// report `NgxFailed`, which is exactly what a missing SDK should look
/// like to a feature.
pub struct NgxContext {
    pub create_feature: NgxCreate,
    pub evaluate_feature: NgxEvaluate,
    pub release_feature: NgxRelease,
    pub update_feature: NgxUpdate,
    /// The NGX parameter object features read and write.
    pub parameters: Arc<Parameters>,
}

impl Default for NgxContext {
    fn default() -> Self {
        Self {
            create_feature: Arc::new(|_, _| Err(Error::NgxFailed)),
            evaluate_feature: Arc::new(|_, _, _| Err(Error::NgxFailed)),
            release_feature: Arc::new(|_| Err(Error::NgxFailed)),
            update_feature: Arc::new(|_, _| Err(Error::NgxFailed)),
            parameters: Parameters::new(),
        }
    }
}

/// Read-only driver registry settings.
pub struct DrsContext {
    pub read_key: Arc<dyn Fn(&str) -> Option<u32> + Send + Sync>,
}

impl Default for DrsContext {
    fn default() -> Self {
        Self { read_key: Arc::new(|_| None) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_context_reports_ngx_failed() {
        let ngx = NgxContext::default();
        assert_eq!((ngx.create_feature)(1, &Parameters::new()).unwrap_err(), Error::NgxFailed);
        assert_eq!((ngx.release_feature)(0).unwrap_err(), Error::NgxFailed);
    }

    #[test]
    fn default_drs_has_no_keys() {
        let drs = DrsContext::default();
        assert_eq!((drs.read_key)("latency_mode"), None);
    }
}
