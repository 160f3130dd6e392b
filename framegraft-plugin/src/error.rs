//! Plugin-manager errors. Gating failures convert into the host taxonomy
//! so `is_feature_supported` can report the most specific kind.

use std::path::PathBuf;

use framegraft_core::Error;

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("failed to read manifest {path}: {source}")]
    ManifestIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse manifest {path}: {source}")]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("plugin discovery failed: {0}")]
    Discovery(String),
    #[error("dependency cycle involving '{0}'")]
    DependencyCycle(String),
    #[error("unknown dependency '{dependency}' declared by '{plugin}'")]
    UnknownDependency { plugin: String, dependency: String },
    #[error("feature is not loaded")]
    FeatureMissing,
    #[error("operating system is out of date")]
    OsOutOfDate,
    #[error("driver is out of date")]
    DriverOutOfDate,
    #[error("no supported adapter")]
    AdapterNotSupported,
    #[error("render api not supported by this plugin")]
    FeatureNotSupported,
    #[error("plugin '{0}' failed to start: {1}")]
    StartupFailed(String, Error),
}

pub type PluginResult<T> = std::result::Result<T, PluginError>;

impl From<PluginError> for Error {
    fn from(e: PluginError) -> Self {
        match e {
            PluginError::FeatureMissing => Error::FeatureMissing,
            PluginError::OsOutOfDate => Error::OsOutOfDate,
            PluginError::DriverOutOfDate => Error::DriverOutOfDate,
            PluginError::AdapterNotSupported => Error::AdapterNotSupported,
            PluginError::FeatureNotSupported => Error::FeatureNotSupported,
            PluginError::StartupFailed(_, inner) => inner,
            PluginError::ManifestIo { .. }
            | PluginError::ManifestParse { .. }
            | PluginError::Discovery(_) => Error::InvalidIntegration,
            PluginError::DependencyCycle(_) | PluginError::UnknownDependency { .. } => {
                Error::InvalidIntegration
            }
        }
    }
}
