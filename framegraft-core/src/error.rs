//! Host-facing error taxonomy. These are stable codes, not rich error
//! objects: the context lives in the log, the kind crosses the API boundary.

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("api called before init or after shutdown")]
    NotInitialized,
    #[error("init was never called")]
    InitNotCalled,
    #[error("invalid parameter")]
    InvalidParameter,
    #[error("missing input parameter")]
    MissingInputParameter,
    #[error("invalid integration")]
    InvalidIntegration,
    #[error("constants were not set for this viewport and frame")]
    MissingConstants,
    #[error("constants already set for this viewport and frame")]
    DuplicatedConstants,
    #[error("resource state must be provided")]
    MissingResourceState,
    #[error("feature is not loaded")]
    FeatureMissing,
    #[error("feature is not supported")]
    FeatureNotSupported,
    #[error("no supported adapter found")]
    AdapterNotSupported,
    #[error("operating system is out of date")]
    OsOutOfDate,
    #[error("driver is out of date")]
    DriverOutOfDate,
    #[error("hardware scheduling is disabled by the operating system")]
    OsDisabledHwScheduling,
    #[error("requested api is missing or invalid")]
    MissingOrInvalidApi,
    #[error("graphics interface is not recognized")]
    UnsupportedInterface,
    #[error("ngx call failed")]
    NgxFailed,
    #[error("d3d api call failed")]
    D3dApi,
    #[error("structured exception caught")]
    ExceptionHandler,
    #[error("entry not found")]
    NotFound,
    #[error("entry overwritten by a later frame")]
    Stale,
    #[error("wait timed out")]
    Timeout,
    #[error("not ready")]
    NotReady,
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_lowercase_prose() {
        assert_eq!(
            Error::DuplicatedConstants.to_string(),
            "constants already set for this viewport and frame"
        );
        assert_eq!(Error::Timeout.to_string(), "wait timed out");
    }
}
