//! Compute-layer error taxonomy. Converts into the host-facing taxonomy at
//! the API boundary.

use framegraft_core::Error;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComputeError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid call: {0}")]
    InvalidCall(String),
    #[error("no implementation on this backend")]
    NoImplementation,
    #[error("out of memory: {0}")]
    OutOfMemory(String),
    #[error("wait timed out")]
    Timeout,
    #[error("not ready")]
    NotReady,
    #[error("resource creation failed: {0}")]
    ResourceCreationFailed(String),
    #[error("kernel creation failed: {0}")]
    KernelCreationFailed(String),
    #[error("missing kernel binding: {0}")]
    MissingBinding(String),
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("driver error: {0}")]
    DriverError(String),
}

pub type ComputeResult<T> = std::result::Result<T, ComputeError>;

impl From<ComputeError> for Error {
    fn from(e: ComputeError) -> Self {
        match e {
            ComputeError::InvalidArgument(_) | ComputeError::InvalidCall(_) => {
                Error::InvalidParameter
            }
            ComputeError::NoImplementation => Error::MissingOrInvalidApi,
            ComputeError::Timeout => Error::Timeout,
            ComputeError::NotReady => Error::NotReady,
            ComputeError::UnsupportedFormat(_) => Error::InvalidParameter,
            _ => Error::D3dApi,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_to_host_taxonomy() {
        assert_eq!(Error::from(ComputeError::Timeout), Error::Timeout);
        assert_eq!(
            Error::from(ComputeError::InvalidArgument("x".into())),
            Error::InvalidParameter
        );
        assert_eq!(
            Error::from(ComputeError::DriverError("device removed".into())),
            Error::D3dApi
        );
    }
}
