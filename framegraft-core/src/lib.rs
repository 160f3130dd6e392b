//! Process-wide services shared by every framegraft crate: logging, the
//! typed parameter bus, worker threads, per-thread contexts, filesystem
//! helpers, crash reporting and the host-facing error taxonomy.

pub mod crash;
pub mod error;
pub mod files;
pub mod logging;
pub mod params;
pub mod thread;
pub mod timing;
pub mod types;
pub mod version;

pub use error::{Error, Result};
pub use logging::{init_logging, LoggingConfig};
pub use params::{Parameters, Value};
pub use types::{BufferType, Feature, ResourceLifecycle, ViewportHandle};
pub use version::Version;
