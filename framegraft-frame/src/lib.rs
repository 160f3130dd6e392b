//! Frame coordination core: frame tokens, per-viewport constants and
//! tags, volatile-tag cloning and the `evaluate` dispatch.

pub mod common;
pub mod constants;
pub mod evaluate;
pub mod ngx;
pub mod state;
pub mod tags;
pub mod token;

pub use common::{CommonPlugin, COMMON_PLUGIN_NAME};
pub use constants::{Constants, ViewportFrameData};
pub use evaluate::{EvaluateInputs, FrameCore};
pub use ngx::{DrsContext, NgxContext};
pub use state::{FeatureState, FeatureStateMachine};
pub use tags::{CommonResource, PrecisionInfo, ResourceTagEntry, TagStore};
pub use token::{FrameToken, FrameTokenRing, MAX_FRAMES_IN_FLIGHT};
