//! Compute abstraction: one resource, descriptor, command and
//! synchronization model across D3D11, D3D12 and Vulkan.

pub mod backend;
pub mod compute;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod format;
pub mod generic;
pub mod kernel;
pub mod pool;
pub mod resource;
pub mod shared;
pub mod testing;

pub use compute::{
    consts_bytes, transition_scoped, CommandList, CommandQueue, Compute, Device, RenderApi,
    Sampler, ScopedTasks, SwapChain,
};
pub use context::{CommandListContext, CpuFence, FenceOps, SubmitInfo, WaitPoint, WAIT_TIMEOUT};
pub use error::{ComputeError, ComputeResult};
pub use format::Format;
pub use generic::{GenericState, GLOBAL_VRAM_SEGMENT};
pub use kernel::{Kernel, KernelDesc};
pub use pool::{HashedResource, PoolTuning, ResourcePool};
pub use resource::{
    Extent, Resource, ResourceDescription, ResourceFlags, ResourceState, ResourceTransition,
    ResourceType,
};
pub use shared::{SharedResourceCache, TranslatedResource};
