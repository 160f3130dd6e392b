//! `ID3D12Fence` behind the portable fence contract.

use std::sync::Arc;
use std::time::Duration;

use windows::Win32::Graphics::Direct3D12::{ID3D12Device, ID3D12Fence, D3D12_FENCE_FLAG_NONE};

use crate::context::FenceOps;
use crate::error::{ComputeError, ComputeResult};

pub struct Dx12Fence {
    fence: ID3D12Fence,
    name: String,
}

unsafe impl Send for Dx12Fence {}
unsafe impl Sync for Dx12Fence {}

impl Dx12Fence {
    pub fn new(device: &ID3D12Device, name: &str) -> ComputeResult<Arc<Self>> {
        let fence: ID3D12Fence = unsafe { device.CreateFence(0, D3D12_FENCE_FLAG_NONE) }
            .map_err(|e| ComputeError::DriverError(format!("fence '{name}': {e}")))?;
        Ok(Arc::new(Self { fence, name: name.to_string() }))
    }

    pub fn raw(&self) -> &ID3D12Fence {
        &self.fence
    }
}

impl FenceOps for Dx12Fence {
    fn signal(&self, value: u64) -> ComputeResult<()> {
        unsafe { self.fence.Signal(value) }
            .map_err(|e| ComputeError::DriverError(format!("signal '{}': {e}", self.name)))
    }

    fn completed_value(&self) -> u64 {
        unsafe { self.fence.GetCompletedValue() }
    }

    fn wait(&self, value: u64, timeout: Duration) -> bool {
        super::wait_for_fence_event(&self.fence, value, timeout.as_millis() as u32).unwrap_or(false)
    }
}
