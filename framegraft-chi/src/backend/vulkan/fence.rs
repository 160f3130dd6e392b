//! Timeline-semaphore fence. One per context slot; CPU signals cover the
//! deadlock breaker and D3D-style force completion.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;

use crate::context::FenceOps;
use crate::error::{ComputeError, ComputeResult};

pub struct TimelineSemaphore {
    device: ash::Device,
    semaphore: vk::Semaphore,
    name: String,
}

impl TimelineSemaphore {
    pub fn new(device: ash::Device, name: &str) -> ComputeResult<Arc<Self>> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        let semaphore = unsafe { device.create_semaphore(&create_info, None) }.map_err(|e| {
            ComputeError::ResourceCreationFailed(format!("timeline semaphore '{name}': {e}"))
        })?;
        Ok(Arc::new(Self { device, semaphore, name: name.to_string() }))
    }

    pub fn raw(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl FenceOps for TimelineSemaphore {
    fn signal(&self, value: u64) -> ComputeResult<()> {
        let info = vk::SemaphoreSignalInfo::default().semaphore(self.semaphore).value(value);
        unsafe { self.device.signal_semaphore(&info) }
            .map_err(|e| ComputeError::DriverError(format!("signal '{}': {e}", self.name)))
    }

    fn completed_value(&self) -> u64 {
        unsafe { self.device.get_semaphore_counter_value(self.semaphore) }.unwrap_or(0)
    }

    fn wait(&self, value: u64, timeout: Duration) -> bool {
        let semaphores = [self.semaphore];
        let values = [value];
        let info = vk::SemaphoreWaitInfo::default().semaphores(&semaphores).values(&values);
        unsafe { self.device.wait_semaphores(&info, timeout.as_nanos() as u64) }.is_ok()
    }
}

impl Drop for TimelineSemaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}
