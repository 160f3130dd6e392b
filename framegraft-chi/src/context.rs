//! Command-list contexts: a ring of recording slots, one fence value per
//! slot, bounded waits and the deadlock breaker.
//!
//! Ordering across contexts exists only through fence signals and waits.
//! Every wait is capped at 500 ms; a timeout is never fatal, it force
//! signals whatever this context was blocking against and surfaces
//! `Timeout` to the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::{ComputeError, ComputeResult};

/// Upper bound for any single fence wait.
pub const WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Backend fence. D3D12 maps this onto `ID3D12Fence`, Vulkan onto a
/// timeline semaphore; D3D11 shares a single fence across slots.
pub trait FenceOps: Send + Sync {
    /// Signal `value` from the CPU. Used for normal slot completion on
    /// backends without GPU timelines and by the deadlock breaker.
    fn signal(&self, value: u64) -> ComputeResult<()>;
    fn completed_value(&self) -> u64;
    /// Block until `completed_value() >= value`; false on timeout.
    fn wait(&self, value: u64, timeout: Duration) -> bool;
}

/// CPU-side fence used by tests and by backends that complete work on the
/// submission thread.
#[derive(Default)]
pub struct CpuFence {
    value: Mutex<u64>,
    cv: Condvar,
}

impl CpuFence {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl FenceOps for CpuFence {
    fn signal(&self, value: u64) -> ComputeResult<()> {
        let mut current = self.value.lock().unwrap();
        if value > *current {
            *current = value;
            self.cv.notify_all();
        }
        Ok(())
    }

    fn completed_value(&self) -> u64 {
        *self.value.lock().unwrap()
    }

    fn wait(&self, value: u64, timeout: Duration) -> bool {
        let guard = self.value.lock().unwrap();
        let (guard, result) = self
            .cv
            .wait_timeout_while(guard, timeout, |v| *v < value)
            .unwrap();
        drop(guard);
        !result.timed_out()
    }
}

/// Semaphore waits/signals attached to one submission.
#[derive(Default)]
pub struct SubmitInfo {
    pub wait_semaphores: Vec<(Arc<dyn FenceOps>, u64)>,
    pub signal_semaphores: Vec<(Arc<dyn FenceOps>, u64)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPoint {
    /// The most recent signal issued by this context.
    Current,
    /// The signal before it; the previously submitted slot.
    Default,
}

struct Slot {
    fence: Arc<dyn FenceOps>,
    last_signaled: AtomicU64,
}

/// Ring of recording slots plus the bookkeeping to wait safely.
pub struct CommandListContext {
    name: String,
    slots: Vec<Slot>,
    index: Mutex<usize>,
    next_value: AtomicU64,
    /// Remote fences this context is currently blocked on; force-signaled
    /// on a timeout to break wait cycles.
    waiting: Mutex<Vec<(Arc<dyn FenceOps>, u64)>>,
}

impl CommandListContext {
    /// One fence per slot. D3D11 passes the same fence for every slot.
    pub fn new(name: &str, fences: Vec<Arc<dyn FenceOps>>) -> Self {
        assert!(!fences.is_empty(), "context needs at least one slot");
        Self {
            name: name.to_string(),
            slots: fences
                .into_iter()
                .map(|fence| Slot { fence, last_signaled: AtomicU64::new(0) })
                .collect(),
            index: Mutex::new(0),
            next_value: AtomicU64::new(0),
            waiting: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn current_slot(&self) -> usize {
        *self.index.lock().unwrap()
    }

    pub fn slot_fence(&self, slot: usize) -> Arc<dyn FenceOps> {
        self.slots[slot].fence.clone()
    }

    /// Wait for the previous submission on the current slot so its
    /// allocator can be reset. Returns the slot index to record into.
    pub fn begin_command_list(&self) -> ComputeResult<usize> {
        let slot = self.current_slot();
        let pending = self.slots[slot].last_signaled.load(Ordering::Acquire);
        if pending > 0 {
            let fence = self.slots[slot].fence.clone();
            self.wait_on(&fence, pending)?;
        }
        Ok(slot)
    }

    /// Close and submit the current slot. `submit` runs between the
    /// requested waits and signals; the slot fence is signaled last and the
    /// ring advances.
    pub fn execute_command_list(
        &self,
        info: Option<SubmitInfo>,
        submit: impl FnOnce() -> ComputeResult<()>,
    ) -> ComputeResult<()> {
        let info = info.unwrap_or_default();
        for (fence, value) in &info.wait_semaphores {
            self.wait_on(fence, *value)?;
        }
        submit()?;
        for (fence, value) in &info.signal_semaphores {
            fence.signal(*value)?;
        }

        let mut index = self.index.lock().unwrap();
        let slot = &self.slots[*index];
        let value = self.next_value.fetch_add(1, Ordering::AcqRel) + 1;
        slot.fence.signal(value)?;
        slot.last_signaled.store(value, Ordering::Release);
        *index = (*index + 1) % self.slots.len();
        Ok(())
    }

    /// Wait for this context's own work.
    pub fn wait_for_command_list(&self, point: WaitPoint) -> ComputeResult<()> {
        let latest = self.next_value.load(Ordering::Acquire);
        if latest == 0 {
            return Ok(());
        }
        let target = match point {
            WaitPoint::Current => latest,
            WaitPoint::Default => latest.saturating_sub(1),
        };
        if target == 0 {
            return Ok(());
        }
        // The slot that signaled `target` is the one holding that value.
        for slot in &self.slots {
            if slot.last_signaled.load(Ordering::Acquire) == target {
                let fence = slot.fence.clone();
                return self.wait_on(&fence, target);
            }
        }
        Ok(()) // already retired and overwritten
    }

    /// Signal a fresh value on every slot and wait each one out.
    pub fn flush_all(&self) -> ComputeResult<()> {
        for slot in &self.slots {
            let value = self.next_value.fetch_add(1, Ordering::AcqRel) + 1;
            slot.fence.signal(value)?;
            slot.last_signaled.store(value, Ordering::Release);
            let fence = slot.fence.clone();
            self.wait_on(&fence, value)?;
        }
        Ok(())
    }

    /// Bounded wait on any fence, local or remote. On timeout, force-signal
    /// everything this context is blocked on so a cross-context cycle
    /// cannot hold the frame forever.
    pub fn wait_on(&self, fence: &Arc<dyn FenceOps>, value: u64) -> ComputeResult<()> {
        if fence.completed_value() >= value {
            return Ok(());
        }
        self.waiting.lock().unwrap().push((fence.clone(), value));
        let reached = fence.wait(value, WAIT_TIMEOUT);
        if !reached {
            tracing::warn!("context '{}' timed out waiting for fence value {value}", self.name);
            self.signal_all_waiting();
        }
        self.waiting
            .lock()
            .unwrap()
            .retain(|(f, v)| !(Arc::ptr_eq(f, fence) && *v == value));
        if reached {
            Ok(())
        } else {
            Err(ComputeError::Timeout)
        }
    }

    fn signal_all_waiting(&self) {
        let waiting = self.waiting.lock().unwrap();
        for (fence, value) in waiting.iter() {
            let target = (*value).max(fence.completed_value() + 1);
            tracing::warn!(
                "context '{}' force-signaling fence to {target} to break a deadlock",
                self.name
            );
            let _ = fence.signal(target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn context(slots: usize) -> CommandListContext {
        let fences: Vec<Arc<dyn FenceOps>> =
            (0..slots).map(|_| CpuFence::new() as Arc<dyn FenceOps>).collect();
        CommandListContext::new("test", fences)
    }

    #[test]
    fn execute_signals_and_advances_ring() {
        let ctx = context(3);
        assert_eq!(ctx.current_slot(), 0);
        ctx.execute_command_list(None, || Ok(())).unwrap();
        assert_eq!(ctx.current_slot(), 1);
        assert_eq!(ctx.slot_fence(0).completed_value(), 1);
        ctx.execute_command_list(None, || Ok(())).unwrap();
        assert_eq!(ctx.slot_fence(1).completed_value(), 2);
        ctx.wait_for_command_list(WaitPoint::Current).unwrap();
        ctx.wait_for_command_list(WaitPoint::Default).unwrap();
    }

    #[test]
    fn begin_after_full_ring_waits_on_completed_slot() {
        let ctx = context(2);
        for _ in 0..4 {
            let slot = ctx.begin_command_list().unwrap();
            ctx.execute_command_list(None, || Ok(())).unwrap();
            assert!(slot < 2);
        }
    }

    #[test]
    fn wait_returns_within_bound_when_never_signaled() {
        let ctx = context(1);
        let stuck: Arc<dyn FenceOps> = CpuFence::new();
        let start = Instant::now();
        let result = ctx.wait_on(&stuck, 5);
        let elapsed = start.elapsed();
        assert_eq!(result, Err(ComputeError::Timeout));
        assert!(elapsed < WAIT_TIMEOUT + Duration::from_millis(200));
        // The breaker released the fence for anyone else stuck on it.
        assert!(stuck.completed_value() >= 5);
    }

    #[test]
    fn breaker_releases_a_blocked_peer() {
        let ctx_a = Arc::new(context(1));
        let stuck: Arc<dyn FenceOps> = CpuFence::new();

        // A peer blocks on the same fence value on another thread.
        let peer_fence = stuck.clone();
        let peer = std::thread::spawn(move || peer_fence.wait(3, Duration::from_secs(10)));

        // This context times out and force-signals, releasing the peer.
        let result = ctx_a.wait_on(&stuck, 3);
        assert_eq!(result, Err(ComputeError::Timeout));
        assert!(peer.join().unwrap());
    }

    #[test]
    fn flush_all_drains_every_slot() {
        let ctx = context(3);
        ctx.execute_command_list(None, || Ok(())).unwrap();
        ctx.flush_all().unwrap();
        for i in 0..3 {
            assert!(ctx.slot_fence(i).completed_value() > 0);
        }
    }

    #[test]
    fn submit_failure_skips_the_signal() {
        let ctx = context(2);
        let result = ctx.execute_command_list(None, || {
            Err(ComputeError::DriverError("device lost".into()))
        });
        assert!(result.is_err());
        assert_eq!(ctx.slot_fence(0).completed_value(), 0);
        assert_eq!(ctx.current_slot(), 0);
    }
}
