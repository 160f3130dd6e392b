//! Device, command-queue and factory proxies. Creation calls hand back
//! proxied objects; execution calls unwrap any proxies the host passes
//! in before reaching the driver.

use std::sync::Arc;

use framegraft_plugin::hooks::{ApiFunction, HookArgs, HookRegistry};

use super::command_list::{CommandListProxy, NativeCommandList};
use super::swapchain::{DeviceRef, NativeSwapChain, SwapChainProxy};
use super::{NativeHandle, Proxied, ProxyBase};

pub trait NativeDevice: Send + Sync {
    fn create_command_queue(&self, queue_type: u32) -> Option<NativeHandle>;
    fn create_command_list(&self, list_type: u32) -> Option<Arc<dyn NativeCommandList>>;
    fn handle(&self) -> NativeHandle;
    fn query_version(&self, version: u32) -> Option<NativeHandle>;
}

pub trait NativeCommandQueue: Send + Sync {
    fn execute_command_lists(&self, lists: &[NativeHandle]);
    fn signal(&self, fence: NativeHandle, value: u64) -> i32;
    fn handle(&self) -> NativeHandle;
}

pub struct DeviceProxy {
    base: ProxyBase,
    native: Arc<dyn NativeDevice>,
    hooks: Arc<HookRegistry>,
}

impl DeviceProxy {
    pub fn new(native: Arc<dyn NativeDevice>, interface_version: u32, hooks: Arc<HookRegistry>) -> Self {
        Self {
            base: ProxyBase::new(native.handle(), interface_version),
            native,
            hooks,
        }
    }

    pub fn proxy_base(&self) -> &ProxyBase {
        &self.base
    }

    pub fn create_command_queue(&self, queue_type: u32) -> Option<CommandQueueProxy> {
        self.hooks.dispatch_pre(ApiFunction::CreateCommandQueue, &HookArgs::Generic);
        let handle = self.native.create_command_queue(queue_type)?;
        self.hooks.dispatch_post(ApiFunction::CreateCommandQueue, &HookArgs::Generic);
        Some(CommandQueueProxy::new_raw(handle, self.hooks.clone()))
    }

    pub fn create_command_list(&self, list_type: u32) -> Option<CommandListProxy> {
        self.hooks.dispatch_pre(ApiFunction::CreateCommandList, &HookArgs::Generic);
        let native = self.native.create_command_list(list_type)?;
        self.hooks.dispatch_post(ApiFunction::CreateCommandList, &HookArgs::Generic);
        Some(CommandListProxy::new(native, 0))
    }

    pub fn query_interface(&self, version: u32) -> framegraft_core::Result<NativeHandle> {
        self.base.query_interface(version, |_, v| self.native.query_version(v))
    }
}

impl Proxied for DeviceProxy {
    fn native_base(&self) -> NativeHandle {
        self.base.base()
    }
}

pub struct CommandQueueProxy {
    base: ProxyBase,
    native: Option<Arc<dyn NativeCommandQueue>>,
    hooks: Arc<HookRegistry>,
}

impl CommandQueueProxy {
    pub fn new(native: Arc<dyn NativeCommandQueue>, hooks: Arc<HookRegistry>) -> Self {
        Self {
            base: ProxyBase::new(native.handle(), 0),
            native: Some(native),
            hooks,
        }
    }

    fn new_raw(handle: NativeHandle, hooks: Arc<HookRegistry>) -> Self {
        Self { base: ProxyBase::new(handle, 0), native: None, hooks }
    }

    pub fn proxy_base(&self) -> &ProxyBase {
        &self.base
    }

    /// The host may hand proxy pointers here; the driver must only ever
    /// see base pointers.
    pub fn execute_command_lists(&self, lists: &[&dyn Proxied]) {
        let unwrapped: Vec<NativeHandle> = lists.iter().map(|l| l.native_base()).collect();
        let args = HookArgs::ExecuteCommandLists {
            queue: self.base.base(),
            count: unwrapped.len() as u32,
        };
        let skip = self.hooks.dispatch_pre(ApiFunction::ExecuteCommandLists, &args);
        if !skip {
            if let Some(native) = &self.native {
                native.execute_command_lists(&unwrapped);
            }
        }
        self.hooks.dispatch_post(ApiFunction::ExecuteCommandLists, &args);
    }
}

impl Proxied for CommandQueueProxy {
    fn native_base(&self) -> NativeHandle {
        self.base.base()
    }
}

pub trait NativeFactory: Send + Sync {
    fn create_swap_chain(
        &self,
        device: NativeHandle,
        width: u32,
        height: u32,
        format: u32,
        buffer_count: u32,
    ) -> Option<Arc<dyn NativeSwapChain>>;
    fn handle(&self) -> NativeHandle;
    fn query_version(&self, version: u32) -> Option<NativeHandle>;
}

pub struct FactoryProxy {
    base: ProxyBase,
    native: Arc<dyn NativeFactory>,
    hooks: Arc<HookRegistry>,
}

impl FactoryProxy {
    pub fn new(native: Arc<dyn NativeFactory>, interface_version: u32, hooks: Arc<HookRegistry>) -> Self {
        Self {
            base: ProxyBase::new(native.handle(), interface_version),
            native,
            hooks,
        }
    }

    /// Swap chains come back proxied and holding an owning reference to
    /// the device that created them.
    pub fn create_swap_chain(
        &self,
        device: &dyn Proxied,
        keep_alive: Option<Arc<dyn std::any::Any + Send + Sync>>,
        width: u32,
        height: u32,
        format: u32,
        buffer_count: u32,
    ) -> Option<SwapChainProxy> {
        self.hooks.dispatch_pre(ApiFunction::CreateSwapChain, &HookArgs::Generic);
        let native = self.native.create_swap_chain(
            device.native_base(),
            width,
            height,
            format,
            buffer_count,
        )?;
        self.hooks.dispatch_post(ApiFunction::CreateSwapChain, &HookArgs::Generic);
        Some(SwapChainProxy::new(
            native,
            0,
            self.hooks.clone(),
            DeviceRef { handle: device.native_base(), keep_alive },
        ))
    }

    pub fn query_interface(&self, version: u32) -> framegraft_core::Result<NativeHandle> {
        self.base.query_interface(version, |_, v| self.native.query_version(v))
    }
}

impl Proxied for FactoryProxy {
    fn native_base(&self) -> NativeHandle {
        self.base.base()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeQueue {
        executed: Mutex<Vec<Vec<NativeHandle>>>,
    }

    impl NativeCommandQueue for FakeQueue {
        fn execute_command_lists(&self, lists: &[NativeHandle]) {
            self.executed.lock().unwrap().push(lists.to_vec());
        }
        fn signal(&self, _fence: NativeHandle, _value: u64) -> i32 {
            0
        }
        fn handle(&self) -> NativeHandle {
            0x9
        }
    }

    struct Raw(NativeHandle);
    impl Proxied for Raw {
        fn native_base(&self) -> NativeHandle {
            self.0
        }
    }

    #[test]
    fn execute_unwraps_proxies_to_base_pointers() {
        let native = Arc::new(FakeQueue { executed: Mutex::new(Vec::new()) });
        let hooks = Arc::new(HookRegistry::new());
        let queue = CommandQueueProxy::new(native.clone(), hooks);
        queue.execute_command_lists(&[&Raw(0x10), &Raw(0x20)]);
        assert_eq!(*native.executed.lock().unwrap(), vec![vec![0x10, 0x20]]);
    }
}
