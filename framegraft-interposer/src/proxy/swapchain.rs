//! Swap-chain proxy. Present and resize route through registered hooks;
//! the proxy keeps its creating device alive for its own lifetime.

use std::sync::Arc;

use framegraft_plugin::hooks::{ApiFunction, HookArgs, HookRegistry};

use super::{HResult, NativeHandle, Proxied, ProxyBase, S_OK};

/// Seam over the wrapped native swap chain.
pub trait NativeSwapChain: Send + Sync {
    fn present(&self, sync_interval: u32, flags: u32) -> HResult;
    fn present1(&self, sync_interval: u32, flags: u32) -> HResult {
        self.present(sync_interval, flags)
    }
    fn resize_buffers(
        &self,
        count: u32,
        width: u32,
        height: u32,
        format: u32,
        flags: u32,
    ) -> HResult;
    fn get_buffer(&self, index: u32) -> Option<NativeHandle>;
    fn handle(&self) -> NativeHandle;
    fn query_version(&self, version: u32) -> Option<NativeHandle>;
}

/// Owning reference to the device that created this swap chain. The
/// back-reference from device to swap chain is by id only, so there is
/// no cycle.
pub struct DeviceRef {
    pub handle: NativeHandle,
    pub keep_alive: Option<Arc<dyn std::any::Any + Send + Sync>>,
}

pub struct SwapChainProxy {
    base: ProxyBase,
    native: Arc<dyn NativeSwapChain>,
    hooks: Arc<HookRegistry>,
    device: DeviceRef,
    /// Runs before the native resize releases back buffers; the compute
    /// layer hangs its cached-view flush here.
    before_resize: Vec<Arc<dyn Fn() + Send + Sync>>,
}

impl SwapChainProxy {
    pub fn new(
        native: Arc<dyn NativeSwapChain>,
        interface_version: u32,
        hooks: Arc<HookRegistry>,
        device: DeviceRef,
    ) -> Self {
        Self {
            base: ProxyBase::new(native.handle(), interface_version),
            native,
            hooks,
            device,
            before_resize: Vec::new(),
        }
    }

    pub fn add_resize_listener(&mut self, listener: Arc<dyn Fn() + Send + Sync>) {
        self.before_resize.push(listener);
    }

    pub fn device_handle(&self) -> NativeHandle {
        self.device.handle
    }

    pub fn proxy_base(&self) -> &ProxyBase {
        &self.base
    }

    fn present_inner(&self, api: ApiFunction, sync_interval: u32, flags: u32) -> HResult {
        let args = HookArgs::Present { swap_chain: self.base.base(), sync_interval, flags };
        let skip = self.hooks.dispatch_pre(api, &args);
        let result = if skip {
            S_OK
        } else {
            match api {
                ApiFunction::Present1 => self.native.present1(sync_interval, flags),
                _ => self.native.present(sync_interval, flags),
            }
        };
        // After-hooks (frame housekeeping) run whether or not a plugin
        // swallowed the native present.
        self.hooks.dispatch_post(api, &args);
        result
    }

    pub fn present(&self, sync_interval: u32, flags: u32) -> HResult {
        self.present_inner(ApiFunction::Present, sync_interval, flags)
    }

    pub fn present1(&self, sync_interval: u32, flags: u32) -> HResult {
        self.present_inner(ApiFunction::Present1, sync_interval, flags)
    }

    pub fn resize_buffers(
        &self,
        count: u32,
        width: u32,
        height: u32,
        format: u32,
        flags: u32,
    ) -> HResult {
        let args = HookArgs::ResizeBuffers {
            swap_chain: self.base.base(),
            count,
            width,
            height,
            format,
            flags,
        };
        self.hooks.dispatch_pre(ApiFunction::ResizeBuffers, &args);
        // Cached views must drop their back-buffer references before the
        // native call can release them.
        for listener in &self.before_resize {
            listener();
        }
        let result = self.native.resize_buffers(count, width, height, format, flags);
        self.hooks.dispatch_post(ApiFunction::ResizeBuffers, &args);
        result
    }

    pub fn get_buffer(&self, index: u32) -> Option<NativeHandle> {
        self.native.get_buffer(index)
    }

    pub fn query_interface(&self, version: u32) -> framegraft_core::Result<NativeHandle> {
        self.base.query_interface(version, |_, v| self.native.query_version(v))
    }
}

impl Proxied for SwapChainProxy {
    fn native_base(&self) -> NativeHandle {
        self.base.base()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framegraft_plugin::hooks::{HookAction, HookPhase, HookRegistration};
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    struct FakeSwapChain {
        presents: AtomicUsize,
        resizes: AtomicUsize,
        version: u32,
    }

    impl FakeSwapChain {
        fn new(version: u32) -> Arc<Self> {
            Arc::new(Self {
                presents: AtomicUsize::new(0),
                resizes: AtomicUsize::new(0),
                version,
            })
        }
    }

    impl NativeSwapChain for FakeSwapChain {
        fn present(&self, _sync_interval: u32, _flags: u32) -> HResult {
            self.presents.fetch_add(1, Ordering::SeqCst);
            S_OK
        }

        fn resize_buffers(&self, _c: u32, _w: u32, _h: u32, _f: u32, _fl: u32) -> HResult {
            self.resizes.fetch_add(1, Ordering::SeqCst);
            S_OK
        }

        fn get_buffer(&self, index: u32) -> Option<NativeHandle> {
            (index < 3).then(|| 0x100 + index as u64)
        }

        fn handle(&self) -> NativeHandle {
            0x5c
        }

        fn query_version(&self, version: u32) -> Option<NativeHandle> {
            (version <= self.version).then_some(0x5c)
        }
    }

    fn proxy(native: Arc<FakeSwapChain>, hooks: Arc<HookRegistry>) -> SwapChainProxy {
        SwapChainProxy::new(native, 1, hooks, DeviceRef { handle: 0xd, keep_alive: None })
    }

    #[test]
    fn present_forwards_when_no_hook_skips() {
        let native = FakeSwapChain::new(4);
        let hooks = Arc::new(HookRegistry::new());
        let chain = proxy(native.clone(), hooks);
        assert_eq!(chain.present(1, 0), S_OK);
        assert_eq!(native.presents.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn replace_hook_skips_native_present_but_after_hooks_still_run() {
        let native = FakeSwapChain::new(4);
        let hooks = Arc::new(HookRegistry::new());
        let after_ran = Arc::new(AtomicUsize::new(0));
        hooks.register(HookRegistration {
            api: ApiFunction::Present,
            phase: HookPhase::Replace,
            plugin: "frame-generation".into(),
            callback: Arc::new(|_| HookAction { skip_native: true }),
        });
        {
            let after_ran = after_ran.clone();
            hooks.register(HookRegistration {
                api: ApiFunction::Present,
                phase: HookPhase::After,
                plugin: "common".into(),
                callback: Arc::new(move |_| {
                    after_ran.fetch_add(1, Ordering::SeqCst);
                    HookAction::default()
                }),
            });
        }
        let chain = proxy(native.clone(), hooks);
        assert_eq!(chain.present(1, 0), S_OK);
        assert_eq!(native.presents.load(Ordering::SeqCst), 0);
        assert_eq!(after_ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn resize_runs_listeners_before_the_native_call() {
        let native = FakeSwapChain::new(4);
        let hooks = Arc::new(HookRegistry::new());
        let mut chain = proxy(native.clone(), hooks);

        let order = Arc::new(AtomicU32::new(0));
        let listener_rank = Arc::new(AtomicU32::new(0));
        {
            let order = order.clone();
            let rank = listener_rank.clone();
            chain.add_resize_listener(Arc::new(move || {
                rank.store(order.fetch_add(1, Ordering::SeqCst) + 1, Ordering::SeqCst);
            }));
        }
        assert_eq!(chain.resize_buffers(3, 1920, 1080, 28, 0x800), S_OK);
        assert_eq!(native.resizes.load(Ordering::SeqCst), 1);
        assert_eq!(listener_rank.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn interface_upgrade_goes_through_the_native_object() {
        let native = FakeSwapChain::new(4);
        let hooks = Arc::new(HookRegistry::new());
        let chain = proxy(native, hooks);
        assert!(chain.query_interface(3).is_ok());
        assert_eq!(chain.proxy_base().interface_version(), 3);
        assert_eq!(
            chain.query_interface(9).unwrap_err(),
            framegraft_core::Error::UnsupportedInterface
        );
    }
}
