//! Command-list proxy. Mirrors the host's compute-pipeline bindings so a
//! core-issued compute pass can put everything back exactly as the engine
//! left it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use super::{NativeHandle, Proxied, ProxyBase};

/// Seam over the wrapped native graphics command list; only the calls the
/// mirror needs to replay are surfaced, the rest forward untouched.
pub trait NativeCommandList: Send + Sync {
    fn set_compute_root_signature(&self, signature: NativeHandle);
    fn set_pipeline_state(&self, pipeline: NativeHandle);
    fn set_pipeline_state_object(&self, state_object: NativeHandle);
    fn set_descriptor_heaps(&self, heaps: &[NativeHandle]);
    fn set_compute_root_cbv(&self, index: u32, address: u64);
    fn set_compute_root_srv(&self, index: u32, address: u64);
    fn set_compute_root_uav(&self, index: u32, address: u64);
    fn set_compute_root_constants(&self, index: u32, values: &[u32]);
    fn handle(&self) -> NativeHandle;
}

/// The compute bindings the host has set, as last observed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComputeStateMirror {
    pub root_signature: Option<NativeHandle>,
    pub pipeline_state: Option<NativeHandle>,
    pub state_object: Option<NativeHandle>,
    pub descriptor_heaps: Vec<NativeHandle>,
    pub root_cbvs: BTreeMap<u32, u64>,
    pub root_srvs: BTreeMap<u32, u64>,
    pub root_uavs: BTreeMap<u32, u64>,
    pub root_constants: BTreeMap<u32, Vec<u32>>,
}

pub struct CommandListProxy {
    base: ProxyBase,
    native: Arc<dyn NativeCommandList>,
    mirror: Mutex<ComputeStateMirror>,
}

impl CommandListProxy {
    pub fn new(native: Arc<dyn NativeCommandList>, interface_version: u32) -> Self {
        Self {
            base: ProxyBase::new(native.handle(), interface_version),
            native,
            mirror: Mutex::new(ComputeStateMirror::default()),
        }
    }

    pub fn proxy_base(&self) -> &ProxyBase {
        &self.base
    }

    pub fn mirror(&self) -> ComputeStateMirror {
        self.mirror.lock().unwrap().clone()
    }

    // Intercepted methods: record, then forward.

    pub fn set_compute_root_signature(&self, signature: NativeHandle) {
        self.mirror.lock().unwrap().root_signature = Some(signature);
        self.native.set_compute_root_signature(signature);
    }

    pub fn set_pipeline_state(&self, pipeline: NativeHandle) {
        self.mirror.lock().unwrap().pipeline_state = Some(pipeline);
        self.native.set_pipeline_state(pipeline);
    }

    pub fn set_pipeline_state_object(&self, state_object: NativeHandle) {
        self.mirror.lock().unwrap().state_object = Some(state_object);
        self.native.set_pipeline_state_object(state_object);
    }

    pub fn set_descriptor_heaps(&self, heaps: &[NativeHandle]) {
        self.mirror.lock().unwrap().descriptor_heaps = heaps.to_vec();
        self.native.set_descriptor_heaps(heaps);
    }

    pub fn set_compute_root_cbv(&self, index: u32, address: u64) {
        self.mirror.lock().unwrap().root_cbvs.insert(index, address);
        self.native.set_compute_root_cbv(index, address);
    }

    pub fn set_compute_root_srv(&self, index: u32, address: u64) {
        self.mirror.lock().unwrap().root_srvs.insert(index, address);
        self.native.set_compute_root_srv(index, address);
    }

    pub fn set_compute_root_uav(&self, index: u32, address: u64) {
        self.mirror.lock().unwrap().root_uavs.insert(index, address);
        self.native.set_compute_root_uav(index, address);
    }

    pub fn set_compute_root_constants(&self, index: u32, values: &[u32]) {
        self.mirror.lock().unwrap().root_constants.insert(index, values.to_vec());
        self.native.set_compute_root_constants(index, values);
    }

    /// Replay the host's bindings after the core used the list. Called by
    /// `restore_pipeline` once a feature's passes are recorded.
    pub fn restore_state(&self) {
        let mirror = self.mirror.lock().unwrap().clone();
        if !mirror.descriptor_heaps.is_empty() {
            self.native.set_descriptor_heaps(&mirror.descriptor_heaps);
        }
        if let Some(signature) = mirror.root_signature {
            self.native.set_compute_root_signature(signature);
        }
        if let Some(pipeline) = mirror.pipeline_state {
            self.native.set_pipeline_state(pipeline);
        }
        if let Some(state_object) = mirror.state_object {
            self.native.set_pipeline_state_object(state_object);
        }
        for (&index, &address) in &mirror.root_cbvs {
            self.native.set_compute_root_cbv(index, address);
        }
        for (&index, &address) in &mirror.root_srvs {
            self.native.set_compute_root_srv(index, address);
        }
        for (&index, &address) in &mirror.root_uavs {
            self.native.set_compute_root_uav(index, address);
        }
        for (&index, values) in &mirror.root_constants {
            self.native.set_compute_root_constants(index, values);
        }
    }

    /// A reset list starts with clean state on both sides.
    pub fn on_reset(&self) {
        *self.mirror.lock().unwrap() = ComputeStateMirror::default();
    }
}

impl Proxied for CommandListProxy {
    fn native_base(&self) -> NativeHandle {
        self.base.base()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeCommandList {
        log: Mutex<Vec<String>>,
    }

    impl FakeCommandList {
        fn log(&self, entry: String) {
            self.log.lock().unwrap().push(entry);
        }

        fn take(&self) -> Vec<String> {
            std::mem::take(&mut self.log.lock().unwrap())
        }
    }

    impl NativeCommandList for FakeCommandList {
        fn set_compute_root_signature(&self, signature: NativeHandle) {
            self.log(format!("rs:{signature:#x}"));
        }
        fn set_pipeline_state(&self, pipeline: NativeHandle) {
            self.log(format!("pso:{pipeline:#x}"));
        }
        fn set_pipeline_state_object(&self, state_object: NativeHandle) {
            self.log(format!("so:{state_object:#x}"));
        }
        fn set_descriptor_heaps(&self, heaps: &[NativeHandle]) {
            self.log(format!("heaps:{}", heaps.len()));
        }
        fn set_compute_root_cbv(&self, index: u32, address: u64) {
            self.log(format!("cbv:{index}:{address:#x}"));
        }
        fn set_compute_root_srv(&self, index: u32, address: u64) {
            self.log(format!("srv:{index}:{address:#x}"));
        }
        fn set_compute_root_uav(&self, index: u32, address: u64) {
            self.log(format!("uav:{index}:{address:#x}"));
        }
        fn set_compute_root_constants(&self, index: u32, values: &[u32]) {
            self.log(format!("consts:{index}:{}", values.len()));
        }
        fn handle(&self) -> NativeHandle {
            0xc1
        }
    }

    #[test]
    fn restore_replays_exactly_what_the_host_set() {
        let native = Arc::new(FakeCommandList::default());
        let proxy = CommandListProxy::new(native.clone(), 10);

        proxy.set_compute_root_signature(0xa);
        proxy.set_pipeline_state(0xb);
        proxy.set_descriptor_heaps(&[0x1, 0x2]);
        proxy.set_compute_root_cbv(0, 0x1000);
        proxy.set_compute_root_uav(2, 0x2000);
        proxy.set_compute_root_constants(1, &[7, 8, 9]);
        native.take();

        // The core binds its own state directly on the native list, then
        // asks the proxy to put things back.
        proxy.restore_state();
        assert_eq!(
            native.take(),
            vec![
                "heaps:2",
                "rs:0xa",
                "pso:0xb",
                "cbv:0:0x1000",
                "uav:2:0x2000",
                "consts:1:3",
            ]
        );
    }

    #[test]
    fn later_binds_overwrite_the_mirror() {
        let native = Arc::new(FakeCommandList::default());
        let proxy = CommandListProxy::new(native, 10);
        proxy.set_compute_root_cbv(0, 0x1000);
        proxy.set_compute_root_cbv(0, 0x9999);
        assert_eq!(proxy.mirror().root_cbvs[&0], 0x9999);
    }

    #[test]
    fn reset_clears_the_mirror() {
        let native = Arc::new(FakeCommandList::default());
        let proxy = CommandListProxy::new(native, 10);
        proxy.set_pipeline_state(0xb);
        proxy.on_reset();
        assert_eq!(proxy.mirror(), ComputeStateMirror::default());
    }
}
