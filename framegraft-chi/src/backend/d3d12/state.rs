//! Per-thread dispatch accumulation for the D3D12 path.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use crate::compute::{CommandList, Sampler};
use crate::kernel::Kernel;

#[derive(Default)]
pub struct DispatchState {
    pub cmd: Option<CommandList>,
    pub kernel: Option<Kernel>,
    /// Slot → GPU descriptor handle (absolute heap pointer).
    pub srvs: BTreeMap<u32, u64>,
    pub uavs: BTreeMap<u32, u64>,
    /// Slot → GPU virtual address in the constants ring.
    pub constants: BTreeMap<u32, u64>,
    pub samplers: BTreeMap<u32, Sampler>,
}

/// The root-signature-relevant part of the bindings: which slots are
/// populated, not what they point at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingShape {
    pub srv_slots: Vec<u32>,
    pub uav_slots: Vec<u32>,
    pub cbv_slots: Vec<u32>,
    pub sampler_slots: Vec<(u32, Sampler)>,
}

impl BindingShape {
    pub fn hash(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.srv_slots.hash(&mut hasher);
        self.uav_slots.hash(&mut hasher);
        self.cbv_slots.hash(&mut hasher);
        self.sampler_slots.hash(&mut hasher);
        hasher.finish()
    }
}

impl DispatchState {
    pub fn reset(&mut self, cmd: CommandList) {
        self.cmd = Some(cmd);
        self.kernel = None;
        self.srvs.clear();
        self.uavs.clear();
        self.constants.clear();
        self.samplers.clear();
    }

    pub fn shape(&self) -> BindingShape {
        BindingShape {
            srv_slots: self.srvs.keys().copied().collect(),
            uav_slots: self.uavs.keys().copied().collect(),
            cbv_slots: self.constants.keys().copied().collect(),
            sampler_slots: self.samplers.iter().map(|(&s, &k)| (s, k)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_hash_ignores_bound_objects() {
        let mut a = DispatchState::default();
        a.srvs.insert(0, 0x100);
        a.constants.insert(0, 0x5000);
        let mut b = DispatchState::default();
        b.srvs.insert(0, 0x999);
        b.constants.insert(0, 0x7777);
        assert_eq!(a.shape().hash(), b.shape().hash());

        b.uavs.insert(0, 0x1);
        assert_ne!(a.shape().hash(), b.shape().hash());
    }
}
