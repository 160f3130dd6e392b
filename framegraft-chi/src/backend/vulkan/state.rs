//! Per-thread dispatch accumulation. Binding calls fill this in; the next
//! `dispatch` resolves it against the pipeline caches and clears nothing,
//! so repeated dispatches with small binding deltas stay cheap.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use ash::vk;
use ash::vk::Handle;

use crate::compute::CommandList;
use crate::kernel::Kernel;

#[derive(Debug, Clone, Copy)]
pub struct BoundConstants {
    pub offset: u32,
    pub size: u64,
}

#[derive(Default)]
pub struct DispatchState {
    pub cmd: Option<CommandList>,
    pub kernel: Option<Kernel>,
    pub samplers: BTreeMap<u32, vk::Sampler>,
    pub textures: BTreeMap<u32, vk::ImageView>,
    pub rw_textures: BTreeMap<u32, vk::ImageView>,
    pub constants: BTreeMap<u32, BoundConstants>,
    /// Last written descriptor set and the bindings hash it covers;
    /// identical re-binds reuse it instead of writing a fresh set.
    pub last_set: Option<(u64, vk::DescriptorSet)>,
}

impl DispatchState {
    pub fn reset(&mut self, cmd: CommandList) {
        self.cmd = Some(cmd);
        self.kernel = None;
        self.samplers.clear();
        self.textures.clear();
        self.rw_textures.clear();
        self.constants.clear();
        self.last_set = None;
    }

    /// Hash of the binding shape (slots and descriptor kinds, not the
    /// bound objects); selects the descriptor-set layout variant.
    pub fn signature_hash(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.kernel.map(|k| k.0).unwrap_or(0).hash(&mut hasher);
        for &slot in self.samplers.keys() {
            (0u8, slot).hash(&mut hasher);
        }
        for &slot in self.textures.keys() {
            (1u8, slot).hash(&mut hasher);
        }
        for &slot in self.rw_textures.keys() {
            (2u8, slot).hash(&mut hasher);
        }
        for &slot in self.constants.keys() {
            (3u8, slot).hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Hash of the exact bound objects; identifies identical re-binds.
    pub fn bindings_hash(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.signature_hash().hash(&mut hasher);
        for (&slot, sampler) in &self.samplers {
            (slot, sampler.as_raw()).hash(&mut hasher);
        }
        for (&slot, view) in &self.textures {
            (slot, view.as_raw()).hash(&mut hasher);
        }
        for (&slot, view) in &self.rw_textures {
            (slot, view.as_raw()).hash(&mut hasher);
        }
        for (&slot, constants) in &self.constants {
            (slot, constants.offset).hash(&mut hasher);
        }
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_tracks_shape_not_objects() {
        let mut a = DispatchState::default();
        a.kernel = Some(Kernel(1));
        a.textures.insert(8, vk::ImageView::from_raw(0x10));
        let mut b = DispatchState::default();
        b.kernel = Some(Kernel(1));
        b.textures.insert(8, vk::ImageView::from_raw(0x20));

        assert_eq!(a.signature_hash(), b.signature_hash());
        assert_ne!(a.bindings_hash(), b.bindings_hash());

        b.textures.insert(9, vk::ImageView::from_raw(0x30));
        assert_ne!(a.signature_hash(), b.signature_hash());
    }

    #[test]
    fn reset_clears_bindings_but_keeps_command_list() {
        let mut state = DispatchState::default();
        state.kernel = Some(Kernel(1));
        state.samplers.insert(0, vk::Sampler::from_raw(1));
        state.reset(CommandList(5));
        assert_eq!(state.cmd, Some(CommandList(5)));
        assert!(state.kernel.is_none());
        assert!(state.samplers.is_empty());
    }
}
