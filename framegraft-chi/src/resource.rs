//! Resource descriptions, portable states and the opaque resource handle.

use std::hash::{Hash, Hasher};

use crate::format::Format;

bitflags::bitflags! {
    /// How a resource may be bound.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct ResourceFlags: u32 {
        const SHADER_RESOURCE = 1 << 0;
        const SHADER_RESOURCE_STORAGE = 1 << 1;
        const COLOR_ATTACHMENT = 1 << 2;
        const DEPTH_STENCIL_ATTACHMENT = 1 << 3;
        const RAW_OR_STRUCTURED_BUFFER = 1 << 4;
        const CONSTANT_BUFFER = 1 << 5;
        const SHARED_RESOURCE = 1 << 6;
    }
}

bitflags::bitflags! {
    /// Portable resource state. Backends map each bit to their native
    /// state/layout enums; D3D11 ignores states entirely.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct ResourceState: u32 {
        const PRESENT = 1 << 0;
        const TEXTURE_READ = 1 << 1;
        const STORAGE_READ = 1 << 2;
        const STORAGE_WRITE = 1 << 3;
        const COLOR_ATTACHMENT_WRITE = 1 << 4;
        const DEPTH_STENCIL_READ = 1 << 5;
        const DEPTH_STENCIL_WRITE = 1 << 6;
        const COPY_SOURCE = 1 << 7;
        const COPY_DESTINATION = 1 << 8;
        const RESOLVE_SOURCE = 1 << 9;
        const RESOLVE_DESTINATION = 1 << 10;
        const ACCEL_STRUCT_READ = 1 << 11;
        const ACCEL_STRUCT_WRITE = 1 << 12;
        const ARGUMENT_BUFFER = 1 << 13;
        const INDEX_BUFFER = 1 << 14;
        const CONSTANT_BUFFER = 1 << 15;
        const VERTEX_BUFFER = 1 << 16;
        const STORAGE_RW = Self::STORAGE_READ.bits() | Self::STORAGE_WRITE.bits();
        const GENERAL = Self::STORAGE_RW.bits() | Self::TEXTURE_READ.bits();
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ResourceType {
    #[default]
    Texture2d,
    Buffer,
    Fence,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum HeapType {
    #[default]
    Default,
    Upload,
    Readback,
}

/// Everything needed to create or clone a resource.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceDescription {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mips: u32,
    pub format: Format,
    /// Backend-native format value when the portable enum cannot express it.
    pub native_format: u32,
    pub state: ResourceState,
    pub flags: ResourceFlags,
    pub heap_type: HeapType,
    pub creation_mask: u32,
    pub visibility_mask: u32,
    pub gpu_virtual_address: u64,
}

impl ResourceDescription {
    pub fn texture2d(width: u32, height: u32, format: Format, flags: ResourceFlags) -> Self {
        Self {
            width,
            height,
            depth: 1,
            mips: 1,
            format,
            flags,
            ..Default::default()
        }
    }

    pub fn buffer(size: u64, flags: ResourceFlags) -> Self {
        Self {
            width: size as u32,
            height: 1,
            depth: 1,
            mips: 1,
            flags,
            ..Default::default()
        }
    }

    /// Content hash used by the resource pool and the view caches. Only the
    /// fields that make two resources interchangeable participate.
    pub fn content_hash(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.width.hash(&mut hasher);
        self.height.hash(&mut hasher);
        self.depth.hash(&mut hasher);
        self.mips.hash(&mut hasher);
        self.format.hash(&mut hasher);
        self.native_format.hash(&mut hasher);
        self.flags.hash(&mut hasher);
        self.state.hash(&mut hasher);
        hasher.finish()
    }

    pub fn total_bytes(&self) -> u64 {
        let per_pixel = self.format.bytes_per_pixel().max(1) as u64;
        let mut bytes = 0u64;
        let (mut w, mut h) = (self.width.max(1) as u64, self.height.max(1) as u64);
        for _ in 0..self.mips.max(1) {
            bytes += w * h * self.depth.max(1) as u64 * per_pixel;
            w = (w / 2).max(1);
            h = (h / 2).max(1);
        }
        bytes
    }
}

/// A graphics resource as the compute layer sees it: an opaque native
/// handle plus the portable description.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resource {
    /// Backend-native object, type-erased. Zero means null.
    pub native: u64,
    pub kind: ResourceType,
    pub desc: ResourceDescription,
    pub debug_name: String,
}

impl Resource {
    pub fn is_null(&self) -> bool {
        self.native == 0
    }
}

/// Region of a tagged resource the feature should read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Extent {
    pub top: u32,
    pub left: u32,
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// One requested state change. Entries where `from == to` are dropped
/// before any native barrier is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceTransition {
    pub native: u64,
    pub to: ResourceState,
    pub from: ResourceState,
}

impl ResourceTransition {
    pub fn new(resource: &Resource, to: ResourceState, from: ResourceState) -> Self {
        Self { native: resource.native, to, from }
    }

    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }

    pub fn reversed(&self) -> Self {
        Self { native: self.native, to: self.from, from: self.to }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_ignores_debug_only_fields() {
        let mut a = ResourceDescription::texture2d(1920, 1080, Format::Rgba16Float, ResourceFlags::SHADER_RESOURCE_STORAGE);
        let b = a.clone();
        a.gpu_virtual_address = 0xdead_beef;
        a.creation_mask = 2;
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn content_hash_distinguishes_interchangeability() {
        let a = ResourceDescription::texture2d(1920, 1080, Format::Rgba16Float, ResourceFlags::SHADER_RESOURCE);
        let mut b = a.clone();
        b.format = Format::Rgba32Float;
        assert_ne!(a.content_hash(), b.content_hash());
        let mut c = a.clone();
        c.state = ResourceState::COPY_DESTINATION;
        assert_ne!(a.content_hash(), c.content_hash());
    }

    #[test]
    fn transition_noop_and_reverse() {
        let res = Resource { native: 7, ..Default::default() };
        let t = ResourceTransition::new(&res, ResourceState::COPY_SOURCE, ResourceState::TEXTURE_READ);
        assert!(!t.is_noop());
        let r = t.reversed();
        assert_eq!(r.to, ResourceState::TEXTURE_READ);
        assert_eq!(r.from, ResourceState::COPY_SOURCE);
        let n = ResourceTransition { native: 7, to: ResourceState::PRESENT, from: ResourceState::PRESENT };
        assert!(n.is_noop());
    }

    #[test]
    fn mip_chain_counts_toward_footprint() {
        let mut desc = ResourceDescription::texture2d(256, 256, Format::Rgba8Unorm, ResourceFlags::empty());
        assert_eq!(desc.total_bytes(), 256 * 256 * 4);
        desc.mips = 2;
        assert_eq!(desc.total_bytes(), 256 * 256 * 4 + 128 * 128 * 4);
    }
}
