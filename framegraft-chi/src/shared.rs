//! Shared-resource translation between backends.
//!
//! When a D3D11 host hands a resource to a feature that records on D3D12,
//! the cache produces a resource the other backend can address through an
//! OS shared handle. Sources that cannot be shared directly (most
//! depth/stencil formats are not NT-shareable) get a shareable clone in
//! the source backend; the copy into that clone is a per-frame compute
//! dispatch the source backend issues in `prepare`.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::compute::Compute;
use crate::error::ComputeResult;
use crate::resource::{Resource, ResourceFlags};

/// One translated entry: the source, an optional shareable clone and the
/// resource as seen by the other backend.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedResource {
    pub source: Resource,
    pub clone: Option<Resource>,
    pub translated: Resource,
    pub os_handle: u64,
}

impl TranslatedResource {
    /// The resource the source backend must copy into each frame, if any.
    pub fn needs_copy(&self) -> bool {
        self.clone.is_some()
    }
}

#[derive(Default)]
pub struct SharedResourceCache {
    map: Mutex<HashMap<u64, TranslatedResource>>,
}

impl SharedResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate `source` from `source_api` into `target_api`, reusing the
    /// cached entry when the source pointer is still live. A stale entry
    /// (driver recycled the pointer under a different tag) is dropped and
    /// rebuilt.
    pub fn fetch(
        &self,
        source_api: &dyn Compute,
        target_api: &dyn Compute,
        source: &Resource,
        name: &str,
    ) -> ComputeResult<TranslatedResource> {
        {
            let mut map = self.map.lock().unwrap();
            if let Some(cached) = map.get(&source.native) {
                let still_tracked = source_api.generic().is_tracked_pointer(source.native);
                if still_tracked {
                    return Ok(cached.clone());
                }
                tracing::warn!(
                    "detected recycled resource {:#x}; dropping it from the shared cache",
                    source.native
                );
                map.remove(&source.native);
            }
        }

        let shareable = source.desc.flags.contains(ResourceFlags::SHARED_RESOURCE)
            && !source.desc.format.is_depth();

        let (clone, os_handle) = if shareable {
            (None, source_api.create_shared_handle(source)?)
        } else {
            // Not NT-shareable; allocate a shareable clone with a
            // compatible typed format and share that instead.
            let mut desc = source.desc.clone();
            desc.format = desc.format.correct_format();
            desc.flags |= ResourceFlags::SHARED_RESOURCE | ResourceFlags::SHADER_RESOURCE_STORAGE;
            desc.flags &= !ResourceFlags::DEPTH_STENCIL_ATTACHMENT;
            source_api.begin_vram_segment("shared.translate");
            let clone = source_api.create_texture2d(&desc, &format!("{name}.shareable"));
            source_api.end_vram_segment();
            let clone = clone?;
            let handle = source_api.create_shared_handle(&clone)?;
            (Some(clone), handle)
        };

        let translated = target_api.open_shared_resource(os_handle, name)?;
        let entry = TranslatedResource {
            source: source.clone(),
            clone,
            translated,
            os_handle,
        };
        // Mark the source so pointer recycling is detectable later.
        source_api
            .generic()
            .start_tracking(source.native as u32, source.native);
        self.map.lock().unwrap().insert(source.native, entry.clone());
        Ok(entry)
    }

    pub fn remove(&self, source_native: u64) -> Option<TranslatedResource> {
        self.map.lock().unwrap().remove(&source_native)
    }

    pub fn clear(&self) {
        self.map.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.map.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::RenderApi;
    use crate::error::ComputeError;
    use crate::format::Format;
    use crate::resource::ResourceDescription;
    use crate::testing::RecordingCompute;

    // RecordingCompute has no sharing support; wrap it with just enough.
    struct SharingCompute {
        inner: RecordingCompute,
        opened: std::sync::atomic::AtomicU64,
    }

    impl SharingCompute {
        fn new(api: RenderApi) -> Self {
            Self {
                inner: RecordingCompute::new(api),
                opened: std::sync::atomic::AtomicU64::new(0x9000),
            }
        }
    }

    impl Compute for SharingCompute {
        fn render_api(&self) -> RenderApi {
            self.inner.render_api()
        }
        fn device(&self) -> crate::compute::Device {
            self.inner.device()
        }
        fn generic(&self) -> &crate::generic::GenericState {
            self.inner.generic()
        }
        fn create_kernel(&self, d: &crate::kernel::KernelDesc) -> ComputeResult<crate::kernel::Kernel> {
            self.inner.create_kernel(d)
        }
        fn destroy_kernel(&self, k: crate::kernel::Kernel) -> ComputeResult<()> {
            self.inner.destroy_kernel(k)
        }
        fn create_buffer(&self, d: &ResourceDescription, n: &str) -> ComputeResult<Resource> {
            self.inner.create_buffer(d, n)
        }
        fn create_texture2d(&self, d: &ResourceDescription, n: &str) -> ComputeResult<Resource> {
            self.inner.create_texture2d(d, n)
        }
        fn clone_resource(
            &self,
            s: &Resource,
            n: &str,
            st: crate::resource::ResourceState,
        ) -> ComputeResult<Resource> {
            self.inner.clone_resource(s, n, st)
        }
        fn destroy_resource(&self, r: &Resource, fd: u32) -> ComputeResult<()> {
            self.inner.destroy_resource(r, fd)
        }
        fn destroy_resource_now(&self, r: &Resource) -> ComputeResult<()> {
            self.inner.destroy_resource_now(r)
        }
        fn bind_shared_state(&self, c: crate::compute::CommandList) -> ComputeResult<()> {
            self.inner.bind_shared_state(c)
        }
        fn bind_kernel(&self, k: crate::kernel::Kernel) -> ComputeResult<()> {
            self.inner.bind_kernel(k)
        }
        fn bind_consts(&self, s: u32, d: &[u8]) -> ComputeResult<()> {
            self.inner.bind_consts(s, d)
        }
        fn bind_texture(&self, s: u32, r: &Resource, mo: u32, ml: u32) -> ComputeResult<()> {
            self.inner.bind_texture(s, r, mo, ml)
        }
        fn bind_rw_texture(&self, s: u32, r: &Resource, mo: u32) -> ComputeResult<()> {
            self.inner.bind_rw_texture(s, r, mo)
        }
        fn dispatch(&self, x: u32, y: u32, z: u32) -> ComputeResult<()> {
            self.inner.dispatch(x, y, z)
        }
        fn copy_resource(
            &self,
            c: crate::compute::CommandList,
            d: &Resource,
            s: &Resource,
        ) -> ComputeResult<()> {
            self.inner.copy_resource(c, d, s)
        }
        fn insert_gpu_barrier(
            &self,
            c: crate::compute::CommandList,
            r: &Resource,
        ) -> ComputeResult<()> {
            self.inner.insert_gpu_barrier(c, r)
        }
        fn create_shared_handle(&self, resource: &Resource) -> ComputeResult<u64> {
            Ok(resource.native | 0x8000_0000_0000_0000)
        }
        fn open_shared_resource(&self, handle: u64, name: &str) -> ComputeResult<Resource> {
            if handle == 0 {
                return Err(ComputeError::InvalidArgument("null shared handle".into()));
            }
            Ok(Resource {
                native: self.opened.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
                debug_name: name.to_string(),
                ..Default::default()
            })
        }
    }

    fn color_source(api: &SharingCompute) -> Resource {
        let desc = ResourceDescription {
            flags: ResourceFlags::SHARED_RESOURCE | ResourceFlags::SHADER_RESOURCE,
            ..ResourceDescription::texture2d(64, 64, Format::Rgba8Unorm, ResourceFlags::empty())
        };
        api.create_texture2d(&desc, "color").unwrap()
    }

    #[test]
    fn shareable_source_translates_without_a_clone() {
        let d3d11 = SharingCompute::new(RenderApi::D3d11);
        let d3d12 = SharingCompute::new(RenderApi::D3d12);
        let cache = SharedResourceCache::new();
        let source = color_source(&d3d11);

        let entry = cache.fetch(&d3d11, &d3d12, &source, "color").unwrap();
        assert!(entry.clone.is_none());
        assert!(!entry.needs_copy());
        assert_ne!(entry.translated.native, source.native);

        // Second fetch is served from the cache.
        let again = cache.fetch(&d3d11, &d3d12, &source, "color").unwrap();
        assert_eq!(again.translated.native, entry.translated.native);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn depth_source_gets_a_shareable_clone() {
        let d3d11 = SharingCompute::new(RenderApi::D3d11);
        let d3d12 = SharingCompute::new(RenderApi::D3d12);
        let cache = SharedResourceCache::new();
        let depth_desc = ResourceDescription::texture2d(
            64,
            64,
            Format::D24UnormS8Uint,
            ResourceFlags::DEPTH_STENCIL_ATTACHMENT,
        );
        let depth = d3d11.create_texture2d(&depth_desc, "depth").unwrap();

        let entry = cache.fetch(&d3d11, &d3d12, &depth, "depth").unwrap();
        let clone = entry.clone.as_ref().expect("depth needs a shareable clone");
        assert!(entry.needs_copy());
        assert_eq!(clone.desc.format, Format::R32Uint);
        assert!(clone.desc.flags.contains(ResourceFlags::SHARED_RESOURCE));
        assert!(!clone.desc.flags.contains(ResourceFlags::DEPTH_STENCIL_ATTACHMENT));
    }

    #[test]
    fn recycled_pointer_is_evicted() {
        let d3d11 = SharingCompute::new(RenderApi::D3d11);
        let d3d12 = SharingCompute::new(RenderApi::D3d12);
        let cache = SharedResourceCache::new();
        let source = color_source(&d3d11);

        let first = cache.fetch(&d3d11, &d3d12, &source, "color").unwrap();
        // The driver hands the same pointer out for a different resource:
        // tracking for the old tag is gone.
        d3d11.generic().stop_tracking(source.native as u32);
        let second = cache.fetch(&d3d11, &d3d12, &source, "color").unwrap();
        assert_ne!(first.translated.native, second.translated.native);
    }
}
