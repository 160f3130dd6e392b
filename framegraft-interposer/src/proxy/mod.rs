//! Proxy machinery. Each proxy wraps a native interface behind a seam
//! trait (the Rust rendition of a fat vtable), forwards everything, and
//! intercepts the methods features care about. The base pointer sits at a
//! fixed offset so external tools can walk through a proxy, and the
//! highest successfully acquired interface version is cached.

use std::sync::atomic::{AtomicU32, Ordering};

use framegraft_core::{Error, Result};

pub mod command_list;
pub mod device;
pub mod swapchain;

pub type NativeHandle = u64;

/// COM-style success code returned by forwarded calls.
pub type HResult = i32;
pub const S_OK: HResult = 0;

/// Anything that can trade its proxy identity for the wrapped native
/// object.
pub trait Proxied {
    fn native_base(&self) -> NativeHandle;
}

/// State common to every proxy object. Field order is part of the
/// contract: the base pointer is the first field so tooling that walks
/// proxies finds it at a fixed offset.
#[repr(C)]
pub struct ProxyBase {
    base: NativeHandle,
    ref_count: AtomicU32,
    interface_version: AtomicU32,
}

impl ProxyBase {
    pub fn new(base: NativeHandle, interface_version: u32) -> Self {
        Self {
            base,
            ref_count: AtomicU32::new(1),
            interface_version: AtomicU32::new(interface_version),
        }
    }

    pub fn base(&self) -> NativeHandle {
        self.base
    }

    pub fn interface_version(&self) -> u32 {
        self.interface_version.load(Ordering::Acquire)
    }

    pub fn add_ref(&self) -> u32 {
        self.ref_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn release(&self) -> u32 {
        self.ref_count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }

    /// Capability query. Versions at or below the highest known derived
    /// interface are served directly; the first request for a newer one
    /// asks the base object through `query` and caches the answer.
    pub fn query_interface(
        &self,
        version: u32,
        query: impl FnOnce(NativeHandle, u32) -> Option<NativeHandle>,
    ) -> Result<NativeHandle> {
        if version <= self.interface_version() {
            self.add_ref();
            return Ok(self.base);
        }
        match query(self.base, version) {
            Some(acquired) => {
                self.interface_version.fetch_max(version, Ordering::AcqRel);
                self.add_ref();
                Ok(acquired)
            }
            None => Err(Error::UnsupportedInterface),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refcount_tracks_add_and_release() {
        let base = ProxyBase::new(0xbeef, 0);
        assert_eq!(base.ref_count(), 1);
        assert_eq!(base.add_ref(), 2);
        assert_eq!(base.release(), 1);
        assert_eq!(base.release(), 0);
    }

    #[test]
    fn query_serves_known_versions_without_the_base() {
        let base = ProxyBase::new(0xbeef, 5);
        let handle = base
            .query_interface(3, |_, _| panic!("known versions never hit the base"))
            .unwrap();
        assert_eq!(handle, 0xbeef);
        assert_eq!(base.interface_version(), 5);
    }

    #[test]
    fn query_upgrades_and_caches_newer_versions() {
        let base = ProxyBase::new(0xbeef, 2);
        let handle = base.query_interface(7, |native, version| {
            assert_eq!(native, 0xbeef);
            assert_eq!(version, 7);
            Some(0xbeef)
        });
        assert_eq!(handle.unwrap(), 0xbeef);
        assert_eq!(base.interface_version(), 7);
        // Second request is served from the cache.
        base.query_interface(7, |_, _| panic!("cached")).unwrap();
    }

    #[test]
    fn unknown_interface_is_reported() {
        let base = ProxyBase::new(0xbeef, 2);
        assert_eq!(
            base.query_interface(10, |_, _| None).unwrap_err(),
            Error::UnsupportedInterface
        );
        assert_eq!(base.interface_version(), 2);
    }
}
