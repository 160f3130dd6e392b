//! Process-wide typed key-value registry used as the cross-plugin bus.
//!
//! Plugins publish callbacks, interface objects and capability values here
//! so that other plugins can pick them up without linking against each
//! other.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A value on the bus.
#[derive(Clone)]
pub enum Value {
    Bool(bool),
    UInt(u64),
    Int(i64),
    Float(f32),
    String(String),
    /// Raw interface pointer handed through from the host.
    Pointer(usize),
    /// Shared object (contexts, callback tables).
    Object(Arc<dyn Any + Send + Sync>),
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "Bool({v})"),
            Value::UInt(v) => write!(f, "UInt({v})"),
            Value::Int(v) => write!(f, "Int({v})"),
            Value::Float(v) => write!(f, "Float({v})"),
            Value::String(v) => write!(f, "String({v:?})"),
            Value::Pointer(v) => write!(f, "Pointer({v:#x})"),
            Value::Object(_) => write!(f, "Object(..)"),
        }
    }
}

/// Well-known bus keys.
pub mod keys {
    /// `Object` holding the standard NGX context.
    pub const NGX_CONTEXT: &str = "common.ngx.context";
    /// `Object` holding the D3D12 NGX context used when bridging D3D11.
    pub const NGX_CONTEXT_D3D12: &str = "common.ngx.context.d3d12";
    /// `Object` holding the driver registry settings context.
    pub const DRS_CONTEXT: &str = "common.drs.context";
    /// `Object` holding the detected system capabilities.
    pub const SYSTEM_CAPS: &str = "common.system.caps";
    /// `Object` holding the compute interface for the host's API.
    pub const COMPUTE: &str = "common.compute.api";
    /// `Object` holding the bridged D3D12 compute interface, when present.
    pub const COMPUTE_D3D12: &str = "common.compute.api.d3d12";
    /// `Pointer` to the host's device.
    pub const DEVICE: &str = "interposer.device";
    /// `UInt` render API selected at init, see `RenderApi`.
    pub const RENDER_API: &str = "interposer.render.api";
}

/// The bus itself. One instance per process, shared by `Arc`.
#[derive(Default)]
pub struct Parameters {
    map: RwLock<HashMap<String, Value>>,
}

impl Parameters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, key: &str, value: Value) {
        self.map.write().unwrap().insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.map.read().unwrap().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> bool {
        self.map.write().unwrap().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.map.write().unwrap().clear();
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_uint(&self, key: &str) -> Option<u64> {
        match self.get(key)? {
            Value::UInt(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_float(&self, key: &str) -> Option<f32> {
        match self.get(key)? {
            Value::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_pointer(&self, key: &str) -> Option<usize> {
        match self.get(key)? {
            Value::Pointer(v) => Some(v),
            _ => None,
        }
    }

    /// Typed downcast of an `Object` value.
    pub fn get_object<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        match self.get(key)? {
            Value::Object(obj) => obj.downcast::<T>().ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_scalar_values() {
        let params = Parameters::new();
        params.set("a", Value::UInt(42));
        params.set("b", Value::String("hello".into()));
        assert_eq!(params.get_uint("a"), Some(42));
        assert_eq!(params.get_string("b"), Some("hello".into()));
        assert_eq!(params.get_uint("b"), None);
        assert_eq!(params.get_uint("missing"), None);
    }

    #[test]
    fn objects_downcast_to_their_type() {
        struct NgxStub {
            id: u32,
        }
        let params = Parameters::new();
        params.set(keys::NGX_CONTEXT, Value::Object(Arc::new(NgxStub { id: 3 })));
        let ctx = params.get_object::<NgxStub>(keys::NGX_CONTEXT).unwrap();
        assert_eq!(ctx.id, 3);
        assert!(params.get_object::<String>(keys::NGX_CONTEXT).is_none());
    }

    #[test]
    fn remove_and_clear() {
        let params = Parameters::new();
        params.set("k", Value::Bool(true));
        assert!(params.remove("k"));
        assert!(!params.remove("k"));
        params.set("k", Value::Bool(true));
        params.clear();
        assert_eq!(params.get_bool("k"), None);
    }
}
