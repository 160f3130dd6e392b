//! Compiled compute kernels are interned by a content hash so that the
//! same bytecode handed in twice maps to one backend object.

use std::hash::{Hash, Hasher};

/// Stable kernel identity: hash of name, entry point and bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Kernel(pub u64);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelDesc {
    pub name: String,
    pub entry_point: String,
    pub bytecode: Vec<u8>,
}

impl KernelDesc {
    pub fn new(name: &str, entry_point: &str, bytecode: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            entry_point: entry_point.to_string(),
            bytecode: bytecode.to_vec(),
        }
    }

    pub fn id(&self) -> Kernel {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.name.hash(&mut hasher);
        self.entry_point.hash(&mut hasher);
        self.bytecode.hash(&mut hasher);
        Kernel(hasher.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_kernels_intern_to_one_id() {
        let a = KernelDesc::new("copy", "main", &[1, 2, 3]);
        let b = KernelDesc::new("copy", "main", &[1, 2, 3]);
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn any_field_change_changes_identity() {
        let base = KernelDesc::new("copy", "main", &[1, 2, 3]);
        assert_ne!(base.id(), KernelDesc::new("copy2", "main", &[1, 2, 3]).id());
        assert_ne!(base.id(), KernelDesc::new("copy", "cs", &[1, 2, 3]).id());
        assert_ne!(base.id(), KernelDesc::new("copy", "main", &[1, 2, 4]).id());
    }
}
