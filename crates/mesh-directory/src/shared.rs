//! Thread-safe handle to a directory.

use std::sync::{Arc, PoisonError, RwLock};

use crate::directory::MeshDirectory;

/// Cloneable handle; readers run concurrently, writers are exclusive.
#[derive(Debug, Clone)]
pub struct SharedDirectory {
    inner: Arc<RwLock<MeshDirectory>>,
}

impl SharedDirectory {
    pub fn new(directory: MeshDirectory) -> Self {
        Self {
            inner: Arc::new(RwLock::new(directory)),
        }
    }

    pub fn read<R>(&self, f: impl FnOnce(&MeshDirectory) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn write<R>(&self, f: impl FnOnce(&mut MeshDirectory) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl From<MeshDirectory> for SharedDirectory {
    fn from(directory: MeshDirectory) -> Self {
        Self::new(directory)
    }
}
