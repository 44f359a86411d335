//! Registry of native resources that must be released before their context.
//!
//! Keys are handed out by the table from a counter that never goes
//! backwards, so a key names at most one entry over the table's lifetime and
//! a removed key can never reach a destructor again.

use std::collections::BTreeMap;
use std::fmt;

use clrt_core::{ClError, Result};

use crate::api::{ComputeApi, KernelId};

/// Identity of a table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleKey(u64);

impl HandleKey {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Something a handle table knows how to destroy.
pub trait NativeResource {
    fn release(self, api: &dyn ComputeApi) -> Result<()>;
}

/// Resource kinds tracked by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// A kernel; its parent program is released with it.
    Kernel(KernelId),
}

impl NativeResource for Resource {
    fn release(self, api: &dyn ComputeApi) -> Result<()> {
        match self {
            Resource::Kernel(kernel) => release_kernel(api, kernel),
        }
    }
}

/// Release a kernel and the program it was built from.
///
/// The program is looked up through the kernel first; if that lookup fails
/// nothing is released. The kernel goes before the program.
pub fn release_kernel(api: &dyn ComputeApi, kernel: KernelId) -> Result<()> {
    let program = api.kernel_program(kernel)?;
    api.release_kernel(kernel)?;
    api.release_program(program)
}

/// Key → resource registry with per-kind destructors.
#[derive(Debug)]
pub struct HandleTable<R = Resource> {
    entries: BTreeMap<HandleKey, R>,
    next_key: u64,
}

impl<R> Default for HandleTable<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> HandleTable<R> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_key: 1,
        }
    }

    /// Register a resource under a fresh key.
    pub fn insert(&mut self, resource: R) -> HandleKey {
        let key = HandleKey(self.next_key);
        self.next_key += 1;
        self.entries.insert(key, resource);
        key
    }

    /// Register a resource under a caller-chosen key. Occupied keys are rejected.
    pub fn insert_at(&mut self, key: HandleKey, resource: R) -> Result<()> {
        if self.entries.contains_key(&key) {
            return Err(ClError::DuplicateHandle(key.0));
        }
        self.next_key = self.next_key.max(key.0 + 1);
        self.entries.insert(key, resource);
        Ok(())
    }

    pub fn get(&self, key: HandleKey) -> Option<&R> {
        self.entries.get(&key)
    }

    pub fn contains(&self, key: HandleKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Empty the table, handing each entry to `destroy` instead of the
    /// resource's own destructor.
    pub fn drain_with(&mut self, mut destroy: impl FnMut(HandleKey, R)) {
        for (key, resource) in std::mem::take(&mut self.entries) {
            destroy(key, resource);
        }
    }
}

impl<R: NativeResource> HandleTable<R> {
    /// Evict `key` and run its destructor. Returns `Ok(false)` if the key is
    /// not present. The entry is gone even when the destructor fails.
    pub fn remove(&mut self, key: HandleKey, api: &dyn ComputeApi) -> Result<bool> {
        match self.entries.remove(&key) {
            None => Ok(false),
            Some(resource) => {
                resource.release(api)?;
                Ok(true)
            }
        }
    }

    /// Run every destructor, then empty the table. Destructor failures are
    /// logged and skipped. Returns the number of entries evicted.
    pub fn clear_all(&mut self, api: &dyn ComputeApi) -> usize {
        let mut count = 0;
        self.drain_with(|key, resource| {
            count += 1;
            if let Err(e) = resource.release(api) {
                tracing::warn!("release of handle {} failed: {}", key, e);
            }
        });
        count
    }
}
