//! Device buffer handles.
//!
//! A native memory object is owned by exactly one `BufferHandle::Owned`
//! (the handle is not `Clone`). Views hold a weak reference to the same
//! object: releasing a view never touches native memory, and a view whose
//! owner is gone reports `StaleView` instead of dangling.

use std::fmt;
use std::sync::{Arc, Weak};

use clrt_core::{ClError, DType, Result, Shape};
use parking_lot::Mutex;

use crate::api::{Api, MemId};

/// A live native memory object. Released at most once, on the first of
/// `release()` or drop.
struct MemObject {
    api: Api,
    mem: Mutex<Option<MemId>>,
}

impl MemObject {
    fn new(api: Api, mem: MemId) -> Self {
        Self {
            api,
            mem: Mutex::new(Some(mem)),
        }
    }

    /// Native handle, or `None` once released.
    fn id(&self) -> Option<MemId> {
        *self.mem.lock()
    }

    fn release(&self) -> Result<()> {
        match self.mem.lock().take() {
            Some(mem) => self.api.release_buffer(mem),
            None => Ok(()),
        }
    }
}

impl Drop for MemObject {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!("releasing dropped buffer failed: {}", e);
        }
    }
}

impl fmt::Debug for MemObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemObject")
            .field("mem", &self.id())
            .finish()
    }
}

/// Ownership of a buffer handle's memory.
#[derive(Debug)]
enum Memory {
    /// The handle that frees the memory object.
    Owned(Arc<MemObject>),
    /// An alias of memory owned elsewhere.
    View(Weak<MemObject>),
}

/// Host-side handle to a device buffer: element type, shape and ownership.
#[derive(Debug)]
pub struct BufferHandle {
    dtype: DType,
    shape: Shape,
    nbytes: usize,
    memory: Memory,
}

impl BufferHandle {
    /// Take ownership of `mem`, an allocation of `nbytes` holding `shape`
    /// elements of `dtype`.
    pub(crate) fn owned(api: Api, mem: MemId, dtype: DType, shape: Shape, nbytes: usize) -> Self {
        Self {
            dtype,
            shape,
            nbytes,
            memory: Memory::Owned(Arc::new(MemObject::new(api, mem))),
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    /// Size of the described data in bytes.
    pub fn nbytes(&self) -> usize {
        self.nbytes
    }

    pub fn is_view(&self) -> bool {
        matches!(self.memory, Memory::View(_))
    }

    /// Whether the underlying memory object is still allocated.
    pub fn is_live(&self) -> bool {
        self.mem_id().is_ok()
    }

    /// Native memory handle. Fails with `StaleView` if this is a view whose
    /// owner has been released.
    pub fn mem_id(&self) -> Result<MemId> {
        let id = match &self.memory {
            Memory::Owned(obj) => obj.id(),
            Memory::View(weak) => weak.upgrade().and_then(|obj| obj.id()),
        };
        id.ok_or(ClError::StaleView)
    }

    /// A view over the same memory with the same shape.
    pub fn view(&self) -> BufferHandle {
        BufferHandle {
            dtype: self.dtype,
            shape: self.shape.clone(),
            nbytes: self.nbytes,
            memory: Memory::View(self.weak()),
        }
    }

    /// A view over the same memory with a new shape. One dimension may be
    /// `-1` and is inferred; the element count must be unchanged and the new
    /// shape must pass `Shape::validate`.
    pub fn view_as(&self, dims: &[isize]) -> Result<BufferHandle> {
        let shape = self.shape.resolve_reshape(dims).ok_or_else(|| {
            ClError::InvalidShape(format!("cannot view {} as {:?}", self.shape, dims))
        })?;
        shape.validate().map_err(ClError::InvalidShape)?;
        Ok(BufferHandle {
            dtype: self.dtype,
            shape,
            nbytes: self.nbytes,
            memory: Memory::View(self.weak()),
        })
    }

    fn weak(&self) -> Weak<MemObject> {
        match &self.memory {
            Memory::Owned(obj) => Arc::downgrade(obj),
            Memory::View(weak) => weak.clone(),
        }
    }

    /// Release the handle. Views make no native call. An owned handle
    /// releases its memory object; the host side is dropped either way.
    pub fn release(self) -> Result<()> {
        match self.memory {
            Memory::View(_) => Ok(()),
            Memory::Owned(obj) => obj.release(),
        }
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CL_{} = Array{}", self.dtype.label(), self.shape)?;
        if self.is_view() {
            write!(f, " (view)")?;
        }
        Ok(())
    }
}

/// Release every handle in order. Failures do not stop the rest; the first
/// one is returned.
pub fn release_many(handles: impl IntoIterator<Item = BufferHandle>) -> Result<()> {
    let mut first_err = None;
    for handle in handles {
        if let Err(e) = handle.release() {
            tracing::warn!("buffer release failed: {}", e);
            if first_err.is_none() {
                first_err = Some(e);
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
