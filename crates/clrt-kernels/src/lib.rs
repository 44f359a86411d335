//! # clrt-kernels
//!
//! OpenCL compute-session and native-resource lifecycle management.
//!
//! Provides:
//! - Platform and device enumeration
//! - Platform/device selection with environment overrides and GPU fallback
//! - A compute session owning the active context and command queue
//! - Device buffer handles with owned/view semantics
//! - Kernel compilation tracked in a handle table and released with the session
//! - A runtime-loaded OpenCL backend and an in-process simulated backend

pub mod api;
pub mod config;
pub mod context;
pub mod enumerate;
pub mod kernel;
pub mod memory;
pub mod opencl;
pub mod select;
pub mod sim;
pub mod table;

pub use api::{Api, ComputeApi};
pub use config::{EnvOverrides, SelectRequest, SessionConfig};
pub use context::{Binding, ComputeSession, SharedSession};
pub use enumerate::{list_devices, list_platforms, DeviceQuery};
pub use kernel::{KernelHandle, KernelSource};
pub use memory::{release_many, BufferHandle};
pub use opencl::OpenClApi;
pub use select::{select, Selection};
pub use sim::SimulatedApi;
pub use table::{HandleKey, HandleTable, NativeResource, Resource};
