//! The native compute API seam.
//!
//! Everything the lifecycle core needs from the compute stack goes through
//! [`ComputeApi`]. `opencl::OpenClApi` backs it with the system ICD loader;
//! `sim::SimulatedApi` backs it with an in-process fake.

use std::fmt;
use std::sync::Arc;

use clrt_core::{DeviceInfo, DeviceKind, PlatformInfo, Result};

macro_rules! native_handle {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub struct $name(usize);

            impl $name {
                /// Wrap a raw native handle value.
                pub fn from_raw(raw: usize) -> Self {
                    Self(raw)
                }

                /// The raw native handle value.
                pub fn as_raw(self) -> usize {
                    self.0
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}({:#x})", stringify!($name), self.0)
                }
            }
        )*
    };
}

native_handle! {
    /// `cl_platform_id`
    PlatformId;
    /// `cl_device_id`
    DeviceId;
    /// `cl_context`
    ContextId;
    /// `cl_command_queue`
    QueueId;
    /// `cl_mem`
    MemId;
    /// `cl_program`
    ProgramId;
    /// `cl_kernel`
    KernelId;
}

/// Native calls used by enumeration, session management and handle release.
///
/// Errors carry the native status code (`ClError::Native`). Implementations
/// report "no devices of this kind" as an empty list, not an error.
pub trait ComputeApi: Send + Sync {
    /// Short backend label for logs and `info` output.
    fn backend_name(&self) -> &'static str;

    fn platform_ids(&self) -> Result<Vec<PlatformId>>;
    fn platform_info(&self, platform: PlatformId) -> Result<PlatformInfo>;
    fn device_ids(&self, platform: PlatformId, kind: DeviceKind) -> Result<Vec<DeviceId>>;
    fn device_info(&self, device: DeviceId) -> Result<DeviceInfo>;

    fn create_context(&self, device: DeviceId) -> Result<ContextId>;
    fn create_queue(&self, context: ContextId, device: DeviceId) -> Result<QueueId>;
    fn release_queue(&self, queue: QueueId) -> Result<()>;
    fn release_context(&self, context: ContextId) -> Result<()>;

    fn create_buffer(&self, context: ContextId, nbytes: usize) -> Result<MemId>;
    fn release_buffer(&self, mem: MemId) -> Result<()>;
    /// Blocking host-to-device copy starting at offset 0.
    fn write_buffer(&self, queue: QueueId, mem: MemId, data: &[u8]) -> Result<()>;
    /// Blocking device-to-host copy starting at offset 0.
    fn read_buffer(&self, queue: QueueId, mem: MemId, out: &mut [u8]) -> Result<()>;

    /// Create and build a program for one device. Build failures are
    /// reported as `ClError::Build` with the compiler log.
    fn build_program(
        &self,
        context: ContextId,
        device: DeviceId,
        source: &str,
    ) -> Result<ProgramId>;
    fn create_kernel(&self, program: ProgramId, entry: &str) -> Result<KernelId>;
    /// The program a kernel was created from.
    fn kernel_program(&self, kernel: KernelId) -> Result<ProgramId>;
    fn release_kernel(&self, kernel: KernelId) -> Result<()>;
    fn release_program(&self, program: ProgramId) -> Result<()>;
}

/// Shared handle to a compute backend.
pub type Api = Arc<dyn ComputeApi>;
