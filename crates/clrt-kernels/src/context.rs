//! Compute session: the single active device binding and everything created
//! against it.
//!
//! A session is either unbound or holds one `Binding` (platform, device,
//! context and queue together). Rebinding and teardown release tracked
//! kernels first, then the queue, then the context. Dropping the session
//! tears it down.

use std::sync::Arc;

use clrt_core::{ClError, DType, DeviceInfo, Element, Result, Shape};
use parking_lot::Mutex;

use crate::api::{Api, ContextId, DeviceId, KernelId, PlatformId, QueueId};
use crate::config::{EnvOverrides, SelectRequest, SessionConfig};
use crate::kernel::{KernelHandle, KernelSource};
use crate::memory::BufferHandle;
use crate::select::select;
use crate::table::{HandleTable, Resource};

/// The native objects of a bound session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub platform_index: usize,
    pub device_index: usize,
    pub platform: PlatformId,
    pub device: DeviceId,
    pub context: ContextId,
    pub queue: QueueId,
}

/// Session shared across threads.
pub type SharedSession = Arc<Mutex<ComputeSession>>;

/// Owner of the active compute binding and the kernels compiled against it.
pub struct ComputeSession {
    api: Api,
    env: EnvOverrides,
    binding: Option<Binding>,
    kernels: HandleTable,
    generation: u64,
}

impl ComputeSession {
    /// Unbound session reading index overrides from the process environment.
    pub fn new(api: Api) -> Self {
        Self::with_env(api, EnvOverrides::from_env())
    }

    /// Unbound session with explicit index overrides.
    pub fn with_env(api: Api, env: EnvOverrides) -> Self {
        Self {
            api,
            env,
            binding: None,
            kernels: HandleTable::new(),
            generation: 0,
        }
    }

    /// Create a session and bind it according to `config`.
    pub fn bind(api: Api, config: &SessionConfig) -> Result<Self> {
        let mut session = Self::with_env(api, config.env);
        session.initialize(&config.request)?;
        Ok(session)
    }

    /// Wrap the session for shared use.
    pub fn shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    pub fn api(&self) -> &Api {
        &self.api
    }

    pub fn env(&self) -> &EnvOverrides {
        &self.env
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    pub fn binding(&self) -> Option<&Binding> {
        self.binding.as_ref()
    }

    /// Incremented every time a binding is torn down.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of kernels tracked for the current binding.
    pub fn live_kernels(&self) -> usize {
        self.kernels.len()
    }

    /// Bind (or rebind) the session.
    ///
    /// Selection errors leave the current binding in place. Once selection
    /// succeeds the old binding is torn down; if creating the new context or
    /// queue then fails the session is left unbound.
    pub fn initialize(&mut self, request: &SelectRequest) -> Result<&Binding> {
        let selection = select(self.api.as_ref(), request, &self.env)?;

        self.teardown();

        let context = self.api.create_context(selection.device)?;
        let queue = match self.api.create_queue(context, selection.device) {
            Ok(queue) => queue,
            Err(e) => {
                if let Err(release_err) = self.api.release_context(context) {
                    tracing::warn!(
                        "releasing context after failed queue creation: {}",
                        release_err
                    );
                }
                return Err(e);
            }
        };

        tracing::info!(
            "bound {} platform {} device {}",
            self.api.backend_name(),
            selection.platform_index,
            selection.device_index
        );

        Ok(self.binding.insert(Binding {
            platform_index: selection.platform_index,
            device_index: selection.device_index,
            platform: selection.platform,
            device: selection.device,
            context,
            queue,
        }))
    }

    /// Current binding, binding with default selection first if unbound.
    pub fn ensure_bound(&mut self) -> Result<&Binding> {
        if self.binding.is_none() {
            return self.initialize(&SelectRequest::default());
        }
        self.binding.as_ref().ok_or(ClError::NoSession)
    }

    /// Release every tracked kernel, then the queue, then the context.
    /// No-op when unbound. Release failures are logged.
    pub fn teardown(&mut self) {
        let Some(binding) = self.binding.take() else {
            return;
        };
        let kernels = self.kernels.clear_all(self.api.as_ref());
        if let Err(e) = self.api.release_queue(binding.queue) {
            tracing::warn!("queue release failed: {}", e);
        }
        if let Err(e) = self.api.release_context(binding.context) {
            tracing::warn!("context release failed: {}", e);
        }
        self.generation += 1;
        tracing::info!("session torn down ({} kernels released)", kernels);
    }

    /// Property snapshot of the bound device.
    pub fn current_device_info(&self) -> Result<DeviceInfo> {
        let binding = self.binding.as_ref().ok_or(ClError::NoSession)?;
        self.api.device_info(binding.device)
    }

    /// One-line summary of the binding.
    pub fn describe(&self) -> String {
        match self.current_device_info() {
            Ok(info) => format!("Current device: {}", info.name),
            Err(ClError::NoSession) => "No device bound".to_string(),
            Err(e) => format!("Current device: <unavailable: {e}>"),
        }
    }

    // ========================================================================
    // Buffers
    // ========================================================================

    /// Allocate an owned device buffer of `dtype` elements shaped `dims`.
    pub fn create_buffer(&mut self, dtype: DType, dims: impl Into<Shape>) -> Result<BufferHandle> {
        let shape = dims.into();
        shape.validate().map_err(ClError::InvalidShape)?;
        let nbytes = dtype.storage_bytes(shape.numel()).ok_or_else(|| {
            ClError::InvalidShape(format!("{} elements of {} overflow the byte size", shape, dtype))
        })?;
        let context = self.ensure_bound()?.context;
        let mem = self.api.create_buffer(context, nbytes)?;
        Ok(BufferHandle::owned(self.api.clone(), mem, dtype, shape, nbytes))
    }

    fn check_transfer<T: Element>(&self, buffer: &BufferHandle, len: usize) -> Result<QueueId> {
        if T::DTYPE != buffer.dtype() {
            return Err(ClError::TypeMismatch {
                expected: buffer.dtype(),
                actual: T::DTYPE,
            });
        }
        if len != buffer.numel() {
            return Err(ClError::SizeMismatch {
                expected: buffer.numel(),
                actual: len,
            });
        }
        self.binding
            .as_ref()
            .map(|b| b.queue)
            .ok_or(ClError::NoSession)
    }

    /// Blocking copy of `data` into the buffer.
    pub fn write_buffer<T: Element>(&self, buffer: &BufferHandle, data: &[T]) -> Result<()> {
        let queue = self.check_transfer::<T>(buffer, data.len())?;
        let mem = buffer.mem_id()?;
        self.api.write_buffer(queue, mem, bytemuck::cast_slice(data))
    }

    /// Blocking copy of the buffer's contents to the host.
    pub fn read_buffer<T: Element>(&self, buffer: &BufferHandle) -> Result<Vec<T>> {
        let queue = self.check_transfer::<T>(buffer, buffer.numel())?;
        let mem = buffer.mem_id()?;
        let mut out = vec![T::zeroed(); buffer.numel()];
        self.api
            .read_buffer(queue, mem, bytemuck::cast_slice_mut(&mut out))?;
        Ok(out)
    }

    // ========================================================================
    // Kernels
    // ========================================================================

    /// Build `source` for the bound device and track the resulting kernel.
    pub fn compile_kernel(&mut self, source: KernelSource) -> Result<KernelHandle> {
        let text = source.render()?;
        let binding = *self.ensure_bound()?;

        let program = self
            .api
            .build_program(binding.context, binding.device, &text)?;
        let kernel = match self.api.create_kernel(program, source.entry()) {
            Ok(kernel) => kernel,
            Err(e) => {
                if let Err(release_err) = self.api.release_program(program) {
                    tracing::warn!(
                        "releasing program after failed kernel creation: {}",
                        release_err
                    );
                }
                return Err(e);
            }
        };

        let key = self.kernels.insert(Resource::Kernel(kernel));
        tracing::debug!("registered kernel {} as {}", source.entry(), key);

        Ok(KernelHandle {
            key,
            generation: self.generation,
            text: source.text().to_string(),
            simple: source.is_simple(),
            entry: source.entry().to_string(),
        })
    }

    /// Native kernel behind `handle`.
    pub fn kernel(&self, handle: &KernelHandle) -> Result<KernelId> {
        let stale = ClError::StaleKernel(handle.key.as_raw());
        if handle.generation != self.generation {
            return Err(stale);
        }
        match self.kernels.get(handle.key) {
            Some(Resource::Kernel(kernel)) => Ok(*kernel),
            None => Err(stale),
        }
    }

    /// Release the kernel and its program.
    pub fn release_kernel(&mut self, handle: KernelHandle) -> Result<()> {
        let stale = ClError::StaleKernel(handle.key.as_raw());
        if handle.generation != self.generation {
            return Err(stale);
        }
        if self.kernels.remove(handle.key, self.api.as_ref())? {
            Ok(())
        } else {
            Err(stale)
        }
    }
}

impl Drop for ComputeSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for ComputeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeSession")
            .field("backend", &self.api.backend_name())
            .field("binding", &self.binding)
            .field("generation", &self.generation)
            .field("kernels", &self.kernels.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimCall, SimEvent, SimulatedApi};
    use clrt_core::DeviceKind;

    fn session_with(sim: &Arc<SimulatedApi>) -> ComputeSession {
        ComputeSession::with_env(sim.clone(), EnvOverrides::default())
    }

    fn gpu_cpu() -> Arc<SimulatedApi> {
        Arc::new(
            SimulatedApi::new()
                .with_platform("Sim CPU", &[DeviceKind::Cpu])
                .with_platform("Sim GPU", &[DeviceKind::Gpu, DeviceKind::Gpu]),
        )
    }

    #[test]
    fn test_initialize_binds_one_pair() {
        let sim = gpu_cpu();
        let mut session = session_with(&sim);
        assert!(!session.is_bound());

        let binding = *session.initialize(&SelectRequest::default().platform(1).device(1)).unwrap();
        assert_eq!((binding.platform_index, binding.device_index), (1, 1));
        assert_eq!(sim.live_contexts(), 1);
        assert_eq!(sim.live_queues(), 1);

        session.initialize(&SelectRequest::default()).unwrap();
        assert_eq!(sim.live_contexts(), 1);
        assert_eq!(sim.live_queues(), 1);
        assert_eq!(sim.invalid_releases(), 0);
    }

    #[test]
    fn test_teardown_order_and_idempotence() {
        let sim = gpu_cpu();
        let mut session = session_with(&sim);
        let kernel = session
            .compile_kernel(KernelSource::simple("x + 1", &["x"], DType::F32))
            .unwrap();
        let native = session.kernel(&kernel).unwrap();
        let binding = *session.binding().unwrap();

        session.teardown();
        session.teardown();

        let events = sim.events();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], SimEvent::KernelReleased(native));
        assert!(matches!(events[1], SimEvent::ProgramReleased(_)));
        assert_eq!(events[2], SimEvent::QueueReleased(binding.queue));
        assert_eq!(events[3], SimEvent::ContextReleased(binding.context));
        assert_eq!(session.generation(), 1);
    }

    #[test]
    fn test_selection_error_keeps_binding() {
        let sim = gpu_cpu();
        let mut session = session_with(&sim);
        session.initialize(&SelectRequest::default()).unwrap();
        let before = *session.binding().unwrap();

        let err = session.initialize(&SelectRequest::default().platform(7)).unwrap_err();
        assert_eq!(err, ClError::InvalidPlatformIndex(7));
        assert_eq!(session.binding(), Some(&before));
        assert_eq!(sim.live_contexts(), 1);
    }

    #[test]
    fn test_queue_failure_leaves_unbound() {
        let sim = gpu_cpu();
        let mut session = session_with(&sim);
        session.initialize(&SelectRequest::default()).unwrap();

        sim.fail(SimCall::CreateQueue, -36);
        let err = session.initialize(&SelectRequest::default().platform(1)).unwrap_err();
        assert_eq!(err.code(), -36);
        assert!(!session.is_bound());
        assert_eq!(sim.live_contexts(), 0);
        assert_eq!(sim.live_queues(), 0);
    }

    #[test]
    fn test_lazy_bind_on_buffer_creation() {
        let sim = gpu_cpu();
        let mut session = session_with(&sim);
        let buf = session.create_buffer(DType::F32, [3, 4]).unwrap();
        assert!(session.is_bound());
        assert_eq!(buf.to_string(), "CL_FLOAT = Array[3, 4]");
    }

    #[test]
    fn test_invalid_shape_rejected() {
        let sim = gpu_cpu();
        let mut session = session_with(&sim);
        let err = session.create_buffer(DType::F32, [3, 0]).unwrap_err();
        assert!(matches!(err, ClError::InvalidShape(_)));
        assert_eq!(sim.calls(SimCall::CreateBuffer), 0);
    }

    #[test]
    fn test_byte_size_overflow_rejected() {
        let sim = gpu_cpu();
        let mut session = session_with(&sim);
        // element count fits usize, byte size does not
        let err = session.create_buffer(DType::F64, [usize::MAX / 4]).unwrap_err();
        assert!(matches!(err, ClError::InvalidShape(_)));
        assert_eq!(sim.calls(SimCall::CreateBuffer), 0);

        let buf = session.create_buffer(DType::F64, [6]).unwrap();
        assert_eq!(buf.nbytes(), 48);
    }

    #[test]
    fn test_write_read_roundtrip_through_view() {
        let sim = gpu_cpu();
        let mut session = session_with(&sim);
        let buf = session.create_buffer(DType::I32, [4]).unwrap();
        session.write_buffer(&buf, &[1i32, 2, 3, 4]).unwrap();

        let view = buf.view_as(&[2, 2]).unwrap();
        assert_eq!(session.read_buffer::<i32>(&view).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_transfer_checks() {
        let sim = gpu_cpu();
        let mut session = session_with(&sim);
        let buf = session.create_buffer(DType::F32, [2]).unwrap();

        assert_eq!(
            session.write_buffer(&buf, &[1i32, 2]),
            Err(ClError::TypeMismatch { expected: DType::F32, actual: DType::I32 })
        );
        assert_eq!(
            session.write_buffer(&buf, &[1.0f32]),
            Err(ClError::SizeMismatch { expected: 2, actual: 1 })
        );

        let view = buf.view();
        buf.release().unwrap();
        assert_eq!(session.read_buffer::<f32>(&view), Err(ClError::StaleView));
    }

    #[test]
    fn test_kernel_lifecycle() {
        let sim = gpu_cpu();
        let mut session = session_with(&sim);
        let handle = session
            .compile_kernel(KernelSource::simple("2 * x", &["x"], DType::F32))
            .unwrap();
        assert_eq!(handle.to_string(), "CL_KERNEL = '2 * x'");
        assert_eq!(session.live_kernels(), 1);
        session.kernel(&handle).unwrap();

        session.release_kernel(handle.clone()).unwrap();
        assert_eq!(sim.live_kernels(), 0);
        assert_eq!(sim.live_programs(), 0);
        assert_eq!(
            session.release_kernel(handle.clone()),
            Err(ClError::StaleKernel(handle.key().as_raw()))
        );
    }

    #[test]
    fn test_build_failure_releases_nothing_tracked() {
        let sim = gpu_cpu();
        let mut session = session_with(&sim);
        let err = session
            .compile_kernel(KernelSource::program("#error broken\n", "k"))
            .unwrap_err();
        assert!(matches!(err, ClError::Build { .. }));
        assert_eq!(session.live_kernels(), 0);

        let err = session
            .compile_kernel(KernelSource::program("__kernel void k(__global int *x) {}", "nope"))
            .unwrap_err();
        assert_eq!(err.code(), -46);
        assert_eq!(sim.live_programs(), 0);
    }

    #[test]
    fn test_describe() {
        let sim = gpu_cpu();
        let mut session = session_with(&sim);
        assert_eq!(session.describe(), "No device bound");
        assert_eq!(session.current_device_info(), Err(ClError::NoSession));
        session.initialize(&SelectRequest::default().gpu_only()).unwrap();
        assert_eq!(session.describe(), "Current device: Sim GPU gpu 0");
    }

    #[test]
    fn test_drop_releases_everything() {
        let sim = gpu_cpu();
        {
            let mut session = session_with(&sim);
            session
                .compile_kernel(KernelSource::simple("x", &["x"], DType::F32))
                .unwrap();
        }
        assert_eq!(sim.live_contexts(), 0);
        assert_eq!(sim.live_queues(), 0);
        assert_eq!(sim.live_kernels(), 0);
        assert_eq!(sim.live_programs(), 0);
        assert_eq!(sim.invalid_releases(), 0);
    }

    #[test]
    fn test_shared_session() {
        let sim = gpu_cpu();
        let shared = session_with(&sim).shared();
        let worker = {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || shared.lock().ensure_bound().map(|b| b.device_index))
        };
        assert_eq!(worker.join().unwrap(), Ok(0));
        assert!(shared.lock().is_bound());
    }
}
