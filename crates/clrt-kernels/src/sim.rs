//! In-process stand-in for an OpenCL installation.
//!
//! `SimulatedApi` keeps every native object in host maps so tests (and the
//! CLI's `--simulate` mode) can exercise enumeration, selection and release
//! paths without a driver. It is stricter than a real ICD in two places so
//! ordering mistakes surface as errors:
//! - releasing a program that still has live kernels fails
//! - releasing a context that still has a live queue fails
//!
//! Handles are never reused, so releasing an object twice is always reported
//! as an invalid release.

use std::collections::HashMap;

use clrt_core::{ClError, DeviceInfo, DeviceKind, PlatformInfo, Result};
use parking_lot::Mutex;

use crate::api::{
    ComputeApi, ContextId, DeviceId, KernelId, MemId, PlatformId, ProgramId, QueueId,
};
use crate::opencl::ffi::{
    CL_BUILD_PROGRAM_FAILURE, CL_INVALID_BUFFER_SIZE, CL_INVALID_COMMAND_QUEUE,
    CL_INVALID_CONTEXT, CL_INVALID_DEVICE, CL_INVALID_KERNEL, CL_INVALID_KERNEL_NAME,
    CL_INVALID_MEM_OBJECT, CL_INVALID_PLATFORM, CL_INVALID_PROGRAM, CL_INVALID_VALUE,
};

/// Native entry points of the simulator, used for call counting and
/// failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimCall {
    PlatformIds,
    PlatformInfo,
    DeviceIds,
    DeviceInfo,
    CreateContext,
    CreateQueue,
    ReleaseQueue,
    ReleaseContext,
    CreateBuffer,
    ReleaseBuffer,
    WriteBuffer,
    ReadBuffer,
    BuildProgram,
    CreateKernel,
    KernelProgram,
    ReleaseKernel,
    ReleaseProgram,
}

impl SimCall {
    fn native_name(self) -> &'static str {
        match self {
            SimCall::PlatformIds => "clGetPlatformIDs",
            SimCall::PlatformInfo => "clGetPlatformInfo",
            SimCall::DeviceIds => "clGetDeviceIDs",
            SimCall::DeviceInfo => "clGetDeviceInfo",
            SimCall::CreateContext => "clCreateContext",
            SimCall::CreateQueue => "clCreateCommandQueue",
            SimCall::ReleaseQueue => "clReleaseCommandQueue",
            SimCall::ReleaseContext => "clReleaseContext",
            SimCall::CreateBuffer => "clCreateBuffer",
            SimCall::ReleaseBuffer => "clReleaseMemObject",
            SimCall::WriteBuffer => "clEnqueueWriteBuffer",
            SimCall::ReadBuffer => "clEnqueueReadBuffer",
            SimCall::BuildProgram => "clBuildProgram",
            SimCall::CreateKernel => "clCreateKernel",
            SimCall::KernelProgram => "clGetKernelInfo",
            SimCall::ReleaseKernel => "clReleaseKernel",
            SimCall::ReleaseProgram => "clReleaseProgram",
        }
    }
}

/// Successful releases, in the order they happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    QueueReleased(QueueId),
    ContextReleased(ContextId),
    BufferReleased(MemId),
    KernelReleased(KernelId),
    ProgramReleased(ProgramId),
}

struct SimPlatform {
    id: PlatformId,
    info: PlatformInfo,
    devices: Vec<(DeviceId, DeviceInfo)>,
}

struct SimState {
    platforms: Vec<SimPlatform>,
    next_handle: usize,
    contexts: HashMap<ContextId, DeviceId>,
    queues: HashMap<QueueId, ContextId>,
    buffers: HashMap<MemId, (ContextId, Vec<u8>)>,
    programs: HashMap<ProgramId, (ContextId, String)>,
    kernels: HashMap<KernelId, ProgramId>,
    failures: HashMap<SimCall, i32>,
    calls: HashMap<SimCall, usize>,
    events: Vec<SimEvent>,
    invalid_releases: usize,
}

impl SimState {
    fn handle(&mut self) -> usize {
        self.next_handle += 0x10;
        self.next_handle
    }

    /// Count the call and apply any injected failure.
    fn enter(&mut self, call: SimCall) -> Result<()> {
        *self.calls.entry(call).or_insert(0) += 1;
        match self.failures.get(&call) {
            Some(&code) => Err(ClError::native(call.native_name(), code)),
            None => Ok(()),
        }
    }

    fn device(&self, device: DeviceId) -> Option<&DeviceInfo> {
        self.platforms
            .iter()
            .flat_map(|p| p.devices.iter())
            .find(|(id, _)| *id == device)
            .map(|(_, info)| info)
    }

    fn invalid(&mut self, call: SimCall, code: i32) -> ClError {
        self.invalid_releases += 1;
        ClError::native(call.native_name(), code)
    }
}

/// Build the property snapshot of a simulated device.
pub fn simulated_device(name: &str, kind: Option<DeviceKind>) -> DeviceInfo {
    let gpu = kind == Some(DeviceKind::Gpu);
    DeviceInfo {
        name: name.to_string(),
        vendor: "clrt simulator".to_string(),
        vendor_id: 0xC1C1,
        kind,
        extensions: "cl_khr_fp64 cl_khr_byte_addressable_store".to_string(),
        profile: "FULL_PROFILE".to_string(),
        global_mem_size: if gpu { 8 << 30 } else { 16 << 30 },
        global_mem_cache_size: if gpu { 4 << 20 } else { 32 << 20 },
        address_bits: 64,
        available: true,
        compiler_available: true,
        endian_little: true,
        error_correction_support: false,
        device_version: "OpenCL 1.2 sim".to_string(),
        driver_version: env!("CARGO_PKG_VERSION").to_string(),
        max_compute_units: if gpu { 64 } else { 8 },
        max_clock_frequency: if gpu { 1500 } else { 3000 },
        max_mem_alloc_size: if gpu { 2 << 30 } else { 4 << 30 },
        max_work_group_size: if gpu { 1024 } else { 8192 },
        max_work_item_sizes: if gpu { vec![1024, 1024, 64] } else { vec![8192, 8192, 8192] },
    }
}

/// Simulated OpenCL installation.
pub struct SimulatedApi {
    state: Mutex<SimState>,
}

impl Default for SimulatedApi {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedApi {
    /// An installation with no platforms.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                platforms: Vec::new(),
                next_handle: 0x1000,
                contexts: HashMap::new(),
                queues: HashMap::new(),
                buffers: HashMap::new(),
                programs: HashMap::new(),
                kernels: HashMap::new(),
                failures: HashMap::new(),
                calls: HashMap::new(),
                events: Vec::new(),
                invalid_releases: 0,
            }),
        }
    }

    /// Add a platform exposing one device per entry of `devices`.
    pub fn with_platform(self, name: &str, devices: &[DeviceKind]) -> Self {
        let infos = devices
            .iter()
            .enumerate()
            .map(|(i, &kind)| simulated_device(&format!("{name} {kind} {i}"), Some(kind)))
            .collect::<Vec<_>>();
        self.with_platform_devices(name, infos)
    }

    /// Add a platform with fully specified device snapshots.
    pub fn with_platform_devices(self, name: &str, devices: Vec<DeviceInfo>) -> Self {
        {
            let mut state = self.state.lock();
            let id = PlatformId::from_raw(state.handle());
            let devices = devices
                .into_iter()
                .map(|info| (DeviceId::from_raw(state.handle()), info))
                .collect();
            state.platforms.push(SimPlatform {
                id,
                info: PlatformInfo {
                    name: name.to_string(),
                    vendor: "clrt simulator".to_string(),
                    version: "OpenCL 1.2 sim".to_string(),
                    profile: "FULL_PROFILE".to_string(),
                    extensions: "cl_khr_icd".to_string(),
                },
                devices,
            });
        }
        self
    }

    /// Make every subsequent `call` fail with native status `code`.
    pub fn fail(&self, call: SimCall, code: i32) {
        self.state.lock().failures.insert(call, code);
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// How many times `call` was entered.
    pub fn calls(&self, call: SimCall) -> usize {
        self.state.lock().calls.get(&call).copied().unwrap_or(0)
    }

    /// Successful releases in order.
    pub fn events(&self) -> Vec<SimEvent> {
        self.state.lock().events.clone()
    }

    /// Releases of objects that were already released, unknown, or still in use.
    pub fn invalid_releases(&self) -> usize {
        self.state.lock().invalid_releases
    }

    /// Number of successful native releases of `mem`.
    pub fn buffer_release_count(&self, mem: MemId) -> usize {
        self.state
            .lock()
            .events
            .iter()
            .filter(|e| **e == SimEvent::BufferReleased(mem))
            .count()
    }

    pub fn live_contexts(&self) -> usize {
        self.state.lock().contexts.len()
    }

    pub fn live_queues(&self) -> usize {
        self.state.lock().queues.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.state.lock().buffers.len()
    }

    pub fn live_programs(&self) -> usize {
        self.state.lock().programs.len()
    }

    pub fn live_kernels(&self) -> usize {
        self.state.lock().kernels.len()
    }

    /// Whether `mem` is a live buffer.
    pub fn is_buffer_live(&self, mem: MemId) -> bool {
        self.state.lock().buffers.contains_key(&mem)
    }
}

impl ComputeApi for SimulatedApi {
    fn backend_name(&self) -> &'static str {
        "simulated"
    }

    fn platform_ids(&self) -> Result<Vec<PlatformId>> {
        let mut state = self.state.lock();
        state.enter(SimCall::PlatformIds)?;
        Ok(state.platforms.iter().map(|p| p.id).collect())
    }

    fn platform_info(&self, platform: PlatformId) -> Result<PlatformInfo> {
        let mut state = self.state.lock();
        state.enter(SimCall::PlatformInfo)?;
        state
            .platforms
            .iter()
            .find(|p| p.id == platform)
            .map(|p| p.info.clone())
            .ok_or_else(|| ClError::native("clGetPlatformInfo", CL_INVALID_PLATFORM))
    }

    fn device_ids(&self, platform: PlatformId, kind: DeviceKind) -> Result<Vec<DeviceId>> {
        let mut state = self.state.lock();
        state.enter(SimCall::DeviceIds)?;
        let p = state
            .platforms
            .iter()
            .find(|p| p.id == platform)
            .ok_or_else(|| ClError::native("clGetDeviceIDs", CL_INVALID_PLATFORM))?;
        Ok(p.devices
            .iter()
            .filter(|(_, info)| match info.kind {
                Some(k) => k.matches(kind),
                None => kind == DeviceKind::All,
            })
            .map(|(id, _)| *id)
            .collect())
    }

    fn device_info(&self, device: DeviceId) -> Result<DeviceInfo> {
        let mut state = self.state.lock();
        state.enter(SimCall::DeviceInfo)?;
        state
            .device(device)
            .cloned()
            .ok_or_else(|| ClError::native("clGetDeviceInfo", CL_INVALID_DEVICE))
    }

    fn create_context(&self, device: DeviceId) -> Result<ContextId> {
        let mut state = self.state.lock();
        state.enter(SimCall::CreateContext)?;
        if state.device(device).is_none() {
            return Err(ClError::native("clCreateContext", CL_INVALID_DEVICE));
        }
        let ctx = ContextId::from_raw(state.handle());
        state.contexts.insert(ctx, device);
        Ok(ctx)
    }

    fn create_queue(&self, context: ContextId, device: DeviceId) -> Result<QueueId> {
        let mut state = self.state.lock();
        state.enter(SimCall::CreateQueue)?;
        match state.contexts.get(&context) {
            None => return Err(ClError::native("clCreateCommandQueue", CL_INVALID_CONTEXT)),
            Some(&bound) if bound != device => {
                return Err(ClError::native("clCreateCommandQueue", CL_INVALID_DEVICE))
            }
            Some(_) => {}
        }
        let queue = QueueId::from_raw(state.handle());
        state.queues.insert(queue, context);
        Ok(queue)
    }

    fn release_queue(&self, queue: QueueId) -> Result<()> {
        let mut state = self.state.lock();
        state.enter(SimCall::ReleaseQueue)?;
        if state.queues.remove(&queue).is_none() {
            return Err(state.invalid(SimCall::ReleaseQueue, CL_INVALID_COMMAND_QUEUE));
        }
        state.events.push(SimEvent::QueueReleased(queue));
        Ok(())
    }

    fn release_context(&self, context: ContextId) -> Result<()> {
        let mut state = self.state.lock();
        state.enter(SimCall::ReleaseContext)?;
        let in_use = state.queues.values().any(|&c| c == context);
        if in_use || state.contexts.remove(&context).is_none() {
            return Err(state.invalid(SimCall::ReleaseContext, CL_INVALID_CONTEXT));
        }
        state.events.push(SimEvent::ContextReleased(context));
        Ok(())
    }

    fn create_buffer(&self, context: ContextId, nbytes: usize) -> Result<MemId> {
        let mut state = self.state.lock();
        state.enter(SimCall::CreateBuffer)?;
        if !state.contexts.contains_key(&context) {
            return Err(ClError::native("clCreateBuffer", CL_INVALID_CONTEXT));
        }
        if nbytes == 0 {
            return Err(ClError::native("clCreateBuffer", CL_INVALID_BUFFER_SIZE));
        }
        let mem = MemId::from_raw(state.handle());
        state.buffers.insert(mem, (context, vec![0u8; nbytes]));
        Ok(mem)
    }

    fn release_buffer(&self, mem: MemId) -> Result<()> {
        let mut state = self.state.lock();
        state.enter(SimCall::ReleaseBuffer)?;
        if state.buffers.remove(&mem).is_none() {
            return Err(state.invalid(SimCall::ReleaseBuffer, CL_INVALID_MEM_OBJECT));
        }
        state.events.push(SimEvent::BufferReleased(mem));
        Ok(())
    }

    fn write_buffer(&self, queue: QueueId, mem: MemId, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        state.enter(SimCall::WriteBuffer)?;
        let ctx = *state
            .queues
            .get(&queue)
            .ok_or_else(|| ClError::native("clEnqueueWriteBuffer", CL_INVALID_COMMAND_QUEUE))?;
        let (buf_ctx, bytes) = state
            .buffers
            .get_mut(&mem)
            .ok_or_else(|| ClError::native("clEnqueueWriteBuffer", CL_INVALID_MEM_OBJECT))?;
        if *buf_ctx != ctx {
            return Err(ClError::native("clEnqueueWriteBuffer", CL_INVALID_CONTEXT));
        }
        if data.len() > bytes.len() {
            return Err(ClError::native("clEnqueueWriteBuffer", CL_INVALID_VALUE));
        }
        bytes[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, queue: QueueId, mem: MemId, out: &mut [u8]) -> Result<()> {
        let mut state = self.state.lock();
        state.enter(SimCall::ReadBuffer)?;
        let ctx = *state
            .queues
            .get(&queue)
            .ok_or_else(|| ClError::native("clEnqueueReadBuffer", CL_INVALID_COMMAND_QUEUE))?;
        let (buf_ctx, bytes) = state
            .buffers
            .get(&mem)
            .ok_or_else(|| ClError::native("clEnqueueReadBuffer", CL_INVALID_MEM_OBJECT))?;
        if *buf_ctx != ctx {
            return Err(ClError::native("clEnqueueReadBuffer", CL_INVALID_CONTEXT));
        }
        if out.len() > bytes.len() {
            return Err(ClError::native("clEnqueueReadBuffer", CL_INVALID_VALUE));
        }
        out.copy_from_slice(&bytes[..out.len()]);
        Ok(())
    }

    fn build_program(
        &self,
        context: ContextId,
        device: DeviceId,
        source: &str,
    ) -> Result<ProgramId> {
        let mut state = self.state.lock();
        state.enter(SimCall::BuildProgram)?;
        match state.contexts.get(&context) {
            None => return Err(ClError::native("clCreateProgramWithSource", CL_INVALID_CONTEXT)),
            Some(&bound) if bound != device => {
                return Err(ClError::native("clBuildProgram", CL_INVALID_DEVICE))
            }
            Some(_) => {}
        }
        if let Some(line) = source.lines().find(|l| l.trim_start().starts_with("#error")) {
            return Err(ClError::Build {
                code: CL_BUILD_PROGRAM_FAILURE,
                log: format!("error: {}", line.trim()),
            });
        }
        let program = ProgramId::from_raw(state.handle());
        state.programs.insert(program, (context, source.to_string()));
        Ok(program)
    }

    fn create_kernel(&self, program: ProgramId, entry: &str) -> Result<KernelId> {
        let mut state = self.state.lock();
        state.enter(SimCall::CreateKernel)?;
        let (_, source) = state
            .programs
            .get(&program)
            .ok_or_else(|| ClError::native("clCreateKernel", CL_INVALID_PROGRAM))?;
        if entry.is_empty() || !source.contains(&format!("void {entry}(")) {
            return Err(ClError::native("clCreateKernel", CL_INVALID_KERNEL_NAME));
        }
        let kernel = KernelId::from_raw(state.handle());
        state.kernels.insert(kernel, program);
        Ok(kernel)
    }

    fn kernel_program(&self, kernel: KernelId) -> Result<ProgramId> {
        let mut state = self.state.lock();
        state.enter(SimCall::KernelProgram)?;
        state
            .kernels
            .get(&kernel)
            .copied()
            .ok_or_else(|| ClError::native("clGetKernelInfo", CL_INVALID_KERNEL))
    }

    fn release_kernel(&self, kernel: KernelId) -> Result<()> {
        let mut state = self.state.lock();
        state.enter(SimCall::ReleaseKernel)?;
        if state.kernels.remove(&kernel).is_none() {
            return Err(state.invalid(SimCall::ReleaseKernel, CL_INVALID_KERNEL));
        }
        state.events.push(SimEvent::KernelReleased(kernel));
        Ok(())
    }

    fn release_program(&self, program: ProgramId) -> Result<()> {
        let mut state = self.state.lock();
        state.enter(SimCall::ReleaseProgram)?;
        let in_use = state.kernels.values().any(|&p| p == program);
        if in_use || state.programs.remove(&program).is_none() {
            return Err(state.invalid(SimCall::ReleaseProgram, CL_INVALID_PROGRAM));
        }
        state.events.push(SimEvent::ProgramReleased(program));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_platforms() -> SimulatedApi {
        SimulatedApi::new()
            .with_platform("Sim CPU", &[DeviceKind::Cpu])
            .with_platform("Sim GPU", &[DeviceKind::Gpu, DeviceKind::Gpu])
    }

    #[test]
    fn test_empty_installation() {
        let api = SimulatedApi::new();
        assert!(api.platform_ids().unwrap().is_empty());
        assert_eq!(api.calls(SimCall::PlatformIds), 1);
    }

    #[test]
    fn test_device_filtering() {
        let api = two_platforms();
        let platforms = api.platform_ids().unwrap();
        assert_eq!(api.device_ids(platforms[0], DeviceKind::Gpu).unwrap().len(), 0);
        assert_eq!(api.device_ids(platforms[0], DeviceKind::All).unwrap().len(), 1);
        assert_eq!(api.device_ids(platforms[1], DeviceKind::Gpu).unwrap().len(), 2);
    }

    #[test]
    fn test_failure_injection() {
        let api = two_platforms();
        api.fail(SimCall::PlatformIds, -6);
        let err = api.platform_ids().unwrap_err();
        assert_eq!(err.code(), -6);
        api.clear_failures();
        assert_eq!(api.platform_ids().unwrap().len(), 2);
    }

    #[test]
    fn test_release_order_is_enforced() {
        let api = two_platforms();
        let platform = api.platform_ids().unwrap()[1];
        let device = api.device_ids(platform, DeviceKind::Gpu).unwrap()[0];
        let ctx = api.create_context(device).unwrap();
        let queue = api.create_queue(ctx, device).unwrap();

        assert!(api.release_context(ctx).is_err());
        assert_eq!(api.invalid_releases(), 1);
        api.release_queue(queue).unwrap();
        api.release_context(ctx).unwrap();
        assert_eq!(
            api.events(),
            vec![SimEvent::QueueReleased(queue), SimEvent::ContextReleased(ctx)]
        );
    }

    #[test]
    fn test_double_buffer_release_reported() {
        let api = two_platforms();
        let platform = api.platform_ids().unwrap()[0];
        let device = api.device_ids(platform, DeviceKind::All).unwrap()[0];
        let ctx = api.create_context(device).unwrap();
        let mem = api.create_buffer(ctx, 16).unwrap();

        api.release_buffer(mem).unwrap();
        assert_eq!(api.release_buffer(mem).unwrap_err().code(), CL_INVALID_MEM_OBJECT);
        assert_eq!(api.buffer_release_count(mem), 1);
        assert_eq!(api.invalid_releases(), 1);
    }

    #[test]
    fn test_build_and_kernel_lookup() {
        let api = two_platforms();
        let platform = api.platform_ids().unwrap()[1];
        let device = api.device_ids(platform, DeviceKind::Gpu).unwrap()[0];
        let ctx = api.create_context(device).unwrap();

        let program = api
            .build_program(ctx, device, "__kernel void scale(__global float *x) {}")
            .unwrap();
        let kernel = api.create_kernel(program, "scale").unwrap();
        assert_eq!(api.kernel_program(kernel).unwrap(), program);
        assert_eq!(
            api.create_kernel(program, "missing").unwrap_err().code(),
            CL_INVALID_KERNEL_NAME
        );

        let err = api.build_program(ctx, device, "#error nope\n").unwrap_err();
        assert!(matches!(err, ClError::Build { code: CL_BUILD_PROGRAM_FAILURE, .. }));
    }
}
