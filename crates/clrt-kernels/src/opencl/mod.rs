//! OpenCL backend for clrt.
//!
//! Uses `libloading` for runtime-loaded OpenCL function pointers (no
//! build-time OpenCL SDK dependency). `OpenClApi` implements the
//! `ComputeApi` seam on top of the loaded ICD entry points.

pub mod ffi;

use std::ffi::{c_void, CString};
use std::ptr;

use clrt_core::{ClError, DeviceInfo, DeviceKind, PlatformInfo, Result};

use crate::api::{
    ComputeApi, ContextId, DeviceId, KernelId, MemId, PlatformId, ProgramId, QueueId,
};
use ffi::{check_cl, ClApi, ClInt, ClUint};

/// `ComputeApi` backed by the system OpenCL ICD loader.
pub struct OpenClApi {
    cl: &'static ClApi,
}

impl OpenClApi {
    /// Load the OpenCL library. Fails with `NotAvailable` if no ICD loader
    /// can be opened.
    pub fn load() -> Result<Self> {
        let cl = ffi::cl_api().ok_or_else(|| {
            ClError::NotAvailable(format!("none of {:?} could be loaded", ffi::library_names()))
        })?;
        Ok(Self { cl })
    }

    /// Whether an OpenCL ICD loader can be opened on this system.
    pub fn is_available() -> bool {
        ffi::cl_api().is_some()
    }

    fn platform_str(&self, platform: PlatformId, param: ClUint) -> Result<String> {
        let raw = platform.as_raw() as ffi::ClPlatformId;
        query_string("clGetPlatformInfo", |size, value, size_ret| unsafe {
            (self.cl.get_platform_info)(raw, param, size, value, size_ret)
        })
    }

    fn device_str(&self, device: DeviceId, param: ClUint) -> Result<String> {
        let raw = device.as_raw() as ffi::ClDeviceId;
        query_string("clGetDeviceInfo", |size, value, size_ret| unsafe {
            (self.cl.get_device_info)(raw, param, size, value, size_ret)
        })
    }

    fn device_scalar<T: bytemuck::Pod>(&self, device: DeviceId, param: ClUint) -> Result<T> {
        let raw = device.as_raw() as ffi::ClDeviceId;
        let mut value = T::zeroed();
        check_cl(
            unsafe {
                (self.cl.get_device_info)(
                    raw,
                    param,
                    std::mem::size_of::<T>(),
                    &mut value as *mut T as *mut c_void,
                    ptr::null_mut(),
                )
            },
            "clGetDeviceInfo",
        )?;
        Ok(value)
    }

    fn device_bool(&self, device: DeviceId, param: ClUint) -> Result<bool> {
        Ok(self.device_scalar::<ffi::ClBool>(device, param)? != 0)
    }

    fn work_item_sizes(&self, device: DeviceId) -> Result<Vec<usize>> {
        let dims: ClUint = self.device_scalar(device, ffi::CL_DEVICE_MAX_WORK_ITEM_DIMENSIONS)?;
        let mut sizes = vec![0usize; dims as usize];
        check_cl(
            unsafe {
                (self.cl.get_device_info)(
                    device.as_raw() as ffi::ClDeviceId,
                    ffi::CL_DEVICE_MAX_WORK_ITEM_SIZES,
                    sizes.len() * std::mem::size_of::<usize>(),
                    sizes.as_mut_ptr() as *mut c_void,
                    ptr::null_mut(),
                )
            },
            "clGetDeviceInfo",
        )?;
        Ok(sizes)
    }

    fn build_log(&self, program: ffi::ClProgram, device: ffi::ClDeviceId) -> String {
        query_string("clGetProgramBuildInfo", |size, value, size_ret| unsafe {
            (self.cl.get_program_build_info)(
                program,
                device,
                ffi::CL_PROGRAM_BUILD_LOG,
                size,
                value,
                size_ret,
            )
        })
        .unwrap_or_else(|e| format!("<build log unavailable: {e}>"))
    }
}

/// Run the two-step size-then-data protocol of an OpenCL string query.
fn query_string(
    call: &'static str,
    mut query: impl FnMut(usize, *mut c_void, *mut usize) -> ClInt,
) -> Result<String> {
    let mut size: usize = 0;
    check_cl(query(0, ptr::null_mut(), &mut size), call)?;
    let mut buf = vec![0u8; size];
    check_cl(query(size, buf.as_mut_ptr() as *mut c_void, ptr::null_mut()), call)?;
    if let Some(nul) = buf.iter().position(|&b| b == 0) {
        buf.truncate(nul);
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

impl ComputeApi for OpenClApi {
    fn backend_name(&self) -> &'static str {
        "opencl"
    }

    fn platform_ids(&self) -> Result<Vec<PlatformId>> {
        let mut count: ClUint = 0;
        let code = unsafe { (self.cl.get_platform_ids)(0, ptr::null_mut(), &mut count) };
        if code == ffi::CL_PLATFORM_NOT_FOUND_KHR {
            return Ok(Vec::new());
        }
        check_cl(code, "clGetPlatformIDs")?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut ids: Vec<ffi::ClPlatformId> = vec![ptr::null_mut(); count as usize];
        check_cl(
            unsafe { (self.cl.get_platform_ids)(count, ids.as_mut_ptr(), ptr::null_mut()) },
            "clGetPlatformIDs",
        )?;
        Ok(ids.into_iter().map(|p| PlatformId::from_raw(p as usize)).collect())
    }

    fn platform_info(&self, platform: PlatformId) -> Result<PlatformInfo> {
        Ok(PlatformInfo {
            name: self.platform_str(platform, ffi::CL_PLATFORM_NAME)?,
            vendor: self.platform_str(platform, ffi::CL_PLATFORM_VENDOR)?,
            version: self.platform_str(platform, ffi::CL_PLATFORM_VERSION)?,
            profile: self.platform_str(platform, ffi::CL_PLATFORM_PROFILE)?,
            extensions: self.platform_str(platform, ffi::CL_PLATFORM_EXTENSIONS)?,
        })
    }

    fn device_ids(&self, platform: PlatformId, kind: DeviceKind) -> Result<Vec<DeviceId>> {
        let raw = platform.as_raw() as ffi::ClPlatformId;
        let mut count: ClUint = 0;
        let code =
            unsafe { (self.cl.get_device_ids)(raw, kind.bits(), 0, ptr::null_mut(), &mut count) };
        if code == ffi::CL_DEVICE_NOT_FOUND {
            return Ok(Vec::new());
        }
        check_cl(code, "clGetDeviceIDs")?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut ids: Vec<ffi::ClDeviceId> = vec![ptr::null_mut(); count as usize];
        check_cl(
            unsafe {
                (self.cl.get_device_ids)(
                    raw,
                    kind.bits(),
                    count,
                    ids.as_mut_ptr(),
                    ptr::null_mut(),
                )
            },
            "clGetDeviceIDs",
        )?;
        Ok(ids.into_iter().map(|d| DeviceId::from_raw(d as usize)).collect())
    }

    fn device_info(&self, device: DeviceId) -> Result<DeviceInfo> {
        let type_bits: ffi::ClUlong = self.device_scalar(device, ffi::CL_DEVICE_TYPE)?;
        Ok(DeviceInfo {
            name: self.device_str(device, ffi::CL_DEVICE_NAME)?,
            vendor: self.device_str(device, ffi::CL_DEVICE_VENDOR)?,
            vendor_id: self.device_scalar(device, ffi::CL_DEVICE_VENDOR_ID)?,
            kind: DeviceKind::from_bits(type_bits),
            extensions: self.device_str(device, ffi::CL_DEVICE_EXTENSIONS)?,
            profile: self.device_str(device, ffi::CL_DEVICE_PROFILE)?,
            global_mem_size: self.device_scalar(device, ffi::CL_DEVICE_GLOBAL_MEM_SIZE)?,
            global_mem_cache_size: self
                .device_scalar(device, ffi::CL_DEVICE_GLOBAL_MEM_CACHE_SIZE)?,
            address_bits: self.device_scalar(device, ffi::CL_DEVICE_ADDRESS_BITS)?,
            available: self.device_bool(device, ffi::CL_DEVICE_AVAILABLE)?,
            compiler_available: self.device_bool(device, ffi::CL_DEVICE_COMPILER_AVAILABLE)?,
            endian_little: self.device_bool(device, ffi::CL_DEVICE_ENDIAN_LITTLE)?,
            error_correction_support: self
                .device_bool(device, ffi::CL_DEVICE_ERROR_CORRECTION_SUPPORT)?,
            device_version: self.device_str(device, ffi::CL_DEVICE_VERSION)?,
            driver_version: self.device_str(device, ffi::CL_DRIVER_VERSION)?,
            max_compute_units: self.device_scalar(device, ffi::CL_DEVICE_MAX_COMPUTE_UNITS)?,
            max_clock_frequency: self.device_scalar(device, ffi::CL_DEVICE_MAX_CLOCK_FREQUENCY)?,
            max_mem_alloc_size: self.device_scalar(device, ffi::CL_DEVICE_MAX_MEM_ALLOC_SIZE)?,
            max_work_group_size: self.device_scalar(device, ffi::CL_DEVICE_MAX_WORK_GROUP_SIZE)?,
            max_work_item_sizes: self.work_item_sizes(device)?,
        })
    }

    fn create_context(&self, device: DeviceId) -> Result<ContextId> {
        let raw_device = device.as_raw() as ffi::ClDeviceId;
        let mut err: ClInt = 0;
        let ctx = unsafe {
            (self.cl.create_context)(
                ptr::null(),
                1,
                &raw_device,
                ptr::null(),
                ptr::null_mut(),
                &mut err,
            )
        };
        check_cl(err, "clCreateContext")?;
        Ok(ContextId::from_raw(ctx as usize))
    }

    fn create_queue(&self, context: ContextId, device: DeviceId) -> Result<QueueId> {
        let mut err: ClInt = 0;
        let queue = unsafe {
            (self.cl.create_command_queue)(
                context.as_raw() as ffi::ClContext,
                device.as_raw() as ffi::ClDeviceId,
                0,
                &mut err,
            )
        };
        check_cl(err, "clCreateCommandQueue")?;
        Ok(QueueId::from_raw(queue as usize))
    }

    fn release_queue(&self, queue: QueueId) -> Result<()> {
        check_cl(
            unsafe { (self.cl.release_command_queue)(queue.as_raw() as ffi::ClCommandQueue) },
            "clReleaseCommandQueue",
        )
    }

    fn release_context(&self, context: ContextId) -> Result<()> {
        check_cl(
            unsafe { (self.cl.release_context)(context.as_raw() as ffi::ClContext) },
            "clReleaseContext",
        )
    }

    fn create_buffer(&self, context: ContextId, nbytes: usize) -> Result<MemId> {
        let mut err: ClInt = 0;
        let mem = unsafe {
            (self.cl.create_buffer)(
                context.as_raw() as ffi::ClContext,
                ffi::CL_MEM_READ_WRITE,
                nbytes,
                ptr::null_mut(),
                &mut err,
            )
        };
        check_cl(err, "clCreateBuffer")?;
        Ok(MemId::from_raw(mem as usize))
    }

    fn release_buffer(&self, mem: MemId) -> Result<()> {
        check_cl(
            unsafe { (self.cl.release_mem_object)(mem.as_raw() as ffi::ClMem) },
            "clReleaseMemObject",
        )
    }

    fn write_buffer(&self, queue: QueueId, mem: MemId, data: &[u8]) -> Result<()> {
        check_cl(
            unsafe {
                (self.cl.enqueue_write_buffer)(
                    queue.as_raw() as ffi::ClCommandQueue,
                    mem.as_raw() as ffi::ClMem,
                    ffi::CL_TRUE,
                    0,
                    data.len(),
                    data.as_ptr() as *const c_void,
                    0,
                    ptr::null(),
                    ptr::null_mut(),
                )
            },
            "clEnqueueWriteBuffer",
        )
    }

    fn read_buffer(&self, queue: QueueId, mem: MemId, out: &mut [u8]) -> Result<()> {
        check_cl(
            unsafe {
                (self.cl.enqueue_read_buffer)(
                    queue.as_raw() as ffi::ClCommandQueue,
                    mem.as_raw() as ffi::ClMem,
                    ffi::CL_TRUE,
                    0,
                    out.len(),
                    out.as_mut_ptr() as *mut c_void,
                    0,
                    ptr::null(),
                    ptr::null_mut(),
                )
            },
            "clEnqueueReadBuffer",
        )
    }

    fn build_program(
        &self,
        context: ContextId,
        device: DeviceId,
        source: &str,
    ) -> Result<ProgramId> {
        let c_source = CString::new(source)
            .map_err(|_| ClError::Message("kernel source contains a null byte".to_string()))?;
        let src_ptr = c_source.as_ptr();
        let mut err: ClInt = 0;
        let program = unsafe {
            (self.cl.create_program_with_source)(
                context.as_raw() as ffi::ClContext,
                1,
                &src_ptr,
                ptr::null(),
                &mut err,
            )
        };
        check_cl(err, "clCreateProgramWithSource")?;

        let raw_device = device.as_raw() as ffi::ClDeviceId;
        let code = unsafe {
            (self.cl.build_program)(
                program,
                1,
                &raw_device,
                ptr::null(),
                ptr::null(),
                ptr::null_mut(),
            )
        };
        if code != ffi::CL_SUCCESS {
            let log = self.build_log(program, raw_device);
            unsafe { (self.cl.release_program)(program) };
            return Err(ClError::Build { code, log });
        }
        Ok(ProgramId::from_raw(program as usize))
    }

    fn create_kernel(&self, program: ProgramId, entry: &str) -> Result<KernelId> {
        let c_entry = CString::new(entry)
            .map_err(|_| ClError::Message("kernel name contains a null byte".to_string()))?;
        let mut err: ClInt = 0;
        let kernel = unsafe {
            (self.cl.create_kernel)(program.as_raw() as ffi::ClProgram, c_entry.as_ptr(), &mut err)
        };
        check_cl(err, "clCreateKernel")?;
        Ok(KernelId::from_raw(kernel as usize))
    }

    fn kernel_program(&self, kernel: KernelId) -> Result<ProgramId> {
        let mut program: ffi::ClProgram = ptr::null_mut();
        check_cl(
            unsafe {
                (self.cl.get_kernel_info)(
                    kernel.as_raw() as ffi::ClKernel,
                    ffi::CL_KERNEL_PROGRAM,
                    std::mem::size_of::<ffi::ClProgram>(),
                    &mut program as *mut ffi::ClProgram as *mut c_void,
                    ptr::null_mut(),
                )
            },
            "clGetKernelInfo",
        )?;
        if program.is_null() {
            return Err(ClError::native("clGetKernelInfo", ffi::CL_INVALID_KERNEL));
        }
        Ok(ProgramId::from_raw(program as usize))
    }

    fn release_kernel(&self, kernel: KernelId) -> Result<()> {
        check_cl(
            unsafe { (self.cl.release_kernel)(kernel.as_raw() as ffi::ClKernel) },
            "clReleaseKernel",
        )
    }

    fn release_program(&self, program: ProgramId) -> Result<()> {
        check_cl(
            unsafe { (self.cl.release_program)(program.as_raw() as ffi::ClProgram) },
            "clReleaseProgram",
        )
    }
}
