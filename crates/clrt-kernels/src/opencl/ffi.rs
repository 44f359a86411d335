//! Runtime-loaded OpenCL function pointers via dlopen.
//!
//! Binds against whatever ICD loader the system provides (`libOpenCL.so.1`,
//! `OpenCL.dll`, the macOS framework) instead of linking at build time.

use std::ffi::{c_char, c_void};
use std::sync::OnceLock;

use clrt_core::ClError;
use libloading::Library;

// ---------------------------------------------------------------------------
// Scalar types and status codes
// ---------------------------------------------------------------------------

pub type ClInt = i32;
pub type ClUint = u32;
pub type ClUlong = u64;
pub type ClBool = u32;

pub const CL_SUCCESS: ClInt = 0;
pub const CL_DEVICE_NOT_FOUND: ClInt = -1;
pub const CL_BUILD_PROGRAM_FAILURE: ClInt = -11;
pub const CL_INVALID_VALUE: ClInt = -30;
pub const CL_INVALID_PLATFORM: ClInt = -32;
pub const CL_INVALID_DEVICE: ClInt = -33;
pub const CL_INVALID_CONTEXT: ClInt = -34;
pub const CL_INVALID_COMMAND_QUEUE: ClInt = -36;
pub const CL_INVALID_MEM_OBJECT: ClInt = -38;
pub const CL_INVALID_PROGRAM: ClInt = -44;
pub const CL_INVALID_KERNEL_NAME: ClInt = -46;
pub const CL_INVALID_KERNEL: ClInt = -48;
pub const CL_INVALID_BUFFER_SIZE: ClInt = -61;
/// Returned by ICD loaders when no vendor platform is installed.
pub const CL_PLATFORM_NOT_FOUND_KHR: ClInt = -1001;

pub const CL_TRUE: ClBool = 1;
pub const CL_MEM_READ_WRITE: ClUlong = 1 << 0;

// cl_platform_info
pub const CL_PLATFORM_PROFILE: ClUint = 0x0900;
pub const CL_PLATFORM_VERSION: ClUint = 0x0901;
pub const CL_PLATFORM_NAME: ClUint = 0x0902;
pub const CL_PLATFORM_VENDOR: ClUint = 0x0903;
pub const CL_PLATFORM_EXTENSIONS: ClUint = 0x0904;

// cl_device_info
pub const CL_DEVICE_TYPE: ClUint = 0x1000;
pub const CL_DEVICE_VENDOR_ID: ClUint = 0x1001;
pub const CL_DEVICE_MAX_COMPUTE_UNITS: ClUint = 0x1002;
pub const CL_DEVICE_MAX_WORK_ITEM_DIMENSIONS: ClUint = 0x1003;
pub const CL_DEVICE_MAX_WORK_GROUP_SIZE: ClUint = 0x1004;
pub const CL_DEVICE_MAX_WORK_ITEM_SIZES: ClUint = 0x1005;
pub const CL_DEVICE_MAX_CLOCK_FREQUENCY: ClUint = 0x100C;
pub const CL_DEVICE_ADDRESS_BITS: ClUint = 0x100D;
pub const CL_DEVICE_MAX_MEM_ALLOC_SIZE: ClUint = 0x1010;
pub const CL_DEVICE_GLOBAL_MEM_CACHE_SIZE: ClUint = 0x101E;
pub const CL_DEVICE_GLOBAL_MEM_SIZE: ClUint = 0x101F;
pub const CL_DEVICE_ERROR_CORRECTION_SUPPORT: ClUint = 0x1024;
pub const CL_DEVICE_ENDIAN_LITTLE: ClUint = 0x1026;
pub const CL_DEVICE_AVAILABLE: ClUint = 0x1027;
pub const CL_DEVICE_COMPILER_AVAILABLE: ClUint = 0x1028;
pub const CL_DEVICE_NAME: ClUint = 0x102B;
pub const CL_DEVICE_VENDOR: ClUint = 0x102C;
pub const CL_DRIVER_VERSION: ClUint = 0x102D;
pub const CL_DEVICE_PROFILE: ClUint = 0x102E;
pub const CL_DEVICE_VERSION: ClUint = 0x102F;
pub const CL_DEVICE_EXTENSIONS: ClUint = 0x1030;

// cl_program_build_info / cl_kernel_info
pub const CL_PROGRAM_BUILD_LOG: ClUint = 0x1183;
pub const CL_KERNEL_PROGRAM: ClUint = 0x1194;

// Opaque handles
pub type ClPlatformId = *mut c_void;
pub type ClDeviceId = *mut c_void;
pub type ClContext = *mut c_void;
pub type ClCommandQueue = *mut c_void;
pub type ClMem = *mut c_void;
pub type ClProgram = *mut c_void;
pub type ClKernel = *mut c_void;
pub type ClEvent = *mut c_void;

// ---------------------------------------------------------------------------
// API function signatures
// ---------------------------------------------------------------------------

type FnGetPlatformIds = unsafe extern "C" fn(ClUint, *mut ClPlatformId, *mut ClUint) -> ClInt;
type FnGetPlatformInfo =
    unsafe extern "C" fn(ClPlatformId, ClUint, usize, *mut c_void, *mut usize) -> ClInt;
type FnGetDeviceIds = unsafe extern "C" fn(
    ClPlatformId, ClUlong, ClUint, *mut ClDeviceId, *mut ClUint,
) -> ClInt;
type FnGetDeviceInfo =
    unsafe extern "C" fn(ClDeviceId, ClUint, usize, *mut c_void, *mut usize) -> ClInt;
type FnCreateContext = unsafe extern "C" fn(
    *const isize,      // properties
    ClUint,            // num_devices
    *const ClDeviceId, // devices
    *const c_void,     // pfn_notify
    *mut c_void,       // user_data
    *mut ClInt,        // errcode_ret
) -> ClContext;
type FnCreateCommandQueue =
    unsafe extern "C" fn(ClContext, ClDeviceId, ClUlong, *mut ClInt) -> ClCommandQueue;
type FnReleaseCommandQueue = unsafe extern "C" fn(ClCommandQueue) -> ClInt;
type FnReleaseContext = unsafe extern "C" fn(ClContext) -> ClInt;
type FnCreateBuffer =
    unsafe extern "C" fn(ClContext, ClUlong, usize, *mut c_void, *mut ClInt) -> ClMem;
type FnReleaseMemObject = unsafe extern "C" fn(ClMem) -> ClInt;
type FnEnqueueWriteBuffer = unsafe extern "C" fn(
    ClCommandQueue,
    ClMem,
    ClBool,         // blocking
    usize,          // offset
    usize,          // size
    *const c_void,  // ptr
    ClUint,         // num_events_in_wait_list
    *const ClEvent, // event_wait_list
    *mut ClEvent,   // event
) -> ClInt;
type FnEnqueueReadBuffer = unsafe extern "C" fn(
    ClCommandQueue, ClMem, ClBool, usize, usize, *mut c_void, ClUint, *const ClEvent, *mut ClEvent,
) -> ClInt;
type FnCreateProgramWithSource = unsafe extern "C" fn(
    ClContext, ClUint, *const *const c_char, *const usize, *mut ClInt,
) -> ClProgram;
type FnBuildProgram = unsafe extern "C" fn(
    ClProgram,
    ClUint,
    *const ClDeviceId,
    *const c_char,  // options
    *const c_void,  // pfn_notify
    *mut c_void,    // user_data
) -> ClInt;
type FnGetProgramBuildInfo = unsafe extern "C" fn(
    ClProgram, ClDeviceId, ClUint, usize, *mut c_void, *mut usize,
) -> ClInt;
type FnCreateKernel = unsafe extern "C" fn(ClProgram, *const c_char, *mut ClInt) -> ClKernel;
type FnGetKernelInfo =
    unsafe extern "C" fn(ClKernel, ClUint, usize, *mut c_void, *mut usize) -> ClInt;
type FnReleaseKernel = unsafe extern "C" fn(ClKernel) -> ClInt;
type FnReleaseProgram = unsafe extern "C" fn(ClProgram) -> ClInt;

// ---------------------------------------------------------------------------
// Loaded API struct
// ---------------------------------------------------------------------------

pub struct ClApi {
    _lib: Library,
    pub get_platform_ids: FnGetPlatformIds,
    pub get_platform_info: FnGetPlatformInfo,
    pub get_device_ids: FnGetDeviceIds,
    pub get_device_info: FnGetDeviceInfo,
    pub create_context: FnCreateContext,
    pub create_command_queue: FnCreateCommandQueue,
    pub release_command_queue: FnReleaseCommandQueue,
    pub release_context: FnReleaseContext,
    pub create_buffer: FnCreateBuffer,
    pub release_mem_object: FnReleaseMemObject,
    pub enqueue_write_buffer: FnEnqueueWriteBuffer,
    pub enqueue_read_buffer: FnEnqueueReadBuffer,
    pub create_program_with_source: FnCreateProgramWithSource,
    pub build_program: FnBuildProgram,
    pub get_program_build_info: FnGetProgramBuildInfo,
    pub create_kernel: FnCreateKernel,
    pub get_kernel_info: FnGetKernelInfo,
    pub release_kernel: FnReleaseKernel,
    pub release_program: FnReleaseProgram,
}

// Safety: OpenCL 1.1+ requires every entry point used here to be thread-safe.
unsafe impl Send for ClApi {}
unsafe impl Sync for ClApi {}

// ---------------------------------------------------------------------------
// Library loading
// ---------------------------------------------------------------------------

#[cfg(target_os = "macos")]
const LIBRARY_NAMES: &[&str] = &["/System/Library/Frameworks/OpenCL.framework/OpenCL"];
#[cfg(target_os = "windows")]
const LIBRARY_NAMES: &[&str] = &["OpenCL.dll"];
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const LIBRARY_NAMES: &[&str] = &["libOpenCL.so.1", "libOpenCL.so"];

static CL_API: OnceLock<Option<ClApi>> = OnceLock::new();

impl ClApi {
    fn try_load() -> Option<Self> {
        let lib = LIBRARY_NAMES
            .iter()
            .find_map(|name| unsafe { Library::new(*name) }.ok())?;
        unsafe {
            let api = ClApi {
                get_platform_ids: *lib.get::<FnGetPlatformIds>(b"clGetPlatformIDs\0").ok()?,
                get_platform_info: *lib.get::<FnGetPlatformInfo>(b"clGetPlatformInfo\0").ok()?,
                get_device_ids: *lib.get::<FnGetDeviceIds>(b"clGetDeviceIDs\0").ok()?,
                get_device_info: *lib.get::<FnGetDeviceInfo>(b"clGetDeviceInfo\0").ok()?,
                create_context: *lib.get::<FnCreateContext>(b"clCreateContext\0").ok()?,
                create_command_queue: *lib
                    .get::<FnCreateCommandQueue>(b"clCreateCommandQueue\0")
                    .ok()?,
                release_command_queue: *lib
                    .get::<FnReleaseCommandQueue>(b"clReleaseCommandQueue\0")
                    .ok()?,
                release_context: *lib.get::<FnReleaseContext>(b"clReleaseContext\0").ok()?,
                create_buffer: *lib.get::<FnCreateBuffer>(b"clCreateBuffer\0").ok()?,
                release_mem_object: *lib.get::<FnReleaseMemObject>(b"clReleaseMemObject\0").ok()?,
                enqueue_write_buffer: *lib
                    .get::<FnEnqueueWriteBuffer>(b"clEnqueueWriteBuffer\0")
                    .ok()?,
                enqueue_read_buffer: *lib
                    .get::<FnEnqueueReadBuffer>(b"clEnqueueReadBuffer\0")
                    .ok()?,
                create_program_with_source: *lib
                    .get::<FnCreateProgramWithSource>(b"clCreateProgramWithSource\0")
                    .ok()?,
                build_program: *lib.get::<FnBuildProgram>(b"clBuildProgram\0").ok()?,
                get_program_build_info: *lib
                    .get::<FnGetProgramBuildInfo>(b"clGetProgramBuildInfo\0")
                    .ok()?,
                create_kernel: *lib.get::<FnCreateKernel>(b"clCreateKernel\0").ok()?,
                get_kernel_info: *lib.get::<FnGetKernelInfo>(b"clGetKernelInfo\0").ok()?,
                release_kernel: *lib.get::<FnReleaseKernel>(b"clReleaseKernel\0").ok()?,
                release_program: *lib.get::<FnReleaseProgram>(b"clReleaseProgram\0").ok()?,
                _lib: lib,
            };
            Some(api)
        }
    }
}

/// Get the runtime-loaded OpenCL API. Returns None if no ICD loader was found.
pub fn cl_api() -> Option<&'static ClApi> {
    CL_API.get_or_init(ClApi::try_load).as_ref()
}

/// Library names probed when loading, for diagnostics.
pub fn library_names() -> &'static [&'static str] {
    LIBRARY_NAMES
}

// ---------------------------------------------------------------------------
// Error checking helpers
// ---------------------------------------------------------------------------

/// Check an OpenCL status code.
pub fn check_cl(code: ClInt, call: &'static str) -> Result<(), ClError> {
    if code == CL_SUCCESS {
        Ok(())
    } else {
        Err(ClError::native(call, code))
    }
}
