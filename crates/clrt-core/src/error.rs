use crate::DType;

/// Stable error codes reported through an error-output slot.
///
/// Zero is success. Native failures report the native (negative) code
/// instead of one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    Generic = 1,
    NoPlatforms = -1,
    NoDevices = -2,
    MissingKeyword = -3,
    IncorrectParamCount = -4,
    IncorrectParamType = -5,
    InvalidPlatformIndex = -6,
    InvalidDeviceIndex = -7,
}

impl ErrorCode {
    pub fn value(self) -> i32 {
        self as i32
    }

    /// Catalog key of the code.
    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::Generic => "OPENCL_ERROR",
            ErrorCode::NoPlatforms => "OPENCL_NO_PLATFORMS",
            ErrorCode::NoDevices => "OPENCL_NO_DEVICES",
            ErrorCode::MissingKeyword => "OPENCL_MISSING_KEYWORD",
            ErrorCode::IncorrectParamCount => "OPENCL_INCORRECT_N_PARAMS",
            ErrorCode::IncorrectParamType => "OPENCL_INCORRECT_PARAM_TYPE",
            ErrorCode::InvalidPlatformIndex => "OPENCL_INVALID_PLATFORM_INDEX",
            ErrorCode::InvalidDeviceIndex => "OPENCL_INVALID_DEVICE_INDEX",
        }
    }
}

/// Errors raised by platform discovery, session management and handle release.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClError {
    #[error("{0}")]
    Message(String),

    #[error("OpenCL not available: {0}")]
    NotAvailable(String),

    #[error("OpenCL error {code} in {call}")]
    Native { call: &'static str, code: i32 },

    #[error("program build failed with code {code}: {log}")]
    Build { code: i32, log: String },

    #[error("No valid platforms found")]
    NoPlatforms,

    #[error("No valid devices found")]
    NoDevices,

    #[error("No device is bound to the session")]
    NoSession,

    #[error("Missing required keyword: {0}")]
    MissingKeyword(String),

    #[error("Incorrect number of parameters")]
    IncorrectParamCount,

    #[error("Incorrect parameter type")]
    IncorrectParamType,

    #[error("Invalid platform index: {0}")]
    InvalidPlatformIndex(usize),

    #[error("Invalid device index: {0}")]
    InvalidDeviceIndex(usize),

    #[error("kernel handle {0} belongs to a released kernel or a previous session")]
    StaleKernel(u64),

    #[error("buffer view outlived the buffer that owns its memory")]
    StaleView,

    #[error("handle key {0} is already registered")]
    DuplicateHandle(u64),

    #[error("type mismatch: buffer holds {expected}, got {actual}")]
    TypeMismatch { expected: DType, actual: DType },

    #[error("size mismatch: buffer holds {expected} elements, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("invalid shape: {0}")]
    InvalidShape(String),
}

impl ClError {
    /// Shorthand for a native failure.
    pub fn native(call: &'static str, code: i32) -> Self {
        ClError::Native { call, code }
    }

    /// Catalog code for structural errors; `None` for native failures.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            ClError::Native { .. } | ClError::Build { .. } => None,
            ClError::NoPlatforms | ClError::NotAvailable(_) | ClError::NoSession => {
                Some(ErrorCode::NoPlatforms)
            }
            ClError::NoDevices => Some(ErrorCode::NoDevices),
            ClError::MissingKeyword(_) => Some(ErrorCode::MissingKeyword),
            ClError::IncorrectParamCount => Some(ErrorCode::IncorrectParamCount),
            ClError::IncorrectParamType => Some(ErrorCode::IncorrectParamType),
            ClError::InvalidPlatformIndex(_) => Some(ErrorCode::InvalidPlatformIndex),
            ClError::InvalidDeviceIndex(_) => Some(ErrorCode::InvalidDeviceIndex),
            ClError::Message(_)
            | ClError::StaleKernel(_)
            | ClError::StaleView
            | ClError::DuplicateHandle(_)
            | ClError::TypeMismatch { .. }
            | ClError::SizeMismatch { .. }
            | ClError::InvalidShape(_) => Some(ErrorCode::Generic),
        }
    }

    /// Integer written to an error-output slot.
    pub fn code(&self) -> i32 {
        match self {
            ClError::Native { code, .. } | ClError::Build { code, .. } => *code,
            other => other.error_code().map_or(ErrorCode::Generic.value(), ErrorCode::value),
        }
    }
}

/// Error-output slot value for a result: 0 on success, the error's code otherwise.
pub fn status<T>(result: &Result<T, ClError>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.code(),
    }
}
