//! # clrt-core
//!
//! Plain data shared by the clrt OpenCL session manager.
//!
//! Provides:
//! - Buffer element types (`DType`) and their host counterparts (`Element`)
//! - Buffer extents (`Shape`)
//! - Device categories (`DeviceKind`) and native type bitmasks
//! - Platform and device property snapshots
//! - `ClError` with the stable error-code catalog

pub mod dtype;
pub mod device;
pub mod shape;
pub mod info;
pub mod error;

pub use dtype::{DType, Element};
pub use device::DeviceKind;
pub use shape::Shape;
pub use info::{DeviceInfo, PlatformInfo};
pub use error::{status, ClError, ErrorCode};

pub type Result<T> = std::result::Result<T, ClError>;
