//! Immutable property snapshots produced by platform and device enumeration.

use serde::Serialize;

use crate::DeviceKind;

/// Properties of one compute platform (one vendor runtime).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PlatformInfo {
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub profile: String,
    pub extensions: String,
}

/// Properties of one compute device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor: String,
    pub vendor_id: u32,
    /// `None` for devices reporting only vendor-specific type bits.
    pub kind: Option<DeviceKind>,
    pub extensions: String,
    pub profile: String,
    pub global_mem_size: u64,
    pub global_mem_cache_size: u64,
    pub address_bits: u32,
    pub available: bool,
    pub compiler_available: bool,
    pub endian_little: bool,
    pub error_correction_support: bool,
    pub device_version: String,
    pub driver_version: String,
    pub max_compute_units: u32,
    /// MHz
    pub max_clock_frequency: u32,
    pub max_mem_alloc_size: u64,
    pub max_work_group_size: usize,
    pub max_work_item_sizes: Vec<usize>,
}

impl DeviceInfo {
    /// Native device-type constant name, or `"CL_DEVICE_TYPE_CUSTOM"` when the
    /// device is not one of the standard categories.
    pub fn type_name(&self) -> &'static str {
        self.kind.map_or("CL_DEVICE_TYPE_CUSTOM", |k| k.cl_name())
    }
}
