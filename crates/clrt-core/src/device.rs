use std::fmt;

use serde::{Deserialize, Serialize};

/// `CL_DEVICE_TYPE_DEFAULT`
pub const DEVICE_TYPE_DEFAULT: u64 = 1 << 0;
/// `CL_DEVICE_TYPE_CPU`
pub const DEVICE_TYPE_CPU: u64 = 1 << 1;
/// `CL_DEVICE_TYPE_GPU`
pub const DEVICE_TYPE_GPU: u64 = 1 << 2;
/// `CL_DEVICE_TYPE_ACCELERATOR`
pub const DEVICE_TYPE_ACCELERATOR: u64 = 1 << 3;
/// `CL_DEVICE_TYPE_ALL`
pub const DEVICE_TYPE_ALL: u64 = 0xFFFF_FFFF;

/// Device category. The categories are mutually exclusive; a device reports
/// exactly one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cpu,
    Gpu,
    Accelerator,
    Default,
    All,
}

impl DeviceKind {
    /// Classify a native device-type bitmask.
    ///
    /// The full `ALL` mask maps to `All`; otherwise each category bit is tested
    /// on its own. Masks carrying none of the known bits (custom devices)
    /// yield `None`.
    pub fn from_bits(bits: u64) -> Option<DeviceKind> {
        if bits == DEVICE_TYPE_ALL {
            Some(DeviceKind::All)
        } else if bits & DEVICE_TYPE_CPU != 0 {
            Some(DeviceKind::Cpu)
        } else if bits & DEVICE_TYPE_GPU != 0 {
            Some(DeviceKind::Gpu)
        } else if bits & DEVICE_TYPE_ACCELERATOR != 0 {
            Some(DeviceKind::Accelerator)
        } else if bits & DEVICE_TYPE_DEFAULT != 0 {
            Some(DeviceKind::Default)
        } else {
            None
        }
    }

    /// Native bitmask used when querying devices of this kind.
    pub fn bits(&self) -> u64 {
        match self {
            DeviceKind::Cpu => DEVICE_TYPE_CPU,
            DeviceKind::Gpu => DEVICE_TYPE_GPU,
            DeviceKind::Accelerator => DEVICE_TYPE_ACCELERATOR,
            DeviceKind::Default => DEVICE_TYPE_DEFAULT,
            DeviceKind::All => DEVICE_TYPE_ALL,
        }
    }

    /// Whether a device of kind `self` is returned by a query for `query`.
    pub fn matches(&self, query: DeviceKind) -> bool {
        query == DeviceKind::All || *self == query
    }

    /// Native constant name, e.g. `CL_DEVICE_TYPE_GPU`.
    pub fn cl_name(&self) -> &'static str {
        match self {
            DeviceKind::Cpu => "CL_DEVICE_TYPE_CPU",
            DeviceKind::Gpu => "CL_DEVICE_TYPE_GPU",
            DeviceKind::Accelerator => "CL_DEVICE_TYPE_ACCELERATOR",
            DeviceKind::Default => "CL_DEVICE_TYPE_DEFAULT",
            DeviceKind::All => "CL_DEVICE_TYPE_ALL",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Cpu => write!(f, "cpu"),
            DeviceKind::Gpu => write!(f, "gpu"),
            DeviceKind::Accelerator => write!(f, "accelerator"),
            DeviceKind::Default => write!(f, "default"),
            DeviceKind::All => write!(f, "all"),
        }
    }
}
