//! Platform/device selection policy.
//!
//! Index resolution: explicit > environment override > 0. A GPU-only
//! request with no platform (explicit or overridden) scans all platforms in
//! enumeration order and takes the first one exposing a GPU.

use clrt_core::{ClError, DeviceKind, Result};

use crate::api::{ComputeApi, DeviceId, PlatformId};
use crate::config::{EnvOverrides, SelectRequest};

/// The platform/device pair a session should bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub platform_index: usize,
    pub device_index: usize,
    pub platform: PlatformId,
    pub device: DeviceId,
}

/// Resolve `request` against the platforms and devices `api` reports.
///
/// # Errors
///
/// * `NoPlatforms` - nothing installed; no device query is made
/// * `InvalidPlatformIndex` - resolved platform index out of range
/// * `NoDevices` - no device of the requested kind on the chosen platform
///   (or on any platform, for a GPU scan)
/// * `InvalidDeviceIndex` - resolved device index out of range
/// * `Native` - a platform or device query failed
pub fn select(
    api: &dyn ComputeApi,
    request: &SelectRequest,
    env: &EnvOverrides,
) -> Result<Selection> {
    let platform_given = request.platform.or(env.platform);
    let device_index = request.device.or(env.device).unwrap_or(0);
    let kind = if request.gpu_only { DeviceKind::Gpu } else { DeviceKind::All };

    let platforms = api.platform_ids()?;
    if platforms.is_empty() {
        return Err(ClError::NoPlatforms);
    }

    let (platform_index, devices) = match platform_given {
        None if request.gpu_only => first_platform_with_gpu(api, &platforms)?,
        given => {
            let index = given.unwrap_or(0);
            let platform = *platforms
                .get(index)
                .ok_or(ClError::InvalidPlatformIndex(index))?;
            (index, api.device_ids(platform, kind)?)
        }
    };

    if devices.is_empty() {
        return Err(ClError::NoDevices);
    }
    let device = *devices
        .get(device_index)
        .ok_or(ClError::InvalidDeviceIndex(device_index))?;

    tracing::debug!(
        "selected platform {} device {} ({} candidate {} devices)",
        platform_index,
        device_index,
        devices.len(),
        kind
    );

    Ok(Selection {
        platform_index,
        device_index,
        platform: platforms[platform_index],
        device,
    })
}

/// Platform query errors during the scan count as "no GPU here".
fn first_platform_with_gpu(
    api: &dyn ComputeApi,
    platforms: &[PlatformId],
) -> Result<(usize, Vec<DeviceId>)> {
    for (index, &platform) in platforms.iter().enumerate() {
        match api.device_ids(platform, DeviceKind::Gpu) {
            Ok(devices) if !devices.is_empty() => return Ok((index, devices)),
            Ok(_) => {}
            Err(e) => tracing::debug!("skipping platform {} in GPU scan: {}", index, e),
        }
    }
    Err(ClError::NoDevices)
}
