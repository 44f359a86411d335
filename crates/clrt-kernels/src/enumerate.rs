//! Platform and device discovery. Nothing is cached between calls.

use clrt_core::{ClError, DeviceInfo, DeviceKind, PlatformInfo, Result};

use crate::api::ComputeApi;
use crate::context::ComputeSession;

/// Property snapshots of every installed platform, in enumeration order.
pub fn list_platforms(api: &dyn ComputeApi) -> Result<Vec<PlatformInfo>> {
    api.platform_ids()?
        .into_iter()
        .map(|platform| api.platform_info(platform))
        .collect()
}

/// Which devices `list_devices` reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceQuery {
    /// Platform to enumerate.
    pub platform: usize,
    /// Only GPU devices.
    pub gpu_only: bool,
    /// Report the session's bound device instead of enumerating.
    pub current_only: bool,
}

/// Property snapshots of the devices selected by `query`.
///
/// With `current_only` the session's bound device is queried through `api`
/// and nothing is enumerated; an unbound (or absent) session is `NoSession`.
pub fn list_devices(
    api: &dyn ComputeApi,
    session: Option<&ComputeSession>,
    query: &DeviceQuery,
) -> Result<Vec<DeviceInfo>> {
    if query.current_only {
        let binding = session
            .and_then(ComputeSession::binding)
            .ok_or(ClError::NoSession)?;
        return Ok(vec![api.device_info(binding.device)?]);
    }

    let platforms = api.platform_ids()?;
    if platforms.is_empty() {
        return Err(ClError::NoPlatforms);
    }
    let platform = *platforms
        .get(query.platform)
        .ok_or(ClError::InvalidPlatformIndex(query.platform))?;

    let kind = if query.gpu_only { DeviceKind::Gpu } else { DeviceKind::All };
    api.device_ids(platform, kind)?
        .into_iter()
        .map(|device| api.device_info(device))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnvOverrides, SelectRequest};
    use crate::sim::{SimCall, SimulatedApi};
    use std::sync::Arc;

    #[test]
    fn test_platform_count_matches() {
        for n in 0..4 {
            let mut api = SimulatedApi::new();
            for i in 0..n {
                api = api.with_platform(&format!("P{i}"), &[DeviceKind::Cpu]);
            }
            let platforms = list_platforms(&api).unwrap();
            assert_eq!(platforms.len(), n);
            if n > 0 {
                assert_eq!(platforms[n - 1].name, format!("P{}", n - 1));
            }
        }
    }

    #[test]
    fn test_platform_query_error() {
        let api = SimulatedApi::new().with_platform("P", &[]);
        api.fail(SimCall::PlatformInfo, -30);
        assert_eq!(list_platforms(&api).unwrap_err().code(), -30);
    }

    #[test]
    fn test_devices_filtered_by_kind() {
        let api = SimulatedApi::new().with_platform("P", &[DeviceKind::Cpu, DeviceKind::Gpu]);
        let all = list_devices(&api, None, &DeviceQuery::default()).unwrap();
        assert_eq!(all.len(), 2);

        let query = DeviceQuery { gpu_only: true, ..Default::default() };
        let gpus = list_devices(&api, None, &query).unwrap();
        assert_eq!(gpus.len(), 1);
        assert_eq!(gpus[0].type_name(), "CL_DEVICE_TYPE_GPU");
    }

    #[test]
    fn test_no_gpu_is_empty_list() {
        let api = SimulatedApi::new().with_platform("P", &[DeviceKind::Cpu]);
        let query = DeviceQuery { gpu_only: true, ..Default::default() };
        assert!(list_devices(&api, None, &query).unwrap().is_empty());
    }

    #[test]
    fn test_platform_errors() {
        let empty = SimulatedApi::new();
        assert_eq!(list_devices(&empty, None, &DeviceQuery::default()), Err(ClError::NoPlatforms));
        assert_eq!(empty.calls(SimCall::DeviceIds), 0);

        let api = SimulatedApi::new()
            .with_platform("A", &[DeviceKind::Cpu])
            .with_platform("B", &[DeviceKind::Cpu])
            .with_platform("C", &[DeviceKind::Cpu]);
        let query = DeviceQuery { platform: 5, ..Default::default() };
        assert_eq!(list_devices(&api, None, &query), Err(ClError::InvalidPlatformIndex(5)));
    }

    #[test]
    fn test_current_device() {
        let sim = Arc::new(
            SimulatedApi::new().with_platform("P", &[DeviceKind::Cpu, DeviceKind::Gpu]),
        );
        let mut session = ComputeSession::with_env(sim.clone(), EnvOverrides::default());
        let query = DeviceQuery { current_only: true, ..Default::default() };

        assert_eq!(list_devices(&*sim, Some(&session), &query), Err(ClError::NoSession));
        assert_eq!(list_devices(&*sim, None, &query), Err(ClError::NoSession));

        session.initialize(&SelectRequest::default().device(1)).unwrap();
        let calls = sim.calls(SimCall::PlatformIds);
        let current = list_devices(&*sim, Some(&session), &query).unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].name, "P gpu 1");
        // no enumeration for the current device
        assert_eq!(sim.calls(SimCall::PlatformIds), calls);
    }

    #[test]
    fn test_current_device_queried_through_given_api() {
        let sim = Arc::new(SimulatedApi::new().with_platform("P", &[DeviceKind::Gpu]));
        let mut session = ComputeSession::with_env(sim.clone(), EnvOverrides::default());
        session.ensure_bound().unwrap();
        let query = DeviceQuery { current_only: true, ..Default::default() };

        let other = SimulatedApi::new().with_platform("Q", &[DeviceKind::Gpu]);
        other.fail(SimCall::DeviceInfo, -33);
        let before = sim.calls(SimCall::DeviceInfo);
        let err = list_devices(&other, Some(&session), &query).unwrap_err();
        assert_eq!(err.code(), -33);
        assert_eq!(other.calls(SimCall::DeviceInfo), 1);
        assert_eq!(sim.calls(SimCall::DeviceInfo), before);
    }
}
