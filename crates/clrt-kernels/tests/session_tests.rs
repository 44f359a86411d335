//! Lifecycle integration tests against the simulated backend.
//! Run with: cargo test -p clrt-kernels --test session_tests

use std::sync::Arc;

use clrt_core::{status, ClError, DType, DeviceKind};
use clrt_kernels::sim::{SimCall, SimEvent};
use clrt_kernels::{
    list_devices, list_platforms, release_many, ComputeSession, DeviceQuery, EnvOverrides,
    KernelSource, SelectRequest, SessionConfig, SimulatedApi,
};

fn session(sim: &Arc<SimulatedApi>) -> ComputeSession {
    ComputeSession::with_env(sim.clone(), EnvOverrides::default())
}

/// Platforms with 0, 2 and 1 GPUs respectively.
fn mixed_platforms() -> Arc<SimulatedApi> {
    Arc::new(
        SimulatedApi::new()
            .with_platform("Host", &[DeviceKind::Cpu])
            .with_platform("Discrete", &[DeviceKind::Gpu, DeviceKind::Gpu])
            .with_platform("Integrated", &[DeviceKind::Cpu, DeviceKind::Gpu]),
    )
}

// ============================================================================
// Enumeration
// ============================================================================

#[test]
fn test_platform_records_match_count() {
    for n in [0usize, 1, 3, 6] {
        let mut api = SimulatedApi::new();
        for i in 0..n {
            api = api.with_platform(&format!("Platform {i}"), &[DeviceKind::Cpu]);
        }
        let records = list_platforms(&api).unwrap();
        assert_eq!(records.len(), n);
        assert!(records.iter().all(|p| p.profile == "FULL_PROFILE"));
    }
}

#[test]
fn test_devices_of_third_platform() {
    let sim = mixed_platforms();
    let query = DeviceQuery { platform: 2, ..Default::default() };
    let devices = list_devices(&*sim, None, &query).unwrap();
    let kinds: Vec<_> = devices.iter().map(|d| d.type_name()).collect();
    assert_eq!(kinds, ["CL_DEVICE_TYPE_CPU", "CL_DEVICE_TYPE_GPU"]);
}

#[test]
fn test_device_records_serialize() {
    let sim = mixed_platforms();
    let query = DeviceQuery { platform: 1, gpu_only: true, ..Default::default() };
    let devices = list_devices(&*sim, None, &query).unwrap();
    let json = serde_json::to_value(&devices[0]).unwrap();
    assert_eq!(json["kind"], "gpu");
    assert_eq!(json["max_work_item_sizes"].as_array().unwrap().len(), 3);
}

#[test]
fn test_status_slot_values() {
    let empty = SimulatedApi::new();
    let result = list_devices(&empty, None, &DeviceQuery::default());
    assert_eq!(status(&result), -1);

    let sim = mixed_platforms();
    let result = list_devices(&*sim, None, &DeviceQuery { platform: 5, ..Default::default() });
    assert_eq!(result, Err(ClError::InvalidPlatformIndex(5)));
    assert_eq!(status(&result), -6);

    let result = list_devices(&*sim, None, &DeviceQuery::default());
    assert_eq!(status(&result), 0);
}

// ============================================================================
// Selection and binding
// ============================================================================

#[test]
fn test_gpu_fallback_selects_first_gpu_platform() {
    let sim = mixed_platforms();
    let mut session = session(&sim);
    let binding = *session.initialize(&SelectRequest::default().gpu_only()).unwrap();
    assert_eq!(binding.platform_index, 1);
    assert_eq!(binding.device_index, 0);
    assert_eq!(session.describe(), "Current device: Discrete gpu 0");
}

#[test]
fn test_env_overrides_select_platform_and_device() {
    let sim = mixed_platforms();
    let env = EnvOverrides::from_lookup(|name| match name {
        "CL_DEFAULT_PLATFORM" => Some("1".to_string()),
        "CL_DEFAULT_DEVICE" => Some("0".to_string()),
        _ => None,
    });
    let config = SessionConfig { request: SelectRequest::default(), env };
    let session = ComputeSession::bind(sim.clone(), &config).unwrap();
    let binding = session.binding().unwrap();
    assert_eq!((binding.platform_index, binding.device_index), (1, 0));
}

#[test]
fn test_zero_platforms_never_queries_devices() {
    let sim = Arc::new(SimulatedApi::new());
    let mut session = session(&sim);
    let err = session.initialize(&SelectRequest::default().gpu_only()).unwrap_err();
    assert_eq!(err, ClError::NoPlatforms);
    assert_eq!(err.code(), -1);
    assert_eq!(sim.calls(SimCall::DeviceIds), 0);
    assert!(!session.is_bound());
}

#[test]
fn test_out_of_range_platform() {
    let sim = mixed_platforms();
    let mut session = session(&sim);
    let err = session.initialize(&SelectRequest::default().platform(5)).unwrap_err();
    assert_eq!(err, ClError::InvalidPlatformIndex(5));
    assert_eq!(sim.calls(SimCall::CreateContext), 0);
}

#[test]
fn test_context_failure_on_rebind_leaves_unbound() {
    let sim = mixed_platforms();
    let mut session = session(&sim);
    session.initialize(&SelectRequest::default()).unwrap();
    session
        .compile_kernel(KernelSource::simple("x * x", &["x"], DType::F32))
        .unwrap();

    sim.fail(SimCall::CreateContext, -5);
    let err = session.initialize(&SelectRequest::default().platform(1)).unwrap_err();
    assert_eq!(err.code(), -5);
    assert!(!session.is_bound());
    assert_eq!(session.live_kernels(), 0);
    assert_eq!(sim.live_contexts(), 0);

    sim.clear_failures();
    session.ensure_bound().unwrap();
    assert_eq!(sim.live_contexts(), 1);
}

// ============================================================================
// Kernels across rebinds
// ============================================================================

#[test]
fn test_reinit_invalidates_kernels() {
    let sim = mixed_platforms();
    let mut session = session(&sim);
    session.initialize(&SelectRequest::default().platform(1)).unwrap();

    let a = session
        .compile_kernel(KernelSource::simple("x + y", &["x", "y"], DType::F32))
        .unwrap();
    let b = session
        .compile_kernel(KernelSource::program(
            "__kernel void fill(__global int *out) { out[get_global_id(0)] = 7; }",
            "fill",
        ))
        .unwrap();
    assert_eq!(sim.live_kernels(), 2);

    session.initialize(&SelectRequest::default().platform(1).device(1)).unwrap();
    assert_eq!(sim.live_kernels(), 0);
    assert_eq!(sim.live_programs(), 0);
    assert_eq!(session.kernel(&a), Err(ClError::StaleKernel(a.key().as_raw())));
    assert_eq!(session.release_kernel(b.clone()), Err(ClError::StaleKernel(b.key().as_raw())));
    assert_eq!(sim.invalid_releases(), 0);

    // new kernels never collide with stale keys
    let c = session
        .compile_kernel(KernelSource::simple("x", &["x"], DType::F32))
        .unwrap();
    assert!(c.key() > b.key());
    assert!(session.kernel(&c).is_ok());
}

// ============================================================================
// Buffers
// ============================================================================

#[test]
fn test_owned_and_view_release() {
    let sim = mixed_platforms();
    let mut session = session(&sim);
    let buf = session.create_buffer(DType::F64, [2, 3]).unwrap();
    let mem = buf.mem_id().unwrap();
    let early = buf.view();
    let late = buf.view_as(&[6]).unwrap();

    early.release().unwrap();
    assert!(sim.is_buffer_live(mem));

    buf.release().unwrap();
    late.release().unwrap();
    assert_eq!(sim.buffer_release_count(mem), 1);
    assert_eq!(sim.invalid_releases(), 0);
}

#[test]
fn test_release_many_mixed() {
    let sim = mixed_platforms();
    let mut session = session(&sim);
    let a = session.create_buffer(DType::U8, [16]).unwrap();
    let b = session.create_buffer(DType::C32, [4]).unwrap();
    let handles = vec![a.view(), a, b.view_as(&[2, 2]).unwrap(), b];

    release_many(handles).unwrap();
    assert_eq!(sim.live_buffers(), 0);
    assert_eq!(sim.calls(SimCall::ReleaseBuffer), 2);
}

#[test]
fn test_data_survives_view_roundtrip() {
    let sim = mixed_platforms();
    let mut session = session(&sim);
    let buf = session.create_buffer(DType::F32, [2, 2]).unwrap();
    session.write_buffer(&buf, &[0.5f32, 1.5, 2.5, 3.5]).unwrap();

    let flat = buf.view_as(&[-1]).unwrap();
    assert_eq!(flat.to_string(), "CL_FLOAT = Array[4] (view)");
    assert_eq!(session.read_buffer::<f32>(&flat).unwrap(), vec![0.5, 1.5, 2.5, 3.5]);
}

// ============================================================================
// Teardown
// ============================================================================

#[test]
fn test_drop_tears_down_in_order() {
    let sim = mixed_platforms();
    let (queue, context) = {
        let mut session = session(&sim);
        let binding = *session.ensure_bound().unwrap();
        session
            .compile_kernel(KernelSource::simple("-x", &["x"], DType::I32))
            .unwrap();
        (binding.queue, binding.context)
    };

    let events = sim.events();
    let tail = &events[events.len() - 2..];
    assert_eq!(tail, [SimEvent::QueueReleased(queue), SimEvent::ContextReleased(context)]);
    assert!(matches!(events[0], SimEvent::KernelReleased(_)));
    assert_eq!(sim.live_contexts(), 0);
    assert_eq!(sim.live_kernels(), 0);
    assert_eq!(sim.invalid_releases(), 0);
}

#[test]
fn test_teardown_with_failing_release_still_unbinds() {
    let sim = mixed_platforms();
    let mut session = session(&sim);
    session.ensure_bound().unwrap();
    sim.fail(SimCall::ReleaseQueue, -36);

    session.teardown();
    assert!(!session.is_bound());
    assert_eq!(session.describe(), "No device bound");
    // second teardown makes no native calls
    session.teardown();
    assert_eq!(sim.calls(SimCall::ReleaseQueue), 1);
}
