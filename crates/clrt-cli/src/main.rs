use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use clrt_core::{DType, DeviceInfo, DeviceKind};
use clrt_kernels::{
    list_devices, list_platforms, Api, ComputeSession, DeviceQuery, KernelSource, OpenClApi,
    SelectRequest, SessionConfig, SimulatedApi,
};

#[derive(Parser)]
#[command(
    name = "clrt",
    about = "OpenCL session and resource lifecycle manager",
    long_about = "Discover OpenCL platforms and devices, bind a compute session and
exercise buffer and kernel lifetimes against it.

Device selection honours CL_DEFAULT_PLATFORM and CL_DEFAULT_DEVICE.",
    version,
)]
struct Cli {
    /// Use the in-process simulated backend instead of the system ICD loader
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show backend and environment info
    Info,
    /// List platforms
    Platforms {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// List devices of a platform
    Devices {
        /// Platform index
        #[arg(long, default_value = "0")]
        platform: usize,
        /// Only GPU devices
        #[arg(long)]
        gpu: bool,
        /// Only the device a default session binds to
        #[arg(long)]
        current: bool,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Bind a session and report the selected device
    Init {
        /// Platform index (overrides CL_DEFAULT_PLATFORM)
        #[arg(long)]
        platform: Option<usize>,
        /// Device index (overrides CL_DEFAULT_DEVICE)
        #[arg(long)]
        device: Option<usize>,
        /// Only GPU devices; without --platform, scan all platforms
        #[arg(long)]
        gpu: bool,
        /// JSON file with platform/device/gpu_only fields
        #[arg(long, conflicts_with_all = ["platform", "device", "gpu"])]
        config: Option<PathBuf>,
    },
    /// Bind, allocate, transfer, compile and tear down
    Smoke {
        /// Element count of the test buffer
        #[arg(long, default_value = "1024")]
        n: usize,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let api = backend(cli.simulate)?;
    tracing::debug!("using {} backend", api.backend_name());

    match cli.command {
        Commands::Info => cmd_info(&api),
        Commands::Platforms { json } => cmd_platforms(&api, json),
        Commands::Devices { platform, gpu, current, json } => {
            let query = DeviceQuery { platform, gpu_only: gpu, current_only: current };
            cmd_devices(api, &query, json)
        }
        Commands::Init { platform, device, gpu, config } => {
            let request = match config {
                Some(path) => load_request(&path)?,
                None => SelectRequest { platform, device, gpu_only: gpu },
            };
            cmd_init(api, request)
        }
        Commands::Smoke { n } => cmd_smoke(api, n),
    }
}

/// A CPU-only platform followed by a two-GPU platform.
fn simulated() -> SimulatedApi {
    SimulatedApi::new()
        .with_platform("clrt Simulated CPU", &[DeviceKind::Cpu])
        .with_platform("clrt Simulated GPU", &[DeviceKind::Gpu, DeviceKind::Gpu])
}

fn backend(simulate: bool) -> anyhow::Result<Api> {
    if simulate {
        return Ok(Arc::new(simulated()));
    }
    let api = OpenClApi::load().context("cannot load OpenCL (try --simulate)")?;
    Ok(Arc::new(api))
}

fn load_request(path: &Path) -> anyhow::Result<SelectRequest> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: SessionConfig = serde_json::from_str(&text)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(config.request)
}

fn cmd_info(api: &Api) -> anyhow::Result<()> {
    println!("clrt v{}\n", env!("CARGO_PKG_VERSION"));
    println!("Backend");
    println!("  {}", api.backend_name());
    if api.backend_name() == "opencl" {
        println!("  libraries: {}", clrt_kernels::opencl::ffi::library_names().join(", "));
    }

    println!("\nEnvironment");
    for var in [clrt_kernels::config::PLATFORM_ENV, clrt_kernels::config::DEVICE_ENV] {
        let value = std::env::var(var).unwrap_or_else(|_| "(unset)".to_string());
        println!("  {:<20} {}", var, value);
    }

    let platforms = list_platforms(api.as_ref())?;
    println!("\nPlatforms ({})", platforms.len());
    for (i, p) in platforms.iter().enumerate() {
        let query = DeviceQuery { platform: i, ..Default::default() };
        let devices = list_devices(api.as_ref(), None, &query)?;
        println!("  [{}] {:<28} {} device(s)", i, p.name, devices.len());
    }
    Ok(())
}

fn cmd_platforms(api: &Api, json: bool) -> anyhow::Result<()> {
    let platforms = list_platforms(api.as_ref())?;
    if json {
        println!("{}", serde_json::to_string_pretty(&platforms)?);
        return Ok(());
    }
    println!("{:<4} {:<28} {:<24} {}", "#", "Name", "Vendor", "Version");
    println!("{}", "-".repeat(80));
    for (i, p) in platforms.iter().enumerate() {
        println!("{:<4} {:<28} {:<24} {}", i, p.name, p.vendor, p.version);
    }
    Ok(())
}

fn cmd_devices(api: Api, query: &DeviceQuery, json: bool) -> anyhow::Result<()> {
    let session = if query.current_only {
        let mut session = ComputeSession::new(api.clone());
        session.ensure_bound()?;
        Some(session)
    } else {
        None
    };
    let devices = list_devices(api.as_ref(), session.as_ref(), query)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }
    println!("{:<4} {:<32} {:<26} {:>10} {:>6}", "#", "Name", "Type", "Mem (MiB)", "CUs");
    println!("{}", "-".repeat(82));
    for (i, d) in devices.iter().enumerate() {
        print_device_row(i, d);
    }
    Ok(())
}

fn print_device_row(index: usize, d: &DeviceInfo) {
    println!(
        "{:<4} {:<32} {:<26} {:>10} {:>6}",
        index,
        d.name,
        d.type_name(),
        d.global_mem_size >> 20,
        d.max_compute_units
    );
}

fn cmd_init(api: Api, request: SelectRequest) -> anyhow::Result<()> {
    let config = SessionConfig::from_env(request);
    let session = ComputeSession::bind(api, &config)?;
    if let Some(b) = session.binding() {
        println!("platform {} device {}", b.platform_index, b.device_index);
    }
    println!("{}", session.describe());
    Ok(())
}

fn cmd_smoke(api: Api, n: usize) -> anyhow::Result<()> {
    let mut session = ComputeSession::new(api);
    session.ensure_bound()?;
    println!("{}", session.describe());

    let input: Vec<f32> = (0..n).map(|i| i as f32).collect();
    let buf = session.create_buffer(DType::F32, [n])?;
    session.write_buffer(&buf, &input)?;
    let view = buf.view();
    let output = session.read_buffer::<f32>(&view)?;
    anyhow::ensure!(output == input, "buffer contents changed in transit");
    println!("{} ({} bytes)", buf, buf.nbytes());
    println!("{}", view);

    let source = KernelSource::simple("2.0f * x + 1.0f", &["x"], DType::F32);
    let kernel = session.compile_kernel(source)?;
    println!("{}", kernel);

    clrt_kernels::release_many(vec![view, buf])?;
    session.release_kernel(kernel)?;
    session.teardown();
    tracing::info!("smoke test passed ({} elements)", n);
    println!("{}", session.describe());
    Ok(())
}
