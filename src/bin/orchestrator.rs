// Orchestrator - Runs a consumer/producer pair of vecadd processes
// Owns the start gate: clears stale state before the pair and removes it after

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use coproc::config::DEFAULT_GATE_NAME;
use coproc::{DeviceKind, HandshakeGate};

#[derive(Parser, Debug, Serialize)]
#[command(
    author,
    version,
    about = "Orchestrator for paired vector-add benchmark runs"
)]
struct Args {
    /// Shared memory gate name
    #[arg(long, default_value = DEFAULT_GATE_NAME)]
    gate_name: String,

    /// Vector size in KiB of 32-bit integers (both processes)
    #[arg(long)]
    kib: Option<usize>,

    /// Vector size in MiB of 32-bit integers (both processes)
    #[arg(long)]
    mib: Option<usize>,

    /// Host worker threads per process
    #[arg(long, default_value = "8")]
    threads: usize,

    /// Consumer device (cpu or gpu)
    #[arg(long, default_value = "cpu")]
    consumer_device: DeviceKind,

    /// Consumer cpu share
    #[arg(long, default_value = "0.5")]
    consumer_share: f64,

    /// Producer device (cpu or gpu)
    #[arg(long, default_value = "cpu")]
    producer_device: DeviceKind,

    /// Producer cpu share
    #[arg(long, default_value = "0.5")]
    producer_share: f64,

    /// GPU device ID
    #[arg(long, default_value = "0")]
    gpu_id: usize,

    /// Delay between starting the consumer and the producer
    #[arg(long, default_value = "200")]
    delay_ms: u64,

    /// Consumer wait limit in milliseconds (0 waits indefinitely)
    #[arg(long, default_value = "60000")]
    gate_timeout_ms: u64,

    /// Consumer poll interval in microseconds
    #[arg(long, default_value = "10")]
    gate_poll_us: u64,

    /// Results directory
    #[arg(long, default_value = "results/paired")]
    out_dir: PathBuf,

    /// Skip result validation in both processes
    #[arg(long)]
    no_validate: bool,

    /// Path to the vecadd binary (defaults to the one next to this binary)
    #[arg(long)]
    vecadd: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("[ORCHESTRATOR:INIT] Starting paired run on {}", args.gate_name);
    info!(
        "[ORCHESTRATOR:INIT] Consumer: {} share {}, producer: {} share {}",
        args.consumer_device, args.consumer_share, args.producer_device, args.producer_share
    );

    fs::create_dir_all(&args.out_dir).context("Failed to create results directory")?;

    let config_path = args.out_dir.join("config.json");
    let config_json = serde_json::to_string_pretty(&args).context("Failed to serialize config")?;
    fs::write(&config_path, config_json)
        .with_context(|| format!("Failed to write config to {:?}", config_path))?;

    let vecadd = match &args.vecadd {
        Some(path) => path.clone(),
        None => sibling_binary("vecadd")?,
    };

    // A flag left over from an aborted pair would release the consumer early
    if HandshakeGate::remove(&args.gate_name)? {
        warn!("[ORCHESTRATOR:INIT] Removed stale gate {}", args.gate_name);
    }

    let start_time = Instant::now();

    let mut consumer = start_vecadd(&args, &vecadd, Role::Consumer)?;
    info!(
        "[ORCHESTRATOR:START] Started consumer (PID: {:?})",
        consumer.id()
    );

    thread::sleep(Duration::from_millis(args.delay_ms));

    let mut producer = match start_vecadd(&args, &vecadd, Role::Producer) {
        Ok(child) => child,
        Err(e) => {
            let _ = consumer.kill();
            let _ = consumer.wait();
            HandshakeGate::remove(&args.gate_name)?;
            return Err(e);
        }
    };
    info!(
        "[ORCHESTRATOR:START] Started producer (PID: {:?})",
        producer.id()
    );

    let producer_status = producer.wait().context("Failed waiting for producer")?;
    report_status("Producer", producer_status);

    let consumer_status = consumer.wait().context("Failed waiting for consumer")?;
    report_status("Consumer", consumer_status);

    if HandshakeGate::remove(&args.gate_name)? {
        info!("[ORCHESTRATOR:DONE] Removed gate {}", args.gate_name);
    }

    let elapsed = start_time.elapsed();
    info!(
        "[ORCHESTRATOR:DONE] Orchestrator complete. Total time: {:.2} ms",
        elapsed.as_secs_f64() * 1000.0
    );

    aggregate_results(&args.out_dir)?;

    if !producer_status.success() || !consumer_status.success() {
        anyhow::bail!("one or both benchmark processes failed");
    }

    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Role {
    Consumer,
    Producer,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::Consumer => "consumer",
            Role::Producer => "producer",
        }
    }
}

fn start_vecadd(args: &Args, vecadd: &Path, role: Role) -> Result<Child> {
    let (device, share) = match role {
        Role::Consumer => (args.consumer_device, args.consumer_share),
        Role::Producer => (args.producer_device, args.producer_share),
    };

    let mut cmd = Command::new(vecadd);
    cmd.arg("--gate-role")
        .arg(role.as_str())
        .arg("--gate-name")
        .arg(&args.gate_name)
        .arg("--gate-timeout-ms")
        .arg(args.gate_timeout_ms.to_string())
        .arg("--gate-poll-us")
        .arg(args.gate_poll_us.to_string())
        .arg("--threads")
        .arg(args.threads.to_string())
        .arg("--device")
        .arg(device.label())
        .arg("--gpu-id")
        .arg(args.gpu_id.to_string())
        .arg("--cpu-share")
        .arg(share.to_string())
        .arg("--out")
        .arg(args.out_dir.join(format!("{}.csv", role.as_str())))
        .arg("--summary")
        .arg(args.out_dir.join(format!("{}.json", role.as_str())));

    if let Some(kib) = args.kib {
        cmd.arg("--kib").arg(kib.to_string());
    }
    if let Some(mib) = args.mib {
        cmd.arg("--mib").arg(mib.to_string());
    }
    if args.no_validate {
        cmd.arg("--no-validate");
    }
    if args.verbose {
        cmd.arg("--verbose");
    }

    cmd.stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .with_context(|| format!("Failed to start {} from {:?}", role.as_str(), vecadd))
}

fn sibling_binary(name: &str) -> Result<PathBuf> {
    let exe = std::env::current_exe().context("Failed to locate orchestrator binary")?;
    let dir = exe
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Orchestrator binary has no parent directory"))?;
    Ok(dir.join(name))
}

fn report_status(who: &str, status: ExitStatus) {
    if status.success() {
        info!("[ORCHESTRATOR:SYNC] {} completed successfully", who);
    } else {
        error!(
            "[ORCHESTRATOR:ERROR] {} failed with status: {:?}",
            who, status
        );
    }
}

fn aggregate_results(out_dir: &Path) -> Result<()> {
    for role in [Role::Consumer, Role::Producer] {
        let summary = out_dir.join(format!("{}.json", role.as_str()));
        let Ok(data) = fs::read_to_string(&summary) else {
            continue;
        };
        let Ok(json) = serde_json::from_str::<serde_json::Value>(&data) else {
            continue;
        };

        let mode = json["result"]["mode"]["mode"].as_str().unwrap_or("unknown");
        let device_ns = json["result"]["device_ns"].as_u64().unwrap_or(0);
        let wall_ns = json["result"]["wall_ns"].as_u64().unwrap_or(0);
        info!(
            "[ORCHESTRATOR:RESULTS] {}: {} device {:.6} s, wall {:.6} s",
            role.as_str(),
            mode,
            device_ns as f64 / 1e9,
            wall_ns as f64 / 1e9
        );
    }

    info!(
        "[ORCHESTRATOR:RESULTS] Results aggregated in: {}",
        out_dir.display()
    );
    Ok(())
}
