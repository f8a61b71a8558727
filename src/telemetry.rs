//! Host resource counters reported by the health endpoints.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::process::run_command;

const TOOL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no MemTotal entry in /proc/meminfo")]
    MissingMemTotal,

    #[error("failed to determine CPU count: {0}")]
    CpuCount(#[source] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostCounters {
    pub ip_address: String,
    pub cpu_count: usize,
    pub gpu_count: usize,
    pub total_memory_gb: f64,
}

/// Collect counters for this host. CPU and memory are required; IP and GPU
/// information degrade to `Unknown` and 0.
pub async fn collect() -> Result<HostCounters, TelemetryError> {
    let cpu_count = std::thread::available_parallelism()
        .map_err(TelemetryError::CpuCount)?
        .get();

    let meminfo = tokio::fs::read_to_string("/proc/meminfo")
        .await
        .map_err(|source| TelemetryError::Read {
            path: "/proc/meminfo".to_string(),
            source,
        })?;
    let total_memory_gb = parse_mem_total_gb(&meminfo).ok_or(TelemetryError::MissingMemTotal)?;

    Ok(HostCounters {
        ip_address: primary_ip().await,
        cpu_count,
        gpu_count: gpu_count().await,
        total_memory_gb,
    })
}

/// `MemTotal` in GiB, rounded to two decimals.
pub fn parse_mem_total_gb(meminfo: &str) -> Option<f64> {
    let kib: f64 = meminfo
        .lines()
        .find_map(|line| line.strip_prefix("MemTotal:"))?
        .split_whitespace()
        .next()?
        .parse()
        .ok()?;
    let gib = kib / (1024.0 * 1024.0);
    Some((gib * 100.0).round() / 100.0)
}

/// Lines of `nvidia-smi --list-gpus` that describe a GPU.
pub fn count_gpu_lines(output: &str) -> usize {
    output
        .lines()
        .filter(|line| line.trim_start().starts_with("GPU "))
        .count()
}

async fn gpu_count() -> usize {
    match run_command("nvidia-smi", &["--list-gpus"], None, Some(TOOL_TIMEOUT)).await {
        Ok(output) if output.success() => count_gpu_lines(&output.stdout),
        Ok(_) => 0,
        Err(e) => {
            tracing::debug!(error = %e, "No GPU inventory available");
            0
        }
    }
}

async fn primary_ip() -> String {
    match run_command("hostname", &["-I"], None, Some(TOOL_TIMEOUT)).await {
        Ok(output) if output.success() => output
            .stdout
            .split_whitespace()
            .next()
            .map(str::to_string)
            .unwrap_or_else(|| "Unknown".to_string()),
        _ => "Unknown".to_string(),
    }
}
