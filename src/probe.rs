
use std::fs;
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::EngineConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnvironmentSnapshot {
    pub accelerator_available: bool,
    pub accelerator_name: Option<String>,
    pub cpu_count: usize,
    pub cpu_load_percent: Option<f64>,
    pub total_memory_gb: Option<f64>,
    pub available_memory_gb: Option<f64>,
    pub memory_used_percent: Option<f64>,
    pub os: String,
}

/// Optional components, probed once and consumed by the request path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CapabilityMap {
    pub accelerator: bool,
    pub enhancer: bool,
}

pub async fn snapshot() -> EnvironmentSnapshot {
    let cpu_count = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let accelerator_name = detect_accelerator().await;
    let (total, available) = match fs::read_to_string("/proc/meminfo") {
        Ok(raw) => parse_meminfo(&raw),
        Err(_) => (None, None),
    };
    let load = fs::read_to_string("/proc/loadavg")
        .ok()
        .and_then(|raw| parse_loadavg(&raw))
        .map(|one_min| (one_min / cpu_count as f64 * 100.0).min(100.0));

    let memory_used_percent = match (total, available) {
        (Some(t), Some(a)) if t > 0.0 => Some((t - a) / t * 100.0),
        _ => None,
    };

    EnvironmentSnapshot {
        accelerator_available: accelerator_name.is_some(),
        accelerator_name,
        cpu_count,
        cpu_load_percent: load,
        total_memory_gb: total,
        available_memory_gb: available,
        memory_used_percent,
        os: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
    }
}

pub fn capabilities(env: &EnvironmentSnapshot, engine: &EngineConfig) -> CapabilityMap {
    let enhancer_path = engine.resolve(&engine.enhancer_weights);
    let enhancer = enhancer_path.exists();
    if !enhancer {
        debug!("Enhancer weights not found at {}", enhancer_path.display());
    }
    CapabilityMap {
        accelerator: env.accelerator_available,
        enhancer,
    }
}

async fn detect_accelerator() -> Option<String> {
    let smi = which::which("nvidia-smi").ok()?;
    let query = Command::new(smi)
        .args(["--query-gpu=name", "--format=csv,noheader"])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();
    match tokio::time::timeout(Duration::from_secs(5), query).await {
        Ok(Ok(out)) if out.status.success() => String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string),
        Ok(Ok(out)) => {
            debug!("nvidia-smi exited with {}", out.status);
            None
        }
        Ok(Err(e)) => {
            warn!("Failed to run nvidia-smi: {}", e);
            None
        }
        Err(_) => {
            warn!("nvidia-smi did not answer within 5s");
            None
        }
    }
}

/// (total, available) in GiB.
fn parse_meminfo(raw: &str) -> (Option<f64>, Option<f64>) {
    let field = |name: &str| {
        raw.lines()
            .find(|l| l.starts_with(name))
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|kb| kb.parse::<f64>().ok())
            .map(|kb| kb / (1024.0 * 1024.0))
    };
    (field("MemTotal:"), field("MemAvailable:"))
}

fn parse_loadavg(raw: &str) -> Option<f64> {
    raw.split_whitespace().next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meminfo_fields_are_converted_to_gib() {
        let raw = "MemTotal:       16777216 kB\nMemFree:  1 kB\nMemAvailable:    8388608 kB\n";
        let (total, avail) = parse_meminfo(raw);
        assert_eq!(total, Some(16.0));
        assert_eq!(avail, Some(8.0));
        assert_eq!(parse_meminfo("garbage"), (None, None));
    }

    #[test]
    fn loadavg_first_field() {
        assert_eq!(parse_loadavg("0.50 0.40 0.30 1/200 1234\n"), Some(0.5));
        assert_eq!(parse_loadavg(""), None);
    }

    #[test]
    fn enhancer_capability_follows_weights_file() {
        let dir = tempfile::tempdir().unwrap();
        let engine = EngineConfig {
            root: dir.path().to_path_buf(),
            ..Default::default()
        };
        let env = EnvironmentSnapshot::default();
        assert!(!capabilities(&env, &engine).enhancer);

        let weights = engine.resolve(&engine.enhancer_weights);
        fs::create_dir_all(weights.parent().unwrap()).unwrap();
        fs::write(&weights, b"w").unwrap();
        assert!(capabilities(&env, &engine).enhancer);
    }

    #[tokio::test]
    async fn snapshot_always_reports_cpus() {
        let snap = snapshot().await;
        assert!(snap.cpu_count >= 1);
        assert_eq!(snap.accelerator_available, snap.accelerator_name.is_some());
    }
}
