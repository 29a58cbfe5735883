use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::process::Command;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::config::{DiagnosticsConfig, EngineConfig, ModelAsset};
use crate::probe::{self, EnvironmentSnapshot};
use crate::setup;

pub const REPORT_FILE: &str = "diagnostic_report.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub category: &'static str,
    pub priority: Priority,
    pub title: String,
    pub description: String,
    pub solution: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependencyStatus {
    pub module: String,
    pub importable: bool,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetStatus {
    pub name: String,
    pub path: PathBuf,
    pub present: bool,
    pub size_mb: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Excellent,
    Good,
    NeedsAttention,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub status: HealthStatus,
    pub critical_issues: usize,
    pub warnings: usize,
    pub ready_for_production: bool,
    pub elapsed_seconds: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    pub generated_at: DateTime<Utc>,
    pub system_info: EnvironmentSnapshot,
    pub launcher: Option<PathBuf>,
    pub dependency_status: Vec<DependencyStatus>,
    pub model_asset_status: Vec<AssetStatus>,
    pub recommendations: Vec<Recommendation>,
    pub summary: Summary,
}

impl DiagnosticReport {
    pub fn missing_dependencies(&self) -> Vec<&str> {
        self.dependency_status
            .iter()
            .filter(|d| !d.importable)
            .map(|d| d.module.as_str())
            .collect()
    }

    pub fn missing_assets(&self) -> Vec<&str> {
        self.model_asset_status
            .iter()
            .filter(|a| !a.present)
            .map(|a| a.name.as_str())
            .collect()
    }

    pub fn save(&self, dir: &Path) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(REPORT_FILE);
        let data = serde_json::to_string_pretty(self).map_err(std::io::Error::from)?;
        std::fs::write(&path, data)?;
        info!("Diagnostic report saved to {}", path.display());
        Ok(path)
    }
}

pub async fn run(engine: &EngineConfig, cfg: &DiagnosticsConfig) -> DiagnosticReport {
    info!("Starting engine diagnostics");
    let started = Instant::now();

    let system_info = probe::snapshot().await;
    log_system(&system_info);

    let launcher = setup::resolve_launcher(engine);
    let dependency_status = match &launcher {
        Some(l) => check_dependencies(l, engine, cfg).await,
        None => {
            error!("Launcher {} not found; every dependency counts as missing", engine.launcher.display());
            cfg.python_modules
                .iter()
                .map(|m| DependencyStatus {
                    module: m.clone(),
                    importable: false,
                    version: None,
                })
                .collect()
        }
    };
    let model_asset_status = check_assets(engine, &cfg.model_assets);

    let recommendations = recommend(&system_info, &dependency_status, &model_asset_status, cfg);
    let summary = summarize(&recommendations, started.elapsed());
    info!(
        "Diagnostics completed in {:.2}s: {:?}",
        summary.elapsed_seconds, summary.status
    );

    DiagnosticReport {
        generated_at: Utc::now(),
        system_info,
        launcher,
        dependency_status,
        model_asset_status,
        recommendations,
        summary,
    }
}

fn log_system(env: &EnvironmentSnapshot) {
    info!("CPU cores: {}", env.cpu_count);
    if let Some(total) = env.total_memory_gb {
        info!("Total memory: {:.1} GB", total);
    }
    match &env.accelerator_name {
        Some(name) => info!("GPU: {}", name),
        None => warn!("GPU not available - engine will run on CPU"),
    }
}

async fn check_dependencies(
    launcher: &Path,
    engine: &EngineConfig,
    cfg: &DiagnosticsConfig,
) -> Vec<DependencyStatus> {
    let limit = Duration::from_secs(cfg.import_timeout_seconds.max(1));
    let path = std::env::var("PATH").ok();
    let env = engine.activation.env_vars(path.as_deref());

    let mut out = Vec::with_capacity(cfg.python_modules.len());
    for module in &cfg.python_modules {
        let probe = format!(
            "import {m}; print(getattr({m}, '__version__', 'unknown'))",
            m = module
        );
        let query = Command::new(launcher)
            .args(&engine.launch_args)
            .arg("-c")
            .arg(&probe)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .envs(&engine.extra_env)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let version = match tokio::time::timeout(limit, query).await {
            Ok(Ok(o)) if o.status.success() => {
                Some(String::from_utf8_lossy(&o.stdout).trim().to_string())
            }
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                warn!("{}: probe failed to start: {}", module, e);
                None
            }
            Err(_) => {
                warn!("{}: import probe timed out", module);
                None
            }
        };
        match &version {
            Some(v) => info!("{}: {}", module, v),
            None => error!("{}: missing", module),
        }
        let status = DependencyStatus {
            module: module.clone(),
            importable: version.is_some(),
            version: version.filter(|v| !v.is_empty()),
        };
        out.push(status);
    }
    out
}

fn check_assets(engine: &EngineConfig, assets: &[ModelAsset]) -> Vec<AssetStatus> {
    assets
        .iter()
        .map(|asset| {
            let path = engine.resolve(&asset.path);
            let size_mb = size_bytes(&path).map(|b| b as f64 / (1024.0 * 1024.0));
            match size_mb {
                Some(mb) => info!("{}: {:.1} MB", asset.name, mb),
                None => error!("{}: missing", asset.name),
            }
            AssetStatus {
                name: asset.name.clone(),
                present: size_mb.is_some(),
                size_mb,
                path,
            }
        })
        .collect()
}

/// Files report their own size, directories the sum of their files.
fn size_bytes(path: &Path) -> Option<u64> {
    let meta = std::fs::metadata(path).ok()?;
    if meta.is_file() {
        return Some(meta.len());
    }
    Some(
        WalkDir::new(path)
            .into_iter()
            .filter_map(Result::ok)
            .filter_map(|e| e.metadata().ok())
            .filter(|m| m.is_file())
            .map(|m| m.len())
            .sum(),
    )
}

pub fn recommend(
    env: &EnvironmentSnapshot,
    deps: &[DependencyStatus],
    assets: &[AssetStatus],
    cfg: &DiagnosticsConfig,
) -> Vec<Recommendation> {
    let mut recs = Vec::new();

    if !env.accelerator_available {
        recs.push(Recommendation {
            category: "hardware",
            priority: Priority::High,
            title: "GPU Not Available".into(),
            description: "The engine will run on CPU, which is significantly slower".into(),
            solution: "Install a CUDA-compatible GPU or use fast performance mode".into(),
        });
    }
    if let Some(total) = env.total_memory_gb {
        if total < cfg.min_memory_gb {
            recs.push(Recommendation {
                category: "hardware",
                priority: Priority::Medium,
                title: "Low Memory".into(),
                description: format!(
                    "System has {:.1}GB RAM, recommended {:.0}GB+",
                    total, cfg.min_memory_gb
                ),
                solution: "Add more RAM or use fast performance mode".into(),
            });
        }
    }

    let missing_deps: Vec<&str> = deps
        .iter()
        .filter(|d| !d.importable)
        .map(|d| d.module.as_str())
        .collect();
    if !missing_deps.is_empty() {
        recs.push(Recommendation {
            category: "dependencies",
            priority: Priority::Critical,
            title: "Missing Dependencies".into(),
            description: format!("Missing: {}", missing_deps.join(", ")),
            solution: format!("Install missing packages: pip install {}", missing_deps.join(" ")),
        });
    }

    let missing_assets: Vec<&str> = assets
        .iter()
        .filter(|a| !a.present)
        .map(|a| a.name.as_str())
        .collect();
    if !missing_assets.is_empty() {
        recs.push(Recommendation {
            category: "models",
            priority: Priority::Critical,
            title: "Missing Model Files".into(),
            description: format!("Missing: {}", missing_assets.join(", ")),
            solution: "Download the model files or run the engine's setup script".into(),
        });
    }

    recs.sort_by_key(|r| r.priority);
    recs
}

pub fn summarize(recs: &[Recommendation], elapsed: Duration) -> Summary {
    let critical_issues = recs.iter().filter(|r| r.priority == Priority::Critical).count();
    let warnings = recs
        .iter()
        .filter(|r| matches!(r.priority, Priority::High | Priority::Medium))
        .count();
    let status = match (critical_issues, warnings) {
        (0, 0) => HealthStatus::Excellent,
        (0, _) => HealthStatus::Good,
        _ => HealthStatus::NeedsAttention,
    };
    Summary {
        status,
        critical_issues,
        warnings,
        ready_for_production: critical_issues == 0,
        elapsed_seconds: elapsed.as_secs_f64(),
    }
}
