use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::fallback::ResultSource;
use crate::probe::{CapabilityMap, EnvironmentSnapshot};
use crate::profile::{PerformanceMode, PerformanceProfile};

pub const TELEMETRY_FILE: &str = "telemetry.json";

/// Seconds spent per stage; stages that did not run stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageTimings {
    pub audio_generation: Option<f64>,
    pub validation: Option<f64>,
    pub inference: Option<f64>,
    pub location: Option<f64>,
    pub fallback: Option<f64>,
    pub total: f64,
}

impl StageTimings {
    pub fn secs(d: Duration) -> Option<f64> {
        Some(d.as_secs_f64())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub source: Option<ResultSource>,
    pub is_fallback: bool,
    pub exit_code: Option<i32>,
    pub error_kind: Option<&'static str>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryRecord {
    pub request_id: String,
    pub recorded_at: DateTime<Utc>,
    pub performance_mode: PerformanceMode,
    pub profile: PerformanceProfile,
    pub capabilities: CapabilityMap,
    pub stage_timings: StageTimings,
    pub resource_snapshot: EnvironmentSnapshot,
    pub outcome: Outcome,
}

/// Writes the record next to the request's other artifacts. Never fails the
/// request; returns the path when the write succeeded.
pub fn record(request_dir: &Path, entry: &TelemetryRecord) -> Option<PathBuf> {
    let path = request_dir.join(TELEMETRY_FILE);
    let written = fs::create_dir_all(request_dir)
        .and_then(|_| serde_json::to_string_pretty(entry).map_err(std::io::Error::from))
        .and_then(|data| fs::write(&path, data));
    match written {
        Ok(()) => {
            debug!("[Request {}] Telemetry written to {}", entry.request_id, path.display());
            Some(path)
        }
        Err(e) => {
            warn!(
                "[Request {}] Failed to write telemetry to {}: {}",
                entry.request_id,
                path.display(),
                e
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(request_id: &str) -> TelemetryRecord {
        TelemetryRecord {
            request_id: request_id.to_string(),
            recorded_at: Utc::now(),
            performance_mode: PerformanceMode::Fast,
            profile: PerformanceProfile::fast(),
            capabilities: CapabilityMap::default(),
            stage_timings: StageTimings {
                audio_generation: Some(0.5),
                total: 1.5,
                ..Default::default()
            },
            resource_snapshot: EnvironmentSnapshot::default(),
            outcome: Outcome {
                source: Some(ResultSource::Inference),
                is_fallback: false,
                exit_code: Some(0),
                error_kind: None,
                error: None,
            },
        }
    }

    #[test]
    fn record_lands_in_request_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = record(dir.path(), &sample("r1")).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["request_id"], "r1");
        assert_eq!(json["performance_mode"], "fast");
        assert_eq!(json["profile"]["timeout_seconds"], 180.0);
        assert_eq!(json["stage_timings"]["audio_generation"], 0.5);
        assert_eq!(json["outcome"]["source"], "inference");
    }

    #[test]
    fn unwritable_location_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"").unwrap();
        assert!(record(&blocker, &sample("r2")).is_none());
    }
}
