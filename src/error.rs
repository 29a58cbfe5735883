
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("text is empty")]
    EmptyText,

    #[error("speech engine `{program}` could not be started: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("speech engine failed: {0}")]
    Engine(String),

    #[error("audio I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("setup validation failed: missing {asset} at {}", path.display())]
    SetupValidation { asset: String, path: PathBuf },

    #[error("speech synthesis failed: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("inference timed out after {:.1}s", elapsed.as_secs_f64())]
    Timeout {
        elapsed: Duration,
        stdout: String,
        stderr: String,
    },

    #[error("inference exited with {}: {diagnosis}", code.map_or_else(|| "signal".to_string(), |c| format!("code {c}")))]
    InferenceExit {
        code: Option<i32>,
        diagnosis: String,
        stderr: String,
    },

    #[error("no video artifact found in {}", dir.display())]
    ArtifactNotFound { dir: PathBuf },

    #[error("bundled fallback video missing at {} (original failure: {original})", path.display())]
    FallbackAssetMissing { path: PathBuf, original: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GenerationError {
    /// Only a broken installation is surfaced to callers.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, GenerationError::FallbackAssetMissing { .. })
    }

    /// Short stable label used in telemetry records.
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::SetupValidation { .. } => "setup_validation",
            GenerationError::Synthesis(_) => "synthesis",
            GenerationError::Timeout { .. } => "timeout",
            GenerationError::InferenceExit { .. } => "inference_exit",
            GenerationError::ArtifactNotFound { .. } => "artifact_not_found",
            GenerationError::FallbackAssetMissing { .. } => "fallback_asset_missing",
            GenerationError::Io(_) => "io",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_missing_fallback_asset_is_fatal() {
        let fatal = GenerationError::FallbackAssetMissing {
            path: PathBuf::from("assets/fallback.mp4"),
            original: "timeout".into(),
        };
        assert!(!fatal.is_recoverable());

        let timeout = GenerationError::Timeout {
            elapsed: Duration::from_secs(2),
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(timeout.is_recoverable());
        assert!(GenerationError::ArtifactNotFound { dir: "out".into() }.is_recoverable());
    }

    #[test]
    fn exit_failure_message_carries_diagnosis() {
        let err = GenerationError::InferenceExit {
            code: Some(1),
            diagnosis: "missing audio library (librosa)".into(),
            stderr: String::new(),
        };
        let msg = err.to_string();
        assert!(msg.contains("code 1"));
        assert!(msg.contains("librosa"));
    }
}
