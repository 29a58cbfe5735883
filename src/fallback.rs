use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::AssetStore;
use crate::error::GenerationError;
use crate::locator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    Inference,
    FallbackFile,
    EmergencyFallback,
}

/// The only value handed back to callers. `video_path` exists on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultArtifact {
    pub request_id: String,
    pub video_path: PathBuf,
    pub is_fallback: bool,
    pub source: ResultSource,
    pub diagnosis: Option<String>,
}

/// A missing bundled asset is the one failure that escapes as an error.
pub fn recover(
    request_id: &str,
    request_dir: &Path,
    assets: &AssetStore,
    failure: &GenerationError,
) -> Result<ResultArtifact, GenerationError> {
    let diagnosis = failure.to_string();
    if !assets.fallback_video.is_file() {
        error!(
            "[Request {}] Bundled fallback video missing at {}",
            request_id,
            assets.fallback_video.display()
        );
        return Err(GenerationError::FallbackAssetMissing {
            path: assets.fallback_video.clone(),
            original: diagnosis,
        });
    }

    let target = locator::output_path(request_dir, request_id);
    let copied = fs::create_dir_all(request_dir).and_then(|_| fs::copy(&assets.fallback_video, &target));
    match copied {
        Ok(_) => {
            info!("[Request {}] Using fallback video: {}", request_id, target.display());
            Ok(ResultArtifact {
                request_id: request_id.to_string(),
                video_path: target,
                is_fallback: true,
                source: ResultSource::FallbackFile,
                diagnosis: Some(diagnosis),
            })
        }
        Err(e) => {
            warn!(
                "[Request {}] Could not copy fallback video to {}: {}; serving bundled asset directly",
                request_id,
                target.display(),
                e
            );
            Ok(ResultArtifact {
                request_id: request_id.to_string(),
                video_path: assets.fallback_video.clone(),
                is_fallback: true,
                source: ResultSource::EmergencyFallback,
                diagnosis: Some(diagnosis),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assets_in(dir: &Path) -> AssetStore {
        AssetStore {
            default_face: dir.join("face.jpg"),
            fallback_video: dir.join("fallback.mp4"),
        }
    }

    fn failure() -> GenerationError {
        GenerationError::ArtifactNotFound {
            dir: PathBuf::from("out"),
        }
    }

    #[test]
    fn copies_bundled_video_per_request() {
        let dir = tempfile::tempdir().unwrap();
        let assets = assets_in(dir.path());
        fs::write(&assets.fallback_video, b"bundled").unwrap();
        let req_dir = dir.path().join("results_abc");

        let result = recover("abc", &req_dir, &assets, &failure()).unwrap();
        assert_eq!(result.source, ResultSource::FallbackFile);
        assert!(result.is_fallback);
        assert_eq!(result.video_path, req_dir.join("talking_head_abc.mp4"));
        assert_eq!(fs::read(&result.video_path).unwrap(), b"bundled");
        assert!(result.diagnosis.unwrap().contains("no video artifact"));
    }

    #[test]
    fn missing_bundled_video_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let assets = assets_in(dir.path());
        let err = recover("abc", dir.path(), &assets, &failure()).unwrap_err();
        assert!(matches!(err, GenerationError::FallbackAssetMissing { .. }));
        assert!(!err.is_recoverable());
    }

    #[cfg(unix)]
    #[test]
    fn uncopyable_target_serves_bundled_asset() {
        let dir = tempfile::tempdir().unwrap();
        let assets = assets_in(dir.path());
        fs::write(&assets.fallback_video, b"bundled").unwrap();
        // A regular file where the request directory should be.
        let blocker = dir.path().join("blocked");
        fs::write(&blocker, b"").unwrap();

        let result = recover("abc", &blocker, &assets, &failure()).unwrap();
        assert_eq!(result.source, ResultSource::EmergencyFallback);
        assert_eq!(result.video_path, assets.fallback_video);
        assert!(result.video_path.exists());
    }
}
