use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{AssetStore, EngineConfig};
use crate::error::GenerationError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingAsset {
    pub asset: &'static str,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetupReport {
    pub ok: bool,
    pub missing: Option<MissingAsset>,
    pub launcher: Option<PathBuf>,
}

impl SetupReport {
    pub fn into_result(self) -> Result<PathBuf, GenerationError> {
        match (self.missing, self.launcher) {
            (None, Some(launcher)) => Ok(launcher),
            (Some(m), _) => Err(GenerationError::SetupValidation {
                asset: m.asset.to_string(),
                path: m.path,
            }),
            (None, None) => Err(GenerationError::SetupValidation {
                asset: "launcher".to_string(),
                path: PathBuf::new(),
            }),
        }
    }
}

/// Existence checks only, in fixed order: compat patch, entry script,
/// tensor shim, launcher. Stops at the first gap.
pub fn validate_engine(engine: &EngineConfig) -> SetupReport {
    let files = [
        ("compatibility patch", engine.resolve(&engine.compat_patch)),
        ("inference entry script", engine.resolve(&engine.entry_script)),
        ("tensor compatibility shim", engine.resolve(&engine.tensor_shim)),
    ];
    for (asset, path) in files {
        if !path.exists() {
            warn!("Setup validation: {} not found at {}", asset, path.display());
            return SetupReport {
                ok: false,
                missing: Some(MissingAsset { asset, path }),
                launcher: None,
            };
        }
    }

    match resolve_launcher(engine) {
        Some(launcher) => {
            info!("Engine setup validation passed");
            SetupReport {
                ok: true,
                missing: None,
                launcher: Some(launcher),
            }
        }
        None => {
            warn!("Setup validation: launcher {} not found", engine.launcher.display());
            SetupReport {
                ok: false,
                missing: Some(MissingAsset {
                    asset: "process launcher",
                    path: engine.launcher.clone(),
                }),
                launcher: None,
            }
        }
    }
}

/// Paths with a directory part resolve against the engine root and must
/// exist; bare names are looked up on `PATH`.
pub fn resolve_launcher(engine: &EngineConfig) -> Option<PathBuf> {
    let launcher = &engine.launcher;
    if launcher.is_absolute() || launcher.components().count() > 1 {
        let path = engine.resolve(launcher);
        return path.exists().then_some(path);
    }
    which::which(launcher).ok()
}

pub fn resolve_source_image(
    requested: Option<&Path>,
    assets: &AssetStore,
) -> Result<PathBuf, GenerationError> {
    if let Some(path) = requested {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        warn!("Source image {} not found, using default face", path.display());
    }
    if assets.default_face.exists() {
        Ok(assets.default_face.clone())
    } else {
        Err(GenerationError::SetupValidation {
            asset: "default face image".to_string(),
            path: assets.default_face.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn engine_in(dir: &Path) -> EngineConfig {
        EngineConfig {
            root: dir.to_path_buf(),
            launcher: PathBuf::from("sh"),
            ..Default::default()
        }
    }

    fn touch(path: &Path) {
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn reports_first_missing_asset_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(dir.path());

        let report = validate_engine(&engine);
        assert!(!report.ok);
        assert_eq!(report.missing.unwrap().asset, "compatibility patch");

        touch(&dir.path().join("early_compatibility_patch.py"));
        touch(&dir.path().join("functional_tensor_patch.py"));
        let report = validate_engine(&engine);
        assert_eq!(report.missing.unwrap().asset, "inference entry script");
    }

    #[cfg(unix)]
    #[test]
    fn passes_when_everything_is_present() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(dir.path());
        for f in [
            "early_compatibility_patch.py",
            "inference_enhanced.py",
            "functional_tensor_patch.py",
        ] {
            touch(&dir.path().join(f));
        }
        let report = validate_engine(&engine);
        assert!(report.ok, "{report:?}");
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn missing_launcher_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_in(dir.path());
        engine.launcher = PathBuf::from("venv/bin/python");
        for f in [
            "early_compatibility_patch.py",
            "inference_enhanced.py",
            "functional_tensor_patch.py",
        ] {
            touch(&dir.path().join(f));
        }
        let err = validate_engine(&engine).into_result().unwrap_err();
        assert!(matches!(err, GenerationError::SetupValidation { ref asset, .. } if asset == "process launcher"));
    }

    #[test]
    fn source_image_falls_back_to_default_face() {
        let dir = tempfile::tempdir().unwrap();
        let assets = AssetStore {
            default_face: dir.path().join("face.jpg"),
            fallback_video: dir.path().join("fallback.mp4"),
        };
        assert!(resolve_source_image(None, &assets).is_err());

        touch(&assets.default_face);
        let missing = dir.path().join("nope.png");
        assert_eq!(
            resolve_source_image(Some(&missing), &assets).unwrap(),
            assets.default_face
        );

        let custom = dir.path().join("me.png");
        touch(&custom);
        assert_eq!(resolve_source_image(Some(&custom), &assets).unwrap(), custom);
    }
}
