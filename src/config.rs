use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;
use crate::profile::ProfileTable;

/// How the engine's private Python environment is made active before exec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EnvironmentActivation {
    #[default]
    None,
    Venv {
        path: PathBuf,
    },
}

impl EnvironmentActivation {
    pub fn env_vars(&self, current_path: Option<&str>) -> Vec<(String, String)> {
        match self {
            EnvironmentActivation::None => Vec::new(),
            EnvironmentActivation::Venv { path } => {
                let bin = if cfg!(windows) {
                    path.join("Scripts")
                } else {
                    path.join("bin")
                };
                let sep = if cfg!(windows) { ";" } else { ":" };
                let new_path = match current_path {
                    Some(p) if !p.is_empty() => format!("{}{}{}", bin.display(), sep, p),
                    _ => bin.display().to_string(),
                };
                vec![
                    ("VIRTUAL_ENV".to_string(), path.display().to_string()),
                    ("PATH".to_string(), new_path),
                ]
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine checkout; relative asset paths below resolve against it and
    /// it is the child's working directory.
    pub root: PathBuf,
    pub launcher: PathBuf,
    pub launch_args: Vec<String>,
    pub entry_script: PathBuf,
    pub compat_patch: PathBuf,
    pub tensor_shim: PathBuf,
    pub enhancer_weights: PathBuf,
    pub enhancer_name: String,
    pub activation: EnvironmentActivation,
    pub extra_env: BTreeMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./SadTalker"),
            launcher: PathBuf::from("python"),
            launch_args: Vec::new(),
            entry_script: PathBuf::from("inference_enhanced.py"),
            compat_patch: PathBuf::from("early_compatibility_patch.py"),
            tensor_shim: PathBuf::from("functional_tensor_patch.py"),
            enhancer_weights: PathBuf::from("gfpgan/weights/GFPGANv1.4.pth"),
            enhancer_name: "gfpgan".to_string(),
            activation: EnvironmentActivation::None,
            extra_env: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn resolve(&self, rel: &Path) -> PathBuf {
        if rel.is_absolute() {
            rel.to_path_buf()
        } else {
            self.root.join(rel)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetStore {
    pub default_face: PathBuf,
    pub fallback_video: PathBuf,
}

impl Default for AssetStore {
    fn default() -> Self {
        Self {
            default_face: PathBuf::from("./assets/default_face.jpg"),
            fallback_video: PathBuf::from("./assets/fallback_talking_head.mp4"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Piper voice model. When unset only the tone voice is used.
    pub piper_model: Option<PathBuf>,
    pub piper_program: PathBuf,
    pub chunk_chars: usize,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            piper_model: None,
            piper_program: PathBuf::from("piper"),
            chunk_chars: 250,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelAsset {
    pub name: String,
    pub path: PathBuf,
}

impl ModelAsset {
    fn new(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            path: PathBuf::from(path),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub python_modules: Vec<String>,
    pub model_assets: Vec<ModelAsset>,
    pub min_memory_gb: f64,
    pub import_timeout_seconds: u64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            python_modules: [
                "torch",
                "torchvision",
                "librosa",
                "face_alignment",
                "cv2",
                "numpy",
                "scipy",
                "imageio",
                "PIL",
            ]
            .iter()
            .map(|m| m.to_string())
            .collect(),
            model_assets: vec![
                ModelAsset::new("alignment_WFLW_4HG.pth", "checkpoints/alignment_WFLW_4HG.pth"),
                ModelAsset::new("BFM_Fitting", "checkpoints/BFM_Fitting"),
                ModelAsset::new(
                    "auido2exp_00300-model.pth",
                    "checkpoints/auido2exp_00300-model.pth",
                ),
                ModelAsset::new(
                    "mapping_00109-model.pth.tar",
                    "checkpoints/mapping_00109-model.pth.tar",
                ),
                ModelAsset::new(
                    "mapping_00229-model.pth.tar",
                    "checkpoints/mapping_00229-model.pth.tar",
                ),
                ModelAsset::new(
                    "SadTalker_V002.safetensors",
                    "checkpoints/SadTalker_V002.safetensors",
                ),
            ],
            min_memory_gb: 8.0,
            import_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub engine: EngineConfig,
    pub assets: AssetStore,
    pub results_dir: PathBuf,
    pub max_concurrent_inference: usize,
    pub profiles: ProfileTable,
    pub tts: TtsConfig,
    pub diagnostics: DiagnosticsConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            assets: AssetStore::default(),
            results_dir: PathBuf::from("./media"),
            max_concurrent_inference: 1,
            profiles: ProfileTable::default(),
            tts: TtsConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let data = fs::read_to_string(path)?;
        let config: OrchestratorConfig = serde_json::from_str(&data)?;
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_inference == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_inference must be at least 1".into(),
            ));
        }
        if self.tts.chunk_chars == 0 {
            return Err(ConfigError::Invalid("tts.chunk_chars must be at least 1".into()));
        }
        Ok(())
    }

    pub fn request_dir(&self, request_id: &str) -> PathBuf {
        self.results_dir.join(format!("results_{}", request_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let cfg: OrchestratorConfig = serde_json::from_str(
            r#"{ "results_dir": "/tmp/out", "engine": { "root": "/opt/engine" } }"#,
        )
        .unwrap();
        assert_eq!(cfg.results_dir, PathBuf::from("/tmp/out"));
        assert_eq!(cfg.engine.root, PathBuf::from("/opt/engine"));
        assert_eq!(cfg.engine.entry_script, PathBuf::from("inference_enhanced.py"));
        assert_eq!(cfg.max_concurrent_inference, 1);
        assert_eq!(cfg.diagnostics.model_assets.len(), 6);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let cfg = OrchestratorConfig {
            max_concurrent_inference: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_config_file_is_reported() {
        let err = OrchestratorConfig::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn venv_activation_prepends_bin_dir() {
        let act = EnvironmentActivation::Venv {
            path: PathBuf::from("/opt/venv"),
        };
        let vars = act.env_vars(Some("/usr/bin"));
        assert!(vars.contains(&("VIRTUAL_ENV".to_string(), "/opt/venv".to_string())));
        let path = &vars.iter().find(|(k, _)| k == "PATH").unwrap().1;
        assert!(path.starts_with("/opt/venv"));
        assert!(path.ends_with("/usr/bin"));
        assert!(EnvironmentActivation::None.env_vars(Some("/usr/bin")).is_empty());
    }

    #[test]
    fn relative_engine_paths_resolve_against_root() {
        let engine = EngineConfig {
            root: PathBuf::from("/opt/engine"),
            ..Default::default()
        };
        assert_eq!(
            engine.resolve(Path::new("inference.py")),
            PathBuf::from("/opt/engine/inference.py")
        );
        assert_eq!(engine.resolve(Path::new("/abs/x.py")), PathBuf::from("/abs/x.py"));
    }
}
