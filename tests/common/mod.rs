#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use talking_head::OrchestratorConfig;
use talking_head::config::{AssetStore, EngineConfig};
use talking_head::profile::ProfileTable;
use tempfile::TempDir;

pub const FALLBACK_BYTES: &[u8] = b"bundled fallback";

/// Parses the engine's argument contract and leaves `$RESULT` set.
const ARG_PRELUDE: &str = r#"#!/bin/sh
ALL_ARGS="$*"
while [ $# -gt 0 ]; do
  case "$1" in
    --result_dir) RESULT="$2"; shift 2 ;;
    --driven_audio) AUDIO="$2"; shift 2 ;;
    *) shift ;;
  esac
done
"#;

pub struct Fixture {
    pub dir: TempDir,
    pub config: OrchestratorConfig,
}

impl Fixture {
    /// A complete engine install whose entry script runs `body` after the
    /// argument prelude.
    pub fn new(body: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine_root = dir.path().join("engine");
        let assets_dir = dir.path().join("assets");
        fs::create_dir_all(&engine_root).unwrap();
        fs::create_dir_all(&assets_dir).unwrap();

        fs::write(engine_root.join("early_compatibility_patch.py"), "# patch\n").unwrap();
        fs::write(engine_root.join("functional_tensor_patch.py"), "# shim\n").unwrap();
        fs::write(
            engine_root.join("inference_enhanced.py"),
            format!("{ARG_PRELUDE}{body}\n"),
        )
        .unwrap();

        let assets = AssetStore {
            default_face: assets_dir.join("default_face.jpg"),
            fallback_video: assets_dir.join("fallback_talking_head.mp4"),
        };
        fs::write(&assets.default_face, b"jpeg").unwrap();
        fs::write(&assets.fallback_video, FALLBACK_BYTES).unwrap();

        let config = OrchestratorConfig {
            engine: EngineConfig {
                root: engine_root,
                launcher: PathBuf::from("/bin/sh"),
                ..Default::default()
            },
            assets,
            results_dir: dir.path().join("media"),
            profiles: ProfileTable::default().with_timeout(Duration::from_secs(30)),
            ..Default::default()
        };
        Self { dir, config }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.profiles = self.config.profiles.clone().with_timeout(timeout);
        self
    }

    pub fn engine_root(&self) -> &Path {
        &self.config.engine.root
    }

    pub fn request_dir(&self, request_id: &str) -> PathBuf {
        self.config.request_dir(request_id)
    }
}

pub fn read_json(path: &Path) -> serde_json::Value {
    let raw = fs::read_to_string(path).unwrap_or_else(|e| panic!("{}: {e}", path.display()));
    serde_json::from_str(&raw).unwrap()
}
