use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::GenerationError;

/// File name the engine uses when it substitutes its own output.
pub const ENGINE_FALLBACK_NAME: &str = "fallback_video.mp4";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocatedArtifact {
    pub path: PathBuf,
    pub is_fallback: bool,
    pub from_parent: bool,
}

pub fn output_path(request_dir: &Path, request_id: &str) -> PathBuf {
    request_dir.join(format!("talking_head_{}.mp4", request_id))
}

/// Precedence, lower wins.
fn rank(file_name: &str) -> Option<u8> {
    let lower = file_name.to_ascii_lowercase();
    if !lower.ends_with(".mp4") {
        return None;
    }
    if lower.contains("fallback") {
        return Some(3);
    }
    if lower.contains("enhanced") {
        return Some(0);
    }
    if lower.contains("_full") {
        return Some(1);
    }
    Some(2)
}

/// Best non-empty candidate up to `depth` levels below `dir`. Ties break by
/// file name, then path.
fn best_in(dir: &Path, depth: usize, not_before: Option<SystemTime>) -> Option<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(depth)
        .into_iter()
        .filter_map(|e| match e {
            Ok(e) => Some(e),
            Err(err) => {
                debug!("Skipping unreadable entry under {}: {}", dir.display(), err);
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            let rank = rank(&name)?;
            let meta = e.metadata().ok()?;
            if meta.len() == 0 {
                warn!("Ignoring empty video file {}", e.path().display());
                return None;
            }
            if let Some(t) = not_before {
                if meta.modified().map(|m| m < t).unwrap_or(true) {
                    return None;
                }
            }
            Some((rank, name, e.into_path()))
        })
        .min()
        .map(|(_, _, path)| path)
}

/// Search `dir` and its immediate subdirectories, then the parent's own
/// files once. Parent hits must be at least as new as `engine_started`.
pub fn locate(dir: &Path, engine_started: SystemTime) -> Result<LocatedArtifact, GenerationError> {
    let (path, from_parent) = match best_in(dir, 2, None) {
        Some(p) => (p, false),
        None => {
            let parent = dir.parent().filter(|p| !p.as_os_str().is_empty());
            match parent.and_then(|p| best_in(p, 1, Some(engine_started))) {
                Some(p) => {
                    warn!("Video found in parent directory instead of {}", dir.display());
                    (p, true)
                }
                None => {
                    return Err(GenerationError::ArtifactNotFound {
                        dir: dir.to_path_buf(),
                    });
                }
            }
        }
    };

    let is_fallback = path
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase().contains("fallback"))
        .unwrap_or(false);
    info!("Located video artifact: {}", path.display());
    Ok(LocatedArtifact {
        path,
        is_fallback,
        from_parent,
    })
}

/// Moves the located file to `dest`. A rename that crosses filesystems
/// falls back to copy and delete.
pub fn claim(found: LocatedArtifact, dest: &Path) -> Result<LocatedArtifact, GenerationError> {
    if found.path != dest {
        if let Err(e) = fs::rename(&found.path, dest) {
            debug!("Rename of {} failed ({}), copying", found.path.display(), e);
            fs::copy(&found.path, dest)?;
            fs::remove_file(&found.path)?;
        }
    }
    Ok(LocatedArtifact {
        path: dest.to_path_buf(),
        ..found
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let p = dir.join(name);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(&p, b"mp4").unwrap();
        p
    }

    fn long_ago() -> SystemTime {
        SystemTime::now() - Duration::from_secs(3600)
    }

    #[test]
    fn enhanced_beats_generic() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a_video.mp4");
        let enhanced = touch(dir.path(), "z_video_enhanced.mp4");
        touch(dir.path(), "z_video_full.mp4");
        let found = locate(dir.path(), long_ago()).unwrap();
        assert_eq!(found.path, enhanced);
        assert!(!found.is_fallback);
        assert!(!found.from_parent);
    }

    #[test]
    fn full_beats_generic_and_generic_beats_fallback() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), ENGINE_FALLBACK_NAME);
        let generic = touch(dir.path(), "b.mp4");
        assert_eq!(locate(dir.path(), long_ago()).unwrap().path, generic);

        let full = touch(dir.path(), "c_full.mp4");
        assert_eq!(locate(dir.path(), long_ago()).unwrap().path, full);
    }

    #[test]
    fn timestamped_subdirectory_is_searched() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "y.mp4");
        let enhanced = touch(dir.path(), "2024_01_01/x_enhanced.mp4");
        touch(dir.path(), "2024_01_01/deeper/a_enhanced.mp4");
        assert_eq!(locate(dir.path(), long_ago()).unwrap().path, enhanced);
    }

    #[test]
    fn empty_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a_enhanced.mp4"), b"").unwrap();
        let generic = touch(dir.path(), "b.mp4");
        assert_eq!(locate(dir.path(), long_ago()).unwrap().path, generic);

        fs::write(&generic, b"").unwrap();
        assert!(matches!(
            locate(dir.path(), long_ago()),
            Err(GenerationError::ArtifactNotFound { .. })
        ));
    }

    #[test]
    fn fallback_named_file_is_flagged() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), ENGINE_FALLBACK_NAME);
        touch(dir.path(), "notes.txt");
        let found = locate(dir.path(), long_ago()).unwrap();
        assert!(found.is_fallback);
    }

    #[test]
    fn ties_break_by_name() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b.mp4");
        let a = touch(dir.path(), "a.mp4");
        assert_eq!(locate(dir.path(), long_ago()).unwrap().path, a);
    }

    #[test]
    fn parent_is_searched_for_fresh_files_only() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("results_x");
        fs::create_dir(&dir).unwrap();
        let stray = touch(root.path(), "stray.mp4");
        touch(root.path(), "results_other/other.mp4");

        let found = locate(&dir, long_ago()).unwrap();
        assert_eq!(found.path, stray);
        assert!(found.from_parent);

        let future = SystemTime::now() + Duration::from_secs(3600);
        assert!(matches!(
            locate(&dir, future),
            Err(GenerationError::ArtifactNotFound { .. })
        ));
    }

    #[test]
    fn sibling_request_dirs_are_not_searched() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("results_x");
        fs::create_dir(&dir).unwrap();
        touch(root.path(), "results_other/other.mp4");
        assert!(locate(&dir, long_ago()).is_err());
    }

    #[test]
    fn claimed_parent_hit_cannot_be_found_again() {
        let root = tempfile::tempdir().unwrap();
        let a = root.path().join("results_a");
        let b = root.path().join("results_b");
        fs::create_dir(&a).unwrap();
        fs::create_dir(&b).unwrap();
        let stray = touch(root.path(), "misplaced.mp4");

        let found = locate(&a, long_ago()).unwrap();
        let dest = output_path(&a, "a");
        let claimed = claim(found, &dest).unwrap();
        assert_eq!(claimed.path, dest);
        assert!(claimed.from_parent);
        assert!(dest.exists());
        assert!(!stray.exists());

        assert!(locate(&b, long_ago()).is_err());
    }
}
