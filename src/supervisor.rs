use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::GenerationError;
use crate::profile::PerformanceProfile;

/// How long to keep reading pipes after the child is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(3);
pub const JOB_SNAPSHOT_FILE: &str = "inference_job.json";

static MISSING_MODULE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"No module named '([A-Za-z0-9_\.]+)'").expect("valid module regex")
});
static CHECKPOINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([^\s'\x22]*(?:checkpoints?/[^\s'\x22]+|\.pth\.tar|\.pth|\.safetensors))")
        .expect("valid checkpoint regex")
});

#[derive(Debug, Clone, Serialize)]
pub struct InferenceJob {
    pub working_directory: PathBuf,
    pub command_line: Vec<String>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InferenceOutcome {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    #[serde(rename = "elapsed_seconds", serialize_with = "ser_secs")]
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureSignature {
    AudioLibrary,
    FaceAlignment,
    TensorRuntime(String),
    ModelCheckpoint(String),
    PythonModule(Option<String>),
    Unknown,
}

impl fmt::Display for FailureSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureSignature::AudioLibrary => {
                write!(f, "missing dependency: audio library (librosa)")
            }
            FailureSignature::FaceAlignment => {
                write!(f, "missing dependency: face alignment library (face_alignment)")
            }
            FailureSignature::TensorRuntime(m) => {
                write!(f, "missing dependency: tensor runtime ({m})")
            }
            FailureSignature::ModelCheckpoint(p) => write!(f, "missing model checkpoint: {p}"),
            FailureSignature::PythonModule(Some(m)) => {
                write!(f, "missing dependency: python module '{m}'")
            }
            FailureSignature::PythonModule(None) => {
                write!(f, "missing dependency: python module import failed")
            }
            FailureSignature::Unknown => write!(f, "no known failure signature in stderr"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum ExitClass {
    Success,
    /// Engine finished but substituted its own degraded output.
    SoftSuccess,
    HardFailure { signature: FailureSignature },
    Unclassified { code: Option<i32> },
}

pub fn classify(code: Option<i32>, stderr: &str) -> ExitClass {
    match code {
        Some(0) => ExitClass::Success,
        Some(2) => ExitClass::SoftSuccess,
        Some(1) => ExitClass::HardFailure {
            signature: diagnose(stderr),
        },
        other => ExitClass::Unclassified { code: other },
    }
}

/// Heuristic, first match wins. A module named in the traceback takes
/// precedence over bare library mentions.
pub fn diagnose(stderr: &str) -> FailureSignature {
    if let Some(caps) = MISSING_MODULE_RE.captures(stderr) {
        let module = caps[1].to_string();
        let root = module.split('.').next().unwrap_or(&module);
        return match root {
            "librosa" => FailureSignature::AudioLibrary,
            "face_alignment" => FailureSignature::FaceAlignment,
            "torch" | "torchvision" | "torchaudio" | "onnxruntime" => {
                FailureSignature::TensorRuntime(root.to_string())
            }
            _ => FailureSignature::PythonModule(Some(module)),
        };
    }
    let missing_file = stderr.contains("No such file") || stderr.contains("FileNotFoundError");
    if missing_file {
        if let Some(caps) = CHECKPOINT_RE.captures(stderr) {
            return FailureSignature::ModelCheckpoint(caps[1].to_string());
        }
    }
    if stderr.contains("librosa") {
        return FailureSignature::AudioLibrary;
    }
    if stderr.contains("face_alignment") {
        return FailureSignature::FaceAlignment;
    }
    if stderr.contains("onnxruntime") {
        return FailureSignature::TensorRuntime("onnxruntime".into());
    }
    if stderr.contains("ModuleNotFoundError") || stderr.contains("ImportError") {
        return FailureSignature::PythonModule(None);
    }
    FailureSignature::Unknown
}

#[derive(Debug, Clone)]
pub struct InferenceInputs<'a> {
    pub request_id: &'a str,
    pub audio: &'a Path,
    pub source_image: &'a Path,
    pub result_dir: &'a Path,
    pub profile: &'a PerformanceProfile,
    pub enhancer: bool,
}

/// Holds the admission slot until dropped, so the caller can claim the
/// output before the next engine run starts.
#[derive(Debug)]
pub struct InferenceRun {
    pub job: InferenceJob,
    pub outcome: InferenceOutcome,
    pub class: ExitClass,
    _slot: OwnedSemaphorePermit,
}

impl InferenceRun {
    pub fn soft_success(&self) -> bool {
        self.class == ExitClass::SoftSuccess
    }
}

#[derive(Debug, Serialize)]
struct JobSnapshot<'a> {
    job: &'a InferenceJob,
    outcome: &'a InferenceOutcome,
    timed_out: bool,
    class: Option<&'a ExitClass>,
}

pub struct Supervisor {
    engine: EngineConfig,
    permits: Arc<Semaphore>,
}

impl Supervisor {
    pub fn new(engine: EngineConfig, max_concurrent: usize) -> Self {
        Self {
            engine,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn engine_args(&self, inputs: &InferenceInputs<'_>) -> Vec<String> {
        let mut args = vec![
            "--driven_audio".to_string(),
            absolute(inputs.audio).display().to_string(),
            "--source_image".to_string(),
            absolute(inputs.source_image).display().to_string(),
            "--result_dir".to_string(),
            absolute(inputs.result_dir).display().to_string(),
            "--preprocess".to_string(),
            inputs.profile.preprocess.as_arg().to_string(),
            "--size".to_string(),
            inputs.profile.target_resolution.to_string(),
        ];
        if inputs.enhancer {
            args.push("--enhancer".to_string());
            args.push(self.engine.enhancer_name.clone());
        }
        args.push("--still".to_string());
        args.push("--expression_scale".to_string());
        args.push(inputs.profile.expression_scale.to_string());
        args
    }

    fn command_line(&self, launcher: &Path, inputs: &InferenceInputs<'_>) -> Vec<String> {
        let mut line = vec![launcher.display().to_string()];
        line.extend(self.engine.launch_args.iter().cloned());
        line.push(absolute(&self.engine.resolve(&self.engine.entry_script)).display().to_string());
        line.extend(self.engine_args(inputs));
        line
    }

    fn build_command(&self, command_line: &[String]) -> Command {
        let mut cmd = Command::new(&command_line[0]);
        cmd.args(&command_line[1..])
            .current_dir(absolute(&self.engine.root))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let path = std::env::var("PATH").ok();
        for (key, value) in self.engine.activation.env_vars(path.as_deref()) {
            cmd.env(key, value);
        }
        cmd.envs(&self.engine.extra_env);

        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    /// Runs the engine once. `Ok` means exit code 0 or 2; every other
    /// ending is an error carrying what was captured.
    pub async fn run(
        &self,
        launcher: &Path,
        inputs: &InferenceInputs<'_>,
    ) -> Result<InferenceRun, GenerationError> {
        let rid = inputs.request_id;
        let queued = Instant::now();
        let slot = Arc::clone(&self.permits).acquire_owned().await.map_err(|_| {
            GenerationError::Io(std::io::Error::other("inference admission closed"))
        })?;
        let waited = queued.elapsed();
        if waited > Duration::from_millis(100) {
            info!("[Request {}] Waited {:.1}s for an inference slot", rid, waited.as_secs_f64());
        }

        let command_line = self.command_line(launcher, inputs);
        let job = InferenceJob {
            working_directory: absolute(&self.engine.root),
            command_line,
            started_at: Utc::now(),
        };
        info!("[Request {}] Executing engine: {}", rid, job.command_line.join(" "));

        let started = Instant::now();
        let mut child = match self.build_command(&job.command_line).spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("[Request {}] Failed to launch engine: {}", rid, e);
                let outcome = InferenceOutcome {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: e.to_string(),
                    elapsed: started.elapsed(),
                };
                write_snapshot(inputs.result_dir, &job, &outcome, false, None);
                return Err(GenerationError::InferenceExit {
                    code: None,
                    diagnosis: format!("failed to launch engine: {e}"),
                    stderr: outcome.stderr,
                });
            }
        };
        let pid = child.id();
        let stdout = child.stdout.take().map(|s| capture(s, "engine stdout"));
        let stderr = child.stderr.take().map(|s| capture(s, "engine stderr"));

        let waited = timeout(inputs.profile.timeout, child.wait()).await;
        let timed_out = waited.is_err();
        if timed_out {
            warn!(
                "[Request {}] Engine exceeded {:.1}s, terminating process tree",
                rid,
                inputs.profile.timeout.as_secs_f64()
            );
            kill_tree(&mut child, pid).await;
        }
        let elapsed = started.elapsed();

        let outcome = InferenceOutcome {
            exit_code: match &waited {
                Ok(Ok(status)) => status.code(),
                _ => None,
            },
            stdout: drain(stdout).await,
            stderr: drain(stderr).await,
            elapsed,
        };

        let status = match waited {
            Err(_) => {
                write_snapshot(inputs.result_dir, &job, &outcome, true, None);
                return Err(GenerationError::Timeout {
                    elapsed,
                    stdout: outcome.stdout,
                    stderr: outcome.stderr,
                });
            }
            Ok(Err(e)) => {
                kill_tree(&mut child, pid).await;
                write_snapshot(inputs.result_dir, &job, &outcome, false, None);
                return Err(GenerationError::Io(e));
            }
            Ok(Ok(status)) => status,
        };

        let class = classify(status.code(), &outcome.stderr);
        write_snapshot(inputs.result_dir, &job, &outcome, false, Some(&class));
        debug!("[Request {}] Engine stdout:\n{}", rid, outcome.stdout);

        let diagnosis = match &class {
            ExitClass::Success => {
                info!("[Request {}] Engine finished in {:.1}s", rid, elapsed.as_secs_f64());
                None
            }
            ExitClass::SoftSuccess => {
                warn!("[Request {}] Engine reported a substituted result (exit 2)", rid);
                None
            }
            ExitClass::HardFailure { signature } => Some(signature.to_string()),
            ExitClass::Unclassified { .. } => Some("unclassified engine failure".to_string()),
        };
        if let Some(diagnosis) = diagnosis {
            error!("[Request {}] Engine stderr:\n{}", rid, outcome.stderr);
            return Err(GenerationError::InferenceExit {
                code: outcome.exit_code,
                diagnosis,
                stderr: outcome.stderr,
            });
        }
        Ok(InferenceRun {
            job,
            outcome,
            class,
            _slot: slot,
        })
    }
}

fn capture<R>(reader: R, label: &'static str) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        let mut out = String::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line);
                    let text = text.trim_end_matches(['\r', '\n']);
                    debug!("{}: {}", label, text);
                    out.push_str(text);
                    out.push('\n');
                }
                Err(e) => {
                    debug!("{} read error: {}", label, e);
                    break;
                }
            }
        }
        out
    })
}

async fn drain(handle: Option<JoinHandle<String>>) -> String {
    let Some(mut handle) = handle else {
        return String::new();
    };
    match timeout(DRAIN_GRACE, &mut handle).await {
        Ok(Ok(out)) => out,
        Ok(Err(e)) => {
            debug!("Pipe reader failed: {}", e);
            String::new()
        }
        Err(_) => {
            handle.abort();
            warn!("Pipe still open {:?} after the engine exited", DRAIN_GRACE);
            String::new()
        }
    }
}

/// The child leads its own process group, so its pid is the group id.
async fn kill_tree(child: &mut Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        #[cfg(unix)]
        let killed = Command::new("kill")
            .args(["-9", "--", &format!("-{pid}")])
            .output()
            .await;
        #[cfg(windows)]
        let killed = Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .output()
            .await;
        match killed {
            Ok(o) if o.status.success() => debug!("Killed engine process group {}", pid),
            Ok(o) => debug!(
                "Killing process group {} failed: {}",
                pid,
                String::from_utf8_lossy(&o.stderr).trim()
            ),
            Err(e) => debug!("Failed to run kill for {}: {}", pid, e),
        }
    }

    if let Err(e) = child.kill().await {
        debug!("Engine already gone: {}", e);
    }
}

fn write_snapshot(
    dir: &Path,
    job: &InferenceJob,
    outcome: &InferenceOutcome,
    timed_out: bool,
    class: Option<&ExitClass>,
) {
    let snapshot = JobSnapshot {
        job,
        outcome,
        timed_out,
        class,
    };
    let path = dir.join(JOB_SNAPSHOT_FILE);
    let result = serde_json::to_string_pretty(&snapshot)
        .map_err(std::io::Error::from)
        .and_then(|data| std::fs::write(&path, data));
    if let Err(e) = result {
        warn!("Could not write job snapshot {}: {}", path.display(), e);
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn ser_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}
