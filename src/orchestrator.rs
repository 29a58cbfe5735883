use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::diagnostics::{self, DiagnosticReport};
use crate::error::GenerationError;
use crate::fallback::{self, ResultArtifact, ResultSource};
use crate::locator;
use crate::probe::{self, CapabilityMap};
use crate::profile::PerformanceProfile;
use crate::setup;
use crate::supervisor::{InferenceInputs, Supervisor};
use crate::telemetry::{self, Outcome, StageTimings, TelemetryRecord};
use crate::tts::{self, SpeechSynthesizer};
use crate::utils::preview;

/// Slack for filesystems with coarse modification times.
const MTIME_SLACK: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    text: String,
    source_image: Option<PathBuf>,
    performance_mode: Option<String>,
    request_id: Uuid,
}

impl GenerationRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_image: None,
            performance_mode: None,
            request_id: Uuid::new_v4(),
        }
    }

    pub fn with_source_image(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_image = Some(path.into());
        self
    }

    /// Raw mode name; unknown names resolve to `balanced` at generation time.
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.performance_mode = Some(mode.into());
        self
    }

    pub fn with_request_id(mut self, id: Uuid) -> Self {
        self.request_id = id;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn source_image(&self) -> Option<&Path> {
        self.source_image.as_deref()
    }

    pub fn performance_mode(&self) -> Option<&str> {
        self.performance_mode.as_deref()
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }
}

/// Per-request bookkeeping shared by the attempt and the telemetry record.
#[derive(Default)]
struct Trace {
    timings: StageTimings,
    exit_code: Option<i32>,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    synthesizer: Box<dyn SpeechSynthesizer>,
    supervisor: Supervisor,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        let synthesizer = tts::from_config(&config.tts);
        Self::with_synthesizer(config, synthesizer)
    }

    pub fn with_synthesizer(config: OrchestratorConfig, synthesizer: Box<dyn SpeechSynthesizer>) -> Self {
        let supervisor = Supervisor::new(config.engine.clone(), config.max_concurrent_inference);
        Self {
            config,
            synthesizer,
            supervisor,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Turns text into a video. Every failure except a missing bundled
    /// fallback asset comes back as a flagged fallback artifact.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<ResultArtifact, GenerationError> {
        let started = Instant::now();
        let rid = request.request_id().to_string();
        info!(
            "[Request {}] Starting video generation for text: '{}'",
            rid,
            preview(request.text(), 50)
        );

        let (mode, profile) = self.config.profiles.resolve(request.performance_mode());
        info!("[Request {}] Performance mode: {} ({:?})", rid, mode, profile);
        let env = probe::snapshot().await;
        let caps = probe::capabilities(&env, &self.config.engine);
        let request_dir = self.config.request_dir(&rid);

        let mut trace = Trace::default();
        let attempt = self
            .attempt(request, &rid, &profile, caps, &request_dir, &mut trace)
            .await;

        let (result, failure) = match attempt {
            Ok(artifact) => (Ok(artifact), None),
            Err(e) => {
                log_failure(&rid, &e, &profile, started.elapsed());
                let t = Instant::now();
                let recovered = fallback::recover(&rid, &request_dir, &self.config.assets, &e);
                trace.timings.fallback = StageTimings::secs(t.elapsed());
                (recovered, Some(e))
            }
        };
        trace.timings.total = started.elapsed().as_secs_f64();

        let outcome = Outcome {
            source: result.as_ref().ok().map(|r| r.source),
            is_fallback: result.as_ref().map(|r| r.is_fallback).unwrap_or(true),
            exit_code: trace.exit_code,
            error_kind: failure.as_ref().map(|e| e.kind()),
            error: failure.as_ref().map(|e| e.to_string()),
        };
        let record = TelemetryRecord {
            request_id: rid.clone(),
            recorded_at: Utc::now(),
            performance_mode: mode,
            profile,
            capabilities: caps,
            stage_timings: trace.timings,
            resource_snapshot: env,
            outcome,
        };
        telemetry::record(&request_dir, &record);

        match &result {
            Ok(artifact) => info!(
                "[Request {}] Finished in {:.1}s: {} (source={:?}, fallback={})",
                rid,
                record.stage_timings.total,
                artifact.video_path.display(),
                artifact.source,
                artifact.is_fallback
            ),
            Err(e) => error!("[Request {}] Unrecoverable: {}", rid, e),
        }
        result
    }

    async fn attempt(
        &self,
        request: &GenerationRequest,
        rid: &str,
        profile: &PerformanceProfile,
        caps: CapabilityMap,
        request_dir: &Path,
        trace: &mut Trace,
    ) -> Result<ResultArtifact, GenerationError> {
        tokio::fs::create_dir_all(request_dir).await?;

        info!("[Request {}] Generating audio...", rid);
        let t = Instant::now();
        let audio = self.synthesizer.synthesize(request.text(), rid, request_dir).await;
        trace.timings.audio_generation = StageTimings::secs(t.elapsed());
        let audio = audio?;
        info!(
            "[Request {}] Audio generated ({:.2}s): {}",
            rid,
            audio.duration_seconds,
            audio.path.display()
        );

        let t = Instant::now();
        let validated = setup::validate_engine(&self.config.engine)
            .into_result()
            .and_then(|launcher| {
                let image = setup::resolve_source_image(request.source_image(), &self.config.assets)?;
                Ok((launcher, image))
            });
        trace.timings.validation = StageTimings::secs(t.elapsed());
        let (launcher, image) = validated?;

        let enhancer = profile.enhancer_enabled && caps.enhancer;
        if profile.enhancer_enabled && !caps.enhancer {
            warn!("[Request {}] Enhancer weights unavailable, running without enhancer", rid);
        }
        info!("[Request {}] Source image: {}", rid, image.display());
        info!("[Request {}] Result dir: {}", rid, request_dir.display());

        let inputs = InferenceInputs {
            request_id: rid,
            audio: &audio.path,
            source_image: &image,
            result_dir: request_dir,
            profile,
            enhancer,
        };
        let t = Instant::now();
        let run = self.supervisor.run(&launcher, &inputs).await;
        trace.timings.inference = StageTimings::secs(t.elapsed());
        trace.exit_code = match &run {
            Ok(r) => r.outcome.exit_code,
            Err(GenerationError::InferenceExit { code, .. }) => *code,
            Err(_) => None,
        };
        let run = run?;

        // `run` holds the admission slot until the output is claimed.
        let engine_started = SystemTime::from(run.job.started_at)
            .checked_sub(MTIME_SLACK)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let t = Instant::now();
        let located = locator::locate(request_dir, engine_started)
            .and_then(|found| locator::claim(found, &locator::output_path(request_dir, rid)));
        trace.timings.location = StageTimings::secs(t.elapsed());
        let located = located?;

        let diagnosis = if run.soft_success() {
            Some("engine substituted its own output (exit code 2)".to_string())
        } else if located.is_fallback {
            Some("engine output is its own fallback file".to_string())
        } else {
            None
        };
        if let Some(d) = &diagnosis {
            warn!("[Request {}] Degraded result: {}", rid, d);
        }

        if let Err(e) = tokio::fs::remove_file(&audio.path).await {
            debug!("[Request {}] Could not remove {}: {}", rid, audio.path.display(), e);
        }

        Ok(ResultArtifact {
            request_id: rid.to_string(),
            video_path: located.path,
            is_fallback: located.is_fallback || run.soft_success(),
            source: ResultSource::Inference,
            diagnosis,
        })
    }

    pub async fn run_diagnostics(&self) -> DiagnosticReport {
        diagnostics::run(&self.config.engine, &self.config.diagnostics).await
    }
}

fn log_failure(rid: &str, err: &GenerationError, profile: &PerformanceProfile, elapsed: Duration) {
    error!(
        "[Request {}] Video generation failed after {:.1}s ({}): {}",
        rid,
        elapsed.as_secs_f64(),
        err.kind(),
        err
    );
    debug!("[Request {}] Profile at failure: {:?}", rid, profile);
    match err {
        GenerationError::Timeout { stdout, stderr, .. } => {
            error!("[Request {}] Partial stdout:\n{}", rid, stdout);
            error!("[Request {}] Partial stderr:\n{}", rid, stderr);
        }
        GenerationError::InferenceExit { stderr, .. } if !stderr.is_empty() => {
            debug!("[Request {}] Engine stderr:\n{}", rid, stderr);
        }
        _ => {}
    }
}
