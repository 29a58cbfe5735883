use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::audio::{concat_wavs, tone_duration_for, wav_duration_seconds, write_tone_wav};
use crate::config::TtsConfig;
use crate::error::SynthesisError;
use crate::utils::chunk_text;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioArtifact {
    pub path: PathBuf,
    pub duration_seconds: f64,
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn name(&self) -> &str;

    /// Writes `speech_<request_id>.wav` into `out_dir`.
    async fn synthesize(
        &self,
        text: &str,
        request_id: &str,
        out_dir: &Path,
    ) -> Result<AudioArtifact, SynthesisError>;
}

pub fn audio_path_for(out_dir: &Path, request_id: &str) -> PathBuf {
    out_dir.join(format!("speech_{}.wav", request_id))
}

/// Deterministic placeholder voice; duration follows text length.
#[derive(Debug, Default, Clone)]
pub struct ToneSynthesizer;

#[async_trait]
impl SpeechSynthesizer for ToneSynthesizer {
    fn name(&self) -> &str {
        "tone"
    }

    async fn synthesize(
        &self,
        text: &str,
        request_id: &str,
        out_dir: &Path,
    ) -> Result<AudioArtifact, SynthesisError> {
        if text.trim().is_empty() {
            return Err(SynthesisError::EmptyText);
        }
        let path = audio_path_for(out_dir, request_id);
        let duration = tone_duration_for(text);
        let written = {
            let path = path.clone();
            tokio::task::spawn_blocking(move || write_tone_wav(&path, duration))
                .await
                .map_err(|e| SynthesisError::Engine(format!("tone writer panicked: {e}")))??
        };
        info!("Generated tone audio ({:.2}s): {}", written, path.display());
        Ok(AudioArtifact {
            path,
            duration_seconds: written,
        })
    }
}

/// Piper voice driven over stdin, one WAV per text chunk.
#[derive(Debug, Clone)]
pub struct PiperSynthesizer {
    program: PathBuf,
    model: PathBuf,
    chunk_chars: usize,
}

impl PiperSynthesizer {
    pub fn new(program: impl Into<PathBuf>, model: impl Into<PathBuf>, chunk_chars: usize) -> Self {
        Self {
            program: program.into(),
            model: model.into(),
            chunk_chars: chunk_chars.max(1),
        }
    }

    async fn generate_chunk(&self, text: &str, out_path: &Path) -> Result<(), SynthesisError> {
        let mut child = Command::new(&self.program)
            .arg("--model")
            .arg(&self.model)
            .arg("--output_file")
            .arg(out_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SynthesisError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("Piper failed for {}: {}", out_path.display(), stderr.trim());
            return Err(SynthesisError::Engine(format!(
                "piper exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SpeechSynthesizer for PiperSynthesizer {
    fn name(&self) -> &str {
        "piper"
    }

    async fn synthesize(
        &self,
        text: &str,
        request_id: &str,
        out_dir: &Path,
    ) -> Result<AudioArtifact, SynthesisError> {
        if text.trim().is_empty() {
            return Err(SynthesisError::EmptyText);
        }
        let chunks = chunk_text(text, self.chunk_chars);
        info!("Split text into {} chunks for piper", chunks.len());

        let mut parts = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            let part = out_dir.join(format!("speech_{}_part_{:03}.wav", request_id, i));
            debug!("Chunk {}/{}: {}", i + 1, chunks.len(), chunk);
            self.generate_chunk(chunk, &part).await?;
            parts.push(part);
        }

        let path = audio_path_for(out_dir, request_id);
        concat_wavs(&parts, &path)?;
        for part in &parts {
            if let Err(e) = tokio::fs::remove_file(part).await {
                debug!("Could not remove chunk {}: {}", part.display(), e);
            }
        }
        let duration_seconds = wav_duration_seconds(&path)?;
        info!("Generated piper audio ({:.2}s): {}", duration_seconds, path.display());
        Ok(AudioArtifact {
            path,
            duration_seconds,
        })
    }
}

/// Tries `primary`, then `secondary` if the primary fails for any reason
/// other than empty input.
pub struct ChainedSynthesizer {
    primary: Box<dyn SpeechSynthesizer>,
    secondary: Box<dyn SpeechSynthesizer>,
}

impl ChainedSynthesizer {
    pub fn new(primary: Box<dyn SpeechSynthesizer>, secondary: Box<dyn SpeechSynthesizer>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl SpeechSynthesizer for ChainedSynthesizer {
    fn name(&self) -> &str {
        self.primary.name()
    }

    async fn synthesize(
        &self,
        text: &str,
        request_id: &str,
        out_dir: &Path,
    ) -> Result<AudioArtifact, SynthesisError> {
        match self.primary.synthesize(text, request_id, out_dir).await {
            Ok(audio) => Ok(audio),
            Err(SynthesisError::EmptyText) => Err(SynthesisError::EmptyText),
            Err(e) => {
                warn!(
                    "{} synthesis failed: {}, falling back to {}",
                    self.primary.name(),
                    e,
                    self.secondary.name()
                );
                self.secondary.synthesize(text, request_id, out_dir).await
            }
        }
    }
}

pub fn from_config(cfg: &TtsConfig) -> Box<dyn SpeechSynthesizer> {
    match &cfg.piper_model {
        Some(model) => Box::new(ChainedSynthesizer::new(
            Box::new(PiperSynthesizer::new(&cfg.piper_program, model, cfg.chunk_chars)),
            Box::new(ToneSynthesizer),
        )),
        None => Box::new(ToneSynthesizer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tone_voice_writes_request_scoped_file() {
        let dir = tempfile::tempdir().unwrap();
        let audio = ToneSynthesizer
            .synthesize("Hello there.", "req-1", dir.path())
            .await
            .unwrap();
        assert_eq!(audio.path, dir.path().join("speech_req-1.wav"));
        assert!(audio.path.exists());
        assert!((audio.duration_seconds - 5.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn empty_text_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = ToneSynthesizer.synthesize("   ", "r", dir.path()).await.unwrap_err();
        assert!(matches!(err, SynthesisError::EmptyText));
    }

    #[tokio::test]
    async fn missing_piper_falls_back_to_tone() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TtsConfig {
            piper_model: Some(dir.path().join("voice.onnx")),
            piper_program: PathBuf::from("/nonexistent/piper-binary"),
            chunk_chars: 250,
        };
        let synth = from_config(&cfg);
        let audio = synth.synthesize("Some words.", "r2", dir.path()).await.unwrap();
        assert!(audio.path.exists());
    }
}
