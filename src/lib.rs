pub mod audio;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod fallback;
pub mod locator;
pub mod orchestrator;
pub mod probe;
pub mod profile;
pub mod setup;
pub mod supervisor;
pub mod telemetry;
pub mod tts;
pub mod utils;

pub use config::OrchestratorConfig;
pub use diagnostics::DiagnosticReport;
pub use error::{GenerationError, SynthesisError};
pub use fallback::{ResultArtifact, ResultSource};
pub use orchestrator::{GenerationRequest, Orchestrator};
pub use profile::{PerformanceMode, PerformanceProfile, ProfileTable};
