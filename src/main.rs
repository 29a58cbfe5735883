mod args;

use anyhow::Context;
use clap::Parser;
use talking_head::profile::PerformanceMode;
use talking_head::{GenerationRequest, Orchestrator, OrchestratorConfig};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::args::{Args, Cmd};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &args.config {
        Some(path) => OrchestratorConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => OrchestratorConfig::default(),
    };
    if let Some(dir) = &args.results_dir {
        config.results_dir = dir.clone();
    }

    match args.command {
        Cmd::Generate {
            text,
            image,
            mode,
            request_id,
        } => {
            if !config.assets.fallback_video.exists() {
                warn!(
                    "Fallback video not found: {}; failed generations will be fatal",
                    config.assets.fallback_video.display()
                );
            }
            let orchestrator = Orchestrator::new(config);

            let mut request = GenerationRequest::new(text).with_mode(mode);
            if let Some(image) = image {
                request = request.with_source_image(image);
            }
            if let Some(id) = request_id {
                request = request.with_request_id(id);
            }

            match orchestrator.generate(&request).await {
                Ok(result) => {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                    info!("Process complete.");
                }
                Err(e) => {
                    error!("Generation failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Cmd::Diagnose { save } => {
            let results_dir = config.results_dir.clone();
            let orchestrator = Orchestrator::new(config);
            let report = orchestrator.run_diagnostics().await;

            let bar = "=".repeat(50);
            println!("\n{bar}\nENGINE DIAGNOSTIC SUMMARY\n{bar}");
            println!("Status: {:?}", report.summary.status);
            println!("Critical Issues: {}", report.summary.critical_issues);
            println!("Warnings: {}", report.summary.warnings);
            println!(
                "Ready for Production: {}",
                if report.summary.ready_for_production { "YES" } else { "NO" }
            );
            if !report.recommendations.is_empty() {
                println!("\nRECOMMENDATIONS:");
                for (i, rec) in report.recommendations.iter().enumerate() {
                    println!(
                        "{}. [{}] {}",
                        i + 1,
                        rec.priority.to_string().to_uppercase(),
                        rec.title
                    );
                    println!("   {}", rec.description);
                    println!("   Solution: {}", rec.solution);
                }
            }
            println!("\n{bar}");

            if save {
                report
                    .save(&results_dir)
                    .with_context(|| format!("saving report to {}", results_dir.display()))?;
            }
        }
        Cmd::Profiles => {
            for mode in PerformanceMode::ALL {
                let profile = config.profiles.get(mode);
                println!("{}: {}", mode, serde_json::to_string(profile)?);
            }
        }
    }

    Ok(())
}
