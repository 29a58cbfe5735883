use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[clap(name = "talking-head", about = "Render talking head videos from text")]
pub struct Args {
    /// JSON configuration file; built-in defaults are used when omitted.
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter, overridden by RUST_LOG when set.
    #[clap(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Override the directory that receives per-request results.
    #[clap(long, global = true)]
    pub results_dir: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Generate one video and print the result as JSON.
    Generate {
        #[clap(long)]
        text: String,

        #[clap(long)]
        image: Option<PathBuf>,

        #[clap(long, default_value = "balanced")]
        mode: String,

        #[clap(long)]
        request_id: Option<Uuid>,
    },

    /// Check the engine installation and print a remediation report.
    Diagnose {
        /// Also write the JSON report into the results directory.
        #[clap(long)]
        save: bool,
    },

    /// Print the resolved performance profiles.
    Profiles,
}
