use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "malscan")]
#[command(about = "Malware analysis pipeline: submission API and worker", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the submission-and-query HTTP API (also starts the in-process
    /// worker pool unless --no-workers is given).
    Api(ApiArgs),
    /// Run the pipeline orchestrator worker only.
    Worker(WorkerArgs),
}

#[derive(clap::Args, Debug)]
pub struct ApiArgs {
    /// Number of in-process worker tasks to start alongside the API.
    /// Overrides the `server.workers` configuration value.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Disable the in-process worker pool; run the HTTP API only.
    #[arg(long)]
    pub no_workers: bool,
}

#[derive(clap::Args, Debug)]
pub struct WorkerArgs {
    /// Number of concurrent consumer tasks. Overrides `server.workers`.
    #[arg(long)]
    pub workers: Option<usize>,
}
