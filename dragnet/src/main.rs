//! Dragnet CLI — drives scan sessions against the orchestrator API.
//!
//! Candidate repositories come from a JSON file (the output of the
//! code-search side): an array of objects with at least `name` and `url`.

mod client;
mod run;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use shared_types::{CreateScanRequest, RepoRef};

use client::ApiClient;
use run::{drive, summarize, DriveOptions};

#[derive(Debug, Parser)]
#[command(name = "dragnet", about = "Fan out static-analysis scans over repositories")]
struct Cli {
    /// Orchestrator API base URL
    #[arg(long, default_value = "http://localhost:8000")]
    api_url: String,

    /// Search query identifying this analysis (part of the session fingerprint)
    #[arg(long, short = 'q')]
    query: String,

    /// Path to custom analysis rules (file or directory)
    #[arg(long)]
    rules: Option<String>,

    /// Use the pro analysis engine
    #[arg(long)]
    pro: bool,

    /// JSON file with candidate repositories (array of {name, url})
    #[arg(long, short = 'i')]
    repos_file: PathBuf,

    /// Resume the most recent session with the same fingerprint
    #[arg(long)]
    resume: bool,

    /// Maximum resubmission attempts for queued repos
    #[arg(long, default_value_t = 100)]
    max_retries: u32,

    /// Seconds between queued-repo resubmissions
    #[arg(long, default_value_t = 5)]
    retry_interval: u64,

    /// Seconds between status polls
    #[arg(long, default_value_t = 10)]
    poll_interval: u64,

    /// Maximum seconds to wait for analysis completion
    #[arg(long, default_value_t = 3600)]
    max_wait_time: u64,

    /// Write the result array to this file as JSON
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
}

fn load_repos(path: &PathBuf) -> Result<Vec<RepoRef>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read repos file {}", path.display()))?;
    let repos: Vec<RepoRef> = serde_json::from_str(&raw)
        .with_context(|| format!("invalid repos JSON in {}", path.display()))?;
    Ok(repos)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "dragnet=info".into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    let repos = load_repos(&cli.repos_file)?;
    if repos.is_empty() {
        println!("No repositories to process.");
        return Ok(());
    }

    let client = ApiClient::new(&cli.api_url)?;
    let request = CreateScanRequest {
        query: cli.query,
        rules_path: cli.rules,
        use_pro: cli.pro,
    };
    let options = DriveOptions {
        max_retries: cli.max_retries,
        retry_interval: Duration::from_secs(cli.retry_interval),
        poll_interval: Duration::from_secs(cli.poll_interval),
        max_wait: Duration::from_secs(cli.max_wait_time),
    };

    let outcome = drive(&client, request, repos, cli.resume, &options).await?;

    if let Some(output) = &cli.output {
        let rendered = serde_json::to_string_pretty(&outcome.results)?;
        std::fs::write(output, rendered)
            .with_context(|| format!("failed to write results to {}", output.display()))?;
        println!("Results saved to {}", output.display());
    }

    println!("{}", summarize(&outcome));
    Ok(())
}
