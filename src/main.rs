use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use narrator::config::AppConfig;
use narrator::services::storage::{FileDocumentStore, LocalObjectStore};
use narrator::services::synthesis::HttpSynthesisClient;
use narrator::Orchestrator;

#[derive(Parser)]
#[command(version, about = "Block-based narration: synthesize, review, export")]
struct Cli {
    /// TOML config file. Defaults and NARRATOR_* variables apply without one.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synthesize every idle or failed block of a project
    Generate { project: String },
    /// Merge the project's ready audio into one file
    Export { project: String, out: PathBuf },
    /// Show block states and timeline length
    Status { project: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    config.ensure_dirs().context("creating data directories")?;

    let project = match &cli.command {
        Commands::Generate { project } | Commands::Export { project, .. } | Commands::Status { project } => {
            project.clone()
        }
    };

    let provider = Arc::new(HttpSynthesisClient::new(&config.provider)?);
    let objects = Arc::new(LocalObjectStore::new(&config.storage));
    let documents = Arc::new(FileDocumentStore::new(&config.storage.documents_dir));
    let orchestrator = Orchestrator::new(project.clone(), &config, provider, objects, documents);

    let loaded = orchestrator.load().await.with_context(|| format!("loading project {}", project))?;
    tracing::info!("Project {} has {} blocks", project, loaded);

    match cli.command {
        Commands::Generate { .. } => {
            let report = orchestrator.generate_all().await;
            orchestrator.persist().await.context("saving project")?;
            println!("{} ready, {} failed", report.succeeded.len(), report.failed.len());
            for (id, failure) in &report.failed {
                println!("  {} {:?}: {}", id, failure.kind, failure.reason);
            }
            if report.all_failed() {
                anyhow::bail!("no block could be generated");
            }
        }
        Commands::Export { out, .. } => {
            let artifact = orchestrator.export().await?;
            tokio::fs::write(&out, &artifact.bytes)
                .await
                .with_context(|| format!("writing {}", out.display()))?;
            println!(
                "Wrote {} ({} bytes, {} of {} clips)",
                out.display(),
                artifact.bytes.len(),
                artifact.included.len(),
                artifact.included.len() + artifact.skipped.len()
            );
            for warning in artifact.warnings() {
                println!("  warning: {}", warning);
            }
        }
        Commands::Status { .. } => {
            let snapshot = orchestrator.snapshot();
            for block in snapshot.ordered() {
                let stale = if block.is_stale() { " (text changed)" } else { "" };
                println!(
                    "{:>3} {} {:?} {:.2}s{}",
                    block.order,
                    block.id,
                    block.generation_state,
                    block.effective_duration(),
                    stale
                );
            }
            println!("Timeline: {:.2}s", orchestrator.total_duration());
        }
    }

    Ok(())
}
