use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gitlab_mirror_lib::config::{self, Config, DEFAULT_CONFIG_FILE};
use gitlab_mirror_lib::db;
use gitlab_mirror_lib::models::sync_run::{self, RunOutcome, RunSummary, RunTrigger};
use gitlab_mirror_lib::services::scheduler::{self, SchedulerConfig};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file (defaults to ./gitlab-mirror.yaml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the daily scheduler until interrupted.
    Run,

    /// Run one sync pass now and print its summary.
    Sync {
        /// Fetch everything but keep the records in memory only.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show recent runs from the history table.
    Status {
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },

    /// Print an example configuration file.
    ExampleConfig,
}

fn init_logging(cfg: &Config) {
    let mut builder = pretty_env_logger::formatted_timed_builder();
    match std::env::var("RUST_LOG") {
        Ok(filters) => builder.parse_filters(&filters),
        Err(_) => builder.parse_filters(cfg.log_level.as_deref().unwrap_or("info")),
    };
    builder.init();
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupt received, stopping after the current step");
            token.cancel();
        }
    });
}

fn print_summary(summary: &RunSummary) {
    println!(
        "run {} ({}): {} in {}ms",
        summary.run_id, summary.trigger, summary.outcome, summary.elapsed_ms
    );
    println!(
        "  projects: {} listed, {} processed, {} failed",
        summary.projects_listed,
        summary.projects_processed,
        summary.failed_projects.len()
    );
    if let Some(rate) = summary.success_rate() {
        println!("  success rate: {:.1}%", rate);
    }
    println!("  synced: {}", summary.synced);
    println!("  stored: {}", summary.store_totals);
    for failed in &summary.failed_projects {
        println!(
            "  failed {} ({}): {}",
            failed.path_with_namespace, failed.project_id, failed.error
        );
    }
    if let Some(error) = &summary.error {
        println!("  error: {}", error);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config_path = args.config.as_deref();

    match args.command {
        Command::ExampleConfig => {
            print!("{}", config::example());
        }
        Command::Run => {
            let cfg = config::load(config_path)
                .with_context(|| format!("loading {}", display_path(config_path)))?;
            init_logging(&cfg);

            let shutdown = CancellationToken::new();
            cancel_on_ctrl_c(shutdown.clone());
            let engine = gitlab_mirror_lib::build_engine(&cfg, false, shutdown).await?;

            let (_handle, task) = scheduler::start_background(
                engine,
                SchedulerConfig {
                    cadence: cfg.cadence()?,
                    run_on_startup: cfg.schedule.run_on_startup,
                },
            );
            task.await.context("scheduler task failed")?;
        }
        Command::Sync { dry_run } => {
            let cfg = config::load(config_path)
                .with_context(|| format!("loading {}", display_path(config_path)))?;
            init_logging(&cfg);

            let shutdown = CancellationToken::new();
            cancel_on_ctrl_c(shutdown.clone());
            let engine = gitlab_mirror_lib::build_engine(&cfg, dry_run, shutdown).await?;

            let summary = engine.run_sync(RunTrigger::Manual).await?;
            print_summary(&summary);
            if summary.outcome == RunOutcome::Failed {
                bail!("sync run {} failed", summary.run_id);
            }
        }
        Command::Status { limit } => {
            // Only the database path is needed here.
            let cfg = config::read(config_path)
                .with_context(|| format!("loading {}", display_path(config_path)))?;
            init_logging(&cfg);

            let pool = db::initialize(&cfg.database.path).await?;
            let runs = sync_run::recent_runs(&pool, limit).await?;
            if runs.is_empty() {
                println!("no runs recorded in {}", cfg.database.path.display());
            }
            for run in &runs {
                print_summary(run);
            }
        }
    }

    Ok(())
}

fn display_path(path: Option<&std::path::Path>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string())
}
