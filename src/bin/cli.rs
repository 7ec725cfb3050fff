//! planwatch CLI
//!
//! Local entry point for daily runs and manual recovery.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use planwatch::{
    config::{load_config, load_ids},
    error::{AppError, Result},
    models::Config,
    pipeline::{
        self, DiffCalculator, ReportSource, RunOptions, build_unified_report,
        write_unified_report,
    },
    services::{Annotator, HttpClassifier, HttpFetcher, JsonExtractor, RecordFetcher},
    storage::{SnapshotStore, StateStore},
};

/// planwatch - Permit and zoning plan change tracker
#[derive(Parser, Debug)]
#[command(
    name = "planwatch",
    version,
    about = "Keeps permit and plan records in sync and reports daily changes"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch, compact and diff the id queue under backup supervision
    Run {
        /// Snapshot date (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Id queue (default: {data_dir}/{ids_file})
        #[arg(long)]
        ids: Option<PathBuf>,
    },

    /// Fold a leftover append log into a snapshot without fetching
    Compact {
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Diff the two most recent snapshots
    Diff,

    /// Make ids that failed in the latest snapshot eligible again
    ResetFailed,

    /// Combine several sources' reports into one daily document
    Unify {
        /// NAME=DATA_DIR:REPORT_PREFIX, repeatable
        #[arg(long = "source", required = true)]
        sources: Vec<ReportSource>,

        /// Output directory
        #[arg(long, default_value = ".")]
        out: PathBuf,

        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Validate the configuration file
    Validate,

    /// Show pending state and snapshot dates
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Run { date, ids } => {
            let config = load_config(&cli.config)?;
            let ids = load_ids(&ids.unwrap_or_else(|| config.paths.ids_path()))?;

            let fetcher: Arc<dyn RecordFetcher> =
                Arc::new(HttpFetcher::new(&config.fetcher, JsonExtractor)?);
            let mut options = RunOptions::new(date.unwrap_or_else(today));
            if let Some(classifier) = &config.classifier {
                let client = HttpClassifier::new(classifier, config.fetcher.timeout())?;
                options =
                    options.with_annotator(Annotator::new(Arc::new(client), &classifier.text_field));
            }

            pipeline::run_pipeline(&config, fetcher, &ids, options).await?;
        }

        Command::Compact { date } => {
            let config = load_config(&cli.config)?;
            let state = StateStore::from_paths(&config.paths);
            let store = SnapshotStore::from_paths(&config.paths)?;

            if !state.has_pending_log() {
                log::info!("Nothing to compact: {} not found", state.log_path().display());
                return Ok(());
            }
            let compaction =
                pipeline::compact_pending(&state, &store, date.unwrap_or_else(today)).await?;
            log::info!(
                "Compacted {} lines into {}",
                compaction.stats.lines,
                compaction.path.display()
            );
        }

        Command::Diff => {
            let config = load_config(&cli.config)?;
            let store = SnapshotStore::from_paths(&config.paths)?;

            let Some((old_date, new_date)) = store.latest_two().await? else {
                log::warn!("Need at least two snapshots in {}", store.data_dir().display());
                return Ok(());
            };
            let new = store.load_snapshot(new_date).await?.ok_or_else(|| {
                AppError::config(format!("Snapshot for {new_date} disappeared"))
            })?;
            let calculator = DiffCalculator::new(config.diff.clone());
            let (report, path) = pipeline::diff_dates(&store, &calculator, old_date, &new).await?;
            match path {
                Some(path) => log::info!(
                    "{} changed records written to {}",
                    report.change_count(),
                    path.display()
                ),
                None => log::info!("No changes between {} and {}", old_date, new_date),
            }
        }

        Command::ResetFailed => {
            let config = load_config(&cli.config)?;
            let state = StateStore::from_paths(&config.paths);
            let store = SnapshotStore::from_paths(&config.paths)?;

            let Some(latest) = store.list_dates().await?.pop() else {
                log::info!("No snapshots yet; nothing to reset");
                return Ok(());
            };
            let failed = store
                .load_snapshot(latest)
                .await?
                .map(|snapshot| snapshot.failed_ids())
                .unwrap_or_default();
            let cleared = state.clear_processed(&failed).await?;
            log::info!(
                "{} failed ids in snapshot {}; {} made eligible for retry",
                failed.len(),
                latest,
                cleared
            );
        }

        Command::Unify { sources, out, date } => {
            let report = build_unified_report(date.unwrap_or_else(today), &sources).await;
            write_unified_report(&out, &report).await?;
        }

        Command::Validate => {
            log::info!("Validating configuration...");
            let config = load_config(&cli.config)?;
            HttpFetcher::new(&config.fetcher, JsonExtractor)?;
            SnapshotStore::from_paths(&config.paths)?;
            log::info!(
                "✓ Config OK ({} tracked fields, {} lists)",
                config.diff.tracked_fields.len(),
                config.diff.lists.len()
            );
        }

        Command::Info => {
            let config = Config::load_or_default(&cli.config);
            let state = StateStore::from_paths(&config.paths);
            let store = SnapshotStore::from_paths(&config.paths)?;

            log::info!("Source: {}", config.source.name);
            log::info!("Data directory: {}", config.paths.data_dir.display());
            log::info!(
                "Pending log: {}",
                if state.has_pending_log() { "present" } else { "none" }
            );
            log::info!("Processed ids: {}", state.load_processed().await?.len());

            let dates = store.list_dates().await?;
            match (dates.first(), dates.last()) {
                (Some(first), Some(last)) => log::info!(
                    "Snapshots: {} ({} .. {})",
                    dates.len(),
                    first,
                    last
                ),
                _ => log::info!("No snapshot found yet."),
            }
        }
    }

    Ok(())
}
