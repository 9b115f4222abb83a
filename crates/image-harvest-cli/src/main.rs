use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use image_harvest_core::config::LogLevel;
use image_harvest_core::deduplication::handle_duplicates_with_progress;
use image_harvest_core::download::parse_url_list;
use image_harvest_core::logging::{init_logger, level_from_env};
use image_harvest_core::{
    Config, DuplicateReport, Orchestrator, ProgressRenderer, RunSummary, SessionControl,
    Uniquifier, UniquifyReport,
};

#[derive(Parser)]
#[command(name = "image-harvest")]
#[command(about = "Download images in bulk and keep them free of near-duplicates")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity level
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Directory for the rolling log file (logs go to stderr otherwise)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct DownloadArgs {
    /// Maximum number of requests in flight
    #[arg(long)]
    concurrency: Option<usize>,

    /// Attempts per URL, including the first
    #[arg(long)]
    retries: Option<u32>,

    /// Index used to name the first file
    #[arg(long)]
    start_index: Option<u64>,

    /// Delay before each request, in milliseconds
    #[arg(long)]
    request_delay_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a list of URLs into a directory
    Download {
        /// Image URLs
        #[arg(required = true)]
        urls: Vec<String>,

        /// Target directory (defaults to the configured images directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        args: DownloadArgs,
    },

    /// Download every folder listed in a URL list file
    DownloadFile {
        /// File of folder names followed by their URLs
        file: PathBuf,

        /// Parent of the per-folder directories
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        args: DownloadArgs,
    },

    /// Continue an interrupted download session
    Resume {
        /// Directory holding the session file
        directory: PathBuf,
    },

    /// Rename near-duplicate images to <name>_duplicate_<n>
    FindDuplicates {
        directory: PathBuf,

        /// Report renames without making changes
        #[arg(long)]
        dry_run: bool,

        /// Equal hash components (1-3) that make two images duplicates
        #[arg(long)]
        threshold: Option<usize>,
    },

    /// Mutate duplicates until they no longer match their originals
    Uniquify {
        directory: PathBuf,

        /// Mutation rounds per duplicate
        #[arg(long)]
        max_attempts: Option<usize>,

        /// Equal hash components (1-3) that make two images duplicates
        #[arg(long)]
        threshold: Option<usize>,
    },

    /// Apply random mutations to every image in a directory
    UniquifyAll { directory: PathBuf },

    /// Generate default configuration file
    GenerateConfig {
        /// Path to save configuration file
        #[arg(default_value = "image-harvest.json")]
        path: PathBuf,
    },
}

fn main() -> Result<(), anyhow::Error> {
    dotenv().ok();

    // Parse command line arguments
    let cli = Cli::parse();

    if let Commands::GenerateConfig { path } = &cli.command {
        let config = Config::default();
        config.save_to_file(path)?;
        println!("Configuration file generated at: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(config_path) = &cli.config {
        Config::from_file(config_path)
            .with_context(|| format!("Failed to load {}", config_path.display()))?
    } else {
        Config::default()
    };

    if cli.verbose > 0 {
        config.logging.level = match cli.verbose {
            1 => LogLevel::Debug,
            _ => LogLevel::Trace,
        };
    }
    if cli.log_dir.is_some() {
        config.logging.log_dir = cli.log_dir.clone();
    }
    init_logging(&config)?;

    // One control for the whole process; Ctrl-C is wired to it once
    let control = SessionControl::new();

    match cli.command {
        Commands::Download { urls, output, args } => {
            apply_download_args(&mut config, &args);
            config.validate()?;
            let target = output.unwrap_or_else(|| config.download.images_dir.clone());
            let start_index = config.download.start_index;

            install_interrupt_handler(control.clone());
            let summary = runtime()?.block_on(async {
                let (orchestrator, renderer) = downloader(&config, &control)?;
                let result = orchestrator.run_session(urls, start_index, &target).await;
                finish_progress(orchestrator, renderer).await;
                anyhow::Ok(result?)
            })?;
            print_run_summary(&target, &summary);
            Ok(())
        }

        Commands::DownloadFile { file, output, args } => {
            apply_download_args(&mut config, &args);
            config.validate()?;
            let parent = output.unwrap_or_else(|| config.download.images_dir.clone());
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;

            let batches = parse_url_list(&text);
            if batches.is_empty() {
                warn!("No folders with URLs found in {}", file.display());
                println!("Nothing to download in {}", file.display());
                return Ok(());
            }

            install_interrupt_handler(control.clone());
            let runtime = runtime()?;
            let start_index = config.download.start_index;
            for batch in batches {
                let target = parent.join(&batch.folder);
                println!("\n{} ({} URLs)", batch.folder, batch.urls.len());
                let summary = runtime.block_on(async {
                    let (orchestrator, renderer) = downloader(&config, &control)?;
                    let result = orchestrator
                        .run_session(batch.urls, start_index, &target)
                        .await;
                    finish_progress(orchestrator, renderer).await;
                    anyhow::Ok(result?)
                })?;
                print_run_summary(&target, &summary);
                if summary.cancelled {
                    break;
                }
            }
            Ok(())
        }

        Commands::Resume { directory } => {
            config.validate()?;
            install_interrupt_handler(control.clone());
            let summary = runtime()?.block_on(async {
                let (orchestrator, renderer) = downloader(&config, &control)?;
                let result = orchestrator.resume_session(&directory).await;
                finish_progress(orchestrator, renderer).await;
                anyhow::Ok(result?)
            })?;
            print_run_summary(&directory, &summary);
            Ok(())
        }

        Commands::FindDuplicates {
            directory,
            dry_run,
            threshold,
        } => {
            config.duplicates.dry_run = dry_run;
            if let Some(threshold) = threshold {
                config.duplicates.similarity_threshold = threshold;
            }
            config.validate()?;

            info!("Looking for duplicates in {}", directory.display());
            let progress = directory_progress("Fingerprinting images...");
            let report =
                handle_duplicates_with_progress(&directory, &config.duplicates, &progress)?;
            progress.finish_and_clear();
            print_duplicate_report(&report);
            Ok(())
        }

        Commands::Uniquify {
            directory,
            max_attempts,
            threshold,
        } => {
            if let Some(max_attempts) = max_attempts {
                config.duplicates.max_uniquify_attempts = max_attempts;
            }
            if let Some(threshold) = threshold {
                config.duplicates.similarity_threshold = threshold;
            }
            config.validate()?;

            let progress = directory_progress("Fingerprinting images...");
            let report = Uniquifier::new(config.duplicates.clone())
                .uniquify_duplicates_with_progress(&directory, &progress)?;
            progress.finish_and_clear();
            print_uniquify_report(&report);
            Ok(())
        }

        Commands::UniquifyAll { directory } => {
            config.validate()?;
            let progress = directory_progress("Mutating images...");
            let report = Uniquifier::new(config.duplicates.clone())
                .uniquify_all_with_progress(&directory, &progress)?;
            progress.finish_and_clear();
            print_uniquify_report(&report);
            Ok(())
        }

        Commands::GenerateConfig { .. } => Ok(()),
    }
}

/// File logging when a log directory is configured, stderr otherwise
fn init_logging(config: &Config) -> anyhow::Result<()> {
    let level: log::LevelFilter = config.logging.level.into();
    match &config.logging.log_dir {
        Some(dir) => init_logger(dir, level)
            .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e)),
        None => {
            env_logger::Builder::new()
                .filter_level(level_from_env().unwrap_or(level))
                .parse_default_env()
                .init();
            Ok(())
        }
    }
}

fn apply_download_args(config: &mut Config, args: &DownloadArgs) {
    if let Some(concurrency) = args.concurrency {
        config.download.concurrency = concurrency;
    }
    if let Some(retries) = args.retries {
        config.download.retries = retries;
    }
    if let Some(start_index) = args.start_index {
        config.download.start_index = start_index;
    }
    if let Some(delay) = args.request_delay_ms {
        config.download.request_delay_ms = delay;
    }
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}

/// An orchestrator whose progress events feed a terminal bar.
/// Must be called from inside the runtime.
fn downloader(
    config: &Config,
    control: &SessionControl,
) -> anyhow::Result<(Orchestrator, JoinHandle<ProgressRenderer>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let orchestrator = Orchestrator::new(config, control.clone())?.with_progress(tx);
    let renderer = ProgressRenderer::new(0).spawn(rx);
    Ok((orchestrator, renderer))
}

async fn finish_progress(orchestrator: Orchestrator, renderer: JoinHandle<ProgressRenderer>) {
    // Closing the channel lets the renderer draw its final line
    drop(orchestrator);
    if let Err(e) = renderer.await {
        warn!("Progress display stopped early: {}", e);
    }
}

/// First Ctrl-C pauses in-flight work; a second one cancels, leaving the
/// session file behind for `resume`.
fn install_interrupt_handler(control: SessionControl) {
    let presses = AtomicUsize::new(0);
    let result = ctrlc::set_handler(move || {
        if presses.fetch_add(1, Ordering::SeqCst) == 0 {
            eprintln!("\nPausing downloads. Press Ctrl-C again to stop and save the session.");
            control.pause();
        } else {
            eprintln!("\nStopping. Run `image-harvest resume` to continue later.");
            control.cancel();
        }
    });
    if let Err(e) = result {
        warn!("Ctrl-C handler not installed: {}", e);
    }
}

fn directory_progress(message: &str) -> ProgressBar {
    let progress = ProgressBar::new(0);
    progress.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) - {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    progress.set_message(message.to_string());
    progress
}

fn print_run_summary(target: &Path, summary: &RunSummary) {
    println!("\nSession {} ({})", summary.session_id, target.display());
    if let Some(previous) = &summary.replaced_session {
        println!("  Replaced unfinished session {}", previous);
    }
    println!("  Succeeded: {}", summary.succeeded);
    println!("  Failed:    {}", summary.failed);
    for (kind, count) in &summary.failures_by_kind {
        println!("    {:?}: {}", kind, count);
    }
    if summary.skipped > 0 {
        println!("  Not attempted: {}", summary.skipped);
    }
    println!(
        "  {} written in {:.1}s",
        indicatif::HumanBytes(summary.bytes_written),
        summary.elapsed.as_secs_f64()
    );
    if summary.cancelled {
        println!(
            "Cancelled. Resume with: image-harvest resume {}",
            target.display()
        );
    }
}

fn print_duplicate_report(report: &DuplicateReport) {
    let verb = if report.dry_run { "Would rename" } else { "Renamed" };
    for (from, to) in &report.renamed {
        println!("{} {} -> {}", verb, from.display(), to.display());
    }
    println!(
        "\nScanned {} images: {} unique, {} duplicates, {} unreadable",
        report.scanned,
        report.unique,
        report.renamed.len() + report.failed,
        report.skipped
    );
    if report.failed > 0 {
        error!("{} renames failed", report.failed);
        println!("{} renames failed, see the log for details", report.failed);
    }
}

fn print_uniquify_report(report: &UniquifyReport) {
    println!("\nScanned {} images", report.scanned);
    println!("  Targeted:   {}", report.targeted);
    println!("  Uniquified: {}", report.uniquified);
    if report.exhausted > 0 {
        println!("  Still duplicate after every attempt: {}", report.exhausted);
    }
    if report.failed > 0 {
        println!("  Failed: {}", report.failed);
    }
    if report.skipped > 0 {
        println!("  Unreadable: {}", report.skipped);
    }
}
