mod config;
mod erddap;
mod logging;

use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use bagsync_core::metadata::{collect, split_env_vars};
use bagsync_core::request::default_bag_name;
use bagsync_core::{
    assemble, parse_boundary, plan, verify, ArchiveRequest, MetadataField, RawFieldValues,
    RetryingFetcher, SourceId, SyncReport, SyncRunner, VerifyReport, WindowResult,
};
use clap::{Parser, Subcommand, ValueEnum};
use time::OffsetDateTime;

use crate::config::FileConfig;
use crate::erddap::ErddapClient;

const DEFAULT_BAG_ROOT: &str = "bagit_archives";
const DEFAULT_RETRIES: u32 = 2;
const DEFAULT_TIMEOUT_SECS: u64 = 300;
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Exit status when the bag was sealed but some windows failed.
const EXIT_PARTIAL: i32 = 2;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Archive ERDDAP tabledap datasets as monthly BagIt bags.
#[derive(Parser)]
#[command(
    name = "bagsync",
    version,
    about = "Archive ERDDAP tabledap datasets as monthly BagIt bags"
)]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Report every window and enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download missing or stale months and seal the bag
    Sync {
        /// Tabledap dataset URL
        #[arg(value_name = "TABLEDAP_URL")]
        url: String,
        /// First date to archive (YYYY-MM-DD or YYYY-MM-DDTHH:MM:SSZ)
        #[arg(short = 's', long)]
        start_date: Option<String>,
        /// Last date to archive (YYYY-MM-DD or YYYY-MM-DDTHH:MM:SSZ)
        #[arg(short = 'e', long)]
        end_date: Option<String>,
        /// Re-download every month in range
        #[arg(short, long)]
        force: bool,
        /// Bag directory (default: bagit_archives/<dataset>_<start>_<end>)
        #[arg(short = 'd', long)]
        bag_directory: Option<PathBuf>,
        /// Concurrent downloads (1-4)
        #[arg(long)]
        jobs: Option<usize>,
        /// Retries per month for transient failures
        #[arg(long)]
        retries: Option<u32>,
        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Recompute every checksum in an existing bag
    Verify {
        /// Bag directory
        bag_dir: PathBuf,
    },
}

struct SyncArgs {
    url: String,
    start_date: Option<String>,
    end_date: Option<String>,
    force: bool,
    bag_directory: Option<PathBuf>,
    jobs: Option<usize>,
    retries: Option<u32>,
    config: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Commands::Sync {
            url,
            start_date,
            end_date,
            force,
            bag_directory,
            jobs,
            retries,
            config,
        } => {
            let args = SyncArgs {
                url,
                start_date,
                end_date,
                force,
                bag_directory,
                jobs,
                retries,
                config,
            };
            cmd_sync(args, cli.output, cli.quiet, cli.verbose);
        }
        Commands::Verify { bag_dir } => {
            cmd_verify(&bag_dir, cli.output, cli.quiet);
        }
    }
}

// ── sync ─────────────────────────────────────────────────────────────────────

fn cmd_sync(args: SyncArgs, output: OutputFormat, quiet: bool, verbose: bool) {
    let file_config = match &args.config {
        Some(path) => or_exit(config::read_config(path), output, quiet),
        None => FileConfig::default(),
    };

    let source = or_exit(SourceId::parse(&args.url), output, quiet);
    let start = args
        .start_date
        .as_deref()
        .map(|s| or_exit(parse_boundary(s), output, quiet));
    let end = args
        .end_date
        .as_deref()
        .map(|s| or_exit(parse_boundary(s), output, quiet));
    let request = or_exit(
        ArchiveRequest::new(source, start, end, args.force),
        output,
        quiet,
    );

    let timeout = file_config
        .sync
        .timeout_secs
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    let client = ErddapClient::new(Duration::from_secs(timeout));

    let (available_start, available_end) =
        or_exit(client.available_range(&request.source), output, quiet);
    tracing::info!(
        dataset = request.source.dataset(),
        start = %bagsync_core::window::format_timestamp(available_start),
        end = %bagsync_core::window::format_timestamp(available_end),
        "dataset availability"
    );

    let windows = or_exit(
        plan(
            request.requested_start,
            request.requested_end,
            available_start,
            available_end,
        ),
        output,
        quiet,
    );

    let bag_dir = match args
        .bag_directory
        .or_else(|| default_bag_dir(&file_config, &request.source, &windows))
    {
        Some(dir) => dir,
        None => {
            report_error("error: no months to archive", output, quiet);
            process::exit(1);
        }
    };

    let metadata = build_metadata(&file_config, &client, &request.source, output, quiet);

    let jobs = args.jobs.or(file_config.sync.jobs).unwrap_or(1);
    let retries = args
        .retries
        .or(file_config.sync.retries)
        .unwrap_or(DEFAULT_RETRIES);
    let fetcher = RetryingFetcher::new(&client, retries, INITIAL_BACKOFF);
    let runner = SyncRunner::new(fetcher).with_jobs(jobs);

    let report = or_exit(
        runner.run(&request, &bag_dir, &windows, OffsetDateTime::now_utc()),
        output,
        quiet,
    );
    let bag = or_exit(assemble(&bag_dir, &[], &metadata), output, quiet);

    if !quiet {
        print_sync_summary(&bag_dir, &report, &bag.payload_oxum(), output, verbose);
    }
    for (window, err) in report.failures() {
        tracing::error!(%window, "{}", err);
    }
    if report.has_failures() {
        process::exit(EXIT_PARTIAL);
    }
}

fn default_bag_dir(
    file_config: &FileConfig,
    source: &SourceId,
    windows: &[bagsync_core::DateWindow],
) -> Option<PathBuf> {
    let name = default_bag_name(source, windows)?;
    let root = file_config
        .sync
        .bag_root
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BAG_ROOT));
    Some(root.join(name))
}

/// Prefixed environment variables as UTF-8 pairs.
///
/// Variables that are not valid UTF-8 are skipped, with a warning when they
/// carry the prefix.
fn metadata_env_vars(prefix: &str) -> Vec<(String, String)> {
    std::env::vars_os()
        .filter_map(|(key, value)| {
            if !key.to_string_lossy().starts_with(prefix) {
                return None;
            }
            match (key.into_string(), value.into_string()) {
                (Ok(key), Ok(value)) => Some((key, value)),
                (Ok(key), Err(_)) => {
                    tracing::warn!(variable = %key, "ignoring metadata variable with a non-UTF-8 value");
                    None
                }
                (Err(key), _) => {
                    tracing::warn!(
                        variable = %key.to_string_lossy(),
                        "ignoring metadata variable with a non-UTF-8 name"
                    );
                    None
                }
            }
        })
        .collect()
}

/// File values, then environment values, then the derived fields.
fn build_metadata(
    file_config: &FileConfig,
    client: &ErddapClient,
    source: &SourceId,
    output: OutputFormat,
    quiet: bool,
) -> bagsync_core::MetadataRecord {
    let metadata_config = file_config.metadata.metadata_config();
    let mut raw = RawFieldValues::new();
    or_exit(file_config.metadata.seed(&mut raw), output, quiet);
    raw.merge(split_env_vars(
        &metadata_config,
        metadata_env_vars(&metadata_config.env_prefix),
    ));

    let mut record = collect(&metadata_config, &raw);
    for field in record.unset_fields() {
        tracing::debug!(
            field = field.canonical_name(),
            "metadata field not set; set {}{}",
            metadata_config.env_prefix,
            field.base_name()
        );
    }

    record.set(
        MetadataField::ExternalDescription,
        vec![format!("Sensor data from station {}", source.station())],
    );
    let title = match client.dataset_title(source) {
        Ok(title) => title,
        Err(e) => {
            tracing::warn!("{}; using the dataset name as External-Identifier", e);
            source.dataset().to_string()
        }
    };
    record.set(MetadataField::ExternalIdentifier, vec![title]);
    record
}

fn print_sync_summary(
    bag_dir: &Path,
    report: &SyncReport,
    payload_oxum: &str,
    output: OutputFormat,
    verbose: bool,
) {
    match output {
        OutputFormat::Text => {
            if verbose {
                for outcome in &report.outcomes {
                    println!(
                        "{}  {:<7}  {}",
                        outcome.decision.window,
                        outcome.decision.action.as_str(),
                        describe(&outcome.result)
                    );
                }
            }
            println!("bag: {}", bag_dir.display());
            println!(
                "windows: {} (fetched {}, skipped {}, no data {}, failed {})",
                report.outcomes.len(),
                report.fetched(),
                report.skipped(),
                report.no_data(),
                report.failed()
            );
            println!("payload-oxum: {}", payload_oxum);
        }
        OutputFormat::Json => {
            let windows: Vec<serde_json::Value> = report
                .outcomes
                .iter()
                .map(|o| {
                    let mut entry = serde_json::json!({
                        "window": o.decision.window.label(),
                        "action": o.decision.action.as_str(),
                        "result": result_kind(&o.result),
                    });
                    match &o.result {
                        WindowResult::Fetched { bytes } => entry["bytes"] = (*bytes).into(),
                        WindowResult::Failed(err) => entry["error"] = err.to_string().into(),
                        _ => {}
                    }
                    entry
                })
                .collect();
            let summary = serde_json::json!({
                "bag": bag_dir.display().to_string(),
                "payload_oxum": payload_oxum,
                "fetched": report.fetched(),
                "skipped": report.skipped(),
                "no_data": report.no_data(),
                "failed": report.failed(),
                "windows": windows,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&summary)
                    .unwrap_or_else(|e| format!("serialization error: {}", e))
            );
        }
    }
}

fn result_kind(result: &WindowResult) -> &'static str {
    match result {
        WindowResult::Skipped => "skipped",
        WindowResult::Fetched { .. } => "fetched",
        WindowResult::NoData => "no_data",
        WindowResult::Failed(_) => "failed",
    }
}

fn describe(result: &WindowResult) -> String {
    match result {
        WindowResult::Skipped => "up to date".to_string(),
        WindowResult::Fetched { bytes } => format!("fetched {} bytes", bytes),
        WindowResult::NoData => "no data".to_string(),
        WindowResult::Failed(err) => format!("failed: {}", err),
    }
}

// ── verify ───────────────────────────────────────────────────────────────────

fn cmd_verify(bag_dir: &Path, output: OutputFormat, quiet: bool) {
    let report = or_exit(verify(bag_dir), output, quiet);

    if !quiet {
        print_verify_report(&report, output);
    }
    if !report.is_valid() {
        process::exit(1);
    }
}

fn print_verify_report(report: &VerifyReport, output: OutputFormat) {
    match output {
        OutputFormat::Text => {
            if report.is_valid() {
                println!("valid ({} entries checked)", report.checked);
                return;
            }
            for path in &report.missing {
                println!("missing: {}", path);
            }
            for path in &report.mismatched {
                println!("checksum mismatch: {}", path);
            }
            for path in &report.unlisted {
                println!("not in manifest: {}", path);
            }
            println!("invalid ({} entries checked)", report.checked);
        }
        OutputFormat::Json => {
            let value = serde_json::json!({
                "valid": report.is_valid(),
                "checked": report.checked,
                "missing": report.missing,
                "mismatched": report.mismatched,
                "unlisted": report.unlisted,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&value)
                    .unwrap_or_else(|e| format!("serialization error: {}", e))
            );
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Unwrap a result or report the error and exit with status 1.
fn or_exit<T, E: std::fmt::Display>(result: Result<T, E>, output: OutputFormat, quiet: bool) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            report_error(&format!("error: {}", e), output, quiet);
            process::exit(1);
        }
    }
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}
