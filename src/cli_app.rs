//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{ColoredString, Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use video_integrity_checker::core::config::Config;
use video_integrity_checker::core::errors::{ErrorCategory, VicError};
use video_integrity_checker::core::paths::resolve_absolute_path;
use video_integrity_checker::history::sqlite::SqliteHistoryStore;
use video_integrity_checker::history::{self, HistoryStats, HistoryStore, ScanHistoryRecord};
use video_integrity_checker::logger::jsonl::{JsonlConfig, JsonlWriter, LogEntry};
use video_integrity_checker::platform::signals::InterruptHandler;
use video_integrity_checker::scanner::aggregate::ScanReport;
use video_integrity_checker::scanner::cancel::CancelToken;
use video_integrity_checker::scanner::engine::ScanEngine;
use video_integrity_checker::scanner::mode::ScanMode;
use video_integrity_checker::scanner::model::{OutcomeKind, ScanResult};
use video_integrity_checker::scanner::pool::PoolEvent;

/// Video Integrity Checker — finds corrupted video files with ffprobe/ffmpeg.
#[derive(Debug, Parser)]
#[command(
    name = "vic",
    author,
    version,
    about = "Video Integrity Checker - parallel corruption scanner for video libraries",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, global = true, action = ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

impl Cli {
    pub const fn no_color(&self) -> bool {
        self.no_color
    }

    /// Default `tracing` filter directive when `VIC_LOG` is unset.
    pub fn log_directive(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Scan a directory tree (or a single file) for corrupted videos.
    Scan(ScanArgs),
    /// Inspect the scan history database.
    History(HistoryArgs),
    /// View and validate configuration.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct ScanArgs {
    /// Directory (or single file) to scan.
    #[arg(value_name = "ROOT")]
    root: PathBuf,
    /// Scan mode for every file: quick, deep or hybrid.
    #[arg(long, value_name = "MODE")]
    mode: Option<ScanMode>,
    /// Maximum concurrent analyses.
    #[arg(long, value_name = "N")]
    workers: Option<usize>,
    /// Only scan the top level of ROOT.
    #[arg(long)]
    no_recursive: bool,
    /// Replace the configured extension list (repeatable).
    #[arg(long = "ext", value_name = "EXT")]
    extensions: Vec<String>,
    /// Quick pass timeout in seconds.
    #[arg(long, value_name = "SECONDS")]
    quick_timeout: Option<u64>,
    /// Deep pass timeout in seconds.
    #[arg(long, value_name = "SECONDS")]
    deep_timeout: Option<u64>,
    /// Rescan every file regardless of history.
    #[arg(long)]
    no_incremental: bool,
    /// Rescan healthy files older than this many hours.
    #[arg(long, value_name = "HOURS")]
    max_age_hours: Option<u64>,
    /// Scan history database to use.
    #[arg(long, value_name = "PATH")]
    history: Option<PathBuf>,
    /// List every scanned file, not just the unhealthy ones.
    #[arg(long)]
    show_all: bool,
    /// Exit with status 5 when any file is corrupt.
    #[arg(long)]
    fail_on_corrupt: bool,
}

#[derive(Debug, Clone, Args)]
struct HistoryArgs {
    /// Scan history database to read.
    #[arg(long, global = true, value_name = "PATH")]
    history: Option<PathBuf>,
    #[command(subcommand)]
    command: HistoryCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum HistoryCommand {
    /// Record counts by last outcome.
    Stats,
    /// Last recorded scan of one file.
    Show {
        /// File to look up.
        path: PathBuf,
    },
    /// Most recently scanned files.
    Recent {
        /// Number of records to list.
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print the config file path.
    Path,
    /// Print the effective configuration.
    Show,
    /// Load and validate the configuration.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// Scan was interrupted before every file was analysed.
    #[error("{0}")]
    Partial(String),
    /// Corrupt files found and `--fail-on-corrupt` was given.
    #[error("{0}")]
    CorruptFound(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
            Self::Partial(_) => 4,
            Self::CorruptFound(_) => 5,
        }
    }
}

impl From<VicError> for CliError {
    fn from(error: VicError) -> Self {
        match error.category() {
            ErrorCategory::Configuration | ErrorCategory::Discovery => Self::User(error.to_string()),
            ErrorCategory::Invocation | ErrorCategory::HistoryStore | ErrorCategory::Runtime => {
                Self::Runtime(error.to_string())
            }
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Scan(args) => run_scan(cli, args),
        Command::History(args) => run_history(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// scan
// ---------------------------------------------------------------------------

fn run_scan(cli: &Cli, args: &ScanArgs) -> Result<(), CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    apply_scan_overrides(&mut config, args)?;
    let settings = config.scan_settings()?;
    let analyzer = config.analyzer()?;
    let root = resolve_absolute_path(&args.root);
    let history_path = args
        .history
        .as_deref()
        .map_or_else(|| config.paths.history_db.clone(), resolve_absolute_path);
    let mode = output_mode(cli);

    let (mut store, history_degraded) = history::open_or_degrade(&history_path);
    if let Some(error) = &history_degraded {
        if !cli.quiet {
            eprintln!(
                "{} scan history unavailable, every file will be scanned: {error}",
                "warning:".yellow().bold()
            );
        }
    }

    let mut activity = JsonlWriter::open(JsonlConfig::new(&config.paths.activity_log));
    let config_hash = config.stable_hash()?;
    activity.write_entry(&LogEntry::scan_start(&root, &config_hash));

    let cancel = CancelToken::new();
    let _interrupts = match InterruptHandler::install(cancel.clone(), config.shutdown_grace()) {
        Ok(handler) => Some(handler),
        Err(error) => {
            tracing::warn!(%error, "interrupts will terminate the scan abruptly");
            None
        }
    };

    let engine = ScanEngine::new(settings, Arc::new(analyzer))?.with_progress(log_progress);
    let report = engine.run(&root, store.as_mut(), &cancel)?;
    activity.write_report(&root, &report);

    match mode {
        OutputMode::Human => print_scan_report(&root, &report, args.show_all),
        OutputMode::Json => {
            write_json_line(&scan_report_json(&root, &report, history_degraded.as_ref()))?;
        }
    }

    if let Some(error) = &report.history_error {
        if !cli.quiet {
            eprintln!(
                "{} results were not saved to scan history: {error}",
                "warning:".yellow().bold()
            );
        }
    }

    scan_exit_status(&report, args.fail_on_corrupt)
}

/// Fold command-line flags into the loaded configuration and revalidate.
fn apply_scan_overrides(config: &mut Config, args: &ScanArgs) -> Result<(), CliError> {
    if let Some(mode) = args.mode {
        config.scan.default_mode = mode;
        config.scan.mode_overrides.clear();
    }
    if let Some(workers) = args.workers {
        config.scan.max_workers = workers;
    }
    if args.no_recursive {
        config.scan.recursive = false;
    }
    if !args.extensions.is_empty() {
        config.scan.extensions.clone_from(&args.extensions);
    }
    if let Some(seconds) = args.quick_timeout {
        config.scan.quick_timeout_seconds = seconds;
    }
    if let Some(seconds) = args.deep_timeout {
        config.scan.deep_timeout_seconds = seconds;
    }
    if args.no_incremental {
        config.incremental.enabled = false;
    }
    if let Some(hours) = args.max_age_hours {
        config.incremental.max_age_hours = hours;
    }
    config.normalize();
    config.validate()?;
    Ok(())
}

fn scan_exit_status(report: &ScanReport, fail_on_corrupt: bool) -> Result<(), CliError> {
    if report.interrupted() {
        return Err(CliError::Partial(format!(
            "scan interrupted: {} of {} selected files were not analysed",
            report.summary.cancelled,
            report.summary.cancelled + report.summary.total_scanned,
        )));
    }
    if fail_on_corrupt && report.summary.counts.corrupt > 0 {
        return Err(CliError::CorruptFound(format!(
            "{} corrupt file(s) found",
            report.summary.counts.corrupt
        )));
    }
    Ok(())
}

fn log_progress(event: &PoolEvent) {
    match event {
        PoolEvent::Finished(result) => tracing::info!(
            path = %result.path().display(),
            outcome = %result.outcome.kind(),
            elapsed_ms = result.elapsed.as_millis(),
            "file scanned"
        ),
        PoolEvent::Cancelled(task) => {
            tracing::debug!(path = %task.file.path.display(), "file not scanned");
        }
    }
}

fn print_scan_report(root: &Path, report: &ScanReport, show_all: bool) {
    let summary = &report.summary;
    println!("Video Integrity Scan\n  Root: {}", root.display());
    println!(
        "  Discovered: {}  Skipped (recently healthy): {}  Scanned: {}  Not scanned: {}",
        summary.total_discovered, summary.total_skipped, summary.total_scanned, summary.cancelled,
    );
    println!(
        "  Healthy: {}  Corrupt: {}  Timed out: {}  Errors: {}",
        summary.counts.healthy,
        summary.counts.corrupt,
        summary.counts.timed_out,
        summary.counts.execution_error,
    );
    println!("  Elapsed: {:.1}s", summary.wall_clock.as_secs_f64());

    let listed: Vec<&ScanResult> = if show_all {
        report.results.iter().collect()
    } else {
        report.unhealthy().collect()
    };
    if listed.is_empty() {
        if summary.total_scanned > 0 {
            println!("\n  All scanned files are healthy.");
        }
    } else {
        println!("\n  {:<16}  {:<6}  {:>8}  {}", "Outcome", "Mode", "Time", "Path");
        println!("  {}", "-".repeat(72));
        for result in listed {
            println!(
                "  {:<16}  {:<6}  {:>8}  {}",
                paint_outcome(result.outcome.kind()),
                result.mode.as_str(),
                format_duration(result.elapsed),
                result.path().display(),
            );
            if let Some(detail) = result.outcome.detail() {
                println!("  {:<16}  {}", "", detail.dimmed());
            }
        }
    }

    if report.interrupted() {
        println!(
            "\n  {} {} file(s) were not analysed; rerun to finish.",
            "Interrupted:".yellow().bold(),
            report.cancelled.len()
        );
    }
}

fn paint_outcome(kind: OutcomeKind) -> ColoredString {
    // Pad before colouring so escape codes do not break the column width.
    let label = format!("{:<16}", kind.as_str());
    match kind {
        OutcomeKind::Healthy => label.green(),
        OutcomeKind::Corrupt => label.red().bold(),
        OutcomeKind::TimedOut => label.yellow(),
        OutcomeKind::ExecutionError => label.magenta(),
    }
}

fn scan_report_json(root: &Path, report: &ScanReport, degraded: Option<&VicError>) -> Value {
    let results: Vec<Value> = report
        .results
        .iter()
        .map(|r| {
            json!({
                "path": r.path().to_string_lossy(),
                "outcome": r.outcome.kind().as_str(),
                "preliminary": r.preliminary.as_ref().map(|p| p.kind().as_str()),
                "mode": r.mode.as_str(),
                "elapsed_ms": u64::try_from(r.elapsed.as_millis()).unwrap_or(u64::MAX),
                "worker": r.worker.to_string(),
                "timestamp": r.timestamp.to_rfc3339(),
                "diagnostics": r.outcome.diagnostics(),
                "detail": r.outcome.detail(),
            })
        })
        .collect();
    let cancelled: Vec<Value> = report
        .cancelled
        .iter()
        .map(|t| Value::from(t.file.path.to_string_lossy().into_owned()))
        .collect();
    let summary = &report.summary;

    json!({
        "command": "scan",
        "root": root.to_string_lossy(),
        "summary": {
            "total_discovered": summary.total_discovered,
            "total_skipped": summary.total_skipped,
            "total_scanned": summary.total_scanned,
            "cancelled": summary.cancelled,
            "healthy": summary.counts.healthy,
            "corrupt": summary.counts.corrupt,
            "timed_out": summary.counts.timed_out,
            "execution_error": summary.counts.execution_error,
            "wall_clock_seconds": summary.wall_clock.as_secs_f64(),
        },
        "interrupted": report.interrupted(),
        "history_persisted": report.history_persisted && degraded.is_none(),
        "history_error": report
            .history_error
            .clone()
            .or_else(|| degraded.map(ToString::to_string)),
        "results": results,
        "cancelled": cancelled,
    })
}

// ---------------------------------------------------------------------------
// history
// ---------------------------------------------------------------------------

fn run_history(cli: &Cli, args: &HistoryArgs) -> Result<(), CliError> {
    let path = match &args.history {
        Some(path) => resolve_absolute_path(path),
        None => Config::load(cli.config.as_deref())?.paths.history_db,
    };
    if !path.exists() {
        return Err(CliError::User(format!(
            "no scan history at {} (run `vic scan` first)",
            path.display()
        )));
    }
    let store = SqliteHistoryStore::open(&path)?;
    let mode = output_mode(cli);

    match &args.command {
        HistoryCommand::Stats => {
            let stats = store.stats()?;
            match mode {
                OutputMode::Human => print_history_stats(&path, &stats),
                OutputMode::Json => write_json_line(&json!({
                    "command": "history stats",
                    "path": path.to_string_lossy(),
                    "total_records": stats.total_records,
                    "by_outcome": serde_json::to_value(stats.by_outcome)?,
                    "oldest_scan": stats.oldest_scan.map(|t| t.to_rfc3339()),
                    "newest_scan": stats.newest_scan.map(|t| t.to_rfc3339()),
                }))?,
            }
            Ok(())
        }
        HistoryCommand::Show { path: file } => {
            let file = resolve_absolute_path(file);
            let Some(record) = store.get(&file)? else {
                return Err(CliError::User(format!(
                    "{} has never been scanned",
                    file.display()
                )));
            };
            match mode {
                OutputMode::Human => print_history_record(&record),
                OutputMode::Json => write_json_line(&json!({
                    "command": "history show",
                    "record": history_record_json(&record),
                }))?,
            }
            Ok(())
        }
        HistoryCommand::Recent { limit } => {
            let records = store.recent(*limit)?;
            match mode {
                OutputMode::Human => {
                    if records.is_empty() {
                        println!("No scans recorded.");
                    }
                    for record in &records {
                        println!(
                            "  {}  {}  {}",
                            record.last_scan_time.format("%Y-%m-%d %H:%M:%S"),
                            paint_outcome(record.last_outcome),
                            record.path.display()
                        );
                    }
                }
                OutputMode::Json => {
                    let items: Vec<Value> = records.iter().map(history_record_json).collect();
                    write_json_line(&json!({
                        "command": "history recent",
                        "records": items,
                    }))?;
                }
            }
            Ok(())
        }
    }
}

fn print_history_stats(path: &Path, stats: &HistoryStats) {
    println!("Scan History\n  Database: {}", path.display());
    println!("  Files tracked: {}", stats.total_records);
    for kind in OutcomeKind::ALL {
        println!("    {:<16} {}", kind.as_str(), stats.by_outcome.get(kind));
    }
    if let (Some(oldest), Some(newest)) = (stats.oldest_scan, stats.newest_scan) {
        println!("  Oldest scan: {}", oldest.to_rfc3339());
        println!("  Newest scan: {}", newest.to_rfc3339());
    }
}

fn print_history_record(record: &ScanHistoryRecord) {
    println!("{}", record.path.display());
    println!("  Last outcome: {}", paint_outcome(record.last_outcome));
    println!("  Last scanned: {}", record.last_scan_time.to_rfc3339());
    let modified: chrono::DateTime<chrono::Utc> = record.file_modified_at_scan.into();
    println!("  File modified at scan: {}", modified.to_rfc3339());
}

fn history_record_json(record: &ScanHistoryRecord) -> Value {
    let modified: chrono::DateTime<chrono::Utc> = record.file_modified_at_scan.into();
    json!({
        "path": record.path.to_string_lossy(),
        "last_scan_time": record.last_scan_time.to_rfc3339(),
        "last_outcome": record.last_outcome.as_str(),
        "file_modified_at_scan": modified.to_rfc3339(),
    })
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => println!("{}", config.to_toml()?),
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("Configuration is INVALID: {e}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ---------------------------------------------------------------------------
// output helpers
// ---------------------------------------------------------------------------

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{:.1}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("VIC_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
