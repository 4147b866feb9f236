use std::fs;
use std::path::{Path, PathBuf};

use bugreport_battery_core::{
    ARCHIVE_EXTENSION, BatteryRecord, ConflictPolicy, IngestMode, PerformanceMode, RecordMap,
    parse_capture_time,
};
use bugreport_battery_pipeline::{BatchReport, Pipeline, PipelineConfig};
use chrono::NaiveDateTime;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "battery-ingest")]
#[command(about = "Ingest battery statistics from vendor bug-report archives")]
#[command(version)]
struct Cli {
    /// YAML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Root directory for the database and extracted reports.
    #[arg(long, global = true)]
    instance_dir: Option<PathBuf>,
    /// SQLite database path (overrides the instance default).
    #[arg(long, global = true)]
    database: Option<PathBuf>,
    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Extract, parse, validate, and store bug-report archives.
    Ingest(IngestArgs),
    /// Validate and store records from a JSON array of record objects.
    Import(ImportArgs),
    /// Print stored records as JSON, newest first.
    List(ListArgs),
    /// Print records captured within a time range as JSON.
    Range(RangeArgs),
    /// Print a battery-health summary for one device as JSON.
    Health(HealthArgs),
    /// Show the state of the results table.
    Status,
}

#[derive(Debug, Args)]
struct StoreArgs {
    /// init rebuilds the table; append adds to it.
    #[arg(long, default_value_t = IngestMode::Append)]
    mode: IngestMode,
    /// What to do with rows that repeat a stored (capture time, nickname) pair.
    #[arg(long)]
    conflict: Option<ConflictPolicy>,
    /// Print the full batch report as JSON on stdout.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct IngestArgs {
    /// Archive files and/or directories containing bugreport*.zip files.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Worker pool tier: low, balanced, or high.
    #[arg(long)]
    performance: Option<PerformanceMode>,
    #[command(flatten)]
    store: StoreArgs,
}

#[derive(Debug, Args)]
struct ImportArgs {
    /// JSON file holding an array of record objects.
    input: PathBuf,
    #[command(flatten)]
    store: StoreArgs,
}

#[derive(Debug, Args)]
struct ListArgs {
    /// Only this device's records.
    #[arg(long)]
    nickname: Option<String>,
}

#[derive(Debug, Args)]
struct RangeArgs {
    /// Inclusive lower bound, `YYYY-MM-DD HH:MM:SS`.
    #[arg(long, value_parser = parse_time_arg)]
    start: Option<NaiveDateTime>,
    /// Inclusive upper bound, `YYYY-MM-DD HH:MM:SS`.
    #[arg(long, value_parser = parse_time_arg)]
    end: Option<NaiveDateTime>,
}

#[derive(Debug, Args)]
struct HealthArgs {
    /// Device nickname from the build fingerprint.
    #[arg(long)]
    nickname: String,
    /// Hardware variant to look up in the reference table.
    #[arg(long)]
    variant: Option<String>,
    /// JSON table of rated capacities (overrides the configuration).
    #[arg(long)]
    reference: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = load_config(&cli).and_then(|config| match cli.command {
        Command::Ingest(args) => run_ingest(config, args),
        Command::Import(args) => run_import(config, args),
        Command::List(args) => run_list(config, args),
        Command::Range(args) => run_range(config, args),
        Command::Health(args) => run_health(config, args),
        Command::Status => run_status(config),
    });

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "bugreport_battery=debug,battery_ingest=debug"
    } else {
        "bugreport_battery=info,battery_ingest=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Reads `--config` when given, then applies the global path overrides.
fn load_config(cli: &Cli) -> Result<PipelineConfig, String> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .map_err(|e| format!("Failed to load config '{}': {e}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(dir) = &cli.instance_dir {
        config.instance_dir = dir.clone();
    }
    if let Some(db) = &cli.database {
        config.database = Some(db.clone());
    }
    Ok(config)
}

fn run_ingest(mut config: PipelineConfig, args: IngestArgs) -> Result<(), String> {
    if let Some(mode) = args.performance {
        config.performance_mode = mode;
    }
    if let Some(policy) = args.store.conflict {
        config.conflict_policy = policy;
    }

    let archives = collect_archives(&args.inputs)?;
    if archives.is_empty() {
        return Err("No bugreport archives found in the given inputs".to_string());
    }

    let report = Pipeline::new(config)
        .run(&archives, args.store.mode)
        .map_err(|e| format!("Ingestion failed: {e}"))?;
    print_report(&report, args.store.json)
}

fn run_import(mut config: PipelineConfig, args: ImportArgs) -> Result<(), String> {
    if let Some(policy) = args.store.conflict {
        config.conflict_policy = policy;
    }

    let text = fs::read_to_string(&args.input)
        .map_err(|e| format!("Failed to read '{}': {e}", args.input.display()))?;
    let records: Vec<RecordMap> = serde_json::from_str(&text).map_err(|e| {
        format!(
            "'{}' is not a JSON array of record objects: {e}",
            args.input.display()
        )
    })?;

    let report = Pipeline::new(config)
        .import_records(records, args.store.mode)
        .map_err(|e| format!("Import failed: {e}"))?;
    print_report(&report, args.store.json)
}

fn run_list(config: PipelineConfig, args: ListArgs) -> Result<(), String> {
    let pipeline = Pipeline::new(config);
    let records = match &args.nickname {
        Some(nickname) => pipeline.device_records(nickname),
        None => pipeline.query_records(None, None),
    }
    .map_err(|e| format!("Failed to read records: {e}"))?;
    print_records(&records)
}

fn run_range(config: PipelineConfig, args: RangeArgs) -> Result<(), String> {
    if let (Some(start), Some(end)) = (args.start, args.end) {
        if start > end {
            return Err(format!("--start {start} is after --end {end}"));
        }
    }
    let records = Pipeline::new(config)
        .query_records(args.start, args.end)
        .map_err(|e| format!("Failed to read records: {e}"))?;
    print_records(&records)
}

fn run_health(mut config: PipelineConfig, args: HealthArgs) -> Result<(), String> {
    if args.reference.is_some() {
        config.reference_capacities = args.reference;
    }

    let summary = Pipeline::new(config)
        .health(&args.nickname, args.variant.as_deref())
        .map_err(|e| format!("Failed to compute health: {e}"))?
        .ok_or_else(|| format!("No plausible records for device '{}'", args.nickname))?;

    let json = serde_json::to_string_pretty(&summary)
        .map_err(|e| format!("Failed to serialize health summary: {e}"))?;
    println!("{json}");
    Ok(())
}

fn run_status(config: PipelineConfig) -> Result<(), String> {
    let database = config.database_path();
    let status = Pipeline::new(config)
        .status()
        .map_err(|e| format!("Failed to get status: {e}"))?;

    println!("Database: {}", database.display());
    println!(
        "  Table exists: {}",
        if status.table_exists { "yes" } else { "no" }
    );
    println!("  Record count: {}", status.row_count);
    println!("  Schema version: {}", status.schema_version);
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_time_arg(raw: &str) -> Result<NaiveDateTime, String> {
    parse_capture_time(raw).ok_or_else(|| format!("'{raw}' is not YYYY-MM-DD HH:MM:SS"))
}

/// Expands directories into their `*.zip` files (sorted, non-recursive).
/// Files are passed through as given so the extractor can reject them.
fn collect_archives(inputs: &[PathBuf]) -> Result<Vec<PathBuf>, String> {
    let mut archives = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = fs::read_dir(input)
                .map_err(|e| format!("Failed to read directory '{}': {e}", input.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.is_file() && has_archive_extension(path))
                .collect();
            found.sort();
            archives.extend(found);
        } else {
            archives.push(input.clone());
        }
    }
    Ok(archives)
}

fn has_archive_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION))
}

fn print_report(report: &BatchReport, json: bool) -> Result<(), String> {
    if json {
        let text = serde_json::to_string_pretty(report)
            .map_err(|e| format!("Failed to serialize report: {e}"))?;
        println!("{text}");
    } else {
        println!("{}", report.summary());
    }

    if report.has_failures() {
        eprintln!("\nFailures:");
        for failure in &report.failures {
            eprintln!("  {failure}");
        }
    }
    Ok(())
}

fn print_records(records: &[BatteryRecord]) -> Result<(), String> {
    let json = serde_json::to_string_pretty(records)
        .map_err(|e| format!("Failed to serialize records: {e}"))?;
    println!("{json}");
    Ok(())
}
