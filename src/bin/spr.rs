//! SPR CLI - Command-line interface for self-paced reading analysis
//!
//! Commands:
//! - analyze: Run the full pipeline (cleaning, chart, mixed models)
//! - validate: Check every input row
//! - aggregate: Print the condition × position table
//! - doctor: Diagnose configuration and input
//! - schema: Print the expected input format

use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use spr_analysis::logging::init_logging;
use spr_analysis::schema::{NumberedRow, RowAdapter, RowIssue, COLUMNS};
use spr_analysis::types::{Condition, ItemType};
use spr_analysis::{AnalysisConfig, AnalysisError, AnalysisProcessor, VERSION};

/// SPR - Self-paced reading analysis
#[derive(Parser)]
#[command(name = "spr")]
#[command(version = VERSION)]
#[command(about = "Clean, plot and model self-paced reading times", long_about = None)]
struct Cli {
    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full analysis
    Analyze {
        /// Input file path (use - for stdin; prompts when omitted on a terminal)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Chart output path (overrides the config)
        #[arg(long)]
        chart: Option<PathBuf>,

        /// Report format
        #[arg(long, default_value = "text")]
        format: ReportFormat,

        /// Skip the mixed-effects models
        #[arg(long)]
        no_models: bool,

        /// Skip rendering the chart
        #[arg(long)]
        no_chart: bool,
    },

    /// Validate every input row
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// TOML configuration file (position scheme, delimiter)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print mean RT and SE per condition and position
    Aggregate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "text")]
        format: TableFormat,
    },

    /// Diagnose configuration and input
    Doctor {
        /// TOML configuration file to check
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Input file to check
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the expected input format
    Schema {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum ReportFormat {
    /// Human-readable summary with model tables
    Text,
    /// Full report as JSON
    Json,
    /// Full report as pretty-printed JSON
    JsonPretty,
}

#[derive(Clone, ValueEnum)]
enum TableFormat {
    /// Fixed-width table
    Text,
    /// JSON object with conditions, categories and cells
    Json,
    /// One JSON cell per line
    Ndjson,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string()));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), SprCliError> {
    match cli.command {
        Commands::Analyze {
            input,
            config,
            chart,
            format,
            no_models,
            no_chart,
        } => cmd_analyze(input, config.as_deref(), chart, format, no_models, no_chart),

        Commands::Validate { input, config, json } => cmd_validate(input, config.as_deref(), json),

        Commands::Aggregate { input, config, format } => cmd_aggregate(input, config.as_deref(), format),

        Commands::Doctor { config, input, json } => cmd_doctor(config.as_deref(), input.as_deref(), json),

        Commands::Schema { json } => cmd_schema(json),
    }
}

fn cmd_analyze(
    input: Option<PathBuf>,
    config_path: Option<&Path>,
    chart: Option<PathBuf>,
    format: ReportFormat,
    no_models: bool,
    no_chart: bool,
) -> Result<(), SprCliError> {
    let mut config = load_config(config_path)?;
    if let Some(path) = chart {
        config.chart.path = path;
    }

    let input = resolve_input(input)?;
    let rows = read_rows(&input, &config)?;

    let report = AnalysisProcessor::new(config)
        .with_input_name(input.display().to_string())
        .with_models(!no_models)
        .with_chart(!no_chart)
        .run(&rows)?;

    match format {
        ReportFormat::Text => print!("{}", report),
        ReportFormat::Json => println!("{}", serde_json::to_string(&report)?),
        ReportFormat::JsonPretty => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}

fn cmd_validate(input: Option<PathBuf>, config_path: Option<&Path>, json: bool) -> Result<(), SprCliError> {
    let config = load_config(config_path)?;
    let input = resolve_input(input)?;
    let rows = read_rows(&input, &config)?;

    let issues = RowAdapter::validate_rows(&rows, &config.positions);
    let report = ValidationReport {
        total_rows: rows.len(),
        valid_rows: rows.len() - issues.len(),
        invalid_rows: issues.len(),
        errors: issues,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total rows:   {}", report.total_rows);
        println!("Valid rows:   {}", report.valid_rows);
        println!("Invalid rows: {}", report.invalid_rows);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!("  - line {} (participant {}): {}", err.line, err.participant, err.error);
            }
        }
    }

    if report.invalid_rows > 0 {
        Err(SprCliError::ValidationFailed(report.invalid_rows))
    } else {
        Ok(())
    }
}

fn cmd_aggregate(input: Option<PathBuf>, config_path: Option<&Path>, format: TableFormat) -> Result<(), SprCliError> {
    let config = load_config(config_path)?;
    let input = resolve_input(input)?;
    let rows = read_rows(&input, &config)?;

    let report = AnalysisProcessor::new(config)
        .with_models(false)
        .with_chart(false)
        .run(&rows)?;
    let table = &report.aggregate;

    match format {
        TableFormat::Text => print!("{}", table.to_text()),
        TableFormat::Json => println!("{}", serde_json::to_string_pretty(table)?),
        TableFormat::Ndjson => {
            let mut stdout = io::stdout().lock();
            for cell in &table.cells {
                writeln!(stdout, "{}", serde_json::to_string(cell)?)?;
            }
            stdout.flush()?;
        }
    }
    Ok(())
}

fn cmd_doctor(config_path: Option<&Path>, input: Option<&Path>, json: bool) -> Result<(), SprCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("spr-analysis {}", VERSION),
    });

    let config = match config_path {
        Some(path) => match AnalysisConfig::load(path) {
            Ok(config) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: format!(
                        "{} valid ({} positions, {} critical)",
                        path.display(),
                        config.positions.order.len(),
                        config.models.critical_positions.len()
                    ),
                });
                config
            }
            Err(e) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: e.to_string(),
                });
                AnalysisConfig::default()
            }
        },
        None => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: "no config file, using defaults".to_string(),
            });
            AnalysisConfig::default()
        }
    };

    if let Some(path) = input {
        checks.extend(check_input(path, &config));
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive input prompt available)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (input can be streamed with --input -)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        version: VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("SPR Doctor Report");
        println!("=================");
        println!("Version: {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(SprCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn check_input(path: &Path, config: &AnalysisConfig) -> Vec<DoctorCheck> {
    let rows = match RowAdapter::parse_path(path, config.delimiter) {
        Ok(rows) => rows,
        Err(e) => {
            return vec![DoctorCheck {
                name: "input".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            }]
        }
    };

    let participants: BTreeSet<&str> = rows.iter().map(|r| r.row.participant_key()).collect();
    let mut checks = vec![DoctorCheck {
        name: "input".to_string(),
        status: if rows.is_empty() { CheckStatus::Warning } else { CheckStatus::Ok },
        message: format!("{} rows from {} participants", rows.len(), participants.len()),
    }];

    let unknown: BTreeSet<&str> = rows
        .iter()
        .filter(|r| ItemType::parse(&r.row.item_type) == Some(ItemType::Target) && r.row.is_timed())
        .map(|r| r.row.word_position.trim())
        .filter(|label| config.positions.category_of(label).is_none())
        .collect();
    checks.push(if unknown.is_empty() {
        DoctorCheck {
            name: "positions".to_string(),
            status: CheckStatus::Ok,
            message: "every timed target word position maps to a category".to_string(),
        }
    } else {
        DoctorCheck {
            name: "positions".to_string(),
            status: CheckStatus::Error,
            message: format!(
                "unknown target word positions: {}",
                unknown.into_iter().collect::<Vec<_>>().join(", ")
            ),
        }
    });

    let invalid = RowAdapter::validate_rows(&rows, &config.positions).len();
    checks.push(DoctorCheck {
        name: "rows".to_string(),
        status: if invalid == 0 { CheckStatus::Ok } else { CheckStatus::Warning },
        message: format!("{} invalid rows (run 'spr validate' for details)", invalid),
    });
    checks
}

fn cmd_schema(json: bool) -> Result<(), SprCliError> {
    let positions = AnalysisConfig::default().positions;
    let conditions: Vec<&str> = Condition::ALL.iter().map(|c| c.as_str()).collect();

    if json {
        let schema = serde_json::json!({
            "columns": COLUMNS,
            "item_types": ["target", "filler", "practice"],
            "conditions": conditions,
            "default_positions": positions.order,
            "default_aliases": positions.aliases,
        });
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    println!("Input: one delimited row per participant × item × word position");
    println!("(comma by default, tab for .tsv/.txt files)");
    println!();
    println!("Columns:");
    for col in COLUMNS {
        println!("  - {}", col);
    }
    println!();
    println!("ItemType:  target, filler, practice");
    println!("Condition: {}", conditions.join(", "));
    println!("Answer:    1/0, true/false, correct/incorrect, or empty/NA");
    println!("RT:        milliseconds, or empty/NA on question rows");
    println!();
    println!("Default word positions (in sentence order):");
    println!("  {}", positions.order.join(", "));
    for (raw, category) in &positions.aliases {
        println!("  {} -> {}", raw, category);
    }
    Ok(())
}

// Helper functions

fn load_config(path: Option<&Path>) -> Result<AnalysisConfig, SprCliError> {
    match path {
        Some(path) => Ok(AnalysisConfig::load(path)?),
        None => Ok(AnalysisConfig::default()),
    }
}

/// Explicit path, `-` for stdin, or a prompt when stdin is a terminal
fn resolve_input(input: Option<PathBuf>) -> Result<PathBuf, SprCliError> {
    if let Some(path) = input {
        return Ok(path);
    }
    if !atty::is(atty::Stream::Stdin) {
        return Ok(PathBuf::from("-"));
    }

    eprint!("Path to SPR data file: ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(SprCliError::NoInput);
    }
    Ok(PathBuf::from(trimmed))
}

fn read_rows(input: &Path, config: &AnalysisConfig) -> Result<Vec<NumberedRow>, SprCliError> {
    if input.to_string_lossy() == "-" {
        let delimiter = RowAdapter::delimiter_for(None, config.delimiter);
        Ok(RowAdapter::parse_reader(io::stdin().lock(), delimiter)?)
    } else {
        let file = File::open(input)?;
        let delimiter = RowAdapter::delimiter_for(Some(input), config.delimiter);
        Ok(RowAdapter::parse_reader(file, delimiter)?)
    }
}

// Error types

#[derive(Debug)]
enum SprCliError {
    Io(io::Error),
    Analysis(AnalysisError),
    Json(serde_json::Error),
    NoInput,
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for SprCliError {
    fn from(e: io::Error) -> Self {
        SprCliError::Io(e)
    }
}

impl From<AnalysisError> for SprCliError {
    fn from(e: AnalysisError) -> Self {
        SprCliError::Analysis(e)
    }
}

impl From<serde_json::Error> for SprCliError {
    fn from(e: serde_json::Error) -> Self {
        SprCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl CliError {
    fn new(code: &str, message: String, hint: &str) -> Self {
        CliError {
            code: code.to_string(),
            message,
            hint: Some(hint.to_string()),
        }
    }
}

impl From<SprCliError> for CliError {
    fn from(e: SprCliError) -> Self {
        match e {
            SprCliError::Io(e) => CliError::new("IO_ERROR", e.to_string(), "Check file paths and permissions"),
            SprCliError::Json(e) => CliError::new("JSON_ERROR", e.to_string(), "Report output could not be serialized"),
            SprCliError::NoInput => CliError::new(
                "NO_INPUT",
                "No input file given".to_string(),
                "Pass --input <path> or - for stdin",
            ),
            SprCliError::ValidationFailed(count) => CliError::new(
                "VALIDATION_FAILED",
                format!("{} rows failed validation", count),
                "Fix validation errors and retry",
            ),
            SprCliError::DoctorFailed => CliError::new(
                "DOCTOR_FAILED",
                "One or more health checks failed".to_string(),
                "Review the doctor report for details",
            ),
            SprCliError::Analysis(e) => {
                let message = e.to_string();
                match e {
                    AnalysisError::Io(_) => CliError::new("IO_ERROR", message, "Check file paths and permissions"),
                    AnalysisError::Csv(_) => CliError::new("CSV_ERROR", message, "Check the delimiter and quoting"),
                    AnalysisError::Json(_) => CliError::new("JSON_ERROR", message, "Check JSON syntax"),
                    AnalysisError::Config(_) => CliError::new("CONFIG_ERROR", message, "Run 'spr doctor --config <path>'"),
                    AnalysisError::InvalidRow { .. } => {
                        CliError::new("INVALID_ROW", message, "Run 'spr validate' for details")
                    }
                    AnalysisError::UnknownPosition(_) => CliError::new(
                        "UNKNOWN_POSITION",
                        message,
                        "Add the label to positions.order or positions.aliases",
                    ),
                    AnalysisError::EmptyDataset(_) => {
                        CliError::new("EMPTY_DATASET", message, "Check the exclusion and trimming settings")
                    }
                    AnalysisError::Plot(_) => CliError::new("PLOT_ERROR", message, "Check the chart path"),
                }
            }
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_rows: usize,
    valid_rows: usize,
    invalid_rows: usize,
    errors: Vec<RowIssue>,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
