//! alertgov CLI - Command-line interface for alert governance
//!
//! Commands:
//! - govern: Run candidate alerts through dedupe, throttle, admission and quiet hours
//! - dedupe: Collapse recurring alerts
//! - caps: Annotate daily cap overflow
//! - validate: Validate and normalize alert settings
//! - baseline: Compute a student baseline
//! - snooze: Snooze or unsnooze a dedupe key
//! - audit: Export a student's audit trail
//! - doctor: Diagnose configuration and state health

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use alert_governance::baseline::{BaselineInput, BaselineService};
use alert_governance::pipeline::AlertGovernor;
use alert_governance::policy::AlertPolicies;
use alert_governance::{
    AlertEvent, AlertSettings, FileStore, GovernanceConfig, GovernanceError, KeyValueStore,
    MemoryStore, StorageError, SystemClock, VERSION,
};

/// alertgov - Alert admission policies and robust behavioral baselines
#[derive(Parser)]
#[command(name = "alertgov")]
#[command(version = VERSION)]
#[command(about = "Decide which behavioral alerts are shown, when, and how often", long_about = None)]
struct Cli {
    /// Engine configuration file (JSON with `policy` and `baseline` sections)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// State file persisting throttle, snooze, cap, audit and baseline state
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Govern candidate alerts end to end
    Govern {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Alert settings file (JSON)
        #[arg(long)]
        settings: Option<PathBuf>,

        /// Input format
        #[arg(long, default_value = "json")]
        input_format: InputFormat,

        /// Pretty-print the report
        #[arg(long)]
        pretty: bool,
    },

    /// Collapse alerts sharing a dedupe key within a window
    Dedupe {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Window in milliseconds (defaults to the configured window)
        #[arg(long)]
        window_ms: Option<u64>,

        /// Input format
        #[arg(long, default_value = "json")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,
    },

    /// Annotate alerts exceeding per-severity daily caps
    Caps {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Alert settings file (JSON)
        #[arg(long)]
        settings: Option<PathBuf>,

        /// Input format
        #[arg(long, default_value = "json")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,
    },

    /// Validate and normalize alert settings
    Validate {
        /// Settings file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Fail when any value had to be repaired
        #[arg(long)]
        strict: bool,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Recompute a student baseline from a history file
    Baseline {
        /// BaselineInput JSON file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Pretty-print the snapshot
        #[arg(long)]
        pretty: bool,
    },

    /// Snooze, or lift a snooze on, a dedupe key
    Snooze {
        #[arg(long)]
        student: String,

        /// Dedupe key (student|kind|context)
        #[arg(long)]
        key: String,

        /// Snooze duration in hours
        #[arg(long, conflicts_with_all = ["days", "clear"])]
        hours: Option<f64>,

        /// Snooze duration in days
        #[arg(long, conflicts_with = "clear")]
        days: Option<f64>,

        /// Lift an active snooze
        #[arg(long)]
        clear: bool,
    },

    /// Export a student's audit trail
    Audit {
        #[arg(long)]
        student: String,

        /// Most recent entries to include
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Diagnose configuration and state health
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one alert per line)
    Ndjson,
    /// JSON array of alerts
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one alert per line)
    Ndjson,
    /// JSON array of alerts
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(io::stderr).init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), AlertGovCliError> {
    let config = load_config(cli.config.as_deref())?;
    let state = cli.state.as_deref();

    match cli.command {
        Commands::Govern {
            input,
            output,
            settings,
            input_format,
            pretty,
        } => {
            let alerts = read_alerts(&input, &input_format)?;
            let settings = load_settings(settings.as_deref())?;
            let governor = AlertGovernor::new(open_policies(&config, state)?);
            let report = governor.govern(&alerts, &settings);
            write_output(&output, &to_json(&report, pretty)?)
        }

        Commands::Dedupe {
            input,
            output,
            window_ms,
            input_format,
            output_format,
        } => {
            let alerts = read_alerts(&input, &input_format)?;
            let policies = open_policies(&config, state)?;
            let unique = match window_ms {
                Some(window) => policies.deduplicate_alerts_within(&alerts, window),
                None => policies.deduplicate_alerts(&alerts),
            };
            write_output(&output, &format_output(&unique, &output_format)?)
        }

        Commands::Caps {
            input,
            output,
            settings,
            input_format,
            output_format,
        } => {
            let alerts = read_alerts(&input, &input_format)?;
            let settings = load_settings(settings.as_deref())?;
            let policies = open_policies(&config, state)?;
            let annotated = policies.enforce_cap_limits(&alerts, &settings);
            write_output(&output, &format_output(&annotated, &output_format)?)
        }

        Commands::Validate {
            input,
            strict,
            json,
        } => cmd_validate(&input, strict, json),

        Commands::Baseline {
            input,
            output,
            pretty,
        } => {
            let history = BaselineInput::from_json(&read_input(&input)?)?;
            let service = BaselineService::new(config.baseline, open_store(state)?, Arc::new(SystemClock));
            let baseline = service.update_baseline(&history);
            if baseline.is_none() {
                tracing::info!(student_id = %history.student_id, "not enough data for a baseline");
            }
            write_output(&output, &to_json(&baseline, pretty)?)
        }

        Commands::Snooze {
            student,
            key,
            hours,
            days,
            clear,
        } => {
            if state.is_none() {
                tracing::warn!("no --state file given; snooze will not persist");
            }
            let policies = open_policies(&config, state)?;
            if clear {
                policies.unsnooze(&student, &key);
            } else {
                let (until, requested_hours) = match (hours, days) {
                    (Some(h), _) => (policies.snooze(&student, &key, h), h),
                    (None, Some(d)) => (policies.dont_show_for_days(&student, &key, d), d * 24.0),
                    (None, None) => return Err(AlertGovCliError::MissingDuration),
                };
                if until.is_none() {
                    return Err(AlertGovCliError::InvalidDuration(requested_hours));
                }
            }

            let status = SnoozeStatus {
                student_id: student.clone(),
                dedupe_key: key.clone(),
                snoozed: policies.is_snoozed(&student, &key),
                snoozed_until: policies.snoozed_until(&student, &key).map(|t| t.to_rfc3339()),
            };
            println!("{}", serde_json::to_string(&status)?);
            Ok(())
        }

        Commands::Audit { student, limit } => {
            let policies = open_policies(&config, state)?;
            println!("{}", policies.export_audit_trail(&student, limit));
            Ok(())
        }

        Commands::Doctor { json } => cmd_doctor(cli.config.as_deref(), state, json),
    }
}

fn cmd_validate(input: &Path, strict: bool, json: bool) -> Result<(), AlertGovCliError> {
    let settings: AlertSettings = serde_json::from_str(&read_input(input)?)?;
    let validation = alert_governance::policy::validate_alert_settings(&settings);

    if json {
        println!("{}", serde_json::to_string_pretty(&validation)?);
    } else {
        println!("Settings Validation");
        println!("===================");
        println!("Valid: {}", validation.is_valid);

        if !validation.errors.is_empty() {
            println!("\nRepaired:");
            for err in &validation.errors {
                println!("  - {}", err);
            }
        }
        println!("\nNormalized:");
        println!("{}", serde_json::to_string_pretty(&validation.normalized)?);
    }

    if strict && !validation.is_valid {
        Err(AlertGovCliError::ValidationFailed(validation.errors.len()))
    } else {
        Ok(())
    }
}

fn cmd_doctor(config: Option<&Path>, state: Option<&Path>, json: bool) -> Result<(), AlertGovCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("alertgov version {}", VERSION),
    });

    match config {
        Some(path) => checks.push(match load_config(Some(path)) {
            Ok(loaded) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "Config valid (policy namespace '{}', baseline namespace '{}')",
                    loaded.policy.namespace, loaded.baseline.namespace
                ),
            },
            Err(e) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: CliError::from(e).message,
            },
        }),
        None => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Ok,
            message: "Using built-in defaults".to_string(),
        }),
    }

    match state {
        Some(path) if path.exists() => checks.push(match FileStore::open(path) {
            Ok(store) => DoctorCheck {
                name: "state".to_string(),
                status: CheckStatus::Ok,
                message: format!("State file valid ({} keys)", store.len()),
            },
            Err(e) => DoctorCheck {
                name: "state".to_string(),
                status: CheckStatus::Error,
                message: format!("Cannot load state file: {}", e),
            },
        }),
        Some(_) => checks.push(DoctorCheck {
            name: "state".to_string(),
            status: CheckStatus::Warning,
            message: "State file does not exist yet; it will be created on first write".to_string(),
        }),
        None => checks.push(DoctorCheck {
            name: "state".to_string(),
            status: CheckStatus::Warning,
            message: "No state file; throttle, snooze and audit state are not persisted".to_string(),
        }),
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (use -i - to read alerts from it)".to_string(),
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
        println!("alertgov Doctor Report");
        println!("======================");
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
        Err(AlertGovCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn read_input(input: &Path) -> Result<String, AlertGovCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn write_output(output: &Path, data: &str) -> Result<(), AlertGovCliError> {
    if output.to_string_lossy() == "-" {
        println!("{}", data.trim_end());
    } else {
        fs::write(output, data)?;
    }
    Ok(())
}

fn read_alerts(input: &Path, format: &InputFormat) -> Result<Vec<AlertEvent>, AlertGovCliError> {
    let data = read_input(input)?;
    match format {
        InputFormat::Json => Ok(serde_json::from_str(&data)?),
        InputFormat::Ndjson => data
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line.trim())
                    .map_err(|e| AlertGovCliError::ParseError(format!("line {}: {}", n + 1, e)))
            })
            .collect(),
    }
}

fn load_config(path: Option<&Path>) -> Result<GovernanceConfig, AlertGovCliError> {
    match path {
        Some(path) => Ok(GovernanceConfig::from_json(&fs::read_to_string(path)?)?),
        None => Ok(GovernanceConfig::default()),
    }
}

fn load_settings(path: Option<&Path>) -> Result<AlertSettings, AlertGovCliError> {
    match path {
        Some(path) => Ok(serde_json::from_str(&read_input(path)?)?),
        None => Ok(AlertSettings::default()),
    }
}

fn open_store(state: Option<&Path>) -> Result<Arc<dyn KeyValueStore>, AlertGovCliError> {
    match state {
        Some(path) => Ok(Arc::new(FileStore::open(path)?)),
        None => Ok(Arc::new(MemoryStore::new())),
    }
}

fn open_policies(config: &GovernanceConfig, state: Option<&Path>) -> Result<AlertPolicies, AlertGovCliError> {
    Ok(AlertPolicies::with_config(
        config.policy.clone(),
        open_store(state)?,
        Arc::new(SystemClock),
    ))
}

fn to_json<T: Serialize>(value: &T, pretty: bool) -> Result<String, AlertGovCliError> {
    if pretty {
        Ok(serde_json::to_string_pretty(value)?)
    } else {
        Ok(serde_json::to_string(value)?)
    }
}

fn format_output(alerts: &[AlertEvent], format: &OutputFormat) -> Result<String, AlertGovCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for alert in alerts {
                lines.push(serde_json::to_string(alert)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(alerts)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(alerts)?),
    }
}

// Error types

#[derive(Debug)]
enum AlertGovCliError {
    Io(io::Error),
    Json(serde_json::Error),
    Governance(GovernanceError),
    Storage(StorageError),
    ParseError(String),
    ValidationFailed(usize),
    MissingDuration,
    InvalidDuration(f64),
    DoctorFailed,
}

impl From<io::Error> for AlertGovCliError {
    fn from(e: io::Error) -> Self {
        AlertGovCliError::Io(e)
    }
}

impl From<serde_json::Error> for AlertGovCliError {
    fn from(e: serde_json::Error) -> Self {
        AlertGovCliError::Json(e)
    }
}

impl From<GovernanceError> for AlertGovCliError {
    fn from(e: GovernanceError) -> Self {
        AlertGovCliError::Governance(e)
    }
}

impl From<StorageError> for AlertGovCliError {
    fn from(e: StorageError) -> Self {
        AlertGovCliError::Storage(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<AlertGovCliError> for CliError {
    fn from(e: AlertGovCliError) -> Self {
        match e {
            AlertGovCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            AlertGovCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            AlertGovCliError::Governance(e) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'alertgov doctor --config <file>' for details".to_string()),
            },
            AlertGovCliError::Storage(e) => CliError {
                code: "STATE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check or remove the --state file".to_string()),
            },
            AlertGovCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Each NDJSON line must be one alert object".to_string()),
            },
            AlertGovCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} settings values needed repair", count),
                hint: Some("Run without --strict to see the normalized settings".to_string()),
            },
            AlertGovCliError::MissingDuration => CliError {
                code: "MISSING_DURATION".to_string(),
                message: "No snooze duration given".to_string(),
                hint: Some("Pass --hours, --days or --clear".to_string()),
            },
            AlertGovCliError::InvalidDuration(hours) => CliError {
                code: "INVALID_DURATION".to_string(),
                message: format!("Invalid snooze duration: {} hours", hours),
                hint: Some("Durations must be positive".to_string()),
            },
            AlertGovCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct SnoozeStatus {
    student_id: String,
    dedupe_key: String,
    snoozed: bool,
    snoozed_until: Option<String>,
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
