//! smartdetect - Command-line interface for the smart detection engine
//!
//! Commands:
//! - replay: Feed a recorded day of host activity through the engine
//! - patterns: Explain the time-of-day pattern check against a history file
//! - places: Manage saved places in a store directory
//! - config: Print the default configuration
//! - doctor: Diagnose configuration and storage

use chrono::{DateTime, Timelike, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;

use smart_detect::input::{parse_ndjson, REPLAY_SCHEMA};
use smart_detect::modules::pattern::{local_offset, time_of_day};
use smart_detect::modules::{detect_pattern, tally_time_window};
use smart_detect::store::{FileStore, KeyValueStore, MemoryStore, PLACES_KEY};
use smart_detect::types::{DetectionEvent, Position};
use smart_detect::{
    DetectError, DetectionConfig, DetectionEngine, EventRecorder, HistoryLog, SensorBackends,
    PRODUCER_NAME, VERSION,
};

/// smartdetect - On-device smart detection for intention tracking
#[derive(Parser)]
#[command(name = "smartdetect")]
#[command(author = "Segment Intending contributors")]
#[command(version = VERSION)]
#[command(about = "Replay sensor activity and inspect detection state", long_about = None)]
struct Cli {
    /// Log engine decisions to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay recorded host activity and print the events it produces
    Replay {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Engine configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Persist places and read history from this directory
        #[arg(long)]
        store_dir: Option<PathBuf>,

        /// Leave sensor acquisitions pending until an acquisition record arrives
        #[arg(long)]
        deferred_acquisition: bool,

        /// Drop started/unavailable events from the output
        #[arg(long)]
        skip_lifecycle: bool,

        /// Stop at the first record the engine rejects
        #[arg(long)]
        strict: bool,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,
    },

    /// Explain the time-of-day pattern check for a history file
    Patterns {
        /// App state JSON holding the history log
        #[arg(long)]
        history: PathBuf,

        /// Evaluation time (RFC 3339); defaults to now
        #[arg(long)]
        at: Option<String>,

        /// Engine configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage saved places
    Places {
        /// Directory holding the places list
        #[arg(long)]
        store_dir: PathBuf,

        #[command(subcommand)]
        action: PlacesAction,
    },

    /// Print the default configuration
    Config,

    /// Diagnose configuration and storage
    Doctor {
        /// Check this configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Check this store directory
        #[arg(long)]
        store_dir: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum PlacesAction {
    /// List saved places
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Save a place
    Add {
        name: String,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
        /// Activity suggested on arrival
        #[arg(long, default_value = "")]
        activity: String,
    },
    /// Remove a place by name
    Remove { name: String },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one event per line)
    Ndjson,
    /// JSON array of events
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let error = CliError::from(e);
            eprintln!(
                "{}",
                serde_json::to_string(&error).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), SmartDetectCliError> {
    match cli.command {
        Commands::Replay {
            input,
            output,
            config,
            store_dir,
            deferred_acquisition,
            skip_lifecycle,
            strict,
            output_format,
        } => cmd_replay(
            &input,
            &output,
            config.as_deref(),
            store_dir.as_deref(),
            ReplayOptions {
                deferred_acquisition,
                skip_lifecycle,
                strict,
            },
            output_format,
        ),

        Commands::Patterns {
            history,
            at,
            config,
            json,
        } => cmd_patterns(&history, at.as_deref(), config.as_deref(), json),

        Commands::Places { store_dir, action } => cmd_places(&store_dir, action),

        Commands::Config => {
            println!("{}", DetectionConfig::default().to_json_pretty()?);
            Ok(())
        }

        Commands::Doctor {
            config,
            store_dir,
            json,
        } => cmd_doctor(config.as_deref(), store_dir.as_deref(), json),
    }
}

struct ReplayOptions {
    deferred_acquisition: bool,
    skip_lifecycle: bool,
    strict: bool,
}

fn cmd_replay(
    input: &Path,
    output: &Path,
    config: Option<&Path>,
    store_dir: Option<&Path>,
    options: ReplayOptions,
    output_format: OutputFormat,
) -> Result<(), SmartDetectCliError> {
    let input_data = if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };

    let records = parse_ndjson(&input_data)?;
    if records.is_empty() {
        return Err(SmartDetectCliError::NoRecords);
    }

    let config = load_config(config)?;
    let store = open_store(store_dir)?;
    let backends = if options.deferred_acquisition {
        SensorBackends::deferred()
    } else {
        SensorBackends::granted()
    };

    let mut engine = DetectionEngine::new(config, store, backends)?;
    let recorder = EventRecorder::new();
    engine.initialize(recorder.sink());

    let mut rejected = 0usize;
    for (index, record) in records.iter().enumerate() {
        if let Err(e) = record.apply(&mut engine) {
            if options.strict {
                return Err(SmartDetectCliError::RecordRejected(index + 1, e.to_string()));
            }
            log::warn!("record {} rejected: {}", index + 1, e);
            rejected += 1;
        }
    }
    engine.shutdown();

    let events: Vec<DetectionEvent> = recorder
        .take()
        .into_iter()
        .filter(|e| !(options.skip_lifecycle && e.kind.is_lifecycle()))
        .collect();

    log::info!(
        "replayed {} records ({} rejected), {} events",
        records.len(),
        rejected,
        events.len()
    );

    let output_data = format_output(&events, &output_format)?;
    if output.to_string_lossy() == "-" {
        let mut stdout = io::stdout();
        write!(stdout, "{}", output_data)?;
        stdout.flush()?;
    } else {
        fs::write(output, output_data)?;
    }

    Ok(())
}

#[derive(serde::Serialize)]
struct PatternReport {
    evaluated_at: DateTime<Utc>,
    local_time: String,
    time_of_day: &'static str,
    total_days: usize,
    counts: Vec<PatternCount>,
    suggestion: Option<PatternSuggestion>,
}

#[derive(serde::Serialize)]
struct PatternCount {
    activity: String,
    count: usize,
}

#[derive(serde::Serialize)]
struct PatternSuggestion {
    activity: String,
    frequency_pct: i64,
    message: String,
}

fn cmd_patterns(
    history: &Path,
    at: Option<&str>,
    config: Option<&Path>,
    json: bool,
) -> Result<(), SmartDetectCliError> {
    let config = load_config(config)?;
    let log = HistoryLog::from_app_state_json(&fs::read_to_string(history)?)?;

    let now = match at {
        Some(at) => DateTime::parse_from_rfc3339(at)
            .map_err(|e| SmartDetectCliError::InvalidTime(format!("{}: {}", at, e)))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let offset = local_offset(&config.patterns, now);
    let local = now.with_timezone(&offset);
    let minute_of_day = local.hour() * 60 + local.minute();
    let tally = tally_time_window(&log, minute_of_day, config.patterns.window_minutes, offset);
    let found = detect_pattern(&log, now, &config.patterns);

    let report = PatternReport {
        evaluated_at: now,
        local_time: local.format("%H:%M %:z").to_string(),
        time_of_day: time_of_day(local.hour()),
        total_days: tally.total_days,
        counts: tally
            .counts
            .iter()
            .map(|(activity, count)| PatternCount {
                activity: activity.clone(),
                count: *count,
            })
            .collect(),
        suggestion: found.map(|m| PatternSuggestion {
            activity: m.activity.clone(),
            frequency_pct: m.frequency_pct(),
            message: m.to_event(now).message,
        }),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Pattern Report");
    println!("==============");
    println!("Local time:  {} ({})", report.local_time, report.time_of_day);
    println!(
        "Days logged: {} (need {})",
        report.total_days, config.patterns.min_days
    );
    println!(
        "\nActivities within {} minutes:",
        config.patterns.window_minutes
    );
    if report.counts.is_empty() {
        println!("  (none)");
    }
    for count in &report.counts {
        println!("  - {}: {}", count.activity, count.count);
    }
    match &report.suggestion {
        Some(s) => println!("\nSuggestion: {}", s.message),
        None => println!("\nNo suggestion"),
    }

    Ok(())
}

fn cmd_places(store_dir: &Path, action: PlacesAction) -> Result<(), SmartDetectCliError> {
    let store: Rc<dyn KeyValueStore> = Rc::new(FileStore::open(store_dir)?);
    let mut engine =
        DetectionEngine::new(DetectionConfig::default(), store, SensorBackends::deferred())?;

    match action {
        PlacesAction::List { json } => {
            let places = engine.list_places();
            if json {
                println!("{}", serde_json::to_string_pretty(&places)?);
            } else if places.is_empty() {
                println!("No saved places");
            } else {
                for place in &places {
                    println!(
                        "{:<20} {:>10.5} {:>11.5}  {}",
                        place.name,
                        place.lat,
                        place.lng,
                        place.suggested_activity().unwrap_or("-")
                    );
                }
            }
        }
        PlacesAction::Add {
            name,
            lat,
            lng,
            activity,
        } => {
            let place = engine.add_place(&name, Position::new(lat, lng), &activity)?;
            println!("Saved \"{}\"", place.name);
        }
        PlacesAction::Remove { name } => {
            if !engine.remove_place(&name) {
                return Err(SmartDetectCliError::PlaceNotFound(name));
            }
            println!("Removed \"{}\"", name);
        }
    }

    Ok(())
}

fn cmd_doctor(
    config: Option<&Path>,
    store_dir: Option<&Path>,
    json: bool,
) -> Result<(), SmartDetectCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("smart-detect version {}", VERSION),
    });

    checks.push(DoctorCheck {
        name: "replay_schema".to_string(),
        status: CheckStatus::Ok,
        message: format!("Replay input schema: {}", REPLAY_SCHEMA),
    });

    if let Some(config_path) = config {
        checks.push(match DetectionConfig::load(config_path) {
            Ok(_) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: "Configuration valid".to_string(),
            },
            Err(e) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            },
        });
    }

    if let Some(dir) = store_dir {
        checks.extend(store_checks(dir));
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
            message: "stdin is a pipe (replay ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("smartdetect Doctor Report");
        println!("=========================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
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

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(SmartDetectCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn store_checks(dir: &Path) -> Vec<DoctorCheck> {
    if !dir.exists() {
        return vec![DoctorCheck {
            name: "store".to_string(),
            status: CheckStatus::Warning,
            message: "Store directory does not exist (created on first write)".to_string(),
        }];
    }

    let store = match FileStore::open(dir) {
        Ok(store) => store,
        Err(e) => {
            return vec![DoctorCheck {
                name: "store".to_string(),
                status: CheckStatus::Error,
                message: format!("Cannot open store: {}", e),
            }]
        }
    };

    let mut checks = vec![DoctorCheck {
        name: "store".to_string(),
        status: CheckStatus::Ok,
        message: format!("Store at {}", store.dir().display()),
    }];

    checks.push(match store.load(PLACES_KEY) {
        Ok(None) => DoctorCheck {
            name: "places".to_string(),
            status: CheckStatus::Ok,
            message: "No saved places yet".to_string(),
        },
        Ok(Some(raw)) => match serde_json::from_str::<Vec<serde_json::Value>>(&raw) {
            Ok(places) => DoctorCheck {
                name: "places".to_string(),
                status: CheckStatus::Ok,
                message: format!("{} saved places", places.len()),
            },
            Err(e) => DoctorCheck {
                name: "places".to_string(),
                status: CheckStatus::Warning,
                message: format!("Places list unreadable, it will be treated as empty: {}", e),
            },
        },
        Err(e) => DoctorCheck {
            name: "places".to_string(),
            status: CheckStatus::Error,
            message: e.to_string(),
        },
    });

    checks.push(match HistoryLog::load(&store) {
        Ok(log) => DoctorCheck {
            name: "history".to_string(),
            status: CheckStatus::Ok,
            message: format!("{} days of history", log.day_count()),
        },
        Err(e) => DoctorCheck {
            name: "history".to_string(),
            status: CheckStatus::Warning,
            message: format!("History unreadable, pattern checks will be skipped: {}", e),
        },
    });

    checks
}

// Helper functions

fn load_config(path: Option<&Path>) -> Result<DetectionConfig, SmartDetectCliError> {
    match path {
        Some(path) => Ok(DetectionConfig::load(path)?),
        None => Ok(DetectionConfig::default()),
    }
}

fn open_store(dir: Option<&Path>) -> Result<Rc<dyn KeyValueStore>, SmartDetectCliError> {
    Ok(match dir {
        Some(dir) => Rc::new(FileStore::open(dir)?),
        None => Rc::new(MemoryStore::new()),
    })
}

fn format_output(
    events: &[DetectionEvent],
    format: &OutputFormat,
) -> Result<String, SmartDetectCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for event in events {
                lines.push(serde_json::to_string(event)?);
            }
            if lines.is_empty() {
                Ok(String::new())
            } else {
                Ok(lines.join("\n") + "\n")
            }
        }
        OutputFormat::Json => Ok(serde_json::to_string(events)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(events)?),
    }
}

// Error types

#[derive(Debug)]
enum SmartDetectCliError {
    Io(io::Error),
    Detect(DetectError),
    Json(serde_json::Error),
    NoRecords,
    RecordRejected(usize, String),
    InvalidTime(String),
    PlaceNotFound(String),
    DoctorFailed,
}

impl From<io::Error> for SmartDetectCliError {
    fn from(e: io::Error) -> Self {
        SmartDetectCliError::Io(e)
    }
}

impl From<DetectError> for SmartDetectCliError {
    fn from(e: DetectError) -> Self {
        SmartDetectCliError::Detect(e)
    }
}

impl From<serde_json::Error> for SmartDetectCliError {
    fn from(e: serde_json::Error) -> Self {
        SmartDetectCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

impl From<SmartDetectCliError> for CliError {
    fn from(e: SmartDetectCliError) -> Self {
        match e {
            SmartDetectCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            SmartDetectCliError::Detect(DetectError::InvalidConfig(msg)) => CliError {
                code: "INVALID_CONFIG".to_string(),
                message: msg,
                hint: Some("Run `smartdetect config` to see the defaults".to_string()),
            },
            SmartDetectCliError::Detect(e) => CliError {
                code: "ENGINE_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            SmartDetectCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            SmartDetectCliError::NoRecords => CliError {
                code: "NO_RECORDS".to_string(),
                message: "No replay records found in input".to_string(),
                hint: Some(format!("Input must be NDJSON in the {} format", REPLAY_SCHEMA)),
            },
            SmartDetectCliError::RecordRejected(line, msg) => CliError {
                code: "RECORD_REJECTED".to_string(),
                message: format!("Record {}: {}", line, msg),
                hint: Some("Drop --strict to skip rejected records".to_string()),
            },
            SmartDetectCliError::InvalidTime(msg) => CliError {
                code: "INVALID_TIME".to_string(),
                message: msg,
                hint: Some("Use RFC 3339, e.g. 2024-05-01T08:00:00Z".to_string()),
            },
            SmartDetectCliError::PlaceNotFound(name) => CliError {
                code: "PLACE_NOT_FOUND".to_string(),
                message: format!("No saved place named \"{}\"", name),
                hint: Some("Run `smartdetect places list`".to_string()),
            },
            SmartDetectCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: None,
            },
        }
    }
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
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
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
