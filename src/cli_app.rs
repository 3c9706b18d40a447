//! CLI definition and command dispatch.

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{ColoredString, Colorize, control};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use smart_bin::actuator::dispatch::ActuationStatus;
use smart_bin::bins::tracker::{BinStatus, GAUGE_WIDTH, gauge};
use smart_bin::classify::prompt::{NoOperator, TerminalPrompter};
use smart_bin::classify::resolver::ResolveMode;
use smart_bin::core::config::Config;
use smart_bin::core::errors::SbinError;
use smart_bin::engine::protocol;
use smart_bin::engine::service::{ClassifyOutcome, SortingEngine};
use smart_bin::engine::signals::SignalHandler;
use smart_bin::store::{DetectionRecord, UsageStat};

/// Items the detection simulator draws from: name, true bin, base confidence.
const SIMULATED_DETECTIONS: [(&str, &str, f64); 8] = [
    ("plastic_bottle", "yellow", 0.92),
    ("banana_peel", "green", 0.88),
    ("paper", "yellow", 0.85),
    ("food", "green", 0.90),
    ("cardboard", "yellow", 0.87),
    ("glass", "yellow", 0.95),
    ("organic", "green", 0.91),
    ("tissue", "brown", 0.89),
];

/// Rows shown by `simulate` after the run.
const SIMULATE_HISTORY_ROWS: u32 = 10;

/// Smart bin: classify detected items, track bin fill, drive the sorter.
#[derive(Debug, Parser)]
#[command(
    name = "smartbin",
    author,
    version,
    about = "Smart bin waste-sorting engine",
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
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Classify one detected item and sort it.
    Classify(ClassifyArgs),
    /// Show fill state of every bin.
    Status,
    /// Show recent detections, newest first.
    History(HistoryArgs),
    /// Mark a bin as emptied.
    Empty(EmptyArgs),
    /// Show learned mappings by usage.
    Stats,
    /// Teach a mapping without a detection.
    Teach(TeachArgs),
    /// Interactive entry loop: type item names, `stats`, `reconnect` or `quit`.
    Manual,
    /// Feed random detections from a fixed catalog through the engine.
    Simulate(SimulateArgs),
    /// Speak the JSON-lines protocol on stdin/stdout until EOF or a signal.
    Serve,
    /// View and validate configuration.
    Config(ConfigArgs),
    /// Generate shell completion scripts.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Serialize)]
struct ClassifyArgs {
    /// Detected item name.
    item: String,
    /// Detector confidence in [0, 1].
    #[arg(long, default_value_t = 1.0)]
    confidence: f64,
    /// Ask the operator when no bin is known.
    #[arg(long)]
    interactive: bool,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct HistoryArgs {
    /// Maximum rows to show (config default when omitted).
    #[arg(long)]
    limit: Option<u32>,
}

#[derive(Debug, Clone, Args, Serialize)]
struct EmptyArgs {
    /// Bin color to empty.
    color: String,
}

#[derive(Debug, Clone, Args, Serialize)]
struct TeachArgs {
    /// Item name.
    item: String,
    /// Bin color it belongs in.
    color: String,
}

#[derive(Debug, Clone, Args, Serialize)]
struct SimulateArgs {
    /// Number of detections to generate.
    #[arg(long, default_value_t = 10)]
    count: u32,
    /// Pause between detections in milliseconds.
    #[arg(long, default_value_t = 0)]
    interval_ms: u64,
    /// Seed for a reproducible run.
    #[arg(long)]
    seed: Option<u64>,
}

impl Default for SimulateArgs {
    fn default() -> Self {
        Self {
            count: 10,
            interval_ms: 0,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand, Serialize)]
enum ConfigCommand {
    /// Print the config file path in use.
    Path,
    /// Print the effective configuration.
    Show,
    /// Validate the configuration.
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
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
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
        }
    }
}

impl From<SbinError> for CliError {
    fn from(err: SbinError) -> Self {
        match err {
            SbinError::InvalidConfig { .. }
            | SbinError::MissingConfig { .. }
            | SbinError::ConfigParse { .. }
            | SbinError::InvalidBin { .. }
            | SbinError::BinNotFound { .. }
            | SbinError::InvalidDetection { .. } => Self::User(err.to_string()),
            SbinError::Serialization { .. } => Self::Internal(err.to_string()),
            _ => Self::Runtime(err.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Classify(args) => run_classify(cli, args),
        Command::Status => run_status(cli),
        Command::History(args) => run_history(cli, args),
        Command::Empty(args) => run_empty(cli, args),
        Command::Stats => run_stats(cli),
        Command::Teach(args) => run_teach(cli, args),
        Command::Manual => run_manual(cli),
        Command::Simulate(args) => run_simulate(cli, args),
        Command::Serve => run_serve(cli),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    Ok(Config::load(cli.config.as_deref())?)
}

/// Engine without the actuator, for commands that never sort.
fn open_engine(cli: &Cli) -> Result<SortingEngine, CliError> {
    Ok(SortingEngine::open(load_config(cli)?)?)
}

/// Engine with the actuator attached.
fn start_engine(cli: &Cli) -> Result<SortingEngine, CliError> {
    Ok(SortingEngine::start(load_config(cli)?)?)
}

// ---------------------------------------------------------------------------
// Sorting commands
// ---------------------------------------------------------------------------

fn run_classify(cli: &Cli, args: &ClassifyArgs) -> Result<(), CliError> {
    let mut engine = start_engine(cli)?;
    let outcome = if args.interactive {
        engine.classify(
            &args.item,
            args.confidence,
            ResolveMode::Interactive,
            &mut TerminalPrompter::stdio(),
        )?
    } else {
        engine.classify(&args.item, args.confidence, ResolveMode::Auto, &mut NoOperator)?
    };
    engine.shutdown("classify finished");

    match output_mode(cli) {
        OutputMode::Human => print_outcome(&outcome),
        OutputMode::Json => {
            let payload = json!({
                "command": "classify",
                "result": serde_json::to_value(&outcome)?,
            });
            write_json_line(&payload)?;
        }
    }

    match outcome {
        ClassifyOutcome::Sorted { .. } => Ok(()),
        ClassifyOutcome::Unresolved { item_name, .. } => Err(CliError::User(format!(
            "no bin known for {item_name:?}; teach one with `smartbin teach`"
        ))),
    }
}

fn print_outcome(outcome: &ClassifyOutcome) {
    match outcome {
        ClassifyOutcome::Sorted {
            item_name,
            bin,
            source,
            detection,
            bin_status,
            actuation,
        } => {
            println!(
                "{} {} -> {} ({}, confidence {:.2})",
                "Sorted".green().bold(),
                item_name,
                paint_bin(bin.as_str()),
                source.label(),
                detection.confidence,
            );
            println!(
                "  {}  {:5.1}%  {} items",
                gauge(bin_status.fill_percent, GAUGE_WIDTH),
                bin_status.fill_percent,
                bin_status.item_count,
            );
            println!("  Actuator: {}", paint_actuation(actuation));
            if bin_status.needs_emptying {
                println!("  {}", format!("{} bin needs emptying", bin_status.color).red());
            }
        }
        ClassifyOutcome::Unresolved {
            item_name,
            confidence,
        } => {
            println!(
                "{} {item_name} (confidence {confidence:.2}): no bin known",
                "Unresolved".yellow().bold()
            );
        }
    }
}

fn run_teach(cli: &Cli, args: &TeachArgs) -> Result<(), CliError> {
    let engine = open_engine(cli)?;
    let entry = engine.teach(&args.item, &args.color)?;

    match output_mode(cli) {
        OutputMode::Human => {
            println!(
                "Learned: {} -> {}",
                entry.item_name,
                paint_bin(entry.bin_color.as_str())
            );
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "teach",
                "entry": serde_json::to_value(&entry)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_manual(cli: &Cli) -> Result<(), CliError> {
    let mut engine = start_engine(cli)?;
    println!("Manual entry. Type an item name, `stats`, `reconnect` or `quit`.");
    println!("Actuator: {}", engine.link_state());

    let mut input = io::stdin().lock();
    let mut line = String::new();
    loop {
        print!("\nItem> ");
        io::stdout().flush()?;
        line.clear();
        if input.read_line(&mut line)? == 0 {
            break;
        }
        match line.trim() {
            "" => {}
            "quit" | "exit" | "q" => break,
            "stats" => print_stats(&engine.usage_stats()?),
            "reconnect" => match engine.reconnect_actuator() {
                Ok(state) => println!("Actuator: {state}"),
                Err(e) => eprintln!("reconnect failed: {e}"),
            },
            item => {
                let mut prompter = TerminalPrompter::new(&mut input, io::stdout());
                match engine.classify(item, 1.0, ResolveMode::Interactive, &mut prompter) {
                    Ok(outcome) => print_outcome(&outcome),
                    Err(e) => eprintln!("{e}"),
                }
            }
        }
    }

    engine.shutdown("manual session ended");
    Ok(())
}

fn run_simulate(cli: &Cli, args: &SimulateArgs) -> Result<(), CliError> {
    let mode = output_mode(cli);
    let mut engine = start_engine(cli)?;
    let mut rng = args
        .seed
        .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);

    let mut sorted = 0_u32;
    let mut unresolved = 0_u32;
    let mut mismatched = 0_u32;
    for i in 0..args.count {
        if i > 0 && args.interval_ms > 0 {
            thread::sleep(Duration::from_millis(args.interval_ms));
        }
        let Some(&(item, expected, base)) = SIMULATED_DETECTIONS.choose(&mut rng) else {
            return Err(CliError::Internal("empty detection catalog".to_string()));
        };
        let confidence = (base + rng.random_range(-0.05..=0.05)).clamp(0.0, 1.0);
        let outcome = engine.classify(item, confidence, ResolveMode::Auto, &mut NoOperator)?;
        match outcome.bin() {
            Some(bin) if bin.as_str() == expected => sorted += 1,
            Some(_) => {
                sorted += 1;
                mismatched += 1;
            }
            None => unresolved += 1,
        }
        if mode == OutputMode::Human {
            print!("[{:>3}/{}] ", i + 1, args.count);
            print_outcome(&outcome);
        }
    }

    let bins = engine.bin_status()?;
    let history = engine.history(Some(SIMULATE_HISTORY_ROWS))?;
    let stats = engine.usage_stats()?;
    engine.shutdown("simulation finished");

    match mode {
        OutputMode::Human => {
            println!();
            println!(
                "Simulated {} detections: {sorted} sorted, {unresolved} unresolved, {mismatched} into an unexpected bin.",
                args.count
            );
            println!();
            print_bins(&bins);
            println!();
            print_history(&history);
            println!();
            print_stats(&stats);
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "simulate",
                "detections": args.count,
                "sorted": sorted,
                "unresolved": unresolved,
                "mismatched": mismatched,
                "bins": serde_json::to_value(&bins)?,
                "history": serde_json::to_value(&history)?,
                "stats": serde_json::to_value(&stats)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_serve(cli: &Cli) -> Result<(), CliError> {
    let mut engine = start_engine(cli)?;
    let signals = SignalHandler::install();
    let (tx, rx) = crossbeam_channel::bounded::<String>(64);

    // Detached: a reader blocked on stdin must not hold up shutdown.
    thread::Builder::new()
        .name("smartbin-stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .map_err(|e| CliError::Runtime(format!("failed to spawn stdin reader: {e}")))?;

    eprintln!("[SBIN-SERVE] ready; actuator {}", engine.link_state());
    let answered = {
        let mut stdout = io::stdout().lock();
        protocol::serve(
            &engine,
            &rx,
            &mut stdout,
            signals.shutdown_flag(),
            signals.reconnect_flag(),
        )
    };

    let reason = if signals.should_shutdown() {
        "signal"
    } else {
        "input closed"
    };
    engine.shutdown(reason);
    let answered = answered?;
    eprintln!("[SBIN-SERVE] stopped ({reason}) after {answered} requests");
    Ok(())
}

// ---------------------------------------------------------------------------
// Inspection commands
// ---------------------------------------------------------------------------

fn run_status(cli: &Cli) -> Result<(), CliError> {
    let engine = open_engine(cli)?;
    let bins = engine.bin_status()?;

    match output_mode(cli) {
        OutputMode::Human => print_bins(&bins),
        OutputMode::Json => {
            let payload = json!({
                "command": "status",
                "bins": serde_json::to_value(&bins)?,
                "needs_emptying": bins
                    .iter()
                    .filter(|b| b.needs_emptying)
                    .map(|b| b.color.as_str())
                    .collect::<Vec<_>>(),
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_history(cli: &Cli, args: &HistoryArgs) -> Result<(), CliError> {
    let engine = open_engine(cli)?;
    let history = engine.history(args.limit)?;

    match output_mode(cli) {
        OutputMode::Human => print_history(&history),
        OutputMode::Json => {
            let payload = json!({
                "command": "history",
                "count": history.len(),
                "history": serde_json::to_value(&history)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_empty(cli: &Cli, args: &EmptyArgs) -> Result<(), CliError> {
    let engine = open_engine(cli)?;
    let bin = engine.empty_bin(&args.color)?;

    match output_mode(cli) {
        OutputMode::Human => {
            println!(
                "Emptied {} bin at {}",
                paint_bin(bin.color.as_str()),
                bin.last_emptied
            );
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "empty",
                "bin": serde_json::to_value(&bin)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_stats(cli: &Cli) -> Result<(), CliError> {
    let engine = open_engine(cli)?;
    let stats = engine.usage_stats()?;
    let detections = engine.detection_count()?;

    match output_mode(cli) {
        OutputMode::Human => {
            print_stats(&stats);
            println!("\nTotal detections: {detections}");
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "stats",
                "detections": detections,
                "stats": serde_json::to_value(&stats)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn print_bins(bins: &[BinStatus]) {
    println!("{}", "Bin status".bold());
    for bin in bins {
        let line = format!(
            "  {:<8} {}  {:5.1}%  {:>4} items  {:>5.1}/{:.1} L",
            bin.color,
            gauge(bin.fill_percent, GAUGE_WIDTH),
            bin.fill_percent,
            bin.item_count,
            bin.fill_level,
            bin.capacity,
        );
        if bin.needs_emptying {
            println!("{}  {}", line.red(), "EMPTY ME".red().bold());
        } else {
            println!("{line}");
        }
    }
}

fn print_history(history: &[DetectionRecord]) {
    println!("{}", "Recent detections".bold());
    if history.is_empty() {
        println!("  (none)");
    }
    for record in history {
        println!(
            "  {}  {:<20} -> {:<8} {:.2}",
            record.timestamp,
            record.item_name,
            paint_bin(record.bin_color.as_str()),
            record.confidence,
        );
    }
}

fn print_stats(stats: &[UsageStat]) {
    println!("{}", "Learned mappings".bold());
    if stats.is_empty() {
        println!("  (none yet)");
    }
    for stat in stats {
        println!(
            "  {:<20} -> {:<8} used {}x",
            stat.item_name,
            paint_bin(stat.bin_color.as_str()),
            stat.usage_count,
        );
    }
}

fn paint_bin(color: &str) -> ColoredString {
    match color {
        "yellow" => color.yellow(),
        "green" => color.green(),
        "brown" => color.truecolor(150, 90, 40),
        _ => color.bold(),
    }
}

fn paint_actuation(status: &ActuationStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        ActuationStatus::Delivered => text.green(),
        ActuationStatus::Simulated { .. } => text.cyan(),
        ActuationStatus::Degraded { .. } | ActuationStatus::TimedOut { .. } => text.yellow(),
        ActuationStatus::Rejected { .. } => text.red(),
    }
}

// ---------------------------------------------------------------------------
// Config command
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
            let config = load_config(cli)?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
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
                            "code": e.code(),
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

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("SMARTBIN_OUTPUT_FORMAT").ok();
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_flag_wins_over_env_and_tty() {
        assert_eq!(
            resolve_output_mode(true, Some("human"), true),
            OutputMode::Json
        );
    }

    #[test]
    fn env_mode_overrides_tty_detection() {
        assert_eq!(
            resolve_output_mode(false, Some(" JSON "), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("human"), false),
            OutputMode::Human
        );
    }

    #[test]
    fn auto_mode_follows_tty() {
        assert_eq!(resolve_output_mode(false, None, true), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, Some("auto"), false), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("bogus"), true), OutputMode::Human);
    }

    #[test]
    fn classify_parses_with_flags() {
        let cli = Cli::try_parse_from([
            "smartbin",
            "--json",
            "classify",
            "plastic_bottle",
            "--confidence",
            "0.92",
            "--interactive",
        ])
        .expect("parse");
        assert!(cli.json);
        let Command::Classify(args) = cli.command else {
            panic!("expected classify");
        };
        assert_eq!(args.item, "plastic_bottle");
        assert!((args.confidence - 0.92).abs() < f64::EPSILON);
        assert!(args.interactive);
    }

    #[test]
    fn classify_defaults_to_full_confidence_auto() {
        let cli = Cli::try_parse_from(["smartbin", "classify", "paper"]).expect("parse");
        let Command::Classify(args) = cli.command else {
            panic!("expected classify");
        };
        assert!((args.confidence - 1.0).abs() < f64::EPSILON);
        assert!(!args.interactive);
    }

    #[test]
    fn simulate_parses_with_all_flags() {
        let cli = Cli::try_parse_from([
            "smartbin",
            "simulate",
            "--count",
            "25",
            "--interval-ms",
            "100",
            "--seed",
            "7",
        ])
        .expect("parse");
        let Command::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.count, 25);
        assert_eq!(args.interval_ms, 100);
        assert_eq!(args.seed, Some(7));

        let defaults = SimulateArgs::default();
        assert_eq!(defaults.count, 10);
        assert!(defaults.seed.is_none());
    }

    #[test]
    fn global_flags_accepted_after_subcommand() {
        let cli = Cli::try_parse_from([
            "smartbin",
            "history",
            "--limit",
            "5",
            "--config",
            "/tmp/smartbin.toml",
            "--no-color",
        ])
        .expect("parse");
        assert!(cli.no_color);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/smartbin.toml")));
        let Command::History(args) = cli.command else {
            panic!("expected history");
        };
        assert_eq!(args.limit, Some(5));
    }

    #[test]
    fn teach_and_empty_require_positionals() {
        assert!(Cli::try_parse_from(["smartbin", "teach", "jar"]).is_err());
        assert!(Cli::try_parse_from(["smartbin", "empty"]).is_err());
        assert!(Cli::try_parse_from(["smartbin", "teach", "jar", "yellow"]).is_ok());
    }

    #[test]
    fn store_errors_map_to_exit_codes() {
        let user = CliError::from(SbinError::BinNotFound {
            color: "purple".to_string(),
        });
        assert_eq!(user.exit_code(), 1);
        let runtime = CliError::from(SbinError::storage("open", "disk gone"));
        assert_eq!(runtime.exit_code(), 2);
        let internal = CliError::from(SbinError::Serialization {
            context: "json",
            details: "bad".to_string(),
        });
        assert_eq!(internal.exit_code(), 3);
    }

    #[test]
    fn help_lists_command_surface() {
        let help = Cli::command().render_long_help().to_string();
        for name in [
            "classify", "status", "history", "empty", "stats", "teach", "manual", "simulate",
            "serve", "config", "completions",
        ] {
            assert!(help.contains(name), "help missing {name}");
        }
    }

    #[test]
    fn simulated_catalog_targets_default_bins() {
        let config = Config::default();
        for (item, bin, confidence) in SIMULATED_DETECTIONS {
            assert_eq!(
                config.mapping.defaults.get(item).map(String::as_str),
                Some(bin),
                "{item}"
            );
            assert!((0.0..=1.0).contains(&confidence));
        }
    }

    #[test]
    fn custom_bin_colors_render_without_a_hue() {
        for color in ["blue", "red", "purple"] {
            let painted = paint_bin(color);
            assert_eq!(&*painted, color);
            assert!(painted.fgcolor().is_none(), "{color} got a hue");
        }
        assert!(paint_bin("yellow").fgcolor().is_some());
    }
}
