use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::io::Read;
use std::path::{Path, PathBuf};

use openquery_core::{ExplainData, ExplainEvaluation, PolicyMode, PolicyProfile};
use openquery_engine::PolicyEngine;
use openquery_sql::Classifier;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Default profile path, relative to the working directory
const DEFAULT_CONFIG: &str = "openquery.toml";

/// Environment variable overriding the profile path
const CONFIG_ENV: &str = "OPENQUERY_CONFIG";

/// Exit code for statements or plans blocked by policy
const EXIT_POLICY_BLOCKED: i32 = 3;

/// OpenQuery - SQL policy checks for generated queries
#[derive(Parser)]
#[command(name = "openquery")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to policy profile (default: openquery.toml, or $OPENQUERY_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the profile's policy mode (safe or standard)
    #[arg(short, long, global = true)]
    mode: Option<PolicyMode>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate SQL against the policy and print the statement to run
    Check {
        /// SQL text (read from --file or stdin when omitted)
        sql: Option<String>,

        /// Read SQL from a file
        #[arg(short, long, conflicts_with = "sql")]
        file: Option<PathBuf>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the intent of SQL (read, write, ddl or other)
    Classify {
        /// SQL text (read from --file or stdin when omitted)
        sql: Option<String>,

        /// Read SQL from a file
        #[arg(short, long, conflicts_with = "sql")]
        file: Option<PathBuf>,
    },

    /// Gate EXPLAIN estimates against the plan thresholds
    Explain {
        /// Estimated row count
        #[arg(long)]
        rows: u64,

        /// Estimated plan cost
        #[arg(long)]
        cost: f64,

        /// The plan contains a sequential scan
        #[arg(long)]
        seq_scan: bool,

        /// Planner warning to pass through (repeatable)
        #[arg(long = "warning")]
        warnings: Vec<String>,

        /// Print the evaluation as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    init_tracing(cli.verbose);

    let profile = load_profile(cli.config.as_deref(), cli.mode, cli.verbose)?;
    let engine = PolicyEngine::from_profile(&profile)?;

    if cli.verbose {
        eprintln!("{} {} mode", "Using".cyan(), profile.policy.mode);
    }

    match cli.command {
        Commands::Check { sql, file, json } => {
            let sql = read_sql(sql, file.as_deref())?;
            check_command(&engine, &sql, json)
        }
        Commands::Classify { sql, file } => {
            let sql = read_sql(sql, file.as_deref())?;
            println!("{}", Classifier::classify(&sql).classification);
            Ok(())
        }
        Commands::Explain {
            rows,
            cost,
            seq_scan,
            warnings,
            json,
        } => {
            let mut data = ExplainData::new(rows, cost).with_seq_scan(seq_scan);
            data.warnings = warnings;
            explain_command(&engine, &data, json)
        }
        Commands::Config { json } => config_command(&engine, json),
    }
}

/// Install the stderr log layer; `--verbose` forces debug output
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Resolve the profile path: `--config`, then `$OPENQUERY_CONFIG`, then
/// `openquery.toml` when it exists
fn resolve_config_path(explicit: Option<&Path>, env: Option<String>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = env.filter(|p| !p.trim().is_empty()) {
        return Some(PathBuf::from(path));
    }

    let default = Path::new(DEFAULT_CONFIG);
    default.exists().then(|| default.to_path_buf())
}

fn load_profile(
    explicit: Option<&Path>,
    mode: Option<PolicyMode>,
    verbose: bool,
) -> Result<PolicyProfile> {
    let mut profile = match resolve_config_path(explicit, std::env::var(CONFIG_ENV).ok()) {
        Some(path) => {
            if verbose {
                eprintln!("{} {}", "Loading profile from:".cyan(), path.display());
            }
            PolicyProfile::from_file(&path)
                .with_context(|| format!("Failed to load profile {}", path.display()))?
        }
        None => {
            if verbose {
                eprintln!("{}", "No profile found, using defaults".yellow());
            }
            PolicyProfile::default()
        }
    };

    if let Some(mode) = mode {
        profile.policy.mode = mode;
        profile
            .effective_safe_mode_config()
            .validate()
            .with_context(|| format!("Profile overrides are invalid in {} mode", mode))?;
    }

    Ok(profile)
}

/// SQL from the positional argument, a file, or stdin
fn read_sql(sql: Option<String>, file: Option<&Path>) -> Result<String> {
    if let Some(sql) = sql {
        return Ok(sql);
    }
    if let Some(path) = file {
        return std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read SQL from {}", path.display()));
    }

    let mut buffer = String::new();
    std::io::stdin()
        .read_to_string(&mut buffer)
        .context("Failed to read SQL from stdin")?;
    Ok(buffer)
}

/// Check command - validate, classify and print the statement to run
fn check_command(engine: &PolicyEngine, sql: &str, json: bool) -> Result<()> {
    let checked = engine.classify_and_validate(sql);
    let validation = &checked.validation;

    if json {
        let mut value = serde_json::to_value(validation.to_report())?;
        value["classification"] = serde_json::to_value(checked.classification.classification)?;
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!(
            "{} {}",
            "Classification:".bold(),
            checked.classification.classification
        );

        if let Some(sql) = validation.rewritten_sql() {
            println!("{} {}", "✓".green(), validation.reason().green());
            println!();
            println!("{}", sql);
        } else {
            println!("{} {}", "✗".red(), validation.reason().red().bold());
            if let Some(details) = validation.details() {
                println!();
                for line in details.lines() {
                    println!("  {}", line);
                }
            }
            if let Some(fix) = validation.suggested_fix() {
                println!();
                println!("{} {}", "Suggested fix:".cyan(), fix);
            }
        }

        for warning in &validation.warnings {
            eprintln!("{} {}", "warning:".yellow().bold(), warning);
        }
    }

    if !validation.is_allowed() {
        std::process::exit(EXIT_POLICY_BLOCKED);
    }

    Ok(())
}

/// Explain command - gate plan estimates
fn explain_command(engine: &PolicyEngine, data: &ExplainData, json: bool) -> Result<()> {
    let evaluation = engine.evaluate_explain(data);

    if json {
        println!("{}", serde_json::to_string_pretty(&evaluation)?);
    } else {
        print_explain(&evaluation);
    }

    if evaluation.has_blockers() {
        std::process::exit(EXIT_POLICY_BLOCKED);
    }

    Ok(())
}

fn print_explain(evaluation: &ExplainEvaluation) {
    let summary = &evaluation.summary;
    println!(
        "{} rows={} cost={:.2} seq_scan={}",
        "Plan:".bold(),
        summary.estimated_rows,
        summary.estimated_cost,
        summary.has_seq_scan
    );

    if evaluation.allowed {
        println!("{}", "✓ Plan within thresholds".green());
    } else {
        println!("{}", "✗ Plan blocked".red().bold());
        for blocker in &evaluation.blockers {
            println!("  {}", blocker.red());
        }
    }

    for warning in &evaluation.warnings {
        eprintln!("{} {}", "warning:".yellow().bold(), warning);
    }
}

/// Config command - print the effective configuration
fn config_command(engine: &PolicyEngine, json: bool) -> Result<()> {
    let policy = engine.config();
    let safe_mode = engine.safe_mode_config();

    if json {
        let value = serde_json::json!({
            "policy": policy,
            "safeMode": safe_mode,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("{}", "[policy]".bold());
    println!("mode = {}", policy.mode);
    println!("dialect = {}", serde_json::to_string(&policy.dialect)?);
    println!("allow_multiple_statements = {}", policy.allow_multiple_statements);
    println!();
    println!("{}", "[safe_mode]".bold());
    println!("disallow_select_star = {}", safe_mode.disallow_select_star);
    println!("enforce_limit = {}", safe_mode.enforce_limit);
    println!("default_limit = {}", safe_mode.default_limit);
    println!("max_limit = {}", safe_mode.max_limit);
    println!(
        "blocked_tables = {}",
        serde_json::to_string(&safe_mode.blocked_tables)?
    );
    println!("require_explain = {}", safe_mode.require_explain);
    println!("max_estimated_rows = {}", safe_mode.max_estimated_rows);
    println!("max_estimated_cost = {}", safe_mode.max_estimated_cost);

    Ok(())
}
