//! Vigil Agent - compliance audit driver
//!
//! Runs a control profile against the local host, or against a captured
//! JSON snapshot, and reports the results. The built-in syslog profile is
//! used unless a YAML profile is given.

mod output;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use output::{ResultFilter, TableSink, TextSink};
use std::collections::BTreeMap;
use std::io::{IsTerminal, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, error, info, warn};
use vigil_audit::{
    classify, AuditOptions, Auditor, CancelToken, JsonSink, MemorySnapshot, ReportSink, RunReport,
    SystemSnapshot,
};
use vigil_checks::ControlRegistry;
use vigil_common::{Config, LogConfig, LogFormat};
use vigil_core::{Severity, Value};

/// Exit status of a run that was interrupted
const EXIT_CANCELLED: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
    Table,
}

/// Vigil compliance agent
#[derive(Parser, Debug)]
#[command(name = "vigil-agent")]
#[command(version)]
#[command(about = "Runs compliance controls against a host", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, json, compact)
    #[arg(long)]
    log_format: Option<String>,

    /// YAML profile file, or a directory of profiles
    #[arg(short, long)]
    profile: Option<String>,

    /// Audit a captured JSON snapshot instead of the local host
    #[arg(short, long)]
    snapshot: Option<String>,

    /// Output format for results
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Only show failed controls
    #[arg(long)]
    failures_only: bool,

    /// Only run controls at or above a severity (low, medium, high, critical)
    #[arg(long)]
    min_severity: Option<String>,

    /// Only run the given control (repeatable)
    #[arg(long = "control", value_name = "ID")]
    controls: Vec<String>,

    /// Override a profile input; the value is read as JSON when it parses, else as a string
    #[arg(short, long = "input", value_name = "NAME=VALUE", value_parser = parse_input)]
    inputs: Vec<(String, Value)>,

    /// Maximum controls evaluated concurrently
    #[arg(long)]
    concurrency: Option<usize>,

    /// Timeout of a single probe in milliseconds
    #[arg(long)]
    probe_timeout_ms: Option<u64>,

    /// Show the detected platform and exit
    #[arg(long)]
    platform_info: bool,

    /// Re-run the audit every SECONDS until interrupted
    #[arg(long, value_name = "SECONDS")]
    watch: Option<u64>,
}

fn default_config_path() -> String {
    String::from("/etc/vigil/agent.toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let (config, config_path) = load_config(args.config.as_deref())?;

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let log_format = args.log_format.as_deref().unwrap_or(&config.logging.format);
    let log_config = LogConfig::new()
        .level(log_level)
        .format(LogFormat::parse(log_format));
    vigil_common::init_logging_with_config(log_config)?;

    info!("Vigil Agent v{}", env!("CARGO_PKG_VERSION"));
    debug!("Platform: {} ({})", std::env::consts::OS, std::env::consts::ARCH);
    match &config_path {
        Some(path) => info!("Loaded config from: {}", path),
        None => debug!("Config file not found, using defaults"),
    }

    let snapshot = open_snapshot(args.snapshot.as_deref().or(config.audit.snapshot.as_deref()))?;

    if args.platform_info {
        return print_platform_info(snapshot, args.format).await;
    }

    let registry = load_registry(&args, &config)?;
    let overrides = merge_overrides(&config, &args.inputs);
    let options = AuditOptions {
        concurrency: args.concurrency.unwrap_or(config.audit.concurrency).max(1),
        probe_timeout: Duration::from_millis(
            args.probe_timeout_ms.unwrap_or(config.audit.probe_timeout_ms),
        ),
    };
    debug!(
        "Concurrency {}, probe timeout {:?}",
        options.concurrency, options.probe_timeout
    );

    let auditor = Auditor::new(registry, snapshot).with_options(options);
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal");
                cancel.cancel();
            }
        });
    }

    let filter = ResultFilter {
        failures_only: args.failures_only,
    };

    if let Some(seconds) = args.watch {
        let interval = Duration::from_secs(seconds.max(1));
        return run_watch(&auditor, &overrides, &cancel, interval, args.format, filter).await;
    }

    let report = run_audit(&auditor, &overrides, &cancel).await?;
    emit(&report, args.format, filter)?;

    let code = exit_code(&report);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Load the config file, falling back to defaults when the default path is absent
fn load_config(explicit: Option<&str>) -> Result<(Config, Option<String>)> {
    let path = match explicit {
        Some(path) => path.to_string(),
        None => {
            let path = default_config_path();
            if !Path::new(&path).exists() {
                return Ok((Config::default().merge_env(), None));
            }
            path
        }
    };

    let config = Config::from_file(&path)?;
    Ok((config.merge_env(), Some(path)))
}

fn open_snapshot(path: Option<&str>) -> Result<Arc<dyn SystemSnapshot>> {
    match path {
        Some(path) => {
            info!("Auditing captured snapshot: {}", path);
            let snapshot = MemorySnapshot::from_file(path)
                .with_context(|| format!("failed to load snapshot {}", path))?;
            Ok(Arc::new(snapshot))
        }
        None => local_snapshot(),
    }
}

#[cfg(unix)]
fn local_snapshot() -> Result<Arc<dyn SystemSnapshot>> {
    Ok(Arc::new(vigil_audit::LocalSnapshot::new()))
}

#[cfg(not(unix))]
fn local_snapshot() -> Result<Arc<dyn SystemSnapshot>> {
    bail!("auditing the local host requires a unix system; pass --snapshot instead")
}

fn load_registry(args: &Args, config: &Config) -> Result<ControlRegistry> {
    let mut registry = match args.profile.as_deref().or(config.audit.profile.as_deref()) {
        Some(path) if Path::new(path).is_dir() => vigil_checks::load_profiles_from_dir(path)?,
        Some(path) => vigil_checks::load_profile_from_file(path)?,
        None => {
            debug!("Using built-in syslog profile");
            vigil_checks::syslog_registry()?
        }
    };

    if let Some(name) = &args.min_severity {
        let Some(min) = Severity::parse(name) else {
            bail!("unknown severity: {}", name);
        };
        registry.retain_min_severity(min);
    }
    if !args.controls.is_empty() {
        registry.retain_ids(&args.controls);
        if registry.is_empty() {
            bail!("none of the requested controls are in profile {}", registry.name());
        }
    }
    Ok(registry)
}

/// Config file inputs, with command-line inputs taking precedence
fn merge_overrides(config: &Config, cli: &[(String, Value)]) -> BTreeMap<String, Value> {
    let mut overrides = config.inputs.clone();
    overrides.extend(cli.iter().cloned());
    overrides
}

fn parse_input(s: &str) -> std::result::Result<(String, Value), String> {
    let (name, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid input `{}`, expected NAME=VALUE", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("invalid input `{}`, the name is empty", s));
    }

    let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((name.to_string(), value))
}

async fn run_audit(
    auditor: &Auditor,
    overrides: &BTreeMap<String, Value>,
    cancel: &CancelToken,
) -> Result<RunReport> {
    match auditor.run(overrides, cancel).await {
        Ok(report) => Ok(report),
        Err(e) => {
            error!("Audit aborted [{}]: {}", e.code(), e);
            Err(e.into())
        }
    }
}

/// Re-run the audit on an interval until cancelled
async fn run_watch(
    auditor: &Auditor,
    overrides: &BTreeMap<String, Value>,
    cancel: &CancelToken,
    interval: Duration,
    format: OutputFormat,
    filter: ResultFilter,
) -> Result<()> {
    info!(
        "Auditing every {}s. Press Ctrl+C to exit.",
        interval.as_secs()
    );
    let mut timer = time::interval(interval);
    let mut runs = 0u64;

    loop {
        tokio::select! {
            _ = timer.tick() => {
                runs += 1;
                let report = run_audit(auditor, overrides, cancel).await?;
                emit(&report, format, filter)?;
                if report.cancelled {
                    break;
                }
                if !report.is_compliant() {
                    warn!(
                        "Run {}: {} failed, {} errors",
                        runs, report.summary.failed, report.summary.errors
                    );
                }
            }

            _ = cancel.cancelled() => break,
        }
    }

    info!("Agent shutdown complete after {} runs", runs);
    Ok(())
}

fn emit(report: &RunReport, format: OutputFormat, filter: ResultFilter) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    match format {
        OutputFormat::Json => JsonSink::new(&mut stdout).emit(&filter.apply(report))?,
        OutputFormat::Table => {
            let sink = TableSink::new(&mut stdout, filter);
            let mut sink = if std::io::stdout().is_terminal() {
                sink
            } else {
                sink.without_color()
            };
            sink.emit(report)?
        }
        OutputFormat::Text => TextSink::new(&mut stdout, filter).emit(report)?,
    }
    stdout.flush()?;
    Ok(())
}

/// 0 when compliant, 1 on failures or errors, 130 when interrupted
fn exit_code(report: &RunReport) -> i32 {
    if let Err(e) = report.ensure_complete() {
        warn!("{}", e);
        EXIT_CANCELLED
    } else if report.is_compliant() {
        0
    } else {
        warn!(
            "{} controls failed, score {:.1}",
            report.summary.failed + report.summary.errors,
            report.summary.score
        );
        1
    }
}

async fn print_platform_info(snapshot: Arc<dyn SystemSnapshot>, format: OutputFormat) -> Result<()> {
    let signals = tokio::task::spawn_blocking(move || snapshot.platform_facts()).await?;
    let facts = classify(&signals);

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({ "signals": signals, "facts": facts });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        _ => {
            println!("=== Platform Information ===\n");
            println!("  Hostname:         {}", signals.hostname.as_deref().unwrap_or("unknown"));
            println!("  Platform ID:      {}", signals.platform_id.as_deref().unwrap_or("unknown"));
            if !signals.id_like.is_empty() {
                println!("  Like:             {}", signals.id_like.join(" "));
            }
            if !signals.package_managers.is_empty() {
                println!("  Package managers: {}", signals.package_managers.join(", "));
            }
            println!("  Family:           {}", facts.family);
            println!("  Virtualization:   {}", facts.virtualization_role.as_str());
            if !facts.virtualization_system.is_empty() {
                println!("  System:           {}", facts.virtualization_system);
            }
        }
    }
    Ok(())
}
