//! agentrt - CLI entry point.
//!
//! The scheduler itself is a library meant to be embedded by a caller that
//! drives real LLM traffic. This binary only gives an operator read access
//! to the state C8 and C10 persist to disk, plus a clean process to boot a
//! bare [`agentrt::Runtime`] against a config file.

use std::fs;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{debug, info};

use agentrt::cli::{Cli, CheckpointCommand, Command, OutputFormat};
use agentrt::checkpoint::CheckpointManager;
use agentrt::clock::{Clock, SystemClock};
use agentrt::config::RuntimeConfig;
use agentrt::coordinator::Coordinator;
use agentrt::metrics::{EventKind, Sample};

fn setup_logging(config: &RuntimeConfig, cli_log_level: Option<&str>) -> Result<()> {
    let log_dir = config.config_dir.join("logs");
    fs::create_dir_all(&log_dir).context("failed to create log directory")?;

    let level_str = cli_log_level.unwrap_or(&config.log_level);
    let level: tracing::Level = level_str.parse().unwrap_or_else(|_| {
        eprintln!("warning: unknown log level '{level_str}', defaulting to info");
        tracing::Level::INFO
    });

    let log_file = fs::File::create(log_dir.join("agentrt.log")).context("failed to create log file")?;
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!(level = %level, "logging initialized");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = RuntimeConfig::load(cli.config.as_deref());
    setup_logging(&config, cli.log_level.as_deref())?;
    debug!(command = ?cli.command, "main: dispatching command");

    match cli.command {
        Some(Command::Status { format }) => cmd_status(&config, format).await,
        Some(Command::Queue { format }) => cmd_queue(&config, format).await,
        Some(Command::Instances { format }) => cmd_instances(&config, format).await,
        Some(Command::Metrics { period_ms, format }) => cmd_metrics(&config, period_ms, format).await,
        Some(Command::Checkpoint { command }) => cmd_checkpoint(&config, command).await,
        None => cmd_status(&config, OutputFormat::Text).await,
    }
}

fn coordinator_for(config: &RuntimeConfig) -> Coordinator {
    Coordinator::new(config.config_dir.join("runtime"), config.coordinator.clone())
}

fn checkpoints_for(config: &RuntimeConfig) -> CheckpointManager {
    CheckpointManager::new(config.config_dir.join("checkpoints"), agentrt::checkpoint::CheckpointConfig::default())
}

async fn cmd_status(config: &RuntimeConfig, format: OutputFormat) -> Result<()> {
    let now = SystemClock.now_ms();
    let coordinator = coordinator_for(config);
    let instances = coordinator.active_instances(now).await;
    let checkpoints = checkpoints_for(config).get_stats(now).await;

    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "profile": config.profile,
                "active_instances": instances.len(),
                "checkpoints": checkpoints,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text | OutputFormat::Table => {
            println!("agentrt status");
            println!("--------------");
            println!("profile:          {:?}", config.profile);
            println!("config dir:       {}", config.config_dir.display());
            println!("active instances: {}", instances.len());
            println!("checkpoints:      {} ({} expired)", checkpoints.total, checkpoints.expired);
        }
    }
    Ok(())
}

async fn cmd_queue(config: &RuntimeConfig, format: OutputFormat) -> Result<()> {
    let now = SystemClock.now_ms();
    let coordinator = coordinator_for(config);
    let snapshots = coordinator.remote_queue_states(now).await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&snapshots)?),
        OutputFormat::Text | OutputFormat::Table => {
            if snapshots.is_empty() {
                println!("no broadcasted queue state found under {}", config.config_dir.join("runtime").display());
                return Ok(());
            }
            println!("{:<38} {:>8} {:>8} {:>10}", "INSTANCE", "PENDING", "ACTIVE", "AVG_MS");
            for s in &snapshots {
                println!("{:<38} {:>8} {:>8} {:>10.1}", s.instance_id, s.pending_task_count, s.active_orchestrations, s.avg_latency_ms);
            }
        }
    }
    Ok(())
}

async fn cmd_instances(config: &RuntimeConfig, format: OutputFormat) -> Result<()> {
    let now = SystemClock.now_ms();
    let coordinator = coordinator_for(config);
    let instances = coordinator.active_instances(now).await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&instances)?),
        OutputFormat::Text | OutputFormat::Table => {
            if instances.is_empty() {
                println!("no live instances registered under {}", config.config_dir.join("runtime").display());
                return Ok(());
            }
            println!("{:<38} {:>8} {:<30}", "INSTANCE", "PID", "CWD");
            for i in &instances {
                println!("{:<38} {:>8} {:<30}", i.instance_id, i.pid, i.cwd);
            }
        }
    }
    Ok(())
}

async fn cmd_metrics(config: &RuntimeConfig, period_ms: u64, format: OutputFormat) -> Result<()> {
    let samples = read_logged_samples(&config.metrics.metrics_dir)?;
    let now = samples.iter().map(|s| s.ts_ms).max().unwrap_or_else(|| SystemClock.now_ms());
    let cutoff = now.saturating_sub(period_ms);
    let in_period: Vec<&Sample> = samples.iter().filter(|s| s.ts_ms >= cutoff).collect();

    let completions = in_period.iter().filter(|s| s.kind == EventKind::Completion).count();
    let preemptions = in_period.iter().filter(|s| s.kind == EventKind::Preemption).count();
    let rate_limit_hits = in_period.iter().filter(|s| s.kind == EventKind::RateLimitHit).count();
    let steals = in_period.iter().filter(|s| s.kind == EventKind::Steal).count();

    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "period_ms": period_ms,
                "sample_count": in_period.len(),
                "completions": completions,
                "preemptions": preemptions,
                "rate_limit_hits": rate_limit_hits,
                "steals": steals,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text | OutputFormat::Table => {
            if samples.is_empty() {
                println!(
                    "no metrics log found under {} (enable metrics.enable_logging to persist samples)",
                    config.metrics.metrics_dir.display()
                );
                return Ok(());
            }
            println!("agentrt metrics (last {period_ms}ms, {} samples)", in_period.len());
            println!("-------------------------------------------");
            println!("completions:      {completions}");
            println!("preemptions:      {preemptions}");
            println!("rate limit hits:  {rate_limit_hits}");
            println!("steals:           {steals}");
        }
    }
    Ok(())
}

fn read_logged_samples(dir: &std::path::Path) -> Result<Vec<Sample>> {
    let Ok(entries) = std::fs::read_dir(dir) else { return Ok(Vec::new()) };
    let mut samples = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        let contents = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        for line in contents.lines() {
            if let Ok(sample) = serde_json::from_str::<Sample>(line) {
                samples.push(sample);
            }
        }
    }
    samples.sort_by_key(|s| s.ts_ms);
    Ok(samples)
}

async fn cmd_checkpoint(config: &RuntimeConfig, command: CheckpointCommand) -> Result<()> {
    let manager = checkpoints_for(config);
    match command {
        CheckpointCommand::List { format } => {
            let checkpoints = manager.list_all().await;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&checkpoints)?),
                OutputFormat::Text | OutputFormat::Table => {
                    if checkpoints.is_empty() {
                        println!("no checkpoints found");
                        return Ok(());
                    }
                    println!("{:<24} {:<24} {:<10} {:>8}", "TASK", "CHECKPOINT", "PRIORITY", "PROGRESS");
                    for c in &checkpoints {
                        println!("{:<24} {:<24} {:<10} {:>7.0}%", c.task_id, c.id, c.priority, c.progress * 100.0);
                    }
                }
            }
        }
        CheckpointCommand::Show { task_id, format } => match manager.load(&task_id).await {
            Some(c) => match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&c)?),
                OutputFormat::Text | OutputFormat::Table => {
                    println!("task:      {}", c.task_id);
                    println!("id:        {}", c.id);
                    println!("source:    {}", c.source);
                    println!("provider:  {}:{}", c.provider, c.model);
                    println!("priority:  {}", c.priority);
                    println!("progress:  {:.0}%", c.progress * 100.0);
                    println!("created:   {}", c.created_at);
                    println!("ttl_ms:    {}", c.ttl_ms);
                }
            },
            None => {
                println!("no checkpoint found for task '{task_id}'");
            }
        },
        CheckpointCommand::Delete { task_id } => {
            manager.delete(&task_id).await;
            println!("deleted checkpoint for task '{task_id}'");
        }
    }
    Ok(())
}
