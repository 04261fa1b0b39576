//! TaskWarden CLI
//!
//! Inspects and maintains the checkpoint store from the command line.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::info;

use taskwarden::checkpoint::{self, CheckpointManager};
use taskwarden::cli::{Cli, Command, OutputFormat, get_log_path};
use taskwarden::config::{Config, days_to_duration};
use taskwarden::domain::{Checkpoint, CheckpointStatus, CheckpointStatusView, RecoverySummary};
use taskwarden::error::{ErrorCode, ErrorInfo};

fn setup_logging(level: &str) -> Result<()> {
    let log_path = get_log_path();
    let log_dir = log_path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Write to the log file, never stdout/stderr
    let level: tracing::Level = level
        .parse()
        .map_err(|_| eyre::eyre!("Invalid log level: {}", level))?;
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {})", level);
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let format = cli.format.clone();

    if let Err(e) = run(cli).await {
        report_error(&e, &format);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_ref())
        .context("Failed to load configuration")
        .and_then(|config| config.validate().map(|_| config))
        .map_err(|e| ErrorInfo::new(ErrorCode::ConfigError, format!("{:#}", e)))?;

    let level = cli
        .log_level
        .clone()
        .or_else(|| config.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    setup_logging(&level).context("Failed to setup logging")?;

    let format = cli.format;
    if let Command::Config = cli.command {
        return cmd_config(&config, &format);
    }

    let store_dir = config.storage.resolved_checkpoint_dir();
    info!(store_dir = %store_dir.display(), "Opening checkpoint store");
    let checkpoints = CheckpointManager::spawn(&store_dir, &config.checkpoint)
        .with_context(|| format!("Failed to open checkpoint store at {}", store_dir.display()))?;

    let result = match cli.command {
        Command::List { status } => cmd_list(&checkpoints, status, &format).await,
        Command::Status { task_id } => cmd_status(&checkpoints, &task_id, &format).await,
        Command::Summary { task_id } => cmd_summary(&checkpoints, &task_id, &format).await,
        Command::Pause { task_id } => cmd_pause(&checkpoints, &task_id, &format).await,
        Command::Resume { task_id } => cmd_resume(&checkpoints, &task_id, &format).await,
        Command::Delete { task_id } => cmd_delete(&checkpoints, &task_id, &format).await,
        Command::Cleanup { max_age_days } => cmd_cleanup(&checkpoints, &config, max_age_days, &format).await,
        Command::Recover => cmd_recover(&checkpoints, &format).await,
        Command::Config => Ok(()),
    };

    checkpoints.shutdown().await;
    result
}

/// Print a failure as `{message, code}` in JSON mode, or a red line otherwise
fn report_error(report: &eyre::Report, format: &OutputFormat) {
    let info = ErrorInfo::from(report);
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(&info) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{{\"message\":\"{}\",\"code\":\"{}\"}}", info.message, info.code),
        },
        OutputFormat::Text => {
            eprintln!("{} {} ({})", "Error:".red().bold(), info.message, info.code);
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn colored_status(status: CheckpointStatus) -> colored::ColoredString {
    let label = status.to_string();
    match status {
        CheckpointStatus::InProgress => label.cyan(),
        CheckpointStatus::Paused => label.yellow(),
        CheckpointStatus::Failed => label.red(),
        CheckpointStatus::Completed => label.green(),
    }
}

fn format_timestamp(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

async fn cmd_list(checkpoints: &CheckpointManager, status: Option<CheckpointStatus>, format: &OutputFormat) -> Result<()> {
    let all: Vec<Checkpoint> = checkpoints
        .list_checkpoints()
        .await?
        .into_iter()
        .filter(|cp| status.is_none_or(|s| cp.status == s))
        .collect();

    if *format == OutputFormat::Json {
        return print_json(&all);
    }

    if all.is_empty() {
        println!("No checkpoints found");
        return Ok(());
    }

    println!("{:<32} {:<12} {:>8} {:>6}  {}", "TASK", "STATUS", "PROGRESS", "RETRY", "UPDATED");
    for cp in &all {
        println!(
            "{:<32} {:<12} {:>7}% {:>6}  {}",
            cp.task_id,
            colored_status(cp.status),
            cp.progress_percent(),
            cp.retry_count,
            format_timestamp(cp.timestamp)
        );
    }
    Ok(())
}

async fn cmd_status(checkpoints: &CheckpointManager, task_id: &str, format: &OutputFormat) -> Result<()> {
    let view: CheckpointStatusView = checkpoints.get_checkpoint_status(task_id).await?;

    if *format == OutputFormat::Json {
        return print_json(&view);
    }

    match view.status {
        None => println!("No checkpoint for {}", task_id),
        Some(status) => {
            println!("Task:      {}", task_id);
            println!("Status:    {}", colored_status(status));
            if let Some(iteration) = view.iteration {
                println!("Iteration: {}", iteration);
            }
            if let Some(point) = &view.failure_point {
                println!("Failed at: {}", point);
            }
            if let Some(ts) = view.timestamp {
                println!("Updated:   {}", format_timestamp(ts));
            }
        }
    }
    Ok(())
}

async fn cmd_summary(checkpoints: &CheckpointManager, task_id: &str, format: &OutputFormat) -> Result<()> {
    let summary: Option<RecoverySummary> = checkpoints.get_recovery_summary(task_id).await?;

    if *format == OutputFormat::Json {
        return print_json(&summary);
    }

    let Some(summary) = summary else {
        println!("No checkpoint for {}", task_id);
        return Ok(());
    };

    let recoverable = if summary.can_recover { "yes".green() } else { "no".red() };
    println!("Task:          {}", summary.task_id);
    println!("Status:        {}", colored_status(summary.status));
    println!("Recoverable:   {}", recoverable);
    println!(
        "Progress:      {}% ({} of {} nodes)",
        summary.progress, summary.completed_nodes, summary.total_iterations
    );
    println!("Tokens saved:  ~{}", summary.estimated_tokens_saved);
    println!("Retries:       {}", summary.retry_count);
    if let Some(reason) = &summary.failure_reason {
        println!("Last failure:  {}", reason);
    }
    println!("Checkpointed:  {}", format_timestamp(summary.last_checkpoint));
    Ok(())
}

async fn cmd_pause(checkpoints: &CheckpointManager, task_id: &str, format: &OutputFormat) -> Result<()> {
    let paused = checkpoints.pause_checkpoint(task_id).await?;
    let Some(cp) = paused else {
        return Err(ErrorInfo::new(ErrorCode::NotFound, format!("Checkpoint not found: {}", task_id)).into());
    };

    if *format == OutputFormat::Json {
        return print_json(&cp.status_view());
    }
    println!("{} {}", "Paused".yellow(), cp.task_id);
    Ok(())
}

async fn cmd_resume(checkpoints: &CheckpointManager, task_id: &str, format: &OutputFormat) -> Result<()> {
    let cp = checkpoints.resume_from_checkpoint(task_id).await?;

    if *format == OutputFormat::Json {
        return print_json(&cp.status_view());
    }
    println!(
        "{} {} at node {} (retry {})",
        "Resumed".cyan(),
        cp.task_id,
        cp.current_node_index,
        cp.retry_count
    );
    Ok(())
}

async fn cmd_delete(checkpoints: &CheckpointManager, task_id: &str, format: &OutputFormat) -> Result<()> {
    let deleted = checkpoints.delete_checkpoint(task_id).await?;

    if *format == OutputFormat::Json {
        return print_json(&serde_json::json!({ "taskId": task_id, "deleted": deleted }));
    }
    if deleted {
        println!("Deleted {}", task_id);
    } else {
        println!("No checkpoint for {}", task_id);
    }
    Ok(())
}

async fn cmd_cleanup(
    checkpoints: &CheckpointManager,
    config: &Config,
    max_age_days: Option<u64>,
    format: &OutputFormat,
) -> Result<()> {
    let max_age = match max_age_days {
        Some(days) => days_to_duration(days)
            .map_err(|e| ErrorInfo::new(ErrorCode::ConfigError, format!("Invalid --max-age-days: {}", e)))?,
        None => config.checkpoint.retention(),
    };
    let removed = checkpoints.cleanup_old_checkpoints(max_age).await?;

    if *format == OutputFormat::Json {
        return print_json(&serde_json::json!({ "removed": removed }));
    }
    println!("Removed {} completed checkpoint(s)", removed);
    Ok(())
}

async fn cmd_recover(checkpoints: &CheckpointManager, format: &OutputFormat) -> Result<()> {
    let stats = checkpoint::recover(checkpoints).await?;

    if *format == OutputFormat::Json {
        return print_json(&stats);
    }
    if stats.has_work() {
        println!("Recovery: {}", stats);
        println!("Marked {} interrupted checkpoint(s) as paused", stats.marked_paused);
    } else {
        println!("Nothing to recover");
    }
    Ok(())
}

fn cmd_config(config: &Config, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(config),
        OutputFormat::Text => {
            print!("{}", serde_yaml::to_string(config)?);
            println!("# checkpoint dir: {}", config.storage.resolved_checkpoint_dir().display());
            Ok(())
        }
    }
}
