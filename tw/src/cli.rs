//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::domain::CheckpointStatus;

/// TaskWarden - checkpoint inspection and recovery
#[derive(Parser)]
#[command(
    name = "tw",
    about = "Inspect, pause, resume and recover task checkpoints",
    version = env!("CARGO_PKG_VERSION"),
    after_help = "Logs are written to: ~/.local/share/taskwarden/logs/taskwarden.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// List checkpoints, newest first
    List {
        /// Only show checkpoints in this status
        #[arg(short, long)]
        status: Option<CheckpointStatus>,
    },

    /// Show a task's checkpoint status
    Status {
        /// Task id
        task_id: String,
    },

    /// Show what resuming a task would recover
    Summary {
        /// Task id
        task_id: String,
    },

    /// Mark a checkpoint paused
    Pause {
        /// Task id
        task_id: String,
    },

    /// Move a paused or failed checkpoint back to in-progress
    Resume {
        /// Task id
        task_id: String,
    },

    /// Delete a checkpoint
    Delete {
        /// Task id
        task_id: String,
    },

    /// Remove completed checkpoints older than the retention window
    Cleanup {
        /// Override the configured retention
        #[arg(long)]
        max_age_days: Option<u64>,
    },

    /// Mark interrupted checkpoints paused and report what can be resumed
    Recover,

    /// Print the effective configuration
    Config,
}

/// Output format for every command
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Path of the log file written by the `tw` binary
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskwarden")
        .join("logs")
        .join("taskwarden.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_list() {
        let cli = Cli::parse_from(["tw", "list"]);
        assert!(matches!(cli.command, Command::List { status: None }));
        assert_eq!(cli.format, OutputFormat::Text);
    }

    #[test]
    fn test_cli_parse_list_with_status() {
        let cli = Cli::parse_from(["tw", "list", "--status", "paused"]);
        assert!(matches!(
            cli.command,
            Command::List {
                status: Some(CheckpointStatus::Paused)
            }
        ));
    }

    #[test]
    fn test_cli_parse_global_format_after_subcommand() {
        let cli = Cli::parse_from(["tw", "status", "T1", "--format", "json"]);
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Command::Status { task_id } => assert_eq!(task_id, "T1"),
            _ => panic!("Expected status command"),
        }
    }

    #[test]
    fn test_cli_parse_cleanup_override() {
        let cli = Cli::parse_from(["tw", "cleanup", "--max-age-days", "3"]);
        assert!(matches!(cli.command, Command::Cleanup { max_age_days: Some(3) }));
    }

    #[test]
    fn test_cli_rejects_unknown_format() {
        assert!(Cli::try_parse_from(["tw", "--format", "yaml", "list"]).is_err());
    }

    #[test]
    fn test_output_format_display() {
        assert_eq!(OutputFormat::Json.to_string(), "json");
        assert_eq!("PLAIN".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
    }
}
