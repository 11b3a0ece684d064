//! Command-line surface: operator visibility into a running or persisted
//! runtime without requiring an embedding application.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// agentrt - agent runtime scheduler
#[derive(Parser)]
#[command(
    name = "agentrt",
    about = "Priority queue, admission control and cross-instance coordination for LLM-backed task execution",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long = "log-level", global = true, help = "Log level override")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show current capacity, queue depth and circuit state per provider/model
    Status {
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List tasks waiting in the priority queue
    Queue {
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List instances registered with the cross-instance coordinator
    Instances {
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show rolling-window metrics and per-provider/priority breakdowns
    Metrics {
        /// Window to summarize, in milliseconds
        #[arg(short, long, default_value = "60000")]
        period_ms: u64,

        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Inspect saved checkpoints
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum CheckpointCommand {
    /// List saved checkpoints
    List {
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show one checkpoint's state
    Show {
        /// Task ID the checkpoint was saved under
        task_id: String,

        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Delete a saved checkpoint
    Delete {
        /// Task ID the checkpoint was saved under
        task_id: String,
    },
}

/// Output format shared by every inspection subcommand.
#[derive(Clone, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Table,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "table" => Ok(Self::Table),
            _ => Err(format!("unknown format: {s}. use: text, json, or table")),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
            Self::Table => write!(f, "table"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_no_subcommand() {
        let cli = Cli::parse_from(["agentrt"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn parses_status_with_json_format() {
        let cli = Cli::parse_from(["agentrt", "status", "--format", "json"]);
        assert!(matches!(cli.command, Some(Command::Status { format: OutputFormat::Json })));
    }

    #[test]
    fn parses_checkpoint_show() {
        let cli = Cli::parse_from(["agentrt", "checkpoint", "show", "task-1"]);
        match cli.command {
            Some(Command::Checkpoint { command: CheckpointCommand::Show { task_id, .. } }) => {
                assert_eq!(task_id, "task-1");
            }
            _ => panic!("expected checkpoint show"),
        }
    }

    #[test]
    fn output_format_from_str_rejects_unknown() {
        assert!(matches!("text".parse::<OutputFormat>(), Ok(OutputFormat::Text)));
        assert!("garbage".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn parses_config_path() {
        let cli = Cli::parse_from(["agentrt", "-c", "/path/to/config.yml", "status"]);
        assert_eq!(cli.config, Some(PathBuf::from("/path/to/config.yml")));
    }
}
