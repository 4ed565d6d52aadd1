//! Command-line interface definition for kumi.
//!
//! This module defines the CLI structure using clap derive macros,
//! including all subcommands and their arguments.

use crate::config::LogLevel;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// kumi - Local model-stack supervisor
///
/// Starts a model server and its web interface in dependency order, waits
/// for readiness, provisions models and tears everything down cleanly.
#[derive(Debug, Parser)]
#[command(name = "kumi")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "KUMI_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all logs except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Returns the log level requested by `-v`/`-q`, if any.
    pub fn log_level(&self) -> Option<LogLevel> {
        if self.quiet {
            return Some(LogLevel::Error);
        }

        match self.verbose {
            0 => None,
            1 => Some(LogLevel::Debug),
            _ => Some(LogLevel::Trace),
        }
    }
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the stack and wait until every service is ready
    Start,

    /// Stop the stack in reverse dependency order
    Stop(StopArgs),

    /// Show stack or service status
    Status(StatusArgs),

    /// Make sure a model exists inside a ready service
    EnsureModel(EnsureModelArgs),

    /// Run the supervisor daemon
    Serve(ServeArgs),

    /// Configuration file operations
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Arguments for the `stop` subcommand.
#[derive(Debug, Args)]
pub struct StopArgs {
    /// Also remove the named volumes declared by the services
    #[arg(long)]
    pub purge_volumes: bool,

    /// Daemon address (host:port or URL)
    #[arg(short, long)]
    pub target: Option<String>,
}

/// Arguments for the `status` subcommand.
#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Daemon address (host:port or URL)
    #[arg(short, long)]
    pub target: Option<String>,

    /// Show a single service
    #[arg(short, long)]
    pub service: Option<String>,
}

/// Arguments for the `ensure-model` subcommand.
#[derive(Debug, Args)]
pub struct EnsureModelArgs {
    /// Service the model is loaded into
    pub service: String,

    /// Model identifier, e.g. codellama:13b
    pub model: String,

    /// Daemon address (host:port or URL)
    #[arg(short, long)]
    pub target: Option<String>,
}

/// Arguments for the `serve` subcommand.
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Bind address (overrides server.bind)
    #[arg(long)]
    pub bind: Option<String>,

    /// Listen port (overrides server.port)
    #[arg(long)]
    pub port: Option<u16>,
}

/// Configuration subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Validate the configuration file
    Validate,

    /// Show the resolved configuration
    Show,
}

/// Turns a `--target` value into a base URL.
pub fn target_url(target: &str) -> String {
    if target.starts_with("http://") || target.starts_with("https://") {
        target.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", target.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_start_command() {
        let cli = Cli::parse_from(["kumi", "start"]);
        assert!(matches!(cli.command, Commands::Start));
    }

    #[test]
    fn test_stop_command() {
        let cli = Cli::parse_from(["kumi", "stop", "--purge-volumes"]);

        match cli.command {
            Commands::Stop(args) => {
                assert!(args.purge_volumes);
                assert!(args.target.is_none());
            }
            _ => panic!("Expected Stop command"),
        }
    }

    #[test]
    fn test_serve_with_args() {
        let cli = Cli::parse_from(["kumi", "serve", "--bind", "0.0.0.0", "--port", "9090"]);

        match cli.command {
            Commands::Serve(args) => {
                assert_eq!(args.bind.as_deref(), Some("0.0.0.0"));
                assert_eq!(args.port, Some(9090));
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_serve_defaults_come_from_config() {
        let cli = Cli::parse_from(["kumi", "serve"]);

        match cli.command {
            Commands::Serve(args) => {
                assert!(args.bind.is_none());
                assert!(args.port.is_none());
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_ensure_model_command() {
        let cli = Cli::parse_from([
            "kumi",
            "ensure-model",
            "ollama",
            "codellama:13b",
            "--target",
            "127.0.0.1:7878",
        ]);

        match cli.command {
            Commands::EnsureModel(args) => {
                assert_eq!(args.service, "ollama");
                assert_eq!(args.model, "codellama:13b");
                assert_eq!(args.target.as_deref(), Some("127.0.0.1:7878"));
            }
            _ => panic!("Expected EnsureModel command"),
        }
    }

    #[test]
    fn test_ensure_model_requires_model() {
        assert!(Cli::try_parse_from(["kumi", "ensure-model", "ollama"]).is_err());
    }

    #[test]
    fn test_status_command() {
        let cli = Cli::parse_from(["kumi", "status", "--service", "open-webui"]);

        match cli.command {
            Commands::Status(args) => {
                assert!(args.target.is_none());
                assert_eq!(args.service.as_deref(), Some("open-webui"));
            }
            _ => panic!("Expected Status command"),
        }
    }

    #[test]
    fn test_config_commands() {
        let cli = Cli::parse_from(["kumi", "config", "validate"]);
        assert!(matches!(cli.command, Commands::Config(ConfigCommands::Validate)));

        let cli = Cli::parse_from(["kumi", "config", "show"]);
        assert!(matches!(cli.command, Commands::Config(ConfigCommands::Show)));
    }

    #[test]
    fn test_global_config_option() {
        let cli = Cli::parse_from(["kumi", "-c", "/custom/kumi.yaml", "status"]);

        assert_eq!(cli.config, Some(PathBuf::from("/custom/kumi.yaml")));
    }

    #[test]
    fn test_verbose_levels() {
        let cli = Cli::parse_from(["kumi", "start"]);
        assert_eq!(cli.log_level(), None);

        let cli = Cli::parse_from(["kumi", "-v", "start"]);
        assert_eq!(cli.log_level(), Some(LogLevel::Debug));

        let cli = Cli::parse_from(["kumi", "-vvv", "start"]);
        assert_eq!(cli.log_level(), Some(LogLevel::Trace));

        let cli = Cli::parse_from(["kumi", "-q", "start"]);
        assert_eq!(cli.log_level(), Some(LogLevel::Error));
    }

    #[test]
    fn test_target_url() {
        assert_eq!(target_url("127.0.0.1:7878"), "http://127.0.0.1:7878");
        assert_eq!(target_url("http://box:7878/"), "http://box:7878");
        assert_eq!(target_url("https://box"), "https://box");
    }
}
