//! # Tandem CLI Module
//!
//! This module implements the CLI interface for Tandem.
//!
//! ## Available Commands
//!
//! - `serve` - Run the ingestion server only
//! - `run` - Server plus stream resolver and inlet host; optionally one supervised run
//! - `session start|status|stop` - Talk to a running server
//! - `config` - Print the effective configuration

mod commands;

use crate::config::{ServerConfig, TandemConfig};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tandem_core::TandemError;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Tandem - multi-modal recording session server
///
/// Aligns a wearable sensor, a gaze tracker and a microphone into one
/// sequence of time-windowed recording sessions.
#[derive(Parser, Debug)]
#[command(name = "tandem")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Server settings that can be overridden on the command line.
#[derive(Args, Debug, Clone, Default)]
pub struct ServerArgs {
    /// Host to bind to
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory receiving recorded artifacts
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// Session rotation window in milliseconds
    #[arg(long)]
    pub window_ms: Option<i64>,
}

impl ServerArgs {
    /// Overwrite the fields given on the command line.
    pub fn apply(&self, server: &mut ServerConfig) {
        if let Some(host) = &self.host {
            server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            server.port = port;
        }
        if let Some(dir) = &self.data_dir {
            server.data_dir.clone_from(dir);
        }
        if let Some(w) = self.window_ms {
            server.window_ms = w;
        }
    }
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the ingestion server
    Serve {
        #[command(flatten)]
        server: ServerArgs,
    },

    /// Run the server, stream resolver and inlet host
    Run {
        #[command(flatten)]
        server: ServerArgs,

        /// Perform one supervised recording run, then exit
        #[arg(long)]
        supervise: bool,

        /// Use the built-in simulated heart-rate strap
        #[arg(long)]
        simulate: bool,

        /// Recording length of the supervised run in milliseconds
        #[arg(long)]
        record_ms: Option<u64>,
    },

    /// Control the session of a running server
    Session {
        /// Base URL of the server
        #[arg(short, long, default_value = "http://127.0.0.1:3000")]
        url: String,

        #[command(subcommand)]
        action: SessionAction,
    },

    /// Print the effective configuration as TOML
    Config,
}

/// Session control actions.
#[derive(Subcommand, Debug, Clone, Copy)]
pub enum SessionAction {
    /// Start a session (or return the current young one)
    Start {
        /// Delay between now and the session anchor, 0..=10000
        #[arg(short, long)]
        lead_ms: Option<i64>,
    },
    /// Show the current session
    Status,
    /// Clear the active session
    Stop,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), TandemError> {
    let mut config = TandemConfig::load(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Serve { server }) => {
            server.apply(&mut config.server);
            cmd_serve(config).await
        }
        Some(Commands::Run {
            server,
            supervise,
            simulate,
            record_ms,
        }) => {
            server.apply(&mut config.server);
            if let Some(ms) = record_ms {
                config.coordinator.record_ms = ms;
            }
            cmd_run(config, supervise, simulate).await
        }
        Some(Commands::Session { url, action }) => cmd_session(&url, action).await,
        Some(Commands::Config) => cmd_config(&config),
        None => cmd_serve(config).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_file_values() {
        let cli = Cli::parse_from(["tandem", "serve", "--port", "9100", "--window-ms", "5000"]);
        let Some(Commands::Serve { server }) = cli.command else {
            unreachable!("serve expected");
        };
        let mut config = ServerConfig::default();
        server.apply(&mut config);
        assert_eq!(config.port, 9100);
        assert_eq!(config.window_ms, 5_000);
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    fn run_flags_parse() {
        let cli = Cli::parse_from(["tandem", "-c", "t.toml", "run", "--supervise", "--simulate"]);
        assert_eq!(cli.config, Some(PathBuf::from("t.toml")));
        assert!(matches!(
            cli.command,
            Some(Commands::Run {
                supervise: true,
                simulate: true,
                record_ms: None,
                ..
            })
        ));
    }

    #[test]
    fn session_subcommand_parses() {
        let cli = Cli::parse_from(["tandem", "session", "start", "--lead-ms", "0"]);
        assert!(matches!(
            cli.command,
            Some(Commands::Session {
                action: SessionAction::Start { lead_ms: Some(0) },
                ..
            })
        ));
    }
}
