//! Command-line interface for voxrelay
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Streaming speech-to-text relay
#[derive(Parser, Debug)]
#[command(name = "voxrelay", version, about = "Streaming speech-to-text relay")]
pub struct Cli {
    /// Subcommand to execute (default: serve)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: per-session flow, -vv: everything)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Run the relay server
    Serve,

    /// Upload a file to a running relay and print the transcript
    Transcribe {
        /// Audio file to upload
        file: PathBuf,

        /// Relay base URL
        #[arg(long, value_name = "URL", default_value = crate::defaults::CLIENT_SERVER_URL)]
        server: String,

        /// Give up after this long. Examples: 30s, 5m
        #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
        timeout: Option<Duration>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug, PartialEq)]
pub enum ConfigAction {
    /// Print the effective configuration (credential redacted)
    Show,
    /// Print the default configuration file path
    Path,
}

/// Parse a duration string.
///
/// Supports bare numbers (seconds) and any format accepted by `humantime`.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}
