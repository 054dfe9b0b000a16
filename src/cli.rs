//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// histea - client for the remote histogram computation service
///
/// Browse available processes and PDF sets, submit histogram
/// computations with scale and PDF variations, and poll existing
/// tokens until their results are ready.
///
/// Examples:
///   histea processes
///   histea processes --detailed pp_tt_13000_172.5
///   histea hist pp_tt_13000_172.5 --file job.json --save result.json
///   histea token 1a2b3c4d --plot plot.png
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Base URL of the API
    ///
    /// Can also be set via HISTEA_ENDPOINT or .histea.toml config.
    #[arg(long, value_name = "URL", env = "HISTEA_ENDPOINT", global = true)]
    pub endpoint: Option<String>,

    /// Bearer token for authenticated access
    #[arg(long, value_name = "TOKEN", env = "HISTEA_TOKEN", global = true)]
    pub auth_token: Option<String>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .histea.toml in the current directory
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long, value_name = "SECS", global = true)]
    pub timeout: Option<u64>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Generate a default .histea.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// What to do against the server.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List available processes, or show one process in detail
    Processes {
        /// Show full metadata for this process instead of the listing
        #[arg(long, value_name = "PROCESS")]
        detailed: Option<String>,
    },

    /// List the PDF sets available for central value computations
    Pdfs,

    /// Submit a histogram computation and wait for its result
    Hist {
        /// Process tag to compute for
        #[arg(value_name = "PROCESS")]
        process: String,

        /// Job description file (JSON)
        #[arg(short, long, value_name = "FILE")]
        file: PathBuf,

        /// Write the aggregated result to this file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        save: Option<PathBuf>,

        /// Persist the full job state (tokens included) to this file
        #[arg(short, long, value_name = "FILE")]
        job_file: Option<PathBuf>,

        /// Also fetch the rendered plot of the central request
        #[arg(long, value_name = "FILE")]
        plot: Option<PathBuf>,
    },

    /// Check or wait on an existing token
    Token {
        /// The token to inspect
        #[arg(value_name = "TOKEN")]
        token: String,

        /// Check the status once instead of waiting for completion
        #[arg(long)]
        once: bool,

        /// Fetch the rendered plot once completed
        #[arg(long, value_name = "FILE")]
        plot: Option<PathBuf>,

        /// Write the result to this file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        save: Option<PathBuf>,
    },
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(ref endpoint) = self.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err("Endpoint must start with 'http://' or 'https://'".to_string());
            }
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        if let Command::Hist { ref file, .. } = self.command {
            if !file.exists() {
                return Err(format!("Job file does not exist: {}", file.display()));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args(command: Command) -> Args {
        Args {
            command,
            endpoint: None,
            auth_token: None,
            config: None,
            timeout: None,
            verbose: false,
            quiet: false,
            init_config: false,
        }
    }

    #[test]
    fn test_validation_invalid_endpoint() {
        let mut args = make_args(Command::Pdfs);
        args.endpoint = Some("localhost:8000".to_string());
        assert!(args.validate().is_err());

        args.endpoint = Some("http://localhost:8000".to_string());
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args(Command::Pdfs);
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_missing_job_file() {
        let args = make_args(Command::Hist {
            process: "tt".to_string(),
            file: PathBuf::from("/no/such/file.json"),
            save: None,
            job_file: None,
            plot: None,
        });
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args(Command::Pdfs);
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
