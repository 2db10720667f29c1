//! Command line interface for jobwatch, built on clap.
//!
//! `serve` runs the job simulator; `watch` runs one arbitration against it.
//! Flags given here override both `jobwatch.toml` and the environment.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::client::RegistrationPolicy;
use crate::config::JobwatchConfig;

/// jobwatch: job status over webhook push raced against polling.
#[derive(Debug, Parser)]
#[command(name = "jobwatch", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the configuration file (default: ./jobwatch.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enables debug logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Runs the job simulator server.
    Serve {
        /// Port to listen on.
        #[arg(long)]
        port: Option<u16>,

        /// Minimum job completion delay in seconds.
        #[arg(long)]
        min_delay: Option<u64>,

        /// Maximum job completion delay in seconds.
        #[arg(long)]
        max_delay: Option<u64>,
    },

    /// Waits for the job to finish, via webhook or polling, whichever is first.
    Watch {
        /// Base URL of the job server.
        #[arg(long)]
        server_url: Option<String>,

        /// Port for the local webhook listener.
        #[arg(long)]
        webhook_port: Option<u16>,

        /// Overall deadline in seconds.
        #[arg(long)]
        timeout: Option<u64>,

        /// Number of status polls before giving up on polling.
        #[arg(long)]
        poll_budget: Option<u32>,

        /// Keep going with polling alone if webhook registration fails.
        #[arg(long, default_value_t = false)]
        best_effort: bool,

        /// Print the resolution record as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

impl Command {
    /// Writes the flags that were given over the loaded configuration.
    pub fn apply(&self, config: &mut JobwatchConfig) {
        match self {
            Command::Serve {
                port,
                min_delay,
                max_delay,
            } => {
                if let Some(port) = port {
                    config.server_port = *port;
                }
                if let Some(min) = min_delay {
                    config.min_delay_secs = *min;
                }
                if let Some(max) = max_delay {
                    config.max_delay_secs = *max;
                }
            }
            Command::Watch {
                server_url,
                webhook_port,
                timeout,
                poll_budget,
                best_effort,
                ..
            } => {
                if let Some(url) = server_url {
                    config.server_url = url.clone();
                }
                if let Some(port) = webhook_port {
                    config.webhook_port = *port;
                }
                if let Some(secs) = timeout {
                    config.resolve_timeout_secs = *secs;
                }
                if let Some(budget) = poll_budget {
                    config.poll_budget = *budget;
                }
                if *best_effort {
                    config.registration = RegistrationPolicy::BestEffort;
                }
            }
        }
    }
}
