//! # class-chat
//!
//! CLI for exercising class chat sync.
//!
//! ## Commands
//!
//! - `demo`: Run a scripted two-person chat against the in-memory backend
//! - `config`: Print the effective configuration
//!
//! ## Example
//!
//! ```bash
//! # Send two messages, the first one hitting a simulated outage
//! class-chat demo "hello" "anyone there?" --fail-first
//!
//! # Show configuration with overrides from a file
//! class-chat --config chat.toml config
//!
//! # Watch reloads and stale discards
//! class-chat --log classroom_chat_client=debug demo "hi"
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{demo, show_config};
use config::CliConfig;

/// CLI for exercising class chat sync.
#[derive(Parser, Debug)]
#[command(name = "class-chat")]
#[command(version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter (overrides RUST_LOG and the config file)
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a scripted two-person chat against the in-memory backend
    Demo {
        /// Messages to send as the configured user
        #[arg(default_value = "hello")]
        messages: Vec<String>,

        /// Make the first send fail to show rollback
        #[arg(long)]
        fail_first: bool,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.as_deref())?;

    init_tracing(cli.log.as_deref(), &config.chat.logging.filter);

    match cli.command {
        Commands::Demo {
            messages,
            fail_first,
        } => {
            for line in demo::run(&config, &messages, fail_first).await? {
                println!("{}", line);
            }
        }
        Commands::Config => {
            print!("{}", show_config::run(&config)?);
        }
    }

    Ok(())
}

/// Install the log subscriber: `--log`, then `RUST_LOG`, then the config file.
fn init_tracing(flag: Option<&str>, configured: &str) {
    let filter = match flag {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
