// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # flotilla
//!
//! Declarative fleet management for hosted agents.
//!
//! ## Commands
//!
//! - `flotilla apply -f fleet.yaml` - Reconcile the fleet (also canary deploy/promote/cleanup)
//! - `flotilla get|describe` - Inspect live agents and shared resources
//! - `flotilla send|messages` - Fan-out messaging and history maintenance
//! - `flotilla export|import` - Round-trip live agents through a configuration file
//! - `flotilla report memory` - Memory block usage
//!
//! ## Exit codes
//!
//! `0` success, `1` invalid input or canary state, `2` partial failure,
//! `3` unrecoverable remote error.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use flotilla_cli::commands::{
    self, ApplyArgs, CommandContext, CommandStatus, DescribeArgs, ExportArgs, GetArgs, ImportArgs,
    MessagesCommand, ReportCommand, SendArgs,
};
use flotilla_core::infrastructure::config::ClientConfig;
use flotilla_sdk::HttpRemoteClient;

/// flotilla - Declarative fleet reconciliation for hosted agents
#[derive(Parser)]
#[command(name = "flotilla")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "FLOTILLA_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Hosting service base URL (overrides configuration)
    #[arg(long, global = true, value_name = "URL")]
    base_url: Option<String>,

    /// API key for the hosting service (overrides configuration)
    #[arg(long, global = true, value_name = "KEY")]
    api_key: Option<String>,

    /// Maximum number of agents processed concurrently
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "FLOTILLA_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile live agents with a fleet configuration
    #[command(name = "apply")]
    Apply(ApplyArgs),

    /// List agents or shared resources
    #[command(name = "get")]
    Get(GetArgs),

    /// Show one agent's managed and user-added fields
    #[command(name = "describe")]
    Describe(DescribeArgs),

    /// Send a message to every matching agent
    #[command(name = "send")]
    Send(SendArgs),

    /// Conversation history maintenance
    #[command(name = "messages")]
    Messages {
        #[command(subcommand)]
        command: MessagesCommand,
    },

    /// Write live agents out as a fleet configuration
    #[command(name = "export")]
    Export(ExportArgs),

    /// Create agents from an exported configuration
    #[command(name = "import")]
    Import(ImportArgs),

    /// Usage reports
    #[command(name = "report")]
    Report {
        #[command(subcommand)]
        command: ReportCommand,
    },
}

#[tokio::main]
async fn main() {
    // .env must be loaded before clap reads `env` attributes
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli.log_level) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
    if let Ok(path) = dotenv {
        debug!("Loaded environment from {:?}", path);
    }

    let code = match run(cli).await {
        Ok(status) => status.exit_code(),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            commands::exit_code(&e)
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<CommandStatus> {
    let mut config = ClientConfig::load_or_default(cli.config)?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    if let Some(api_key) = cli.api_key {
        config.api_key = Some(api_key);
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }

    let remote = HttpRemoteClient::from_config(&config).context("Failed to create API client")?;
    let ctx = CommandContext::new(config, Arc::new(remote));

    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, letting in-flight operations finish");
            cancel.cancel();
        }
    });

    match cli.command {
        Commands::Apply(args) => commands::apply::handle_command(args, &ctx).await,
        Commands::Get(args) => commands::get::handle_command(args, &ctx).await,
        Commands::Describe(args) => commands::describe::handle_command(args, &ctx).await,
        Commands::Send(args) => commands::send::handle_command(args, &ctx).await,
        Commands::Messages { command } => commands::messages::handle_command(command, &ctx).await,
        Commands::Export(args) => commands::export::handle_export(args, &ctx).await,
        Commands::Import(args) => commands::export::handle_import(args, &ctx).await,
        Commands::Report { command } => commands::report::handle_command(command, &ctx).await,
    }
}

/// Initialize tracing subscriber for logging. Logs go to stderr so command
/// output on stdout stays parseable.
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
