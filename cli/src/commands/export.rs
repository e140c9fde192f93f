// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use flotilla_core::application::export::ExportService;
use flotilla_core::infrastructure::fleet_parser::FleetParser;

use super::{selector_from_args, CommandContext, CommandStatus};
use crate::output::{self, OutputFormat};

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    /// Name glob and/or key:value tags
    #[arg(long = "match", value_name = "SELECTOR")]
    pub selector: Option<String>,

    #[arg(long, value_name = "TAGS", value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Write the configuration here instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ImportArgs {
    /// Fleet configuration produced by `export`
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Update agents that already exist instead of skipping them
    #[arg(long)]
    pub overwrite: bool,

    #[arg(long)]
    pub dry_run: bool,

    #[arg(short, long, value_enum, default_value_t)]
    pub output: OutputFormat,
}

fn service(ctx: &CommandContext) -> ExportService {
    let naming = ctx.naming();
    ExportService::new(ctx.remote.clone(), ctx.reconciler(naming.clone())).with_naming(naming)
}

pub async fn handle_export(args: ExportArgs, ctx: &CommandContext) -> Result<CommandStatus> {
    let selector = selector_from_args(args.selector.as_deref(), &args.tags)?;
    let config = service(ctx).export(&selector).await?;
    let yaml = FleetParser::to_yaml(&config)?;

    match &args.output {
        Some(path) => {
            std::fs::write(path, &yaml)
                .with_context(|| format!("Failed to write export to {}", path.display()))?;
            eprintln!(
                "{}",
                format!(
                    "✓ Exported {} agent(s) to {}",
                    config.agents.len(),
                    path.display()
                )
                .green()
            );
        }
        None => print!("{}", yaml),
    }
    Ok(CommandStatus::Success)
}

pub async fn handle_import(args: ImportArgs, ctx: &CommandContext) -> Result<CommandStatus> {
    let config = FleetParser::parse_file(&args.file)
        .with_context(|| format!("Failed to load {}", args.file.display()))?;
    let report = service(ctx)
        .import(
            &config,
            args.overwrite,
            args.dry_run,
            ctx.config.concurrency,
            &ctx.cancel,
        )
        .await?;

    output::print_apply_report(&report, args.output)?;
    Ok(if report.has_failures() {
        CommandStatus::PartialFailure
    } else {
        CommandStatus::Success
    })
}
