// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

use flotilla_core::application::canary::{CanaryManager, PromotionReport};
use flotilla_core::application::reconciler::{ApplyMode, ApplyOptions, ReconcilerService};
use flotilla_core::domain::canary::CanaryNaming;
use flotilla_core::domain::fleet::FleetConfiguration;
use flotilla_core::domain::report::{AgentOutcome, EntityAction};
use flotilla_core::domain::selector::Selector;
use flotilla_core::infrastructure::fleet_parser::FleetParser;

use super::{selector_from_args, CommandContext, CommandStatus};
use crate::output::{self, action_label, OutputFormat};

#[derive(Args, Debug, Clone)]
pub struct ApplyArgs {
    /// Fleet configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        required_unless_present_any = ["promote", "cleanup"]
    )]
    pub file: Option<PathBuf>,

    /// Show what would change without calling any mutating endpoint
    #[arg(long)]
    pub dry_run: bool,

    /// Only apply agents matching this selector (name glob and/or key:value tags)
    #[arg(long = "match", value_name = "SELECTOR")]
    pub selector: Option<String>,

    /// Delete managed agents and shared resources no longer in the file
    #[arg(long, conflicts_with_all = ["selector", "template", "canary"])]
    pub prune: bool,

    /// Deploy canary shadows of the --agent names (default: every selected agent)
    #[arg(long, conflicts_with_all = ["promote", "cleanup", "template"])]
    pub canary: bool,

    /// Promote the active canary of each --agent into production
    #[arg(long, requires = "agent", conflicts_with = "cleanup")]
    pub promote: bool,

    /// Delete canary shadows and retired agents of each --agent
    #[arg(long, requires = "agent")]
    pub cleanup: bool,

    /// Production agent names for canary operations
    #[arg(long = "agent", value_name = "NAME", value_delimiter = ',')]
    pub agent: Vec<String>,

    /// Name prefix that marks canary agents
    #[arg(long, value_name = "PREFIX")]
    pub canary_prefix: Option<String>,

    /// Send each agent's first message again even if already delivered
    #[arg(long)]
    pub recalibrate: bool,

    /// Limit --recalibrate to agents with these key:value tags
    #[arg(long, value_name = "TAGS", value_delimiter = ',')]
    pub recalibrate_tags: Vec<String>,

    /// Apply the file's single agent additively to every live agent matching SELECTOR
    #[arg(long, value_name = "SELECTOR")]
    pub template: Option<String>,

    #[arg(short, long, value_enum, default_value_t)]
    pub output: OutputFormat,
}

impl ApplyArgs {
    fn naming(&self, ctx: &CommandContext) -> CanaryNaming {
        match &self.canary_prefix {
            Some(prefix) => CanaryNaming::new(prefix.clone()),
            None => ctx.naming(),
        }
    }

    fn options(&self, ctx: &CommandContext) -> Result<ApplyOptions> {
        let mode = match &self.template {
            Some(expr) => ApplyMode::Template(Selector::parse(expr)?),
            None => ApplyMode::Standard,
        };
        Ok(ApplyOptions {
            dry_run: self.dry_run,
            prune: self.prune,
            mode,
            selector: selector_from_args(self.selector.as_deref(), &[])?,
            recalibrate: self.recalibrate || !self.recalibrate_tags.is_empty(),
            recalibrate_selector: selector_from_args(None, &self.recalibrate_tags)?,
            concurrency: ctx.config.concurrency,
        })
    }

    fn load(&self) -> Result<FleetConfiguration> {
        let Some(path) = &self.file else {
            bail!("--file is required");
        };
        FleetParser::parse_file(path)
            .with_context(|| format!("Failed to load fleet configuration from {}", path.display()))
    }
}

pub async fn handle_command(args: ApplyArgs, ctx: &CommandContext) -> Result<CommandStatus> {
    let naming = args.naming(ctx);
    let reconciler = ctx.reconciler(naming.clone());
    let canary = CanaryManager::new(ctx.remote.clone(), reconciler.clone(), naming);

    if args.promote {
        return promote(&args, &canary).await;
    }
    if args.cleanup {
        return cleanup(&args, &canary).await;
    }

    let config = args.load()?;
    let options = args.options(ctx)?;

    let report = if args.canary {
        let names: Vec<String> = if args.agent.is_empty() {
            config
                .agents
                .iter()
                .filter(|a| options.selector.matches(*a))
                .map(|a| a.name.clone())
                .collect()
        } else {
            args.agent.clone()
        };
        info!("Deploying canaries for {} agent(s)", names.len());
        canary.deploy(&config, &names, &options, &ctx.cancel).await?
    } else {
        reconciler.apply(&config, &options, &ctx.cancel).await?
    };

    output::print_apply_report(&report, args.output)?;
    Ok(if report.has_failures() {
        CommandStatus::PartialFailure
    } else {
        CommandStatus::Success
    })
}

/// Promotions run one at a time and stop at the first failure.
async fn promote(args: &ApplyArgs, canary: &CanaryManager) -> Result<CommandStatus> {
    let mut promotions: Vec<PromotionReport> = Vec::with_capacity(args.agent.len());
    for name in &args.agent {
        let promotion = canary.promote(name).await?;
        promotions.push(promotion);
    }

    output::emit(&promotions, args.output, || {
        for promotion in &promotions {
            println!(
                "{} Promoted canary of {} (id {})",
                "✓".green(),
                promotion.production.bold(),
                promotion.promoted_id
            );
            println!("  Retired:     {} (id {})", promotion.retired_name, promotion.retired_id);
            println!("  Calibration: {}", output::truncate(&promotion.calibration_reply, 60));
            if promotion.attempts > 1 {
                println!("  Attempts:    {}", promotion.attempts);
            }
        }
    })?;
    Ok(CommandStatus::Success)
}

async fn cleanup(args: &ApplyArgs, canary: &CanaryManager) -> Result<CommandStatus> {
    let mut outcomes: Vec<AgentOutcome> = Vec::new();
    for name in &args.agent {
        outcomes.extend(canary.cleanup(name, args.dry_run).await?);
    }

    output::emit(&outcomes, args.output, || {
        if outcomes.is_empty() {
            println!("{}", "No canary agents to clean up".yellow());
            return;
        }
        println!("{:<40} {}", "AGENT", "ACTION");
        println!("{}", "-".repeat(56));
        for outcome in &outcomes {
            println!("{:<40} {}", outcome.name, action_label(outcome.action));
            if let Some(error) = &outcome.error {
                println!("  {} {}", "✗".red(), error);
            }
        }
    })?;

    let failures = outcomes
        .iter()
        .filter(|o| o.action == EntityAction::Failed)
        .count();
    Ok(CommandStatus::from_failures(failures))
}
