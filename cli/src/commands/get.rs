// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::{anyhow, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use flotilla_core::domain::agent::LiveAgent;
use flotilla_core::domain::error::FleetError;
use flotilla_core::domain::fleet::{format_tag, ResourceKind};

use super::{selector_from_args, CommandContext, CommandStatus};
use crate::output::{self, OutputFormat};

#[derive(Args, Debug, Clone)]
pub struct GetArgs {
    /// agents, blocks, folders or mcp-servers
    #[arg(value_name = "KIND")]
    pub kind: String,

    /// Name glob and/or key:value tags (agents only)
    #[arg(long = "match", value_name = "SELECTOR")]
    pub selector: Option<String>,

    /// Filter by key:value tags (agents only)
    #[arg(long, value_name = "TAGS", value_delimiter = ',')]
    pub tags: Vec<String>,

    #[arg(short, long, value_enum, default_value_t)]
    pub output: OutputFormat,
}

#[derive(Debug, Serialize)]
struct AgentRow {
    name: String,
    id: String,
    tags: Vec<String>,
    blocks: usize,
}

impl From<&LiveAgent> for AgentRow {
    fn from(agent: &LiveAgent) -> Self {
        Self {
            name: agent.name.clone(),
            id: agent.id.to_string(),
            tags: agent.tags().iter().map(|(k, v)| format_tag(k, v)).collect(),
            blocks: agent.memory_blocks().len(),
        }
    }
}

pub async fn handle_command(args: GetArgs, ctx: &CommandContext) -> Result<CommandStatus> {
    if matches!(args.kind.as_str(), "agent" | "agents") {
        return list_agents(&args, ctx).await;
    }

    let kind: ResourceKind = args.kind.parse().map_err(|e: String| anyhow!(e))?;
    let mut resources = ctx
        .remote
        .list_shared_resources()
        .await
        .map_err(FleetError::from)?;
    resources.retain(|r| r.kind == kind);
    resources.sort_by(|a, b| a.name.cmp(&b.name));

    output::emit(&resources, args.output, || {
        if resources.is_empty() {
            println!("{}", format!("No {} resources found", kind).yellow());
            return;
        }
        println!("{:<32} {:<38} {}", "NAME", "ID", "MANAGED");
        println!("{}", "-".repeat(80));
        for resource in &resources {
            let managed = if resource.is_managed() {
                "yes".green()
            } else {
                "no".dimmed()
            };
            println!("{:<32} {:<38} {}", resource.name, resource.id, managed);
        }
    })?;
    Ok(CommandStatus::Success)
}

async fn list_agents(args: &GetArgs, ctx: &CommandContext) -> Result<CommandStatus> {
    let selector = selector_from_args(args.selector.as_deref(), &args.tags)?;
    let mut agents = ctx
        .remote
        .list_agents(&selector)
        .await
        .map_err(FleetError::from)?;
    agents.retain(|a| selector.matches(a));
    agents.sort_by(|a, b| a.name.cmp(&b.name));
    let rows: Vec<AgentRow> = agents.iter().map(AgentRow::from).collect();

    output::emit(&rows, args.output, || {
        if rows.is_empty() {
            println!("{}", "No agents found".yellow());
            return;
        }
        println!("{:<32} {:<38} {:<7} {}", "NAME", "ID", "BLOCKS", "TAGS");
        println!("{}", "-".repeat(100));
        for row in &rows {
            println!(
                "{:<32} {:<38} {:<7} {}",
                row.name,
                row.id,
                row.blocks,
                row.tags.join(",")
            );
        }
    })?;
    Ok(CommandStatus::Success)
}
