// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::{anyhow, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

use flotilla_core::application::canary::CanaryManager;
use flotilla_core::domain::agent::LiveAgent;
use flotilla_core::domain::canary::CanarySet;
use flotilla_core::domain::error::FleetError;
use flotilla_core::domain::merge::{user_fields, FieldMap, LastAppliedSnapshot};
use flotilla_core::domain::remote::RemoteClient;

use super::{CommandContext, CommandStatus};
use crate::output::{self, OutputFormat};

#[derive(Args, Debug, Clone)]
pub struct DescribeArgs {
    /// Agent name
    #[arg(value_name = "NAME")]
    pub name: String,

    #[arg(short, long, value_enum, default_value_t)]
    pub output: OutputFormat,
}

#[derive(Debug, Clone, Serialize)]
pub struct CanaryMemberView {
    pub name: String,
    pub id: String,
    pub state: String,
}

/// Live state of one agent split by ownership.
#[derive(Debug, Clone, Serialize)]
pub struct AgentDescription {
    pub name: String,
    pub id: String,
    pub tags: BTreeMap<String, String>,
    /// Live values of the fields the engine manages
    pub managed: FieldMap,
    /// Fields added outside the engine
    pub user: FieldMap,
    /// Managed fields whose live value differs from the last apply
    pub drifted: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canary_state: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub canaries: Vec<CanaryMemberView>,
}

impl AgentDescription {
    pub fn new(agent: &LiveAgent, snapshot: Option<&LastAppliedSnapshot>, canaries: &CanarySet) -> Self {
        let managed_paths = snapshot.map(|s| s.managed()).unwrap_or_default();
        let managed: FieldMap = agent
            .fields
            .iter()
            .filter(|(path, _)| managed_paths.contains(*path))
            .map(|(path, value)| (path.clone(), value.clone()))
            .collect();
        let drifted = snapshot
            .map(|s| {
                s.fields
                    .iter()
                    .filter(|(path, value)| agent.fields.get(*path) != Some(*value))
                    .map(|(path, _)| path.clone())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            name: agent.name.clone(),
            id: agent.id.to_string(),
            tags: agent.tags(),
            managed,
            user: user_fields(&agent.fields, &managed_paths),
            drifted,
            snapshot_hash: snapshot.map(|s| s.hash.clone()),
            canary_state: canaries.state().map(|s| s.to_string()),
            canaries: canaries
                .members
                .iter()
                .map(|m| CanaryMemberView {
                    name: m.name.clone(),
                    id: m.id.to_string(),
                    state: m.state.to_string(),
                })
                .collect(),
        }
    }
}

async fn load_snapshot(remote: &dyn RemoteClient, agent: &LiveAgent) -> Result<Option<LastAppliedSnapshot>> {
    let blob = remote
        .get_last_applied_snapshot(&agent.id)
        .await
        .map_err(FleetError::from)?;
    match blob {
        Some(blob) => match LastAppliedSnapshot::from_blob(&blob) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                warn!("Ignoring unreadable snapshot of {}: {}", agent.name, e);
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

pub async fn handle_command(args: DescribeArgs, ctx: &CommandContext) -> Result<CommandStatus> {
    let agent = ctx
        .remote
        .get_agent_by_name(&args.name)
        .await
        .map_err(FleetError::from)?
        .ok_or_else(|| anyhow!("Agent '{}' not found", args.name))?;

    let snapshot = load_snapshot(ctx.remote.as_ref(), &agent).await?;
    let naming = ctx.naming();
    let canary = CanaryManager::new(ctx.remote.clone(), ctx.reconciler(naming.clone()), naming);
    let canaries = canary.status(&agent.name).await?;
    let description = AgentDescription::new(&agent, snapshot.as_ref(), &canaries);

    output::emit(&description, args.output, || print_description(&description))?;
    Ok(CommandStatus::Success)
}

fn print_value(value: &Value) -> String {
    match value {
        Value::String(s) => output::truncate(s, 60),
        other => other.to_string(),
    }
}

fn print_description(description: &AgentDescription) {
    println!("{}", description.name.bold());
    println!("  ID:   {}", description.id);
    if let Some(hash) = &description.snapshot_hash {
        println!("  Last applied: {}", &hash[..hash.len().min(12)]);
    } else {
        println!("  Last applied: {}", "never (not managed)".dimmed());
    }

    println!();
    println!("{}", "Managed fields:".bold());
    if description.managed.is_empty() {
        println!("  {}", "none".dimmed());
    }
    for (path, value) in &description.managed {
        let marker = if description.drifted.contains(path) {
            "⚠".yellow()
        } else {
            " ".normal()
        };
        println!("  {} {:<36} {}", marker, path, print_value(value));
    }

    println!();
    println!("{}", "User fields:".bold());
    if description.user.is_empty() {
        println!("  {}", "none".dimmed());
    }
    for (path, value) in &description.user {
        println!("    {:<36} {}", path, print_value(value));
    }

    if !description.drifted.is_empty() {
        println!();
        println!(
            "{}",
            format!(
                "{} managed field(s) changed since the last apply",
                description.drifted.len()
            )
            .yellow()
        );
    }

    if let Some(state) = &description.canary_state {
        println!();
        println!("{} {}", "Canary:".bold(), state);
        for member in &description.canaries {
            println!("  {:<40} {:<10} {}", member.name, member.state, member.id);
        }
    }
}
