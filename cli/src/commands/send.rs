// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::sync::Arc;
use std::time::Duration;

use flotilla_core::application::messaging::{FleetMessageSink, MessagingService};
use flotilla_core::domain::message::{AgentMessage, MessageType};
use flotilla_core::domain::report::dispatch_failures;

use super::{selector_from_args, CommandContext, CommandStatus};
use crate::output::{self, OutputFormat};

#[derive(Args, Debug, Clone)]
pub struct SendArgs {
    /// Agent name or glob pattern ("*" for every agent)
    #[arg(value_name = "TARGET")]
    pub target: String,

    /// Message text
    #[arg(value_name = "MESSAGE")]
    pub message: String,

    /// Only agents with these key:value tags
    #[arg(long, value_name = "TAGS", value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Print messages as they arrive
    #[arg(long)]
    pub stream: bool,

    /// Overall deadline in seconds
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    #[arg(short, long, value_enum, default_value_t)]
    pub output: OutputFormat,
}

/// Prints each streamed message prefixed with the agent it came from.
pub fn stream_printer() -> Arc<FleetMessageSink> {
    Arc::new(|agent: &str, message: &AgentMessage| {
        if let Some(line) = stream_line(agent, message) {
            println!("{}", line);
        }
    })
}

fn stream_line(agent: &str, message: &AgentMessage) -> Option<String> {
    let label = format!("[{}]", agent).cyan();
    match message.message_type {
        MessageType::AssistantMessage => Some(format!("{} {}", label, message.content)),
        MessageType::ReasoningMessage => Some(format!("{} {}", label, message.content.dimmed())),
        MessageType::ToolCallMessage => Some(format!("{} {} {}", label, "tool:".dimmed(), message.content)),
        _ => None,
    }
}

pub async fn handle_command(args: SendArgs, ctx: &CommandContext) -> Result<CommandStatus> {
    let selector = selector_from_args(Some(&args.target), &args.tags)?;
    let dispatcher = ctx.dispatcher(args.timeout.map(Duration::from_secs));
    let messaging = MessagingService::new(ctx.remote.clone(), dispatcher).with_naming(ctx.naming());

    let targets = messaging.targets(&selector).await?;
    if targets.is_empty() {
        println!("{}", format!("No agents match '{}'", selector).yellow());
        return Ok(CommandStatus::Success);
    }

    let sink = args.stream.then(stream_printer);
    let results = messaging.send(targets, &args.message, sink, &ctx.cancel).await;

    if args.stream && args.output == OutputFormat::Table {
        println!();
    }
    output::print_dispatch(&results, args.output, |reply| reply.assistant_text())?;
    Ok(CommandStatus::from_failures(dispatch_failures(&results)))
}
