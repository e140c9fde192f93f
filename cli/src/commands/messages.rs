// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use flotilla_core::application::messaging::MessagingService;
use flotilla_core::domain::message::{AgentMessage, MessageType};
use flotilla_core::domain::report::dispatch_failures;

use super::{selector_from_args, CommandContext, CommandStatus};
use crate::output::{self, OutputFormat};

#[derive(Subcommand, Debug, Clone)]
pub enum MessagesCommand {
    /// Show the most recent messages of one agent
    List {
        /// Agent name
        #[arg(value_name = "NAME")]
        name: String,

        /// Number of messages to show
        #[arg(long, default_value_t = 20)]
        limit: usize,

        #[arg(short, long, value_enum, default_value_t)]
        output: OutputFormat,
    },

    /// Clear the conversation history of every matching agent
    Reset {
        /// Agent name or glob pattern
        #[arg(value_name = "TARGET")]
        target: String,

        #[arg(long, value_name = "TAGS", value_delimiter = ',')]
        tags: Vec<String>,

        #[arg(short, long, value_enum, default_value_t)]
        output: OutputFormat,
    },

    /// Summarize the conversation history of every matching agent
    Compact {
        /// Agent name or glob pattern
        #[arg(value_name = "TARGET")]
        target: String,

        #[arg(long, value_name = "TAGS", value_delimiter = ',')]
        tags: Vec<String>,

        #[arg(short, long, value_enum, default_value_t)]
        output: OutputFormat,
    },
}

fn type_label(message_type: MessageType) -> &'static str {
    match message_type {
        MessageType::UserMessage => "user",
        MessageType::AssistantMessage => "assistant",
        MessageType::ReasoningMessage => "reasoning",
        MessageType::ToolCallMessage => "tool call",
        MessageType::ToolReturnMessage => "tool return",
        MessageType::SystemMessage => "system",
        MessageType::Other => "other",
    }
}

fn print_history(name: &str, messages: &[AgentMessage]) {
    if messages.is_empty() {
        println!("{}", format!("No messages for {}", name).yellow());
        return;
    }
    for message in messages {
        let label = format!("{:<12}", type_label(message.message_type));
        let label = match message.message_type {
            MessageType::UserMessage => label.blue(),
            MessageType::AssistantMessage => label.green(),
            _ => label.dimmed(),
        };
        println!("{} {}", label, message.content);
    }
}

pub async fn handle_command(command: MessagesCommand, ctx: &CommandContext) -> Result<CommandStatus> {
    let messaging = MessagingService::new(ctx.remote.clone(), ctx.dispatcher(None)).with_naming(ctx.naming());

    match command {
        MessagesCommand::List { name, limit, output: format } => {
            let messages = messaging.history(&name, limit).await?;
            output::emit(&messages, format, || print_history(&name, &messages))?;
            Ok(CommandStatus::Success)
        }
        MessagesCommand::Reset { target, tags, output: format } => {
            let targets = messaging.targets(&selector_from_args(Some(&target), &tags)?).await?;
            let results = messaging.reset(targets, &ctx.cancel).await;
            output::print_dispatch(&results, format, |_| "history cleared".to_string())?;
            Ok(CommandStatus::from_failures(dispatch_failures(&results)))
        }
        MessagesCommand::Compact { target, tags, output: format } => {
            let targets = messaging.targets(&selector_from_args(Some(&target), &tags)?).await?;
            let results = messaging.compact(targets, &ctx.cancel).await;
            output::print_dispatch(&results, format, |summary| {
                format!("{} -> {} messages", summary.messages_before, summary.messages_after)
            })?;
            Ok(CommandStatus::from_failures(dispatch_failures(&results)))
        }
    }
}
