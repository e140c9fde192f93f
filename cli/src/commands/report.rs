// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use std::sync::Arc;

use flotilla_core::application::memory_report::{
    AgentMemoryReport, MemoryReportService, SelfAnalysisAnalyzer,
};
use flotilla_core::domain::report::{dispatch_failures, DispatchResult};

use super::{selector_from_args, CommandContext, CommandStatus};
use crate::output::{self, OutputFormat};

#[derive(Subcommand, Debug, Clone)]
pub enum ReportCommand {
    /// Memory block usage per agent
    Memory {
        /// Name glob and/or key:value tags
        #[arg(long = "match", value_name = "SELECTOR")]
        selector: Option<String>,

        #[arg(long, value_name = "TAGS", value_delimiter = ',')]
        tags: Vec<String>,

        /// Ask each agent to review its own memory
        #[arg(long)]
        analyze: bool,

        #[arg(short, long, value_enum, default_value_t)]
        output: OutputFormat,
    },
}

pub async fn handle_command(command: ReportCommand, ctx: &CommandContext) -> Result<CommandStatus> {
    match command {
        ReportCommand::Memory {
            selector,
            tags,
            analyze,
            output: format,
        } => {
            let selector = selector_from_args(selector.as_deref(), &tags)?;
            let mut service = MemoryReportService::new(ctx.remote.clone(), ctx.dispatcher(None));
            if analyze {
                service = service.with_analyzer(Arc::new(SelfAnalysisAnalyzer::new(ctx.remote.clone())));
            }

            let reports = service.report(&selector, &ctx.cancel).await?;
            let entries = output::dispatch_entries(&reports);
            output::emit(&entries, format, || print_memory_table(&reports))?;
            Ok(CommandStatus::from_failures(dispatch_failures(&reports)))
        }
    }
}

fn print_memory_table(reports: &DispatchResult<AgentMemoryReport>) {
    println!("{:<32} {:<24} {:>8} {:>8} {:>6}", "AGENT", "BLOCK", "CHARS", "LIMIT", "FILL");
    println!("{}", "-".repeat(82));

    for (agent, report) in reports {
        let report = match report {
            Ok(report) => report,
            Err(e) => {
                println!("{:<32} {}", agent, format!("failed: {}", e).red());
                continue;
            }
        };
        if report.blocks.is_empty() {
            println!("{:<32} {}", agent, "no memory blocks".dimmed());
        }
        for block in &report.blocks {
            let limit = block.limit.map(|l| l.to_string()).unwrap_or_else(|| "-".to_string());
            let fill = block
                .fill_ratio
                .map(|r| format!("{:.0}%", r * 100.0))
                .unwrap_or_else(|| "-".to_string());
            let fill = if block.near_full { fill.yellow() } else { fill.normal() };
            println!(
                "{:<32} {:<24} {:>8} {:>8} {:>6}",
                agent, block.label, block.chars, limit, fill
            );
        }
        if let Some(analysis) = &report.analysis {
            for line in analysis.lines() {
                println!("  {}", line.dimmed());
            }
        }
    }

    let near_full: usize = reports
        .values()
        .filter_map(|r| r.as_ref().ok())
        .map(|r| r.near_full().count())
        .sum();
    if near_full > 0 {
        println!();
        println!("{}", format!("⚠ {} block(s) near their limit", near_full).yellow());
    }
}
