// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Memory Report
//!
//! Per-agent memory block usage: characters stored against each block's
//! limit, with blocks at or above [`NEAR_FULL_RATIO`] flagged. An optional
//! [`MemoryAnalyzer`] adds a free-text assessment per agent.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::application::dispatcher::FanoutDispatcher;
use crate::domain::agent::LiveAgent;
use crate::domain::error::FleetError;
use crate::domain::remote::{RemoteClient, RemoteError};
use crate::domain::report::DispatchResult;
use crate::domain::selector::Selector;

/// Fill ratio from which a block counts as near full.
pub const NEAR_FULL_RATIO: f64 = 0.8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockUsage {
    pub label: String,
    pub chars: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// `None` for blocks without a limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_ratio: Option<f64>,
    pub near_full: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMemoryReport {
    pub agent: String,
    pub blocks: Vec<BlockUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
}

impl AgentMemoryReport {
    pub fn from_live(agent: &LiveAgent) -> Self {
        let blocks = agent
            .memory_blocks()
            .into_iter()
            .map(|block| {
                let chars = block.value.chars().count();
                let fill_ratio = block
                    .limit
                    .filter(|limit| *limit > 0)
                    .map(|limit| chars as f64 / limit as f64);
                BlockUsage {
                    label: block.label,
                    chars,
                    limit: block.limit,
                    fill_ratio,
                    near_full: fill_ratio.is_some_and(|r| r >= NEAR_FULL_RATIO),
                }
            })
            .collect();

        Self {
            agent: agent.name.clone(),
            blocks,
            analysis: None,
        }
    }

    pub fn near_full(&self) -> impl Iterator<Item = &BlockUsage> {
        self.blocks.iter().filter(|b| b.near_full)
    }
}

/// Produces a qualitative assessment of an agent's memory.
#[async_trait]
pub trait MemoryAnalyzer: Send + Sync {
    async fn analyze(&self, agent: &LiveAgent, usage: &AgentMemoryReport) -> Result<String, RemoteError>;
}

/// Asks the agent itself to review its own memory blocks.
pub struct SelfAnalysisAnalyzer {
    remote: Arc<dyn RemoteClient>,
}

impl SelfAnalysisAnalyzer {
    pub fn new(remote: Arc<dyn RemoteClient>) -> Self {
        Self { remote }
    }

    fn prompt(usage: &AgentMemoryReport) -> String {
        let mut prompt = String::from(
            "Review your memory blocks. For each block say what is stale, duplicated or \
             missing, and suggest what to archive. Current usage:\n",
        );
        for block in &usage.blocks {
            match block.limit {
                Some(limit) => prompt.push_str(&format!("- {}: {}/{} chars\n", block.label, block.chars, limit)),
                None => prompt.push_str(&format!("- {}: {} chars\n", block.label, block.chars)),
            }
        }
        prompt
    }
}

#[async_trait]
impl MemoryAnalyzer for SelfAnalysisAnalyzer {
    async fn analyze(&self, agent: &LiveAgent, usage: &AgentMemoryReport) -> Result<String, RemoteError> {
        let reply = self
            .remote
            .send_message(&agent.id, &Self::prompt(usage), None)
            .await?;
        Ok(reply.assistant_text())
    }
}

pub struct MemoryReportService {
    remote: Arc<dyn RemoteClient>,
    dispatcher: FanoutDispatcher,
    analyzer: Option<Arc<dyn MemoryAnalyzer>>,
}

impl MemoryReportService {
    pub fn new(remote: Arc<dyn RemoteClient>, dispatcher: FanoutDispatcher) -> Self {
        Self {
            remote,
            dispatcher,
            analyzer: None,
        }
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn MemoryAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub async fn report(
        &self,
        selector: &Selector,
        cancel: &CancellationToken,
    ) -> Result<DispatchResult<AgentMemoryReport>, FleetError> {
        let agents: Vec<(String, LiveAgent)> = self
            .remote
            .list_agents(selector)
            .await?
            .into_iter()
            .filter(|a| selector.matches(a))
            .map(|a| (a.name.clone(), a))
            .collect();

        let analyzer = self.analyzer.clone();
        Ok(self
            .dispatcher
            .dispatch(
                agents,
                move |agent: LiveAgent| {
                    let analyzer = analyzer.clone();
                    async move {
                        let mut report = AgentMemoryReport::from_live(&agent);
                        if let Some(analyzer) = analyzer {
                            report.analysis = Some(analyzer.analyze(&agent, &report).await?);
                        }
                        Ok(report)
                    }
                },
                cancel,
            )
            .await)
    }
}
