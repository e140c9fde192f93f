// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Messaging
//!
//! Bulk conversation operations over a selected set of agents: send one
//! message to many agents, reset or compact their histories. Every bulk
//! operation goes through the [`FanoutDispatcher`], so one unreachable agent
//! never hides the results of the others.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::application::dispatcher::FanoutDispatcher;
use crate::domain::agent::LiveAgent;
use crate::domain::canary::CanaryNaming;
use crate::domain::error::FleetError;
use crate::domain::message::{AgentMessage, CompactionSummary, MessageReply, MessageSink};
use crate::domain::remote::{RemoteClient, RemoteError};
use crate::domain::report::DispatchResult;
use crate::domain::selector::Selector;

/// Streaming callback that also receives the name of the producing agent.
pub type FleetMessageSink = dyn Fn(&str, &AgentMessage) + Send + Sync;

pub struct MessagingService {
    remote: Arc<dyn RemoteClient>,
    dispatcher: FanoutDispatcher,
    naming: CanaryNaming,
}

impl MessagingService {
    pub fn new(remote: Arc<dyn RemoteClient>, dispatcher: FanoutDispatcher) -> Self {
        Self {
            remote,
            dispatcher,
            naming: CanaryNaming::default(),
        }
    }

    pub fn with_naming(mut self, naming: CanaryNaming) -> Self {
        self.naming = naming;
        self
    }

    /// Live agents matched by `selector`. Canary shadows are only included
    /// when the selector names them explicitly.
    pub async fn targets(&self, selector: &Selector) -> Result<Vec<LiveAgent>, FleetError> {
        let explicit_canary = selector
            .name_pattern()
            .is_some_and(|p| self.naming.is_marked(p));
        let agents = self.remote.list_agents(selector).await?;
        Ok(agents
            .into_iter()
            .filter(|a| selector.matches(a))
            .filter(|a| explicit_canary || !self.naming.is_marked(&a.name))
            .collect())
    }

    pub async fn send(
        &self,
        targets: Vec<LiveAgent>,
        content: &str,
        sink: Option<Arc<FleetMessageSink>>,
        cancel: &CancellationToken,
    ) -> DispatchResult<MessageReply> {
        info!("Sending message to {} agent(s)", targets.len());
        let remote = self.remote.clone();
        let content = content.to_string();

        self.dispatcher
            .dispatch(
                by_name(targets),
                move |agent: LiveAgent| {
                    let remote = remote.clone();
                    let content = content.clone();
                    let sink = sink.clone();
                    async move {
                        match sink {
                            Some(sink) => {
                                let name = agent.name.clone();
                                let forward = move |message: &AgentMessage| sink(&name, message);
                                let forward: &MessageSink = &forward;
                                remote.send_message(&agent.id, &content, Some(forward)).await
                            }
                            None => remote.send_message(&agent.id, &content, None).await,
                        }
                    }
                },
                cancel,
            )
            .await
    }

    /// Most recent messages of a single agent, looked up by name.
    pub async fn history(&self, name: &str, limit: usize) -> Result<Vec<AgentMessage>, FleetError> {
        let agent = self
            .remote
            .get_agent_by_name(name)
            .await?
            .ok_or_else(|| RemoteError::NotFound(format!("agent '{}'", name)))?;
        Ok(self.remote.list_messages(&agent.id, limit).await?)
    }

    pub async fn reset(&self, targets: Vec<LiveAgent>, cancel: &CancellationToken) -> DispatchResult<()> {
        let remote = self.remote.clone();
        self.dispatcher
            .dispatch(
                by_name(targets),
                move |agent: LiveAgent| {
                    let remote = remote.clone();
                    async move { remote.reset_messages(&agent.id).await }
                },
                cancel,
            )
            .await
    }

    pub async fn compact(
        &self,
        targets: Vec<LiveAgent>,
        cancel: &CancellationToken,
    ) -> DispatchResult<CompactionSummary> {
        let remote = self.remote.clone();
        self.dispatcher
            .dispatch(
                by_name(targets),
                move |agent: LiveAgent| {
                    let remote = remote.clone();
                    async move { remote.compact_messages(&agent.id).await }
                },
                cancel,
            )
            .await
    }
}

fn by_name(agents: Vec<LiveAgent>) -> Vec<(String, LiveAgent)> {
    agents.into_iter().map(|a| (a.name.clone(), a)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::AgentDraft;
    use crate::domain::merge::FieldMap;
    use crate::domain::report::DispatchError;
    use crate::infrastructure::in_memory::InMemoryRemoteClient;
    use parking_lot::Mutex;
    use serde_json::json;

    async fn seed(remote: &InMemoryRemoteClient, name: &str, role: &str) {
        let mut fields = FieldMap::new();
        fields.insert("tags.role".to_string(), json!(role));
        remote
            .create_agent(&AgentDraft {
                name: name.to_string(),
                fields,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_targets_skip_canaries_unless_named() {
        let remote = Arc::new(InMemoryRemoteClient::new());
        seed(&remote, "A", "support").await;
        seed(&remote, "CANARY-A", "support").await;
        let service = MessagingService::new(remote, FanoutDispatcher::new(2));

        let selector = Selector::parse("role:support").unwrap();
        let targets = service.targets(&selector).await.unwrap();
        assert_eq!(targets.len(), 1);

        let selector = Selector::parse("CANARY-*").unwrap();
        assert_eq!(service.targets(&selector).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_send_streams_with_agent_name() {
        let remote = Arc::new(InMemoryRemoteClient::new());
        seed(&remote, "A", "support").await;
        seed(&remote, "B", "support").await;
        let service = MessagingService::new(remote, FanoutDispatcher::new(2));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let sink: Arc<FleetMessageSink> = Arc::new(move |name: &str, _m: &AgentMessage| {
            recorder.lock().push(name.to_string());
        });

        let targets = service.targets(&Selector::all()).await.unwrap();
        let results = service
            .send(targets, "hello", Some(sink), &CancellationToken::new())
            .await;

        assert!(results.values().all(|r| r.is_ok()));
        let mut names = seen.lock().clone();
        names.sort();
        names.dedup();
        assert_eq!(names, vec!["A".to_string(), "B".to_string()]);
    }

    #[tokio::test]
    async fn test_reset_reports_each_agent() {
        let remote = Arc::new(InMemoryRemoteClient::new());
        seed(&remote, "A", "support").await;
        seed(&remote, "B", "support").await;
        remote.fail_agent("B", RemoteError::Rejected("locked".to_string()));
        let service = MessagingService::new(remote, FanoutDispatcher::new(2));

        let targets = service.targets(&Selector::all()).await.unwrap();
        let results = service.reset(targets, &CancellationToken::new()).await;
        assert_eq!(results["A"], Ok(()));
        assert!(matches!(results["B"], Err(DispatchError::Remote(_))));
    }
}
