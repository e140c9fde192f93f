// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-Memory Remote Client
//!
//! Complete [`RemoteClient`] implementation backed by process memory. Used by
//! the test suites and for exploring configurations without a hosting
//! service. Counts every call and can inject failures and latency per agent,
//! which lets tests assert on exact remote traffic.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::agent::{AgentDraft, AgentId, LiveAgent, LiveSharedResource};
use crate::domain::fleet::{tag_path, ResourceKind, SharedResourceSpec};
use crate::domain::merge::{FieldMap, Patch};
use crate::domain::message::{
    AgentMessage, CompactionSummary, MessageReply, MessageSink, MessageType,
};
use crate::domain::remote::{RemoteClient, RemoteError};
use crate::domain::selector::Selector;

/// Per-operation call counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub agent_creates: usize,
    pub agent_updates: usize,
    pub agent_deletes: usize,
    pub agent_renames: usize,
    pub shared_upserts: usize,
    pub shared_deletes: usize,
    pub snapshot_writes: usize,
    pub messages_sent: usize,
    pub history_resets: usize,
    pub compactions: usize,
}

impl CallCounts {
    /// Calls that change agent or shared-resource state.
    pub fn mutations(&self) -> usize {
        self.agent_creates
            + self.agent_updates
            + self.agent_deletes
            + self.agent_renames
            + self.shared_upserts
            + self.shared_deletes
            + self.snapshot_writes
    }
}

#[derive(Default)]
struct State {
    agents: BTreeMap<AgentId, LiveAgent>,
    shared: BTreeMap<(ResourceKind, String), LiveSharedResource>,
    snapshots: HashMap<AgentId, Vec<u8>>,
    messages: HashMap<AgentId, Vec<AgentMessage>>,
    calls: CallCounts,
    agent_failures: HashMap<String, RemoteError>,
    message_failures: HashMap<String, RemoteError>,
    message_delays: HashMap<String, Duration>,
    shared_failures: HashMap<String, RemoteError>,
    rename_failures: BTreeSet<usize>,
}

impl State {
    fn agent(&self, id: &AgentId) -> Result<&LiveAgent, RemoteError> {
        self.agents
            .get(id)
            .ok_or_else(|| RemoteError::NotFound(format!("agent {}", id)))
    }

    fn check_agent(&self, name: &str) -> Result<(), RemoteError> {
        match self.agent_failures.get(name) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn name_taken(&self, name: &str, except: Option<&AgentId>) -> bool {
        self.agents
            .values()
            .any(|a| a.name == name && Some(&a.id) != except)
    }
}

#[derive(Default)]
pub struct InMemoryRemoteClient {
    state: Mutex<State>,
}

impl InMemoryRemoteClient {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Test controls
    // ------------------------------------------------------------------

    pub fn calls(&self) -> CallCounts {
        self.state.lock().calls.clone()
    }

    pub fn reset_calls(&self) {
        self.state.lock().calls = CallCounts::default();
    }

    /// Every agent-scoped call for `name` fails with `error`, creation
    /// included. Reads are unaffected.
    pub fn fail_agent(&self, name: &str, error: RemoteError) {
        self.state.lock().agent_failures.insert(name.to_string(), error);
    }

    /// Only `send_message` fails for `name`.
    pub fn fail_messages(&self, name: &str, error: RemoteError) {
        self.state.lock().message_failures.insert(name.to_string(), error);
    }

    pub fn delay_messages(&self, name: &str, delay: Duration) {
        self.state.lock().message_delays.insert(name.to_string(), delay);
    }

    pub fn fail_shared_resource(&self, name: &str, error: RemoteError) {
        self.state.lock().shared_failures.insert(name.to_string(), error);
    }

    /// Make the `attempt`-th rename call (1-based) fail with a transient
    /// error without taking effect.
    pub fn fail_rename_attempt(&self, attempt: usize) {
        self.state.lock().rename_failures.insert(attempt);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.agent_failures.clear();
        state.message_failures.clear();
        state.shared_failures.clear();
        state.rename_failures.clear();
    }

    /// Insert an agent directly, without counting a call. Simulates agents
    /// created outside the engine.
    pub fn insert_agent(&self, name: &str, fields: FieldMap) -> LiveAgent {
        let agent = LiveAgent {
            id: AgentId::new(Uuid::new_v4().to_string()),
            name: name.to_string(),
            fields,
        };
        self.state.lock().agents.insert(agent.id.clone(), agent.clone());
        agent
    }

    /// Insert a shared resource the engine did not create (no fingerprint).
    pub fn insert_shared_resource(&self, kind: ResourceKind, name: &str) -> LiveSharedResource {
        let resource = LiveSharedResource {
            kind,
            name: name.to_string(),
            id: Uuid::new_v4().to_string(),
            fingerprint: None,
            definition: None,
        };
        self.state
            .lock()
            .shared
            .insert((kind, name.to_string()), resource.clone());
        resource
    }

    /// Edit a field as a user of the hosting service would.
    pub fn edit_field(&self, name: &str, path: &str, value: serde_json::Value) -> bool {
        let mut state = self.state.lock();
        match state.agents.values_mut().find(|a| a.name == name) {
            Some(agent) => {
                agent.fields.insert(path.to_string(), value);
                true
            }
            None => false,
        }
    }

    pub fn agent_named(&self, name: &str) -> Option<LiveAgent> {
        self.state
            .lock()
            .agents
            .values()
            .find(|a| a.name == name)
            .cloned()
    }

    pub fn agent_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().agents.values().map(|a| a.name.clone()).collect();
        names.sort();
        names
    }

    pub fn shared_resource(&self, kind: ResourceKind, name: &str) -> Option<LiveSharedResource> {
        self.state.lock().shared.get(&(kind, name.to_string())).cloned()
    }

    pub fn message_count(&self, name: &str) -> usize {
        let state = self.state.lock();
        state
            .agents
            .values()
            .find(|a| a.name == name)
            .and_then(|a| state.messages.get(&a.id))
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl RemoteClient for InMemoryRemoteClient {
    async fn get_agent_by_name(&self, name: &str) -> Result<Option<LiveAgent>, RemoteError> {
        Ok(self.agent_named(name))
    }

    async fn get_agent(&self, id: &AgentId) -> Result<Option<LiveAgent>, RemoteError> {
        Ok(self.state.lock().agents.get(id).cloned())
    }

    async fn list_agents(&self, selector: &Selector) -> Result<Vec<LiveAgent>, RemoteError> {
        let state = self.state.lock();
        let mut agents: Vec<LiveAgent> = state
            .agents
            .values()
            .filter(|a| selector.matches(*a))
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(agents)
    }

    async fn create_agent(&self, draft: &AgentDraft) -> Result<LiveAgent, RemoteError> {
        let mut state = self.state.lock();
        state.calls.agent_creates += 1;
        state.check_agent(&draft.name)?;
        if state.name_taken(&draft.name, None) {
            return Err(RemoteError::Rejected(format!(
                "agent name '{}' already exists",
                draft.name
            )));
        }

        let agent = LiveAgent {
            id: AgentId::new(Uuid::new_v4().to_string()),
            name: draft.name.clone(),
            fields: draft.fields.clone(),
        };
        state.agents.insert(agent.id.clone(), agent.clone());
        Ok(agent)
    }

    async fn update_agent(&self, id: &AgentId, patch: &Patch) -> Result<LiveAgent, RemoteError> {
        let mut state = self.state.lock();
        state.calls.agent_updates += 1;
        let name = state.agent(id)?.name.clone();
        state.check_agent(&name)?;

        let agent = state
            .agents
            .get_mut(id)
            .ok_or_else(|| RemoteError::NotFound(format!("agent {}", id)))?;
        patch.apply_to(&mut agent.fields);
        Ok(agent.clone())
    }

    async fn delete_agent(&self, id: &AgentId) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.calls.agent_deletes += 1;
        let name = state.agent(id)?.name.clone();
        state.check_agent(&name)?;

        state.agents.remove(id);
        state.snapshots.remove(id);
        state.messages.remove(id);
        Ok(())
    }

    async fn rename_agent(
        &self,
        id: &AgentId,
        new_name: &str,
        new_tags: &BTreeMap<String, String>,
    ) -> Result<LiveAgent, RemoteError> {
        let mut state = self.state.lock();
        state.calls.agent_renames += 1;
        let attempt = state.calls.agent_renames;
        if state.rename_failures.remove(&attempt) {
            return Err(RemoteError::Transient("connection reset".to_string()));
        }
        let name = state.agent(id)?.name.clone();
        state.check_agent(&name)?;
        if state.name_taken(new_name, Some(id)) {
            return Err(RemoteError::Rejected(format!(
                "agent name '{}' already exists",
                new_name
            )));
        }

        let agent = state
            .agents
            .get_mut(id)
            .ok_or_else(|| RemoteError::NotFound(format!("agent {}", id)))?;
        agent.name = new_name.to_string();
        agent.fields.retain(|path, _| !path.starts_with("tags."));
        for (key, value) in new_tags {
            agent
                .fields
                .insert(tag_path(key), serde_json::Value::String(value.clone()));
        }
        Ok(agent.clone())
    }

    async fn list_shared_resources(&self) -> Result<Vec<LiveSharedResource>, RemoteError> {
        Ok(self.state.lock().shared.values().cloned().collect())
    }

    async fn create_or_update_shared_resource(
        &self,
        spec: &SharedResourceSpec,
        fingerprint: &str,
    ) -> Result<LiveSharedResource, RemoteError> {
        let mut state = self.state.lock();
        state.calls.shared_upserts += 1;
        if let Some(err) = state.shared_failures.get(spec.name()) {
            return Err(err.clone());
        }

        let key = (spec.kind(), spec.name().to_string());
        let id = state
            .shared
            .get(&key)
            .map(|r| r.id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let resource = LiveSharedResource {
            kind: spec.kind(),
            name: spec.name().to_string(),
            id,
            fingerprint: Some(fingerprint.to_string()),
            definition: Some(spec.clone()),
        };
        state.shared.insert(key, resource.clone());
        Ok(resource)
    }

    async fn delete_shared_resource(&self, kind: ResourceKind, name: &str) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.calls.shared_deletes += 1;
        if let Some(err) = state.shared_failures.get(name) {
            return Err(err.clone());
        }
        state
            .shared
            .remove(&(kind, name.to_string()))
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(format!("{} {}", kind, name)))
    }

    async fn send_message(
        &self,
        id: &AgentId,
        content: &str,
        sink: Option<&MessageSink>,
    ) -> Result<MessageReply, RemoteError> {
        let delay = {
            let mut state = self.state.lock();
            state.calls.messages_sent += 1;
            let name = state.agent(id)?.name.clone();
            state.check_agent(&name)?;
            if let Some(err) = state.message_failures.get(&name) {
                return Err(err.clone());
            }
            state.message_delays.get(&name).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let reply = vec![AgentMessage::new(
            MessageType::AssistantMessage,
            format!("Acknowledged: {}", content),
        )];
        if let Some(sink) = sink {
            for message in &reply {
                sink(message);
            }
        }

        let mut state = self.state.lock();
        let history = state.messages.entry(id.clone()).or_default();
        history.push(AgentMessage::new(MessageType::UserMessage, content));
        history.extend(reply.iter().cloned());
        Ok(MessageReply { messages: reply })
    }

    async fn list_messages(&self, id: &AgentId, limit: usize) -> Result<Vec<AgentMessage>, RemoteError> {
        let state = self.state.lock();
        state.agent(id)?;
        let history = state.messages.get(id).cloned().unwrap_or_default();
        let skip = history.len().saturating_sub(limit);
        Ok(history.into_iter().skip(skip).collect())
    }

    async fn reset_messages(&self, id: &AgentId) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.calls.history_resets += 1;
        let name = state.agent(id)?.name.clone();
        state.check_agent(&name)?;
        state.messages.remove(id);
        Ok(())
    }

    async fn compact_messages(&self, id: &AgentId) -> Result<CompactionSummary, RemoteError> {
        let mut state = self.state.lock();
        state.calls.compactions += 1;
        let name = state.agent(id)?.name.clone();
        state.check_agent(&name)?;

        let history = state.messages.entry(id.clone()).or_default();
        let before = history.len();
        if before > 1 {
            *history = vec![AgentMessage::new(
                MessageType::SystemMessage,
                format!("Summary of {} earlier messages", before),
            )];
        }
        Ok(CompactionSummary {
            messages_before: before,
            messages_after: history.len(),
        })
    }

    async fn get_last_applied_snapshot(&self, id: &AgentId) -> Result<Option<Vec<u8>>, RemoteError> {
        Ok(self.state.lock().snapshots.get(id).cloned())
    }

    async fn set_last_applied_snapshot(&self, id: &AgentId, blob: &[u8]) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.calls.snapshot_writes += 1;
        let name = state.agent(id)?.name.clone();
        state.check_agent(&name)?;
        state.snapshots.insert(id.clone(), blob.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::merge::FieldMap;
    use serde_json::json;

    fn draft(name: &str) -> AgentDraft {
        let mut fields = FieldMap::new();
        fields.insert("tags.role".to_string(), json!("support"));
        AgentDraft {
            name: name.to_string(),
            fields,
        }
    }

    #[tokio::test]
    async fn test_names_are_unique() {
        let client = InMemoryRemoteClient::new();
        client.create_agent(&draft("a")).await.unwrap();
        let err = client.create_agent(&draft("a")).await.unwrap_err();
        assert!(matches!(err, RemoteError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_rename_keeps_id_and_replaces_tags() {
        let client = InMemoryRemoteClient::new();
        let agent = client.create_agent(&draft("a")).await.unwrap();
        let tags = BTreeMap::from([("tier".to_string(), "2".to_string())]);

        let renamed = client.rename_agent(&agent.id, "b", &tags).await.unwrap();
        assert_eq!(renamed.id, agent.id);
        assert_eq!(renamed.name, "b");
        assert_eq!(renamed.tag("role"), None);
        assert_eq!(renamed.tag("tier").as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_injected_rename_failure_is_transient_and_has_no_effect() {
        let client = InMemoryRemoteClient::new();
        let agent = client.create_agent(&draft("a")).await.unwrap();
        client.fail_rename_attempt(1);

        let err = client
            .rename_agent(&agent.id, "b", &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(client.agent_named("a").map(|a| a.id), Some(agent.id.clone()));

        client.rename_agent(&agent.id, "b", &BTreeMap::new()).await.unwrap();
        assert!(client.agent_named("b").is_some());
    }

    #[tokio::test]
    async fn test_message_history_and_compaction() {
        let client = InMemoryRemoteClient::new();
        let agent = client.create_agent(&draft("a")).await.unwrap();
        client.send_message(&agent.id, "one", None).await.unwrap();
        client.send_message(&agent.id, "two", None).await.unwrap();

        assert_eq!(client.list_messages(&agent.id, 3).await.unwrap().len(), 3);
        let summary = client.compact_messages(&agent.id).await.unwrap();
        assert_eq!(summary.messages_before, 4);
        assert_eq!(summary.messages_after, 1);
    }
}
