// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Remote Client Interface
//!
//! Capability contract for the agent-hosting service. The engine only ever
//! reads and writes live state through this trait; the hosting service owns
//! agents, shared resources, canary tags and last-applied snapshots.
//!
//! | Implementation | Where |
//! |----------------|-------|
//! | `InMemoryRemoteClient` | `crate::infrastructure::in_memory` |
//! | `HttpRemoteClient` | `flotilla-sdk` |
//!
//! Every method is a potentially blocking network call and is the only
//! suspension point the engine has. Retries for transient failures belong to
//! the implementation, not to callers.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::domain::agent::{AgentDraft, AgentId, LiveAgent, LiveSharedResource};
use crate::domain::fleet::{ResourceKind, SharedResourceSpec};
use crate::domain::merge::Patch;
use crate::domain::message::{AgentMessage, CompactionSummary, MessageReply, MessageSink};
use crate::domain::selector::Selector;

#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Find agent by exact name
    async fn get_agent_by_name(&self, name: &str) -> Result<Option<LiveAgent>, RemoteError>;

    /// Find agent by id
    async fn get_agent(&self, id: &AgentId) -> Result<Option<LiveAgent>, RemoteError>;

    /// List agents matching a selector
    async fn list_agents(&self, selector: &Selector) -> Result<Vec<LiveAgent>, RemoteError>;

    /// Create an agent carrying its full desired state
    async fn create_agent(&self, draft: &AgentDraft) -> Result<LiveAgent, RemoteError>;

    /// Apply a patch to an existing agent
    async fn update_agent(&self, id: &AgentId, patch: &Patch) -> Result<LiveAgent, RemoteError>;

    async fn delete_agent(&self, id: &AgentId) -> Result<(), RemoteError>;

    /// Reassign name and tag set in place (no delete/recreate)
    async fn rename_agent(
        &self,
        id: &AgentId,
        new_name: &str,
        new_tags: &BTreeMap<String, String>,
    ) -> Result<LiveAgent, RemoteError>;

    async fn list_shared_resources(&self) -> Result<Vec<LiveSharedResource>, RemoteError>;

    /// Upsert a shared resource, stamping it with `fingerprint`
    async fn create_or_update_shared_resource(
        &self,
        spec: &SharedResourceSpec,
        fingerprint: &str,
    ) -> Result<LiveSharedResource, RemoteError>;

    async fn delete_shared_resource(&self, kind: ResourceKind, name: &str) -> Result<(), RemoteError>;

    /// Send a user message; `sink` receives messages as they stream in
    async fn send_message(
        &self,
        id: &AgentId,
        content: &str,
        sink: Option<&MessageSink>,
    ) -> Result<MessageReply, RemoteError>;

    async fn list_messages(&self, id: &AgentId, limit: usize) -> Result<Vec<AgentMessage>, RemoteError>;

    async fn reset_messages(&self, id: &AgentId) -> Result<(), RemoteError>;

    async fn compact_messages(&self, id: &AgentId) -> Result<CompactionSummary, RemoteError>;

    async fn get_last_applied_snapshot(&self, id: &AgentId) -> Result<Option<Vec<u8>>, RemoteError>;

    async fn set_last_applied_snapshot(&self, id: &AgentId, blob: &[u8]) -> Result<(), RemoteError>;
}

/// Remote client errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// The service refused a specific request (quota, schema mismatch, ...)
    #[error("Rejected by service: {0}")]
    Rejected(String),

    /// Network-level failure that survived the client's retries
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl RemoteError {
    /// Errors that make every further call pointless.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, RemoteError::Unauthorized(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_) | RemoteError::Timeout(_))
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        RemoteError::Protocol(err.to_string())
    }
}
