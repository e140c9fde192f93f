// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Per-entity outcomes of apply and dispatch runs.
//!
//! Entity-scoped failures end up here instead of aborting the run, so every
//! successful entity is still reported when some siblings fail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::agent::AgentId;
use crate::domain::fleet::ResourceKind;
use crate::domain::merge::{Conflict, Patch};
use crate::domain::remote::RemoteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityAction {
    Created,
    Updated,
    Unchanged,
    Deleted,
    Skipped,
    WouldCreate,
    WouldUpdate,
    WouldDelete,
    Cancelled,
    Failed,
}

impl EntityAction {
    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::Created | Self::Updated | Self::Deleted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Deleted => "deleted",
            Self::Skipped => "skipped",
            Self::WouldCreate => "would create",
            Self::WouldUpdate => "would update",
            Self::WouldDelete => "would delete",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<AgentId>,
    pub action: EntityAction,
    #[serde(default, skip_serializing_if = "Patch::is_empty")]
    pub patch: Patch,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<Conflict>,
    #[serde(default)]
    pub calibrated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentOutcome {
    pub fn new(name: impl Into<String>, action: EntityAction) -> Self {
        Self {
            name: name.into(),
            id: None,
            action,
            patch: Patch::default(),
            conflicts: Vec::new(),
            calibrated: false,
            error: None,
        }
    }

    pub fn failed(name: impl Into<String>, error: impl ToString) -> Self {
        let mut outcome = Self::new(name, EntityAction::Failed);
        outcome.error = Some(error.to_string());
        outcome
    }

    pub fn is_failure(&self) -> bool {
        self.action == EntityAction::Failed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedOutcome {
    pub kind: ResourceKind,
    pub name: String,
    pub ref_count: usize,
    pub action: EntityAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Something removed (or that would be removed) by a full-fleet prune.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PruneOutcome {
    /// `agent` or a shared resource kind
    pub kind: String,
    pub name: String,
    pub action: EntityAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub agents: Vec<AgentOutcome>,
    pub shared: Vec<SharedOutcome>,
    pub pruned: Vec<PruneOutcome>,
}

impl ApplyReport {
    pub fn new(dry_run: bool) -> Self {
        let now = Utc::now();
        Self {
            dry_run,
            started_at: now,
            finished_at: now,
            agents: Vec::new(),
            shared: Vec::new(),
            pruned: Vec::new(),
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Utc::now();
        self.agents.sort_by(|a, b| a.name.cmp(&b.name));
        self.shared
            .sort_by(|a, b| (a.kind, a.name.as_str()).cmp(&(b.kind, b.name.as_str())));
    }

    pub fn agent(&self, name: &str) -> Option<&AgentOutcome> {
        self.agents.iter().find(|a| a.name == name)
    }

    pub fn succeeded(&self) -> usize {
        self.agents.iter().filter(|a| !a.is_failure() && a.action != EntityAction::Cancelled).count()
    }

    pub fn failed(&self) -> usize {
        self.agents.iter().filter(|a| a.is_failure()).count()
            + self.shared.iter().filter(|s| s.action == EntityAction::Failed).count()
            + self.pruned.iter().filter(|p| p.action == EntityAction::Failed).count()
    }

    pub fn conflicts(&self) -> usize {
        self.agents.iter().map(|a| a.conflicts.len()).sum()
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0 || self.agents.iter().any(|a| a.action == EntityAction::Cancelled)
    }

    /// Number of mutating calls the run resulted in.
    pub fn mutations(&self) -> usize {
        self.agents.iter().filter(|a| a.action.is_mutation()).count()
            + self.shared.iter().filter(|s| s.action.is_mutation()).count()
            + self.pruned.iter().filter(|p| p.action.is_mutation()).count()
    }
}

// ============================================================================
// Dispatch
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Did not finish before the dispatch deadline")]
    Timeout,

    #[error("Cancelled before start")]
    Cancelled,

    #[error("Worker failed: {0}")]
    Worker(String),
}

/// Per-entity results keyed by entity name.
pub type DispatchResult<T> = BTreeMap<String, Result<T, DispatchError>>;

pub fn dispatch_failures<T>(result: &DispatchResult<T>) -> usize {
    result.values().filter(|r| r.is_err()).count()
}
