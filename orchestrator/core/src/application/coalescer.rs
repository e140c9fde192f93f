// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Shared-Resource Coalescer
//!
//! Many agents reference the same shared block, folder or MCP server. The
//! coalescer makes sure each `(kind, name)` is materialized on the hosting
//! service at most once per invocation, no matter how many agent tasks ask
//! for it concurrently.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Per-key single-flight gate in front of the remote client
//!
//! The first caller for a key runs the create/update; concurrent callers for
//! the same key await the same cell and receive a clone of its result.
//! Different keys never wait on each other.

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::application::index::ResourceIndex;
use crate::domain::fleet::SharedRef;
use crate::domain::remote::{RemoteClient, RemoteError};
use crate::domain::report::{EntityAction, PruneOutcome, SharedOutcome};

/// Result of resolving one shared reference.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedResourceHandle {
    pub key: SharedRef,
    /// Remote id; `None` only for a resource that would be created in dry-run
    pub id: Option<String>,
    pub ref_count: usize,
    pub action: EntityAction,
}

type ResolveCell = Arc<OnceCell<Result<SharedResourceHandle, RemoteError>>>;

pub struct SharedResourceCoalescer {
    remote: Arc<dyn RemoteClient>,
    index: Arc<ResourceIndex>,
    dry_run: bool,
    cells: DashMap<SharedRef, ResolveCell>,
}

impl SharedResourceCoalescer {
    pub fn new(remote: Arc<dyn RemoteClient>, index: Arc<ResourceIndex>, dry_run: bool) -> Self {
        Self {
            remote,
            index,
            dry_run,
            cells: DashMap::new(),
        }
    }

    /// Resolve a reference, materializing the resource on first use.
    pub async fn resolve(&self, key: &SharedRef) -> Result<SharedResourceHandle, RemoteError> {
        let cell = self
            .cells
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        cell.get_or_init(|| self.materialize(key)).await.clone()
    }

    async fn materialize(&self, key: &SharedRef) -> Result<SharedResourceHandle, RemoteError> {
        let spec = self
            .index
            .declared(key)
            .ok_or_else(|| RemoteError::NotFound(format!("{} is not declared", key)))?;
        let fingerprint = spec.fingerprint();
        let ref_count = self.index.ref_count(key);
        let live = self.index.live_shared(key);

        let unchanged = live
            .and_then(|l| l.fingerprint.as_deref())
            .is_some_and(|f| f == fingerprint);
        if unchanged {
            debug!("Shared {} unchanged", key);
            return Ok(SharedResourceHandle {
                key: key.clone(),
                id: live.map(|l| l.id.clone()),
                ref_count,
                action: EntityAction::Unchanged,
            });
        }

        if self.dry_run {
            return Ok(SharedResourceHandle {
                key: key.clone(),
                id: live.map(|l| l.id.clone()),
                ref_count,
                action: if live.is_some() {
                    EntityAction::WouldUpdate
                } else {
                    EntityAction::WouldCreate
                },
            });
        }

        let materialized = self
            .remote
            .create_or_update_shared_resource(spec, &fingerprint)
            .await?;
        let action = if live.is_some() {
            EntityAction::Updated
        } else {
            EntityAction::Created
        };
        info!("Shared {} {} ({} references)", key, action.as_str(), ref_count);

        Ok(SharedResourceHandle {
            key: key.clone(),
            id: Some(materialized.id),
            ref_count,
            action,
        })
    }

    /// Outcomes of every key resolved so far, failures included.
    pub fn outcomes(&self) -> Vec<SharedOutcome> {
        let mut outcomes: Vec<SharedOutcome> = self
            .cells
            .iter()
            .filter_map(|entry| {
                let key = entry.key();
                let ref_count = self.index.ref_count(key);
                let outcome = match entry.value().get()? {
                    Ok(handle) => SharedOutcome {
                        kind: key.kind,
                        name: key.name.clone(),
                        ref_count,
                        action: handle.action,
                        error: None,
                    },
                    Err(e) => SharedOutcome {
                        kind: key.kind,
                        name: key.name.clone(),
                        ref_count,
                        action: EntityAction::Failed,
                        error: Some(e.to_string()),
                    },
                };
                Some(outcome)
            })
            .collect();
        outcomes.sort_by(|a, b| (a.kind, a.name.as_str()).cmp(&(b.kind, b.name.as_str())));
        outcomes
    }

    /// Delete engine-managed shared resources nothing references any more.
    ///
    /// Only resources carrying a fingerprint are candidates; declared
    /// resources are kept even when unreferenced. `removed` names the agents
    /// deleted by the same prune pass.
    pub async fn prune(&self, removed: &BTreeSet<String>) -> Vec<PruneOutcome> {
        let mut outcomes = Vec::new();

        for live in self.index.live_shared_resources() {
            let key = SharedRef::new(live.kind, live.name.as_str());
            if !live.is_managed() || self.index.declared(&key).is_some() {
                continue;
            }
            if self.index.ref_count(&key) > 0 || self.index.live_attachers(&key, removed) > 0 {
                debug!("Keeping shared {}, still attached", key);
                continue;
            }

            let action = if self.dry_run {
                EntityAction::WouldDelete
            } else {
                match self.remote.delete_shared_resource(live.kind, &live.name).await {
                    Ok(()) => {
                        info!("Pruned shared {}", key);
                        EntityAction::Deleted
                    }
                    Err(e) => {
                        warn!("Failed to prune shared {}: {}", key, e);
                        outcomes.push(PruneOutcome {
                            kind: live.kind.to_string(),
                            name: live.name.clone(),
                            action: EntityAction::Failed,
                            error: Some(e.to_string()),
                        });
                        continue;
                    }
                }
            };
            outcomes.push(PruneOutcome {
                kind: live.kind.to_string(),
                name: live.name.clone(),
                action,
                error: None,
            });
        }

        outcomes
    }
}
