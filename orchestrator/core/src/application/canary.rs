// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Canary Manager
//!
//! Deploys shadow copies of production agents, promotes a shadow into the
//! production identity, and cleans up afterwards.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Canary lifecycle on top of the reconciler
//!
//! The identity swap during promotion uses renames only, so agent ids (and
//! with them conversation history and snapshots) survive. Each rename is
//! re-checked against freshly read state before it is issued, which makes a
//! retried promotion skip the steps that already went through.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::reconciler::{ApplyMode, ApplyOptions, ReconcilerService};
use crate::domain::agent::AgentId;
use crate::domain::canary::{
    CanaryNaming, CanarySet, CanaryState, CanaryStateError, CANARY_OF_TAG, CANARY_STATE_TAG,
};
use crate::domain::error::FleetError;
use crate::domain::fleet::FleetConfiguration;
use crate::domain::remote::{RemoteClient, RemoteError};
use crate::domain::report::{AgentOutcome, ApplyReport, EntityAction};
use crate::domain::selector::Selector;

/// Sent to the shadow before promotion to prove it is reachable.
pub const CALIBRATION_ECHO: &str = "Reply with OK if you can read this message.";

const DEFAULT_SWAP_ATTEMPTS: u32 = 3;
const SWAP_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionReport {
    pub production: String,
    /// Former shadow, now carrying the production name
    pub promoted_id: AgentId,
    /// Former production agent, now retired
    pub retired_id: AgentId,
    pub retired_name: String,
    pub calibration_reply: String,
    pub attempts: u32,
}

pub struct CanaryManager {
    remote: Arc<dyn RemoteClient>,
    reconciler: Arc<dyn ReconcilerService>,
    naming: CanaryNaming,
    swap_attempts: u32,
}

impl CanaryManager {
    pub fn new(
        remote: Arc<dyn RemoteClient>,
        reconciler: Arc<dyn ReconcilerService>,
        naming: CanaryNaming,
    ) -> Self {
        Self {
            remote,
            reconciler,
            naming,
            swap_attempts: DEFAULT_SWAP_ATTEMPTS,
        }
    }

    pub fn with_swap_attempts(mut self, attempts: u32) -> Self {
        self.swap_attempts = attempts.max(1);
        self
    }

    pub fn naming(&self) -> &CanaryNaming {
        &self.naming
    }

    /// Reconcile shadows of the named production agents. Production agents
    /// are never touched.
    pub async fn deploy(
        &self,
        config: &FleetConfiguration,
        names: &[String],
        options: &ApplyOptions,
        cancel: &CancellationToken,
    ) -> Result<ApplyReport, FleetError> {
        config.validate()?;

        let mut shadows = Vec::with_capacity(names.len());
        for name in names {
            let production = config
                .agent(name)
                .ok_or_else(|| CanaryStateError::NotInConfiguration(name.clone()))?;
            shadows.push(self.naming.shadow_spec(production));
        }

        let mut preexisting = BTreeSet::new();
        for shadow in &shadows {
            if self.remote.get_agent_by_name(&shadow.name).await?.is_some() {
                preexisting.insert(shadow.name.clone());
            }
        }

        let shadow_config = FleetConfiguration {
            shared_blocks: config.shared_blocks.clone(),
            shared_folders: config.shared_folders.clone(),
            mcp_servers: config.mcp_servers.clone(),
            agents: shadows,
        };
        let shadow_options = ApplyOptions {
            prune: false,
            mode: ApplyMode::Standard,
            selector: Selector::all(),
            ..options.clone()
        };

        let mut report = self
            .reconciler
            .apply(&shadow_config, &shadow_options, cancel)
            .await?;

        // A shadow created in this run but not fully set up goes away again.
        for outcome in report
            .agents
            .iter_mut()
            .filter(|o| o.is_failure() && !preexisting.contains(&o.name))
        {
            let Some(id) = outcome.id.clone() else {
                continue;
            };
            warn!("Removing partially created canary {}", outcome.name);
            if let Err(e) = self.remote.delete_agent(&id).await {
                warn!("Failed to remove canary {}: {}", outcome.name, e);
            } else {
                outcome.id = None;
            }
        }

        Ok(report)
    }

    /// Swap the active shadow into the production identity.
    pub async fn promote(&self, name: &str) -> Result<PromotionReport, FleetError> {
        let set = self.status(name).await?;
        let shadow = set.require_active()?.clone();
        let production = self
            .remote
            .get_agent_by_name(name)
            .await?
            .ok_or_else(|| CanaryStateError::ProductionMissing(name.to_string()))?;

        let reply = self
            .remote
            .send_message(&shadow.id, CALIBRATION_ECHO, None)
            .await
            .map_err(|e| CanaryStateError::Unreachable {
                shadow: shadow.name.clone(),
                reason: e.to_string(),
            })?;

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.swap_identities(name, &production.id, &shadow.id).await {
                Ok(()) => break,
                Err(e) if e.is_transient() && attempts < self.swap_attempts => {
                    warn!(
                        "Promotion of {} interrupted ({}), retrying ({}/{})",
                        name, e, attempts, self.swap_attempts
                    );
                    tokio::time::sleep(SWAP_BACKOFF * attempts).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(
            "Promoted {} -> {} (retired {})",
            shadow.name,
            name,
            self.naming.retired_name(name)
        );
        Ok(PromotionReport {
            production: name.to_string(),
            promoted_id: shadow.id,
            retired_id: production.id,
            retired_name: self.naming.retired_name(name),
            calibration_reply: reply.assistant_text(),
            attempts,
        })
    }

    /// One pass over the swap steps, each skipped when already done.
    async fn swap_identities(
        &self,
        name: &str,
        production_id: &AgentId,
        shadow_id: &AgentId,
    ) -> Result<(), RemoteError> {
        let production = self
            .remote
            .get_agent(production_id)
            .await?
            .ok_or_else(|| RemoteError::NotFound(format!("production agent {}", production_id)))?;
        let shadow = self
            .remote
            .get_agent(shadow_id)
            .await?
            .ok_or_else(|| RemoteError::NotFound(format!("canary agent {}", shadow_id)))?;

        let retired_name = self.naming.retired_name(name);
        let production_tags = without_canary_tags(production.tags());

        if production.name != retired_name {
            self.remote
                .rename_agent(production_id, &retired_name, &production.tags())
                .await?;
        }

        if shadow.name != name {
            self.remote
                .rename_agent(shadow_id, name, &production_tags)
                .await?;
        }

        if production.tag(CANARY_STATE_TAG).as_deref() != Some(CanaryState::Retired.as_str()) {
            let mut retired_tags = production.tags();
            retired_tags.insert(CANARY_OF_TAG.to_string(), name.to_string());
            retired_tags.insert(
                CANARY_STATE_TAG.to_string(),
                CanaryState::Retired.as_str().to_string(),
            );
            self.remote
                .rename_agent(production_id, &retired_name, &retired_tags)
                .await?;
        }

        Ok(())
    }

    /// Delete every marked member of the set. Unmarked agents are never
    /// candidates.
    pub async fn cleanup(&self, name: &str, dry_run: bool) -> Result<Vec<AgentOutcome>, FleetError> {
        let set = self.status(name).await?;
        let mut outcomes = Vec::new();

        for member in set.cleanup_candidates() {
            let mut outcome = AgentOutcome::new(member.name.as_str(), EntityAction::WouldDelete);
            outcome.id = Some(member.id.clone());
            if !dry_run {
                match self.remote.delete_agent(&member.id).await {
                    Ok(()) => {
                        info!("Removed canary {} ({})", member.name, member.state);
                        outcome.action = EntityAction::Deleted;
                    }
                    Err(e) => {
                        warn!("Failed to remove canary {}: {}", member.name, e);
                        outcome.action = EntityAction::Failed;
                        outcome.error = Some(e.to_string());
                    }
                }
            }
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    pub async fn status(&self, name: &str) -> Result<CanarySet, FleetError> {
        let selector = Selector::all().with_tag(CANARY_OF_TAG, name);
        let mut members = self.remote.list_agents(&selector).await?;
        // Strays from an interrupted deploy carry the marker but no tags yet.
        if let Some(stray) = self
            .remote
            .get_agent_by_name(&self.naming.shadow_name(name))
            .await?
        {
            if !members.iter().any(|m| m.id == stray.id) {
                members.push(stray);
            }
        }
        Ok(CanarySet::from_agents(name, &self.naming, &members))
    }
}

fn without_canary_tags(mut tags: BTreeMap<String, String>) -> BTreeMap<String, String> {
    tags.remove(CANARY_OF_TAG);
    tags.remove(CANARY_STATE_TAG);
    tags
}
