// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Reconciler
//!
//! Drives one apply: validates the fleet configuration, snapshots live state
//! into a [`ResourceIndex`], then converges every selected agent through the
//! three-way merge.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Orchestrates merge, coalescer and remote client per agent
//!
//! # Per-agent steps
//!
//! 1. Resolve the live counterpart by name
//! 2. Fetch the last-applied snapshot (empty when none)
//! 3. Resolve shared references through the coalescer
//! 4. Merge
//! 5. Create or update, then persist the new snapshot
//! 6. Send the calibration message when due
//!
//! Failures in any step are recorded for that agent only.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::coalescer::SharedResourceCoalescer;
use crate::application::dispatcher::{FanoutDispatcher, DEFAULT_FANOUT_WIDTH};
use crate::application::index::ResourceIndex;
use crate::domain::agent::{AgentDraft, LiveAgent};
use crate::domain::canary::CanaryNaming;
use crate::domain::error::FleetError;
use crate::domain::fleet::{AgentSpec, FleetConfiguration, ValidationError};
use crate::domain::merge::{merge, FieldMap, LastAppliedSnapshot, MergeMode, Patch};
use crate::domain::remote::{RemoteClient, RemoteError};
use crate::domain::report::{AgentOutcome, ApplyReport, DispatchError, EntityAction, PruneOutcome};
use crate::domain::selector::Selector;

/// How configuration agents map onto live agents.
#[derive(Debug, Clone, Default)]
pub enum ApplyMode {
    /// Create or update every selected configuration agent.
    #[default]
    Standard,
    /// Apply the single configuration agent, name excluded, additively to
    /// every live agent the selector matches. Never creates.
    Template(Selector),
    /// Create missing agents; existing ones are reported as skipped.
    CreateOnly,
}

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub dry_run: bool,
    /// Delete engine-managed agents and shared resources that are no longer
    /// declared. Only valid for a full-fleet apply.
    pub prune: bool,
    pub mode: ApplyMode,
    /// Restricts which configuration agents take part (`--match`)
    pub selector: Selector,
    pub recalibrate: bool,
    pub recalibrate_selector: Selector,
    pub concurrency: usize,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            prune: false,
            mode: ApplyMode::Standard,
            selector: Selector::all(),
            recalibrate: false,
            recalibrate_selector: Selector::all(),
            concurrency: DEFAULT_FANOUT_WIDTH,
        }
    }
}

#[async_trait]
pub trait ReconcilerService: Send + Sync {
    async fn apply(
        &self,
        config: &FleetConfiguration,
        options: &ApplyOptions,
        cancel: &CancellationToken,
    ) -> Result<ApplyReport, FleetError>;
}

pub struct StandardReconciler {
    remote: Arc<dyn RemoteClient>,
    naming: CanaryNaming,
}

impl StandardReconciler {
    pub fn new(remote: Arc<dyn RemoteClient>) -> Self {
        Self {
            remote,
            naming: CanaryNaming::default(),
        }
    }

    pub fn with_naming(mut self, naming: CanaryNaming) -> Self {
        self.naming = naming;
        self
    }

    /// Pair every selected agent spec with its merge mode.
    fn work_items(
        &self,
        config: &FleetConfiguration,
        options: &ApplyOptions,
        index: &mut ResourceIndex,
    ) -> Result<Vec<(AgentSpec, MergeMode)>, FleetError> {
        match &options.mode {
            ApplyMode::Standard | ApplyMode::CreateOnly => Ok(config
                .agents
                .iter()
                .filter(|a| options.selector.matches(*a))
                .map(|a| (a.clone(), MergeMode::Replace))
                .collect()),
            ApplyMode::Template(selector) => {
                let [template] = config.agents.as_slice() else {
                    return Err(ValidationError::InvalidTemplate(format!(
                        "template apply needs exactly one agent, found {}",
                        config.agents.len()
                    ))
                    .into());
                };
                let targets: Vec<AgentSpec> = index
                    .live_agents()
                    .filter(|live| selector.matches(*live))
                    .filter(|live| !self.naming.is_marked(&live.name))
                    .map(|live| {
                        let mut spec = template.clone();
                        spec.name = live.name.clone();
                        spec
                    })
                    .collect();
                for spec in &targets {
                    index.add_desired(spec);
                }
                Ok(targets
                    .into_iter()
                    .map(|spec| (spec, MergeMode::Additive))
                    .collect())
            }
        }
    }

    /// Delete live agents the engine manages that the configuration no
    /// longer declares. Canary members are left to the canary manager.
    async fn prune_agents(
        &self,
        index: &ResourceIndex,
        dry_run: bool,
    ) -> (Vec<PruneOutcome>, BTreeSet<String>) {
        let mut outcomes = Vec::new();
        let mut removed = BTreeSet::new();

        for live in index.live_agents() {
            if index.is_desired(&live.name) || self.naming.is_marked(&live.name) {
                continue;
            }
            match self.remote.get_last_applied_snapshot(&live.id).await {
                Ok(Some(_)) => {}
                Ok(None) => continue,
                Err(e) => {
                    outcomes.push(prune_failure(&live.name, &e));
                    continue;
                }
            }

            if dry_run {
                removed.insert(live.name.clone());
                outcomes.push(PruneOutcome {
                    kind: "agent".to_string(),
                    name: live.name.clone(),
                    action: EntityAction::WouldDelete,
                    error: None,
                });
                continue;
            }

            match self.remote.delete_agent(&live.id).await {
                Ok(()) => {
                    info!("Pruned agent {}", live.name);
                    removed.insert(live.name.clone());
                    outcomes.push(PruneOutcome {
                        kind: "agent".to_string(),
                        name: live.name.clone(),
                        action: EntityAction::Deleted,
                        error: None,
                    });
                }
                Err(e) => {
                    warn!("Failed to prune agent {}: {}", live.name, e);
                    outcomes.push(prune_failure(&live.name, &e));
                }
            }
        }

        (outcomes, removed)
    }
}

fn prune_failure(name: &str, error: &RemoteError) -> PruneOutcome {
    PruneOutcome {
        kind: "agent".to_string(),
        name: name.to_string(),
        action: EntityAction::Failed,
        error: Some(error.to_string()),
    }
}

#[async_trait]
impl ReconcilerService for StandardReconciler {
    async fn apply(
        &self,
        config: &FleetConfiguration,
        options: &ApplyOptions,
        cancel: &CancellationToken,
    ) -> Result<ApplyReport, FleetError> {
        config.validate()?;
        if options.prune
            && (!options.selector.is_empty() || !matches!(options.mode, ApplyMode::Standard))
        {
            return Err(ValidationError::InvalidSelector(
                "prune is only allowed on a full-fleet apply".to_string(),
            )
            .into());
        }
        if cancel.is_cancelled() {
            return Err(FleetError::Cancelled);
        }

        let live_agents = self.remote.list_agents(&Selector::all()).await?;
        let live_shared = self.remote.list_shared_resources().await?;
        let mut index = ResourceIndex::build(config, live_agents, live_shared);
        let items = self.work_items(config, options, &mut index)?;
        let index = Arc::new(index);

        info!(
            "Applying {} agent(s){}",
            items.len(),
            if options.dry_run { " (dry run)" } else { "" }
        );

        let ctx = Arc::new(AgentApplyContext {
            remote: self.remote.clone(),
            coalescer: Arc::new(SharedResourceCoalescer::new(
                self.remote.clone(),
                index.clone(),
                options.dry_run,
            )),
            index: index.clone(),
            options: options.clone(),
            fatal: Mutex::new(None),
            halt: cancel.child_token(),
        });

        let entities: Vec<(String, (AgentSpec, MergeMode))> = items
            .into_iter()
            .map(|(spec, mode)| (spec.name.clone(), (spec, mode)))
            .collect();
        let worker = ctx.clone();
        let results = FanoutDispatcher::new(options.concurrency)
            .dispatch(
                entities,
                move |(spec, mode)| {
                    let ctx = worker.clone();
                    async move { Ok::<_, RemoteError>(ctx.apply_agent(spec, mode).await) }
                },
                &ctx.halt,
            )
            .await;

        let fatal = ctx.fatal.lock().take();
        if let Some(fatal) = fatal {
            return Err(FleetError::Remote(fatal));
        }

        let mut report = ApplyReport::new(options.dry_run);
        for (name, result) in results {
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(DispatchError::Cancelled) => AgentOutcome::new(name, EntityAction::Cancelled),
                Err(e) => AgentOutcome::failed(name, e),
            };
            report.agents.push(outcome);
        }

        if !cancel.is_cancelled() {
            // Declared resources nobody references still get materialized,
            // but only when the whole fleet is in scope.
            let full_fleet = options.selector.is_empty()
                && !matches!(options.mode, ApplyMode::Template(_));
            if full_fleet {
                for key in index.declared_keys() {
                    if let Err(e) = ctx.coalescer.resolve(key).await {
                        if e.is_unrecoverable() {
                            return Err(FleetError::Remote(e));
                        }
                    }
                }
            }

            if options.prune {
                let (pruned, removed) = self.prune_agents(&index, options.dry_run).await;
                report.pruned.extend(pruned);
                report.pruned.extend(ctx.coalescer.prune(&removed).await);
            }
        }

        report.shared = ctx.coalescer.outcomes();
        report.finish();

        info!(
            "Apply finished: {} succeeded, {} failed, {} conflict(s)",
            report.succeeded(),
            report.failed(),
            report.conflicts()
        );
        Ok(report)
    }
}

/// Shared state for the per-agent tasks of one apply.
struct AgentApplyContext {
    remote: Arc<dyn RemoteClient>,
    coalescer: Arc<SharedResourceCoalescer>,
    index: Arc<ResourceIndex>,
    options: ApplyOptions,
    /// First unrecoverable error; stops further work
    fatal: Mutex<Option<RemoteError>>,
    halt: CancellationToken,
}

impl AgentApplyContext {
    async fn apply_agent(&self, spec: AgentSpec, mode: MergeMode) -> AgentOutcome {
        let name = spec.name.clone();
        let mut outcome = AgentOutcome::new(name.as_str(), EntityAction::Unchanged);

        if let Err(e) = self.converge(&spec, mode, &mut outcome).await {
            if e.is_unrecoverable() {
                let mut fatal = self.fatal.lock();
                if fatal.is_none() {
                    *fatal = Some(e.clone());
                }
                self.halt.cancel();
            }
            warn!("Agent {} failed: {}", name, e);
            outcome.action = EntityAction::Failed;
            outcome.error = Some(e.to_string());
        }
        outcome
    }

    async fn converge(
        &self,
        spec: &AgentSpec,
        mode: MergeMode,
        outcome: &mut AgentOutcome,
    ) -> Result<(), RemoteError> {
        if let Err(e) = spec.validate() {
            outcome.action = EntityAction::Failed;
            outcome.error = Some(e.to_string());
            return Ok(());
        }

        let live = self.index.live_agent(&spec.name);
        if live.is_some() && matches!(self.options.mode, ApplyMode::CreateOnly) {
            outcome.action = EntityAction::Skipped;
            outcome.id = live.map(|l| l.id.clone());
            return Ok(());
        }

        for key in spec.shared_refs() {
            if let Err(e) = self.coalescer.resolve(&key).await {
                return Err(match e {
                    RemoteError::Unauthorized(_) => e,
                    other => RemoteError::Rejected(format!("shared {}: {}", key, other)),
                });
            }
        }

        let desired = spec.desired_fields();
        match live {
            None => self.create(spec, desired, outcome).await,
            Some(live) => self.update(spec, live, desired, mode, outcome).await,
        }
    }

    async fn create(
        &self,
        spec: &AgentSpec,
        desired: FieldMap,
        outcome: &mut AgentOutcome,
    ) -> Result<(), RemoteError> {
        let mut patch = Patch::default();
        for (path, value) in &desired {
            patch.set(path.clone(), value.clone());
        }
        outcome.patch = patch;

        if self.options.dry_run {
            outcome.action = EntityAction::WouldCreate;
            return Ok(());
        }

        let draft = AgentDraft {
            name: spec.name.clone(),
            fields: desired.clone(),
        };
        let created = self.remote.create_agent(&draft).await?;
        info!("Created agent {} ({})", created.name, created.id);
        outcome.id = Some(created.id.clone());
        outcome.action = EntityAction::Created;

        let snapshot = LastAppliedSnapshot::new(desired);
        self.remote
            .set_last_applied_snapshot(&created.id, &snapshot.to_blob()?)
            .await?;

        if let Some(message) = &spec.first_message {
            self.calibrate(&created, message, outcome).await?;
        }
        Ok(())
    }

    async fn update(
        &self,
        spec: &AgentSpec,
        live: &LiveAgent,
        desired: FieldMap,
        mode: MergeMode,
        outcome: &mut AgentOutcome,
    ) -> Result<(), RemoteError> {
        outcome.id = Some(live.id.clone());

        let previous = match self.remote.get_last_applied_snapshot(&live.id).await? {
            Some(blob) => LastAppliedSnapshot::from_blob(&blob).unwrap_or_else(|e| {
                warn!("Discarding unreadable snapshot for {}: {}", live.name, e);
                LastAppliedSnapshot::empty()
            }),
            None => LastAppliedSnapshot::empty(),
        };

        let merged = merge(&previous.fields, &live.fields, &desired, mode);
        for conflict in &merged.conflicts {
            warn!(
                "Agent {} field {} was changed outside the configuration; overwriting",
                live.name, conflict.path
            );
        }

        let snapshot = match mode {
            MergeMode::Replace => LastAppliedSnapshot::new(desired),
            MergeMode::Additive => {
                let mut fields = previous.fields.clone();
                fields.extend(desired);
                LastAppliedSnapshot::new(fields)
            }
        };

        outcome.conflicts = merged.conflicts;
        outcome.patch = merged.patch;

        if self.options.dry_run {
            outcome.action = if outcome.patch.is_empty() {
                EntityAction::Unchanged
            } else {
                EntityAction::WouldUpdate
            };
            return Ok(());
        }

        if !outcome.patch.is_empty() {
            self.remote.update_agent(&live.id, &outcome.patch).await?;
            info!("Updated agent {} ({} change(s))", live.name, outcome.patch.len());
            outcome.action = EntityAction::Updated;
        } else {
            debug!("Agent {} unchanged", live.name);
        }

        if !outcome.patch.is_empty() || snapshot.hash != previous.hash {
            self.remote
                .set_last_applied_snapshot(&live.id, &snapshot.to_blob()?)
                .await?;
        }

        if self.options.recalibrate && self.options.recalibrate_selector.matches(live) {
            if let Some(message) = &spec.first_message {
                self.calibrate(live, message, outcome).await?;
            }
        }
        Ok(())
    }

    async fn calibrate(
        &self,
        agent: &LiveAgent,
        message: &str,
        outcome: &mut AgentOutcome,
    ) -> Result<(), RemoteError> {
        debug!("Calibrating {}", agent.name);
        self.remote.send_message(&agent.id, message, None).await?;
        outcome.calibrated = true;
        Ok(())
    }
}
