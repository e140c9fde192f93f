// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Resource Index
//!
//! Per-invocation lookup tables over desired and live state. Shared resources
//! live in one flat name-keyed table; agents only hold [`SharedRef`] handles
//! into it, and reference counts are recomputed by scanning agents rather
//! than stored.

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::agent::{LiveAgent, LiveSharedResource};
use crate::domain::fleet::{AgentSpec, FleetConfiguration, SharedRef, SharedResourceSpec};

#[derive(Debug, Clone, Default)]
pub struct ResourceIndex {
    desired_agents: BTreeMap<String, BTreeSet<SharedRef>>,
    declared: BTreeMap<SharedRef, SharedResourceSpec>,
    live_agents: BTreeMap<String, LiveAgent>,
    live_shared: BTreeMap<SharedRef, LiveSharedResource>,
}

impl ResourceIndex {
    pub fn build(
        config: &FleetConfiguration,
        live_agents: Vec<LiveAgent>,
        live_shared: Vec<LiveSharedResource>,
    ) -> Self {
        Self {
            desired_agents: config
                .agents
                .iter()
                .map(|a| (a.name.clone(), a.shared_refs()))
                .collect(),
            declared: config
                .shared_resources()
                .into_iter()
                .map(|spec| (spec.key(), spec))
                .collect(),
            live_agents: live_agents.into_iter().map(|a| (a.name.clone(), a)).collect(),
            live_shared: live_shared
                .into_iter()
                .map(|r| (SharedRef::new(r.kind, r.name.as_str()), r))
                .collect(),
        }
    }

    /// Track an agent that is desired for this invocation but not part of the
    /// configuration itself (template targets).
    pub fn add_desired(&mut self, spec: &AgentSpec) {
        self.desired_agents.insert(spec.name.clone(), spec.shared_refs());
    }

    pub fn is_desired(&self, name: &str) -> bool {
        self.desired_agents.contains_key(name)
    }

    pub fn live_agent(&self, name: &str) -> Option<&LiveAgent> {
        self.live_agents.get(name)
    }

    pub fn live_agents(&self) -> impl Iterator<Item = &LiveAgent> {
        self.live_agents.values()
    }

    pub fn declared(&self, key: &SharedRef) -> Option<&SharedResourceSpec> {
        self.declared.get(key)
    }

    pub fn declared_keys(&self) -> impl Iterator<Item = &SharedRef> {
        self.declared.keys()
    }

    pub fn live_shared(&self, key: &SharedRef) -> Option<&LiveSharedResource> {
        self.live_shared.get(key)
    }

    pub fn live_shared_resources(&self) -> impl Iterator<Item = &LiveSharedResource> {
        self.live_shared.values()
    }

    /// Number of desired agents that reference `key`.
    pub fn ref_count(&self, key: &SharedRef) -> usize {
        self.desired_agents
            .values()
            .filter(|refs| refs.contains(key))
            .count()
    }

    /// Live agents outside the configuration that are still attached to
    /// `key`, hand-made agents and canary members included. Agents in
    /// `removed` are ignored.
    pub fn live_attachers(&self, key: &SharedRef, removed: &BTreeSet<String>) -> usize {
        self.live_agents
            .values()
            .filter(|a| !self.desired_agents.contains_key(&a.name))
            .filter(|a| !removed.contains(&a.name))
            .filter(|a| a.attachments(key.kind).iter().any(|n| *n == key.name))
            .count()
    }
}
