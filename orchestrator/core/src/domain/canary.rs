// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Canary Sets
//!
//! A canary set pairs a production agent name with the shadow agents derived
//! from it. State is persisted on the hosting service as tags on the shadow
//! agents, so the engine itself stays stateless between invocations:
//!
//! ```text
//! none ──deploy──▶ pending ──created──▶ active ──promote──▶ promoted
//!                     │                                        │
//!                     └──create failed──▶ none      old production: retired
//! ```
//!
//! Shadow identity is always marked by the name prefix. Anything without the
//! marker is never treated as part of a canary set.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::agent::{AgentId, LiveAgent};
use crate::domain::fleet::{format_tag, AgentSpec};

pub const CANARY_OF_TAG: &str = "canary-of";
pub const CANARY_STATE_TAG: &str = "canary-state";
pub const DEFAULT_CANARY_PREFIX: &str = "CANARY-";
const RETIRED_SUFFIX: &str = "-retired";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanaryState {
    Pending,
    Active,
    Promoted,
    Retired,
}

impl CanaryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Promoted => "promoted",
            Self::Retired => "retired",
        }
    }
}

impl fmt::Display for CanaryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CanaryState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "promoted" => Ok(Self::Promoted),
            "retired" => Ok(Self::Retired),
            other => Err(format!("unknown canary state '{}'", other)),
        }
    }
}

/// Naming rules for shadow identities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanaryNaming {
    prefix: String,
}

impl Default for CanaryNaming {
    fn default() -> Self {
        Self::new(DEFAULT_CANARY_PREFIX)
    }
}

impl CanaryNaming {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn shadow_name(&self, production: &str) -> String {
        format!("{}{}", self.prefix, production)
    }

    pub fn retired_name(&self, production: &str) -> String {
        format!("{}{}{}", self.prefix, production, RETIRED_SUFFIX)
    }

    pub fn is_marked(&self, name: &str) -> bool {
        !self.prefix.is_empty() && name.starts_with(&self.prefix)
    }

    pub fn is_marked_for(&self, name: &str, production: &str) -> bool {
        self.is_marked(name)
            && (name == self.shadow_name(production) || name == self.retired_name(production))
    }

    /// Shadow copy of a production spec: new identity, same tags and
    /// resource references, plus canary bookkeeping tags.
    pub fn shadow_spec(&self, production: &AgentSpec) -> AgentSpec {
        let mut shadow = production.clone();
        shadow.name = self.shadow_name(&production.name);
        shadow.tags.push(format_tag(CANARY_OF_TAG, &production.name));
        shadow
            .tags
            .push(format_tag(CANARY_STATE_TAG, CanaryState::Active.as_str()));
        shadow
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanaryMember {
    pub id: AgentId,
    pub name: String,
    pub state: CanaryState,
}

/// Production name plus its marked shadow agents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanarySet {
    pub production: String,
    pub members: Vec<CanaryMember>,
}

impl CanarySet {
    /// Collect the marked agents belonging to `production`. A marked agent
    /// without a state tag is a stray from an interrupted deploy and counts as
    /// pending.
    pub fn from_agents(production: &str, naming: &CanaryNaming, agents: &[LiveAgent]) -> Self {
        let members = agents
            .iter()
            .filter(|a| naming.is_marked_for(&a.name, production))
            .map(|a| CanaryMember {
                id: a.id.clone(),
                name: a.name.clone(),
                state: a
                    .tag(CANARY_STATE_TAG)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(CanaryState::Pending),
            })
            .collect();
        Self {
            production: production.to_string(),
            members,
        }
    }

    /// Set-level state; `None` when there are no members.
    pub fn state(&self) -> Option<CanaryState> {
        let has = |state: CanaryState| self.members.iter().any(|m| m.state == state);
        if has(CanaryState::Active) {
            Some(CanaryState::Active)
        } else if has(CanaryState::Retired) {
            Some(CanaryState::Promoted)
        } else if has(CanaryState::Pending) {
            Some(CanaryState::Pending)
        } else {
            None
        }
    }

    /// The single active shadow; `promote` is only valid from here.
    pub fn require_active(&self) -> Result<&CanaryMember, CanaryStateError> {
        let active: Vec<&CanaryMember> = self
            .members
            .iter()
            .filter(|m| m.state == CanaryState::Active)
            .collect();
        match active.as_slice() {
            [member] => Ok(member),
            [] => Err(CanaryStateError::NotActive {
                production: self.production.clone(),
                state: self.state(),
            }),
            many => Err(CanaryStateError::MultipleActive {
                production: self.production.clone(),
                count: many.len(),
            }),
        }
    }

    /// Members `cleanup` may delete.
    pub fn cleanup_candidates(&self) -> impl Iterator<Item = &CanaryMember> {
        self.members.iter().filter(|m| {
            matches!(
                m.state,
                CanaryState::Retired | CanaryState::Pending | CanaryState::Active
            )
        })
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CanaryStateError {
    #[error("No active canary for '{production}' (current state: {})", .state.map(|s| s.as_str()).unwrap_or("none"))]
    NotActive {
        production: String,
        state: Option<CanaryState>,
    },

    #[error("{count} active canaries for '{production}'")]
    MultipleActive { production: String, count: usize },

    #[error("Production agent '{0}' does not exist")]
    ProductionMissing(String),

    #[error("Canary '{shadow}' did not answer the calibration echo: {reason}")]
    Unreachable { shadow: String, reason: String },

    #[error("Agent '{0}' is not part of the configuration")]
    NotInConfiguration(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::merge::FieldMap;
    use serde_json::json;

    fn live(id: &str, name: &str, state: Option<&str>) -> LiveAgent {
        let mut fields = FieldMap::new();
        if let Some(state) = state {
            fields.insert(format!("tags.{CANARY_STATE_TAG}"), json!(state));
        }
        LiveAgent {
            id: AgentId::new(id),
            name: name.to_string(),
            fields,
        }
    }

    #[test]
    fn test_shadow_spec_keeps_tags_and_refs() {
        let mut prod = AgentSpec::new("A");
        prod.tags = vec!["role:support".to_string()];
        prod.shared_blocks = vec!["kb".to_string()];

        let shadow = CanaryNaming::default().shadow_spec(&prod);
        assert_eq!(shadow.name, "CANARY-A");
        assert_eq!(shadow.shared_blocks, prod.shared_blocks);
        let tags = shadow.tag_map();
        assert_eq!(tags["role"], "support");
        assert_eq!(tags[CANARY_OF_TAG], "A");
        assert_eq!(tags[CANARY_STATE_TAG], "active");
    }

    #[test]
    fn test_set_ignores_unmarked_agents() {
        let naming = CanaryNaming::default();
        let agents = vec![
            live("1", "A", None),
            live("2", "CANARY-A", Some("active")),
            live("3", "CANARY-AB", Some("active")),
        ];
        let set = CanarySet::from_agents("A", &naming, &agents);
        assert_eq!(set.members.len(), 1);
        assert_eq!(set.state(), Some(CanaryState::Active));
        assert_eq!(set.require_active().unwrap().id, AgentId::new("2"));
    }

    #[test]
    fn test_promote_requires_active() {
        let naming = CanaryNaming::default();
        let set = CanarySet::from_agents("A", &naming, &[live("9", "CANARY-A-retired", Some("retired"))]);
        assert_eq!(set.state(), Some(CanaryState::Promoted));
        assert!(matches!(
            set.require_active(),
            Err(CanaryStateError::NotActive { .. })
        ));

        let empty = CanarySet::from_agents("A", &naming, &[]);
        assert_eq!(empty.state(), None);
    }

    #[test]
    fn test_stray_without_state_counts_as_pending() {
        let naming = CanaryNaming::default();
        let set = CanarySet::from_agents("A", &naming, &[live("1", "CANARY-A", None)]);
        assert_eq!(set.members[0].state, CanaryState::Pending);
        assert_eq!(set.cleanup_candidates().count(), 1);
    }
}
