// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Three-Way Merge
//!
//! Computes the minimal patch that converges a live agent to its desired state
//! while preserving fields that somebody other than the engine added.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure data transformation, no I/O
//!
//! The three inputs are:
//!
//! | Input | Meaning |
//! |-------|---------|
//! | `last_applied` | What the engine wrote on the previous successful apply |
//! | `live` | What the hosting service currently reports |
//! | `desired` | What the configuration now declares |
//!
//! Managed fields follow the configuration, unmanaged fields follow the live
//! agent. Managed fields that changed behind the engine's back are recorded as
//! conflicts and resolved in favour of the configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Dotted field path, e.g. `tags.role` or `blocks.persona.value`.
pub type FieldPath = String;

/// Flattened view of an agent's configurable state.
pub type FieldMap = BTreeMap<FieldPath, Value>;

/// Set of field paths the engine owns for one agent.
pub type ManagedFieldSet = BTreeSet<FieldPath>;

/// Single change inside a patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "lowercase")]
pub enum FieldChange {
    Set(Value),
    Unset,
}

/// Minimal set of changes to send to the hosting service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch {
    pub changes: BTreeMap<FieldPath, FieldChange>,
}

impl Patch {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn set(&mut self, path: impl Into<FieldPath>, value: Value) {
        self.changes.insert(path.into(), FieldChange::Set(value));
    }

    pub fn unset(&mut self, path: impl Into<FieldPath>) {
        self.changes.insert(path.into(), FieldChange::Unset);
    }

    /// Apply this patch to a field map in place.
    pub fn apply_to(&self, fields: &mut FieldMap) {
        for (path, change) in &self.changes {
            match change {
                FieldChange::Set(value) => {
                    fields.insert(path.clone(), value.clone());
                }
                FieldChange::Unset => {
                    fields.remove(path);
                }
            }
        }
    }
}

/// A managed field whose live value no longer matches what the engine wrote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub path: FieldPath,
    /// `None` when the field was never managed (a user-added value the
    /// configuration now declares).
    pub last_applied: Option<Value>,
    pub live: Value,
    pub desired: Value,
}

/// Whether fields dropped from the configuration are cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeMode {
    /// Fields removed from the configuration are unset on the live agent.
    #[default]
    Replace,
    /// Only declared fields are written; nothing is ever unset.
    Additive,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    pub patch: Patch,
    pub managed: ManagedFieldSet,
    pub conflicts: Vec<Conflict>,
}

impl MergeOutcome {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Three-way merge of one entity.
pub fn merge(
    last_applied: &FieldMap,
    live: &FieldMap,
    desired: &FieldMap,
    mode: MergeMode,
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();

    for (path, desired_value) in desired {
        outcome.managed.insert(path.clone());

        let Some(live_value) = live.get(path) else {
            outcome.patch.set(path.clone(), desired_value.clone());
            continue;
        };

        match last_applied.get(path) {
            Some(previous) if previous == live_value => {
                if live_value != desired_value {
                    outcome.patch.set(path.clone(), desired_value.clone());
                }
            }
            Some(previous) => {
                // Managed field edited externally since the last apply.
                outcome.conflicts.push(Conflict {
                    path: path.clone(),
                    last_applied: Some(previous.clone()),
                    live: live_value.clone(),
                    desired: desired_value.clone(),
                });
                if live_value != desired_value {
                    outcome.patch.set(path.clone(), desired_value.clone());
                }
            }
            None => {
                // Unmanaged live value that the configuration now declares.
                if live_value != desired_value {
                    outcome.conflicts.push(Conflict {
                        path: path.clone(),
                        last_applied: None,
                        live: live_value.clone(),
                        desired: desired_value.clone(),
                    });
                    outcome.patch.set(path.clone(), desired_value.clone());
                }
            }
        }
    }

    if mode == MergeMode::Replace {
        for path in last_applied.keys() {
            if !desired.contains_key(path) && live.contains_key(path) {
                outcome.patch.unset(path.clone());
            }
        }
    }

    outcome
}

/// Live fields the engine has never managed.
pub fn user_fields(live: &FieldMap, managed: &ManagedFieldSet) -> FieldMap {
    live.iter()
        .filter(|(path, _)| !managed.contains(*path))
        .map(|(path, value)| (path.clone(), value.clone()))
        .collect()
}

/// Stable content hash of a field map.
pub fn fields_hash(fields: &FieldMap) -> String {
    let mut hasher = Sha256::new();
    for (path, value) in fields {
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.to_string().as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

// ============================================================================
// Last-Applied Snapshot
// ============================================================================

const SNAPSHOT_VERSION: u32 = 1;

/// Opaque record of what the engine wrote on the last successful apply.
///
/// Stored by the hosting service per agent id, so reconciliation behaves the
/// same from any machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastAppliedSnapshot {
    pub version: u32,
    pub fields: FieldMap,
    pub hash: String,
}

impl LastAppliedSnapshot {
    pub fn new(fields: FieldMap) -> Self {
        let hash = fields_hash(&fields);
        Self {
            version: SNAPSHOT_VERSION,
            fields,
            hash,
        }
    }

    /// Snapshot used when no blob exists yet.
    pub fn empty() -> Self {
        Self::new(FieldMap::new())
    }

    pub fn managed(&self) -> ManagedFieldSet {
        self.fields.keys().cloned().collect()
    }

    pub fn to_blob(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_blob(blob: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(blob)
    }
}
