// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Live-side entities as reported by the hosting service.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::fleet::{
    tags_from_fields, ResourceKind, SharedResourceSpec, BLOCKS_PREFIX, SHARED_PREFIX,
};
use crate::domain::merge::FieldMap;
use crate::domain::selector::Selectable;

/// Identifier assigned by the hosting service.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An agent as currently materialized by the hosting service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveAgent {
    pub id: AgentId,
    pub name: String,
    #[serde(default)]
    pub fields: FieldMap,
}

impl LiveAgent {
    pub fn tags(&self) -> BTreeMap<String, String> {
        tags_from_fields(&self.fields)
    }

    pub fn tag(&self, key: &str) -> Option<String> {
        self.tags().remove(key)
    }

    /// Names of attached shared resources of one kind.
    pub fn attachments(&self, kind: ResourceKind) -> Vec<String> {
        let prefix = format!("{SHARED_PREFIX}{}.", kind);
        self.fields
            .keys()
            .filter_map(|path| path.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    /// Owned memory blocks, one entry per label.
    pub fn memory_blocks(&self) -> Vec<LiveBlock> {
        let mut blocks: BTreeMap<String, LiveBlock> = BTreeMap::new();
        for (path, value) in &self.fields {
            let Some(rest) = path.strip_prefix(BLOCKS_PREFIX) else {
                continue;
            };
            let Some((label, attr)) = rest.rsplit_once('.') else {
                continue;
            };
            let block = blocks.entry(label.to_string()).or_insert_with(|| LiveBlock {
                label: label.to_string(),
                value: String::new(),
                limit: None,
            });
            match attr {
                "value" => block.value = value.as_str().unwrap_or_default().to_string(),
                "limit" => block.limit = value.as_u64(),
                _ => {}
            }
        }
        blocks.into_values().collect()
    }
}

impl Selectable for LiveAgent {
    fn selector_name(&self) -> &str {
        &self.name
    }

    fn selector_tag(&self, key: &str) -> Option<String> {
        self.tag(key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveBlock {
    pub label: String,
    pub value: String,
    pub limit: Option<u64>,
}

/// Payload of a create call: the full desired state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDraft {
    pub name: String,
    pub fields: FieldMap,
}

/// Shared resource as listed by the hosting service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveSharedResource {
    pub kind: ResourceKind,
    pub name: String,
    pub id: String,
    /// Set only on resources the engine created; anything without one is
    /// never updated in place or pruned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Definition last written, when the service reports it. Export needs
    /// it to reproduce the resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<SharedResourceSpec>,
}

impl LiveSharedResource {
    pub fn is_managed(&self) -> bool {
        self.fingerprint.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_live_agent_views() {
        let mut fields = FieldMap::new();
        fields.insert("tags.role".into(), json!("support"));
        fields.insert("shared.block.kb".into(), json!(true));
        fields.insert("shared.folder.docs".into(), json!(true));
        fields.insert("blocks.persona.value".into(), json!("hi"));
        fields.insert("blocks.persona.limit".into(), json!(100));
        let agent = LiveAgent {
            id: AgentId::new("agent-1"),
            name: "a".into(),
            fields,
        };

        assert_eq!(agent.tag("role").as_deref(), Some("support"));
        assert_eq!(agent.attachments(ResourceKind::Block), vec!["kb".to_string()]);
        let blocks = agent.memory_blocks();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].limit, Some(100));
        assert_eq!(blocks[0].value, "hi");
    }
}
