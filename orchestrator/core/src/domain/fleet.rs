// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Fleet Configuration
//!
//! Desired-state model for a fleet: agents plus the blocks, folders and MCP
//! server bindings they share. A `FleetConfiguration` is immutable for the
//! duration of one apply.
//!
//! Validation is split in two scopes:
//!
//! - [`FleetConfiguration::validate`] checks fleet-wide structure (duplicate
//!   names, unresolvable shared references). Failing it aborts the whole
//!   invocation before any mutation.
//! - [`AgentSpec::validate`] checks a single agent. Failing it only fails that
//!   agent's entry in the apply report.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::domain::merge::FieldMap;

// ============================================================================
// Field Paths
// ============================================================================

pub const DESCRIPTION_FIELD: &str = "description";
pub const SYSTEM_FIELD: &str = "system";
pub const TAGS_PREFIX: &str = "tags.";
pub const TOOLS_PREFIX: &str = "tools.";
pub const SHARED_PREFIX: &str = "shared.";
pub const BLOCKS_PREFIX: &str = "blocks.";
pub const ARCHIVES_PREFIX: &str = "archives.";
pub const MODEL_PREFIX: &str = "model.";

pub fn tag_path(key: &str) -> String {
    format!("{TAGS_PREFIX}{key}")
}

pub fn tool_path(tool: &str) -> String {
    format!("{TOOLS_PREFIX}{tool}")
}

pub fn shared_path(kind: ResourceKind, name: &str) -> String {
    format!("{SHARED_PREFIX}{}.{}", kind, name)
}

pub fn block_path(label: &str, attribute: &str) -> String {
    format!("{BLOCKS_PREFIX}{label}.{attribute}")
}

pub fn archive_path(name: &str) -> String {
    format!("{ARCHIVES_PREFIX}{name}.description")
}

/// Read the tag set out of a flattened field map.
pub fn tags_from_fields(fields: &FieldMap) -> BTreeMap<String, String> {
    fields
        .iter()
        .filter_map(|(path, value)| {
            let key = path.strip_prefix(TAGS_PREFIX)?;
            Some((key.to_string(), value_as_string(value)))
        })
        .collect()
}

fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Out-of-range numbers are dropped rather than wrapped.
fn value_as_u32(value: &Value) -> Option<u32> {
    value.as_u64().and_then(|v| u32::try_from(v).ok())
}

/// Split a `key:value` tag. A bare word is a tag with an empty value.
pub fn parse_tag(raw: &str) -> (String, String) {
    match raw.split_once(':') {
        Some((key, value)) => (key.trim().to_string(), value.trim().to_string()),
        None => (raw.trim().to_string(), String::new()),
    }
}

pub fn format_tag(key: &str, value: &str) -> String {
    if value.is_empty() {
        key.to_string()
    } else {
        format!("{key}:{value}")
    }
}

// ============================================================================
// Shared Resources
// ============================================================================

/// Closed set of shared resource kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Block,
    Folder,
    McpServer,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [Self::Block, Self::Folder, Self::McpServer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Folder => "folder",
            Self::McpServer => "mcp_server",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "block" | "blocks" => Ok(Self::Block),
            "folder" | "folders" => Ok(Self::Folder),
            "mcp_server" | "mcp-server" | "mcp-servers" | "mcp_servers" | "mcp" => {
                Ok(Self::McpServer)
            }
            other => Err(format!("unknown resource kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedBlockSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedFolderSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum McpTransport {
    Stdio {
        command: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        env: BTreeMap<String, String>,
    },
    Sse {
        url: String,
    },
    StreamableHttp {
        url: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpServerSpec {
    pub name: String,
    #[serde(flatten)]
    pub transport: McpTransport,
}

/// A shared resource of any kind, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SharedResourceSpec {
    Block(SharedBlockSpec),
    Folder(SharedFolderSpec),
    McpServer(McpServerSpec),
}

impl SharedResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Block(_) => ResourceKind::Block,
            Self::Folder(_) => ResourceKind::Folder,
            Self::McpServer(_) => ResourceKind::McpServer,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Block(spec) => &spec.name,
            Self::Folder(spec) => &spec.name,
            Self::McpServer(spec) => &spec.name,
        }
    }

    pub fn key(&self) -> SharedRef {
        SharedRef::new(self.kind(), self.name())
    }

    /// Content hash the hosting service stores next to resources the engine
    /// created, used to skip no-op updates.
    pub fn fingerprint(&self) -> String {
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&encoded))
    }
}

/// Lightweight handle from an agent into the shared-resource table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SharedRef {
    pub kind: ResourceKind,
    pub name: String,
}

impl SharedRef {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for SharedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

// ============================================================================
// Agents
// ============================================================================

/// System prompt, either inline or loaded from a file next to the config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Inline(String),
    File { file: PathBuf },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default, alias = "model", skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ModelConfig {
    fn write_fields(&self, fields: &mut FieldMap) {
        if let Some(handle) = &self.handle {
            fields.insert(format!("{MODEL_PREFIX}handle"), json!(handle));
        }
        if let Some(embedding) = &self.embedding {
            fields.insert(format!("{MODEL_PREFIX}embedding"), json!(embedding));
        }
        if let Some(window) = self.context_window {
            fields.insert(format!("{MODEL_PREFIX}context_window"), json!(window));
        }
        if let Some(temperature) = self.temperature {
            fields.insert(format!("{MODEL_PREFIX}temperature"), json!(temperature));
        }
        if let Some(max_tokens) = self.max_tokens {
            fields.insert(format!("{MODEL_PREFIX}max_tokens"), json!(max_tokens));
        }
    }

    fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Memory block owned by a single agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryBlockSpec {
    pub label: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Tool reference as written in the configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolRef {
    Literal(String),
    Pattern(glob::Pattern),
    Mcp { server: String, tool: String },
}

impl ToolRef {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("empty tool name".to_string());
        }
        if let Some((server, tool)) = raw.split_once("::") {
            if server.is_empty() || tool.is_empty() {
                return Err(format!("'{}' must be written as server::tool", raw));
            }
            if is_glob(tool) {
                glob::Pattern::new(tool).map_err(|e| e.to_string())?;
            }
            return Ok(Self::Mcp {
                server: server.to_string(),
                tool: tool.to_string(),
            });
        }
        if is_glob(raw) {
            let pattern = glob::Pattern::new(raw).map_err(|e| e.to_string())?;
            return Ok(Self::Pattern(pattern));
        }
        Ok(Self::Literal(raw.to_string()))
    }
}

pub(crate) fn is_glob(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

/// Desired state of a single agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Primary identity within the fleet
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// `key:value` tags; later duplicates of a key win
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<SystemPrompt>,

    #[serde(default, skip_serializing_if = "ModelConfig::is_empty")]
    pub model: ModelConfig,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub memory_blocks: Vec<MemoryBlockSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub archives: Vec<ArchiveSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shared_blocks: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shared_folders: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mcp_servers: Vec<String>,

    /// Literal names, glob patterns, or `server::tool`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,

    /// Calibration message sent after creation or on recalibrate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_message: Option<String>,
}

impl AgentSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            tags: Vec::new(),
            system_prompt: None,
            model: ModelConfig::default(),
            memory_blocks: Vec::new(),
            archives: Vec::new(),
            shared_blocks: Vec::new(),
            shared_folders: Vec::new(),
            mcp_servers: Vec::new(),
            tools: Vec::new(),
            first_message: None,
        }
    }

    /// Tags with duplicate keys collapsed, last write wins.
    pub fn tag_map(&self) -> BTreeMap<String, String> {
        self.tags.iter().map(|raw| parse_tag(raw)).collect()
    }

    /// Replace the tag list from a map.
    pub fn set_tags(&mut self, tags: &BTreeMap<String, String>) {
        self.tags = tags.iter().map(|(k, v)| format_tag(k, v)).collect();
    }

    /// Shared resources referenced by this agent, deduplicated.
    pub fn shared_refs(&self) -> BTreeSet<SharedRef> {
        let blocks = self
            .shared_blocks
            .iter()
            .map(|n| SharedRef::new(ResourceKind::Block, n.as_str()));
        let folders = self
            .shared_folders
            .iter()
            .map(|n| SharedRef::new(ResourceKind::Folder, n.as_str()));
        let servers = self
            .mcp_servers
            .iter()
            .map(|n| SharedRef::new(ResourceKind::McpServer, n.as_str()));
        blocks.chain(folders).chain(servers).collect()
    }

    /// Flatten into the field map the merge engine works on.
    pub fn desired_fields(&self) -> FieldMap {
        let mut fields = FieldMap::new();

        if let Some(description) = &self.description {
            fields.insert(DESCRIPTION_FIELD.to_string(), json!(description));
        }
        if let Some(SystemPrompt::Inline(text)) = &self.system_prompt {
            fields.insert(SYSTEM_FIELD.to_string(), json!(text));
        }
        self.model.write_fields(&mut fields);

        for (key, value) in self.tag_map() {
            fields.insert(tag_path(&key), json!(value));
        }
        for block in &self.memory_blocks {
            fields.insert(block_path(&block.label, "value"), json!(block.value));
            if let Some(limit) = block.limit {
                fields.insert(block_path(&block.label, "limit"), json!(limit));
            }
            if let Some(description) = &block.description {
                fields.insert(block_path(&block.label, "description"), json!(description));
            }
        }
        for archive in &self.archives {
            fields.insert(
                archive_path(&archive.name),
                json!(archive.description.clone().unwrap_or_default()),
            );
        }
        for tool in &self.tools {
            fields.insert(tool_path(tool.trim()), Value::Bool(true));
        }
        for shared in self.shared_refs() {
            fields.insert(shared_path(shared.kind, &shared.name), Value::Bool(true));
        }

        fields
    }

    /// Rebuild a spec from live fields. Inverse of [`AgentSpec::desired_fields`]
    /// for every field the engine knows about; unknown paths are ignored.
    pub fn from_fields(name: &str, fields: &FieldMap) -> Self {
        let mut spec = AgentSpec::new(name);
        let mut blocks: BTreeMap<String, MemoryBlockSpec> = BTreeMap::new();
        let mut tags = BTreeMap::new();

        for (path, value) in fields {
            if path == DESCRIPTION_FIELD {
                spec.description = Some(value_as_string(value));
            } else if path == SYSTEM_FIELD {
                spec.system_prompt = Some(SystemPrompt::Inline(value_as_string(value)));
            } else if let Some(attr) = path.strip_prefix(MODEL_PREFIX) {
                match attr {
                    "handle" => spec.model.handle = Some(value_as_string(value)),
                    "embedding" => spec.model.embedding = Some(value_as_string(value)),
                    "context_window" => spec.model.context_window = value_as_u32(value),
                    "temperature" => spec.model.temperature = value.as_f64(),
                    "max_tokens" => spec.model.max_tokens = value_as_u32(value),
                    _ => {}
                }
            } else if let Some(key) = path.strip_prefix(TAGS_PREFIX) {
                tags.insert(key.to_string(), value_as_string(value));
            } else if let Some(rest) = path.strip_prefix(BLOCKS_PREFIX) {
                let Some((label, attr)) = rest.rsplit_once('.') else {
                    continue;
                };
                let block = blocks.entry(label.to_string()).or_insert_with(|| MemoryBlockSpec {
                    label: label.to_string(),
                    value: String::new(),
                    limit: None,
                    description: None,
                });
                match attr {
                    "value" => block.value = value_as_string(value),
                    "limit" => block.limit = value_as_u32(value),
                    "description" => block.description = Some(value_as_string(value)),
                    _ => {}
                }
            } else if let Some(rest) = path.strip_prefix(ARCHIVES_PREFIX) {
                if let Some(archive) = rest.strip_suffix(".description") {
                    let description = value_as_string(value);
                    spec.archives.push(ArchiveSpec {
                        name: archive.to_string(),
                        description: (!description.is_empty()).then_some(description),
                    });
                }
            } else if let Some(tool) = path.strip_prefix(TOOLS_PREFIX) {
                spec.tools.push(tool.to_string());
            } else if let Some(rest) = path.strip_prefix(SHARED_PREFIX) {
                let Some((kind, resource)) = rest.split_once('.') else {
                    continue;
                };
                match kind.parse::<ResourceKind>() {
                    Ok(ResourceKind::Block) => spec.shared_blocks.push(resource.to_string()),
                    Ok(ResourceKind::Folder) => spec.shared_folders.push(resource.to_string()),
                    Ok(ResourceKind::McpServer) => spec.mcp_servers.push(resource.to_string()),
                    Err(_) => {}
                }
            }
        }

        spec.set_tags(&tags);
        spec.memory_blocks = blocks.into_values().collect();
        spec
    }

    /// Entity-scoped validation; failure fails only this agent.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }

        for raw in &self.tags {
            let (key, _) = parse_tag(raw);
            if key.is_empty() {
                return Err(ValidationError::InvalidTag {
                    agent: self.name.clone(),
                    tag: raw.clone(),
                });
            }
        }

        for tool in &self.tools {
            ToolRef::parse(tool).map_err(|reason| ValidationError::InvalidToolPattern {
                agent: self.name.clone(),
                tool: tool.clone(),
                reason,
            })?;
        }

        let mut labels = HashSet::new();
        for block in &self.memory_blocks {
            if block.label.trim().is_empty() || !labels.insert(block.label.as_str()) {
                return Err(ValidationError::DuplicateBlockLabel {
                    agent: self.name.clone(),
                    label: block.label.clone(),
                });
            }
            if let Some(limit) = block.limit {
                let len = block.value.chars().count();
                if len > limit as usize {
                    return Err(ValidationError::BlockValueExceedsLimit {
                        agent: self.name.clone(),
                        label: block.label.clone(),
                        len,
                        limit,
                    });
                }
            }
        }

        if let Some(SystemPrompt::File { file }) = &self.system_prompt {
            return Err(ValidationError::UnresolvedSystemPrompt {
                agent: self.name.clone(),
                path: file.clone(),
            });
        }

        Ok(())
    }
}

// ============================================================================
// Fleet
// ============================================================================

/// Root desired-state value for one apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetConfiguration {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shared_blocks: Vec<SharedBlockSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shared_folders: Vec<SharedFolderSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mcp_servers: Vec<McpServerSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<AgentSpec>,
}

impl FleetConfiguration {
    /// Every declared shared resource, in declaration order per kind.
    pub fn shared_resources(&self) -> Vec<SharedResourceSpec> {
        let blocks = self.shared_blocks.iter().cloned().map(SharedResourceSpec::Block);
        let folders = self.shared_folders.iter().cloned().map(SharedResourceSpec::Folder);
        let servers = self.mcp_servers.iter().cloned().map(SharedResourceSpec::McpServer);
        blocks.chain(folders).chain(servers).collect()
    }

    pub fn agent(&self, name: &str) -> Option<&AgentSpec> {
        self.agents.iter().find(|a| a.name == name)
    }

    /// Fleet-wide validation; failure aborts the invocation.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut declared = HashSet::new();
        for resource in self.shared_resources() {
            if resource.name().trim().is_empty() {
                return Err(ValidationError::EmptyName);
            }
            if !declared.insert(resource.key()) {
                return Err(ValidationError::DuplicateSharedResource {
                    kind: resource.kind(),
                    name: resource.name().to_string(),
                });
            }
        }

        let mut names = HashSet::new();
        for agent in &self.agents {
            if !names.insert(agent.name.as_str()) {
                return Err(ValidationError::DuplicateAgent(agent.name.clone()));
            }

            for shared in agent.shared_refs() {
                if !declared.contains(&shared) {
                    return Err(ValidationError::UnknownSharedReference {
                        agent: agent.name.clone(),
                        kind: shared.kind,
                        name: shared.name,
                    });
                }
            }

            for tool in &agent.tools {
                if let Ok(ToolRef::Mcp { server, .. }) = ToolRef::parse(tool) {
                    let key = SharedRef::new(ResourceKind::McpServer, server.as_str());
                    if !declared.contains(&key) {
                        return Err(ValidationError::UnknownSharedReference {
                            agent: agent.name.clone(),
                            kind: ResourceKind::McpServer,
                            name: server,
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

/// Malformed configuration or selector.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Duplicate agent name '{0}'")]
    DuplicateAgent(String),

    #[error("Duplicate {kind} '{name}'")]
    DuplicateSharedResource { kind: ResourceKind, name: String },

    #[error("Agent '{agent}' references unknown {kind} '{name}'")]
    UnknownSharedReference {
        agent: String,
        kind: ResourceKind,
        name: String,
    },

    #[error("Name must not be empty")]
    EmptyName,

    #[error("Agent '{agent}' has invalid tag '{tag}'")]
    InvalidTag { agent: String, tag: String },

    #[error("Agent '{agent}' has invalid tool '{tool}': {reason}")]
    InvalidToolPattern {
        agent: String,
        tool: String,
        reason: String,
    },

    #[error("Agent '{agent}' declares memory block '{label}' more than once or without a label")]
    DuplicateBlockLabel { agent: String, label: String },

    #[error("Agent '{agent}' block '{label}' is {len} characters, limit is {limit}")]
    BlockValueExceedsLimit {
        agent: String,
        label: String,
        len: usize,
        limit: u32,
    },

    #[error("Agent '{agent}' system prompt file {path:?} was not loaded")]
    UnresolvedSystemPrompt { agent: String, path: PathBuf },

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(name: &str) -> AgentSpec {
        AgentSpec::new(name)
    }

    fn fleet_with_kb() -> FleetConfiguration {
        FleetConfiguration {
            shared_blocks: vec![SharedBlockSpec {
                name: "kb".to_string(),
                description: None,
                value: "knowledge".to_string(),
                limit: None,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_duplicate_tags_collapse_to_last_write() {
        let mut spec = agent("a");
        spec.tags = vec!["role:support".into(), "tier:1".into(), "role:billing".into()];
        let tags = spec.tag_map();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags["role"], "billing");
    }

    #[test]
    fn test_bare_tag_has_empty_value() {
        assert_eq!(parse_tag("beta"), ("beta".to_string(), String::new()));
        assert_eq!(format_tag("beta", ""), "beta");
    }

    #[test]
    fn test_duplicate_agent_is_fleet_error() {
        let mut fleet = FleetConfiguration::default();
        fleet.agents = vec![agent("a"), agent("a")];
        assert_eq!(
            fleet.validate(),
            Err(ValidationError::DuplicateAgent("a".to_string()))
        );
    }

    #[test]
    fn test_unknown_shared_reference_is_fleet_error() {
        let mut fleet = fleet_with_kb();
        let mut a = agent("a");
        a.shared_blocks = vec!["missing".to_string()];
        fleet.agents.push(a);
        assert!(matches!(
            fleet.validate(),
            Err(ValidationError::UnknownSharedReference { .. })
        ));
    }

    #[test]
    fn test_mcp_qualified_tool_needs_declared_server() {
        let mut fleet = FleetConfiguration::default();
        let mut a = agent("a");
        a.tools = vec!["github::create_issue".to_string()];
        fleet.agents.push(a);
        assert!(fleet.validate().is_err());

        fleet.mcp_servers.push(McpServerSpec {
            name: "github".to_string(),
            transport: McpTransport::Sse {
                url: "http://localhost:9000/sse".to_string(),
            },
        });
        assert!(fleet.validate().is_ok());
    }

    #[test]
    fn test_block_over_limit_is_agent_error() {
        let mut a = agent("a");
        a.memory_blocks.push(MemoryBlockSpec {
            label: "persona".to_string(),
            value: "x".repeat(20),
            limit: Some(10),
            description: None,
        });
        assert!(matches!(
            a.validate(),
            Err(ValidationError::BlockValueExceedsLimit { len: 20, limit: 10, .. })
        ));
    }

    #[test]
    fn test_tool_ref_parsing() {
        assert_eq!(
            ToolRef::parse("web_search").unwrap(),
            ToolRef::Literal("web_search".to_string())
        );
        assert!(matches!(ToolRef::parse("archival_*").unwrap(), ToolRef::Pattern(_)));
        assert_eq!(
            ToolRef::parse("gh::list_prs").unwrap(),
            ToolRef::Mcp {
                server: "gh".to_string(),
                tool: "list_prs".to_string()
            }
        );
        assert!(ToolRef::parse("bad[").is_err());
        assert!(ToolRef::parse("::tool").is_err());
    }

    #[test]
    fn test_fields_roundtrip_through_spec() {
        let mut a = agent("support");
        a.description = Some("Support agent".to_string());
        a.tags = vec!["role:support".to_string()];
        a.system_prompt = Some(SystemPrompt::Inline("be nice".to_string()));
        a.model.handle = Some("openai/gpt-4o-mini".to_string());
        a.model.context_window = Some(32000);
        a.memory_blocks.push(MemoryBlockSpec {
            label: "persona".to_string(),
            value: "helpful".to_string(),
            limit: Some(2000),
            description: None,
        });
        a.archives.push(ArchiveSpec {
            name: "tickets".to_string(),
            description: Some("past tickets".to_string()),
        });
        a.shared_blocks = vec!["kb".to_string()];
        a.tools = vec!["web_search".to_string()];

        let fields = a.desired_fields();
        assert_eq!(fields["tags.role"], json!("support"));
        assert_eq!(fields["shared.block.kb"], json!(true));
        assert_eq!(fields["blocks.persona.limit"], json!(2000));

        let rebuilt = AgentSpec::from_fields("support", &fields);
        assert_eq!(rebuilt.desired_fields(), fields);
    }

    #[test]
    fn test_out_of_range_numbers_are_dropped() {
        let mut fields = FieldMap::new();
        fields.insert("model.context_window".to_string(), json!(u64::from(u32::MAX) + 1));
        fields.insert("model.max_tokens".to_string(), json!(4096));
        fields.insert("blocks.persona.value".to_string(), json!("helpful"));
        fields.insert("blocks.persona.limit".to_string(), json!(u64::MAX));

        let spec = AgentSpec::from_fields("support", &fields);
        assert_eq!(spec.model.context_window, None);
        assert_eq!(spec.model.max_tokens, Some(4096));
        assert_eq!(spec.memory_blocks[0].limit, None);
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let a = SharedResourceSpec::Block(SharedBlockSpec {
            name: "kb".to_string(),
            description: None,
            value: "one".to_string(),
            limit: None,
        });
        let mut b = a.clone();
        if let SharedResourceSpec::Block(block) = &mut b {
            block.value = "two".to_string();
        }
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
    }
}
