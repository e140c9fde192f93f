// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Fleet YAML Parser
//!
//! Parses fleet configuration files into [`FleetConfiguration`] values.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Parse external YAML → Domain objects
//! - **Anti-Corruption:** Resolves file references before the domain sees them
//!
//! # File Format
//!
//! ```yaml
//! shared_blocks:
//!   - name: kb
//!     value: "Refunds are processed within 5 days."
//! mcp_servers:
//!   - name: github
//!     type: streamable_http
//!     url: https://mcp.example.com/github
//! agents:
//!   - name: support-1
//!     tags: ["role:support", "tier:1"]
//!     system_prompt:
//!       file: prompts/support.md
//!     model:
//!       handle: openai/gpt-4o-mini
//!     shared_blocks: [kb]
//!     tools: [web_search, "github::create_issue"]
//! ```
//!
//! Structural checks (duplicate names, unknown references) are left to
//! [`FleetConfiguration::validate`] so they surface as validation errors.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::domain::fleet::{FleetConfiguration, SystemPrompt};

// ============================================================================
// Parser API
// ============================================================================

pub struct FleetParser;

impl FleetParser {
    /// Parse a fleet from a YAML string. `file:` references are resolved
    /// relative to `base_dir`.
    pub fn parse_yaml(yaml: &str, base_dir: &Path) -> Result<FleetConfiguration> {
        let mut config: FleetConfiguration =
            serde_yaml::from_str(yaml).context("Failed to parse fleet YAML")?;
        Self::resolve_system_prompts(&mut config, base_dir);
        Ok(config)
    }

    /// Parse a fleet from a YAML file.
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<FleetConfiguration> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fleet file: {:?}", path))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse_yaml(&yaml, base_dir)
    }

    /// Serialize a fleet to YAML.
    pub fn to_yaml(config: &FleetConfiguration) -> Result<String> {
        serde_yaml::to_string(config).context("Failed to serialize fleet to YAML")
    }

    /// Inline every system prompt file that can be read. Unreadable files stay
    /// as references, which fails only the affected agent.
    fn resolve_system_prompts(config: &mut FleetConfiguration, base_dir: &Path) {
        for agent in &mut config.agents {
            let Some(SystemPrompt::File { file }) = &agent.system_prompt else {
                continue;
            };
            let path: PathBuf = if file.is_absolute() {
                file.clone()
            } else {
                base_dir.join(file)
            };
            match std::fs::read_to_string(&path) {
                Ok(text) => agent.system_prompt = Some(SystemPrompt::Inline(text)),
                Err(e) => {
                    warn!(
                        "Cannot read system prompt for {} from {:?}: {}",
                        agent.name, path, e
                    );
                    agent.system_prompt = Some(SystemPrompt::File { file: path });
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
