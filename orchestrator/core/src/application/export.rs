// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Export / Import
//!
//! Export turns live agents back into a [`FleetConfiguration`] through the
//! reverse field mapping. Import feeds a configuration into the reconciler,
//! creating only what is missing unless overwriting was asked for.

use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::application::reconciler::{ApplyMode, ApplyOptions, ReconcilerService};
use crate::domain::canary::CanaryNaming;
use crate::domain::error::FleetError;
use crate::domain::fleet::{
    AgentSpec, FleetConfiguration, ResourceKind, SharedRef, SharedResourceSpec, ToolRef,
};
use crate::domain::remote::RemoteClient;
use crate::domain::report::ApplyReport;
use crate::domain::selector::Selector;

pub struct ExportService {
    remote: Arc<dyn RemoteClient>,
    reconciler: Arc<dyn ReconcilerService>,
    naming: CanaryNaming,
}

impl ExportService {
    pub fn new(remote: Arc<dyn RemoteClient>, reconciler: Arc<dyn ReconcilerService>) -> Self {
        Self {
            remote,
            reconciler,
            naming: CanaryNaming::default(),
        }
    }

    pub fn with_naming(mut self, naming: CanaryNaming) -> Self {
        self.naming = naming;
        self
    }

    /// Snapshot matching live agents, plus the shared resources they use, as
    /// a configuration. Canary members are not exported.
    pub async fn export(&self, selector: &Selector) -> Result<FleetConfiguration, FleetError> {
        let agents = self.remote.list_agents(selector).await?;
        let shared = self.remote.list_shared_resources().await?;

        let mut config = FleetConfiguration::default();
        let mut used = BTreeSet::new();

        for live in agents
            .iter()
            .filter(|a| selector.matches(*a))
            .filter(|a| !self.naming.is_marked(&a.name))
        {
            let spec = AgentSpec::from_fields(&live.name, &live.fields);
            used.extend(spec.shared_refs());
            config.agents.push(spec);
        }

        let mut exportable = BTreeSet::new();
        for resource in shared {
            let key = SharedRef::new(resource.kind, resource.name.as_str());
            if !used.contains(&key) {
                continue;
            }
            match resource.definition {
                Some(SharedResourceSpec::Block(block)) => config.shared_blocks.push(block),
                Some(SharedResourceSpec::Folder(folder)) => config.shared_folders.push(folder),
                Some(SharedResourceSpec::McpServer(server)) => config.mcp_servers.push(server),
                None => continue,
            }
            exportable.insert(key);
        }

        // References whose definition the service cannot report would make the
        // export fail validation on import.
        for spec in &mut config.agents {
            for missing in spec.shared_refs().difference(&exportable) {
                warn!(
                    "Dropping reference from {} to {}: definition not available",
                    spec.name, missing
                );
                let list = match missing.kind {
                    ResourceKind::Block => &mut spec.shared_blocks,
                    ResourceKind::Folder => &mut spec.shared_folders,
                    ResourceKind::McpServer => &mut spec.mcp_servers,
                };
                list.retain(|n| *n != missing.name);
            }
            spec.tools.retain(|tool| match ToolRef::parse(tool) {
                Ok(ToolRef::Mcp { server, .. }) => {
                    exportable.contains(&SharedRef::new(ResourceKind::McpServer, server))
                }
                _ => true,
            });
        }

        config.agents.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(config)
    }

    /// Apply an exported configuration. Existing agents are skipped unless
    /// `overwrite` is set.
    pub async fn import(
        &self,
        config: &FleetConfiguration,
        overwrite: bool,
        dry_run: bool,
        concurrency: usize,
        cancel: &CancellationToken,
    ) -> Result<ApplyReport, FleetError> {
        let options = ApplyOptions {
            dry_run,
            mode: if overwrite {
                ApplyMode::Standard
            } else {
                ApplyMode::CreateOnly
            },
            concurrency,
            ..ApplyOptions::default()
        };
        self.reconciler.apply(config, &options, cancel).await
    }
}
