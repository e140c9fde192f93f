// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! CLI command implementations
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Subcommand handlers and the context they share

pub mod apply;
pub mod describe;
pub mod export;
pub mod get;
pub mod messages;
pub mod report;
pub mod send;

pub use apply::ApplyArgs;
pub use describe::DescribeArgs;
pub use export::{ExportArgs, ImportArgs};
pub use get::GetArgs;
pub use messages::MessagesCommand;
pub use report::ReportCommand;
pub use send::SendArgs;

use std::sync::Arc;
use std::time::Duration;

use flotilla_core::application::dispatcher::FanoutDispatcher;
use flotilla_core::application::reconciler::StandardReconciler;
use flotilla_core::domain::canary::CanaryNaming;
use flotilla_core::domain::error::FleetError;
use flotilla_core::domain::fleet::ValidationError;
use flotilla_core::domain::remote::{RemoteClient, RemoteError};
use flotilla_core::domain::selector::Selector;
use flotilla_core::infrastructure::config::ClientConfig;
use tokio_util::sync::CancellationToken;

/// Everything a command needs to talk to the hosting service.
pub struct CommandContext {
    pub config: ClientConfig,
    pub remote: Arc<dyn RemoteClient>,
    pub cancel: CancellationToken,
}

impl CommandContext {
    pub fn new(config: ClientConfig, remote: Arc<dyn RemoteClient>) -> Self {
        Self {
            config,
            remote,
            cancel: CancellationToken::new(),
        }
    }

    pub fn naming(&self) -> CanaryNaming {
        CanaryNaming::new(self.config.canary_prefix.clone())
    }

    /// Dispatcher sized by configuration, optionally with a tighter deadline.
    pub fn dispatcher(&self, timeout: Option<Duration>) -> FanoutDispatcher {
        FanoutDispatcher::new(self.config.concurrency)
            .with_deadline(timeout.unwrap_or_else(|| self.config.dispatch_timeout()))
    }

    pub fn reconciler(&self, naming: CanaryNaming) -> Arc<StandardReconciler> {
        Arc::new(StandardReconciler::new(self.remote.clone()).with_naming(naming))
    }
}

/// Result of a command that ran to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    /// At least one entity failed while its siblings were processed.
    PartialFailure,
}

impl CommandStatus {
    pub fn from_failures(failures: usize) -> Self {
        if failures == 0 {
            Self::Success
        } else {
            Self::PartialFailure
        }
    }

    pub fn exit_code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::PartialFailure => 2,
        }
    }
}

/// Combine a `--match` expression with `--tags` terms.
pub fn selector_from_args(expr: Option<&str>, tags: &[String]) -> Result<Selector, FleetError> {
    let mut selector = match expr {
        Some(expr) => Selector::parse(expr)?,
        None => Selector::all(),
    };
    for (key, value) in Selector::from_parts(None, tags)?.tags() {
        selector = selector.with_tag(key.clone(), value.clone());
    }
    Ok(selector)
}

/// Exit code for a command that failed as a whole.
///
/// Invocation-level failures carry a [`FleetError`]; anything else (an
/// unreadable file, malformed YAML) is treated as a validation error.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(fleet) = err.downcast_ref::<FleetError>() {
        return fleet.exit_code();
    }
    if err.downcast_ref::<ValidationError>().is_some() {
        return 1;
    }
    if err.downcast_ref::<RemoteError>().is_some() {
        return 3;
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use flotilla_core::domain::canary::CanaryStateError;

    #[test]
    fn test_exit_codes() {
        let validation = anyhow::Error::new(FleetError::Validation(ValidationError::EmptyName));
        assert_eq!(exit_code(&validation), 1);

        let state = anyhow::Error::new(FleetError::CanaryState(CanaryStateError::ProductionMissing(
            "support".to_string(),
        )));
        assert_eq!(exit_code(&state), 1);

        let auth = anyhow::Error::new(FleetError::Remote(RemoteError::Unauthorized("bad key".to_string())));
        assert_eq!(exit_code(&auth), 3);

        assert_eq!(exit_code(&anyhow::Error::new(FleetError::Cancelled)), 2);
        assert_eq!(exit_code(&anyhow!("cannot read file")), 1);
    }

    #[test]
    fn test_selector_combines_match_and_tags() {
        let selector = selector_from_args(Some("support-*"), &["tier:gold".to_string()]).unwrap();
        assert_eq!(selector.name_pattern(), Some("support-*"));
        assert_eq!(selector.tags()["tier"], "gold");

        assert!(selector_from_args(None, &[]).unwrap().is_empty());
        assert!(selector_from_args(Some("a b"), &[]).is_err());
    }

    #[test]
    fn test_status_from_failures() {
        assert_eq!(CommandStatus::from_failures(0).exit_code(), 0);
        assert_eq!(CommandStatus::from_failures(3).exit_code(), 2);
    }
}
