// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the canary lifecycle
//!
//! deploy -> promote -> cleanup against the in-memory remote client,
//! including an interrupted identity swap and isolation from regular applies.

use flotilla_core::application::canary::CanaryManager;
use flotilla_core::application::dispatcher::FanoutDispatcher;
use flotilla_core::application::messaging::MessagingService;
use flotilla_core::application::reconciler::{ApplyOptions, ReconcilerService, StandardReconciler};
use flotilla_core::domain::canary::{CanaryNaming, CanaryState, CanaryStateError};
use flotilla_core::domain::error::FleetError;
use flotilla_core::domain::fleet::FleetConfiguration;
use flotilla_core::domain::remote::RemoteError;
use flotilla_core::domain::selector::Selector;
use flotilla_core::infrastructure::fleet_parser::FleetParser;
use flotilla_core::infrastructure::in_memory::InMemoryRemoteClient;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const PRODUCTION: &str = r#"
agents:
  - name: support
    tags: ["role:support"]
    system_prompt: "You answer support tickets."
  - name: billing
    tags: ["role:billing"]
"#;

const CANDIDATE: &str = r#"
agents:
  - name: support
    tags: ["role:support"]
    system_prompt: "You answer support tickets. Always cite the policy."
  - name: billing
    tags: ["role:billing"]
"#;

fn fleet(yaml: &str) -> FleetConfiguration {
    FleetParser::parse_yaml(yaml, Path::new(".")).expect("valid fleet yaml")
}

struct Harness {
    remote: Arc<InMemoryRemoteClient>,
    reconciler: Arc<StandardReconciler>,
    canary: CanaryManager,
    cancel: CancellationToken,
}

async fn harness() -> Harness {
    let remote = Arc::new(InMemoryRemoteClient::new());
    let reconciler = Arc::new(StandardReconciler::new(remote.clone()));
    let canary = CanaryManager::new(remote.clone(), reconciler.clone(), CanaryNaming::default());
    let cancel = CancellationToken::new();
    reconciler
        .apply(&fleet(PRODUCTION), &ApplyOptions::default(), &cancel)
        .await
        .unwrap();
    remote.reset_calls();
    Harness {
        remote,
        reconciler,
        canary,
        cancel,
    }
}

async fn deploy_support(h: &Harness) {
    let report = h
        .canary
        .deploy(
            &fleet(CANDIDATE),
            &["support".to_string()],
            &ApplyOptions::default(),
            &h.cancel,
        )
        .await
        .unwrap();
    assert!(!report.has_failures());
}

#[tokio::test]
async fn test_deploy_leaves_production_untouched() {
    let h = harness().await;
    let before = h.remote.agent_named("support").unwrap();

    deploy_support(&h).await;

    let calls = h.remote.calls();
    assert_eq!(calls.agent_creates, 1);
    assert_eq!(calls.agent_updates, 0);
    assert_eq!(h.remote.agent_named("support").unwrap(), before);

    let shadow = h.remote.agent_named("CANARY-support").unwrap();
    assert_eq!(shadow.tag("canary-of").as_deref(), Some("support"));
    assert_eq!(shadow.tag("canary-state").as_deref(), Some("active"));
    assert_eq!(shadow.tag("role").as_deref(), Some("support"));
    assert_eq!(
        shadow.fields["system"],
        json!("You answer support tickets. Always cite the policy.")
    );

    let status = h.canary.status("support").await.unwrap();
    assert_eq!(status.state(), Some(CanaryState::Active));
}

#[tokio::test]
async fn test_deploy_unknown_agent_is_rejected() {
    let h = harness().await;

    let result = h
        .canary
        .deploy(
            &fleet(CANDIDATE),
            &["nobody".to_string()],
            &ApplyOptions::default(),
            &h.cancel,
        )
        .await;

    assert!(matches!(
        result,
        Err(FleetError::CanaryState(CanaryStateError::NotInConfiguration(_)))
    ));
    assert_eq!(h.remote.calls().mutations(), 0);
}

#[tokio::test]
async fn test_canaries_invisible_to_regular_operations() {
    let h = harness().await;
    deploy_support(&h).await;
    h.remote.reset_calls();

    // A pruning full-fleet apply neither updates nor deletes the shadow.
    let report = h
        .reconciler
        .apply(
            &fleet(PRODUCTION),
            &ApplyOptions {
                prune: true,
                ..ApplyOptions::default()
            },
            &h.cancel,
        )
        .await
        .unwrap();
    assert!(report.pruned.is_empty());
    assert_eq!(h.remote.calls().mutations(), 0);
    assert!(h.remote.agent_named("CANARY-support").is_some());

    let messaging = MessagingService::new(h.remote.clone(), FanoutDispatcher::default());
    let targets = messaging
        .targets(&Selector::parse("role:support").unwrap())
        .await
        .unwrap();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].name, "support");
}

#[tokio::test]
async fn test_promote_swaps_identities() {
    let h = harness().await;
    let production_id = h.remote.agent_named("support").unwrap().id;
    deploy_support(&h).await;
    let shadow_id = h.remote.agent_named("CANARY-support").unwrap().id;

    let promotion = h.canary.promote("support").await.unwrap();

    assert_eq!(promotion.attempts, 1);
    assert_eq!(promotion.promoted_id, shadow_id);
    assert_eq!(promotion.retired_id, production_id);
    assert_eq!(promotion.retired_name, "CANARY-support-retired");
    assert!(!promotion.calibration_reply.is_empty());

    let promoted = h.remote.agent_named("support").unwrap();
    assert_eq!(promoted.id, shadow_id);
    assert_eq!(promoted.tag("role").as_deref(), Some("support"));
    assert_eq!(promoted.tag("canary-of"), None);
    assert_eq!(promoted.tag("canary-state"), None);

    let retired = h.remote.agent_named("CANARY-support-retired").unwrap();
    assert_eq!(retired.id, production_id);
    assert_eq!(retired.tag("canary-state").as_deref(), Some("retired"));

    let status = h.canary.status("support").await.unwrap();
    assert_eq!(status.state(), Some(CanaryState::Promoted));
}

#[tokio::test]
async fn test_promote_recovers_from_interrupted_rename() {
    let h = harness().await;
    deploy_support(&h).await;
    let shadow_id = h.remote.agent_named("CANARY-support").unwrap().id;
    h.remote.reset_calls();
    // Production is already renamed when the second rename drops.
    h.remote.fail_rename_attempt(2);

    let promotion = h.canary.promote("support").await.unwrap();

    assert_eq!(promotion.attempts, 2);
    assert_eq!(h.remote.calls().agent_renames, 4);
    assert_eq!(h.remote.agent_named("support").unwrap().id, shadow_id);
    assert!(h.remote.agent_named("CANARY-support-retired").is_some());
    assert!(h.remote.agent_named("CANARY-support").is_none());
}

#[tokio::test]
async fn test_promote_without_canary_is_state_error() {
    let h = harness().await;

    let err = h.canary.promote("support").await.unwrap_err();

    assert!(matches!(
        err,
        FleetError::CanaryState(CanaryStateError::NotActive { .. })
    ));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(h.remote.calls().agent_renames, 0);
}

#[tokio::test]
async fn test_unreachable_canary_is_not_promoted() {
    let h = harness().await;
    deploy_support(&h).await;
    h.remote
        .fail_messages("CANARY-support", RemoteError::Transient("no route".to_string()));

    let err = h.canary.promote("support").await.unwrap_err();

    assert!(matches!(
        err,
        FleetError::CanaryState(CanaryStateError::Unreachable { .. })
    ));
    assert_eq!(h.remote.calls().agent_renames, 0);
    assert!(h.remote.agent_named("CANARY-support").is_some());
}

#[tokio::test]
async fn test_cleanup_removes_only_marked_agents() {
    let h = harness().await;
    deploy_support(&h).await;
    h.canary.promote("support").await.unwrap();

    let dry = h.canary.cleanup("support", true).await.unwrap();
    assert_eq!(dry.len(), 1);
    assert!(h.remote.agent_named("CANARY-support-retired").is_some());

    let removed = h.canary.cleanup("support", false).await.unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].name, "CANARY-support-retired");
    assert_eq!(
        h.remote.agent_names(),
        vec!["billing".to_string(), "support".to_string()]
    );
    assert_eq!(h.canary.status("support").await.unwrap().state(), None);
}

#[tokio::test]
async fn test_failed_shadow_leaves_nothing_behind() {
    let h = harness().await;
    let remote = h.remote.clone();
    let shadow_fleet = fleet(CANDIDATE);
    remote.fail_agent("CANARY-support", RemoteError::Rejected("disk full".to_string()));

    let report = h
        .canary
        .deploy(&shadow_fleet, &["support".to_string()], &ApplyOptions::default(), &h.cancel)
        .await
        .unwrap();

    assert!(report.has_failures());
    assert!(remote.agent_named("CANARY-support").is_none());
    assert!(remote.agent_named("support").is_some());
}
