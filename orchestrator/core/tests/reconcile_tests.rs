// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for fleet reconciliation
//!
//! These tests drive the reconciler against the in-memory remote client and
//! assert on the resulting live state and on the exact remote traffic:
//! 1. Idempotent re-apply
//! 2. Preservation of user-owned fields
//! 3. Shared resource reference counting and pruning
//! 4. Per-agent failure isolation

use flotilla_core::application::reconciler::{
    ApplyMode, ApplyOptions, ReconcilerService, StandardReconciler,
};
use flotilla_core::domain::error::FleetError;
use flotilla_core::domain::fleet::{FleetConfiguration, ResourceKind};
use flotilla_core::domain::merge::FieldMap;
use flotilla_core::domain::remote::RemoteError;
use flotilla_core::domain::report::EntityAction;
use flotilla_core::domain::selector::Selector;
use flotilla_core::infrastructure::fleet_parser::FleetParser;
use flotilla_core::infrastructure::in_memory::InMemoryRemoteClient;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn fleet(yaml: &str) -> FleetConfiguration {
    FleetParser::parse_yaml(yaml, Path::new(".")).expect("valid fleet yaml")
}

fn setup() -> (Arc<InMemoryRemoteClient>, StandardReconciler) {
    let remote = Arc::new(InMemoryRemoteClient::new());
    let reconciler = StandardReconciler::new(remote.clone());
    (remote, reconciler)
}

const SUPPORT_FLEET: &str = r#"
shared_blocks:
  - name: kb
    value: "Refunds are processed within 5 days."
agents:
  - name: A
    tags: ["role:support"]
    system_prompt: "You answer support tickets."
    model:
      handle: openai/gpt-4o-mini
    memory_blocks:
      - label: persona
        value: "Patient"
        limit: 2000
    shared_blocks: [kb]
  - name: B
    tags: ["role:support"]
    system_prompt: "You answer support tickets."
    shared_blocks: [kb]
"#;

#[tokio::test]
async fn test_first_apply_creates_everything() {
    let (remote, reconciler) = setup();
    let config = fleet(SUPPORT_FLEET);

    let report = reconciler
        .apply(&config, &ApplyOptions::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.agent("A").unwrap().action, EntityAction::Created);
    assert_eq!(report.agent("B").unwrap().action, EntityAction::Created);
    assert_eq!(report.shared.len(), 1);
    assert_eq!(report.shared[0].action, EntityAction::Created);
    assert_eq!(report.shared[0].ref_count, 2);
    assert!(!report.has_failures());

    let calls = remote.calls();
    assert_eq!(calls.agent_creates, 2);
    assert_eq!(calls.shared_upserts, 1);
    assert_eq!(calls.snapshot_writes, 2);

    let a = remote.agent_named("A").unwrap();
    assert_eq!(a.fields["shared.block.kb"], json!(true));
    assert_eq!(a.tag("role").as_deref(), Some("support"));
}

#[tokio::test]
async fn test_reapply_is_noop() {
    let (remote, reconciler) = setup();
    let config = fleet(SUPPORT_FLEET);
    let cancel = CancellationToken::new();

    reconciler.apply(&config, &ApplyOptions::default(), &cancel).await.unwrap();
    remote.reset_calls();

    let report = reconciler.apply(&config, &ApplyOptions::default(), &cancel).await.unwrap();

    assert_eq!(remote.calls().mutations(), 0);
    assert_eq!(report.mutations(), 0);
    assert!(report.agents.iter().all(|a| a.action == EntityAction::Unchanged));
    assert_eq!(report.shared[0].action, EntityAction::Unchanged);
}

#[tokio::test]
async fn test_dry_run_makes_no_mutations() {
    let (remote, reconciler) = setup();
    let config = fleet(SUPPORT_FLEET);
    let options = ApplyOptions {
        dry_run: true,
        ..ApplyOptions::default()
    };

    let report = reconciler.apply(&config, &options, &CancellationToken::new()).await.unwrap();

    assert_eq!(remote.calls().mutations(), 0);
    assert!(remote.agent_names().is_empty());
    assert_eq!(report.agent("A").unwrap().action, EntityAction::WouldCreate);
    assert!(!report.agent("A").unwrap().patch.is_empty());
    assert_eq!(report.shared[0].action, EntityAction::WouldCreate);
}

#[tokio::test]
async fn test_user_fields_survive_reapply() {
    let (remote, reconciler) = setup();
    let config = fleet(SUPPORT_FLEET);
    let cancel = CancellationToken::new();

    reconciler.apply(&config, &ApplyOptions::default(), &cancel).await.unwrap();
    assert!(remote.edit_field("A", "tags.owner", json!("alice")));
    assert!(remote.edit_field("A", "model.temperature", json!(0.9)));
    remote.reset_calls();

    let report = reconciler.apply(&config, &ApplyOptions::default(), &cancel).await.unwrap();

    assert_eq!(remote.calls().mutations(), 0);
    assert!(report.agent("A").unwrap().conflicts.is_empty());
    let a = remote.agent_named("A").unwrap();
    assert_eq!(a.tag("owner").as_deref(), Some("alice"));
    assert_eq!(a.fields["model.temperature"], json!(0.9));
}

#[tokio::test]
async fn test_external_edit_of_managed_field_is_conflict() {
    let (remote, reconciler) = setup();
    let config = fleet(SUPPORT_FLEET);
    let cancel = CancellationToken::new();

    reconciler.apply(&config, &ApplyOptions::default(), &cancel).await.unwrap();
    remote.edit_field("B", "system", json!("Edited in the dashboard."));

    let report = reconciler.apply(&config, &ApplyOptions::default(), &cancel).await.unwrap();

    let b = report.agent("B").unwrap();
    assert_eq!(b.action, EntityAction::Updated);
    assert_eq!(b.conflicts.len(), 1);
    assert_eq!(b.conflicts[0].path, "system");
    assert_eq!(
        remote.agent_named("B").unwrap().fields["system"],
        json!("You answer support tickets.")
    );
}

#[tokio::test]
async fn test_removed_field_is_unset() {
    let (remote, reconciler) = setup();
    let cancel = CancellationToken::new();

    reconciler
        .apply(&fleet(SUPPORT_FLEET), &ApplyOptions::default(), &cancel)
        .await
        .unwrap();

    let trimmed = fleet(
        r#"
shared_blocks:
  - name: kb
    value: "Refunds are processed within 5 days."
agents:
  - name: A
    tags: ["role:support"]
    system_prompt: "You answer support tickets."
    shared_blocks: [kb]
  - name: B
    tags: ["role:support"]
    system_prompt: "You answer support tickets."
    shared_blocks: [kb]
"#,
    );
    let report = reconciler.apply(&trimmed, &ApplyOptions::default(), &cancel).await.unwrap();

    assert_eq!(report.agent("A").unwrap().action, EntityAction::Updated);
    assert_eq!(report.agent("B").unwrap().action, EntityAction::Unchanged);
    let a = remote.agent_named("A").unwrap();
    assert!(!a.fields.contains_key("model.handle"));
    assert!(!a.fields.contains_key("blocks.persona.value"));
}

#[tokio::test]
async fn test_partial_failure_isolated_to_one_agent() {
    let (remote, reconciler) = setup();
    let mut yaml = String::from("agents:\n");
    for i in 0..6 {
        yaml.push_str(&format!("  - name: agent-{i}\n    tags: [\"role:worker\"]\n"));
    }
    let config = fleet(&yaml);
    remote.fail_agent("agent-3", RemoteError::Rejected("quota exceeded".to_string()));

    let report = reconciler
        .apply(&config, &ApplyOptions::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 5);
    assert_eq!(report.failed(), 1);
    assert!(report.has_failures());
    let failed = report.agent("agent-3").unwrap();
    assert_eq!(failed.action, EntityAction::Failed);
    assert!(failed.error.as_deref().unwrap().contains("quota exceeded"));
    assert_eq!(remote.agent_names().len(), 5);
}

#[tokio::test]
async fn test_invalid_agent_fails_alone() {
    let (remote, reconciler) = setup();
    let config = fleet(
        r#"
agents:
  - name: good
  - name: bad
    memory_blocks:
      - label: persona
        value: "far too long"
        limit: 3
"#,
    );

    let report = reconciler
        .apply(&config, &ApplyOptions::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.agent("good").unwrap().action, EntityAction::Created);
    assert_eq!(report.agent("bad").unwrap().action, EntityAction::Failed);
    assert_eq!(remote.agent_names(), vec!["good".to_string()]);
}

#[tokio::test]
async fn test_structural_error_rejects_whole_apply() {
    let (remote, reconciler) = setup();
    let config = fleet("agents:\n  - name: a\n    shared_blocks: [missing]\n");

    let result = reconciler
        .apply(&config, &ApplyOptions::default(), &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(FleetError::Validation(_))));
    assert_eq!(result.unwrap_err().exit_code(), 1);
    assert_eq!(remote.calls().mutations(), 0);
}

#[tokio::test]
async fn test_failed_shared_resource_fails_only_referencing_agents() {
    let (remote, reconciler) = setup();
    let config = fleet(
        r#"
shared_blocks:
  - name: kb
    value: "facts"
agents:
  - name: A
    shared_blocks: [kb]
  - name: B
    shared_blocks: [kb]
  - name: C
"#,
    );
    remote.fail_shared_resource("kb", RemoteError::Rejected("too large".to_string()));

    let report = reconciler
        .apply(&config, &ApplyOptions::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.agent("A").unwrap().action, EntityAction::Failed);
    assert_eq!(report.agent("B").unwrap().action, EntityAction::Failed);
    assert_eq!(report.agent("C").unwrap().action, EntityAction::Created);
    assert_eq!(report.shared[0].action, EntityAction::Failed);
    assert_eq!(remote.calls().shared_upserts, 1);
}

#[tokio::test]
async fn test_apply_reapply_prune_scenario() {
    let (remote, reconciler) = setup();
    let cancel = CancellationToken::new();
    let prune = ApplyOptions {
        prune: true,
        ..ApplyOptions::default()
    };

    reconciler.apply(&fleet(SUPPORT_FLEET), &prune, &cancel).await.unwrap();
    assert_eq!(remote.agent_names(), vec!["A".to_string(), "B".to_string()]);

    // B leaves the fleet; kb is still used by A.
    let without_b = fleet(
        r#"
shared_blocks:
  - name: kb
    value: "Refunds are processed within 5 days."
agents:
  - name: A
    tags: ["role:support"]
    system_prompt: "You answer support tickets."
    model:
      handle: openai/gpt-4o-mini
    memory_blocks:
      - label: persona
        value: "Patient"
        limit: 2000
    shared_blocks: [kb]
"#,
    );
    let report = reconciler.apply(&without_b, &prune, &cancel).await.unwrap();
    assert_eq!(remote.agent_names(), vec!["A".to_string()]);
    assert_eq!(report.pruned.len(), 1);
    assert_eq!(report.pruned[0].name, "B");
    assert_eq!(report.shared[0].ref_count, 1);
    assert!(remote.shared_resource(ResourceKind::Block, "kb").is_some());

    // kb is no longer declared or referenced.
    let without_kb = fleet(
        r#"
agents:
  - name: A
    tags: ["role:support"]
    system_prompt: "You answer support tickets."
"#,
    );
    let report = reconciler.apply(&without_kb, &prune, &cancel).await.unwrap();
    assert!(report
        .pruned
        .iter()
        .any(|p| p.name == "kb" && p.action == EntityAction::Deleted));
    assert!(remote.shared_resource(ResourceKind::Block, "kb").is_none());
    assert!(!remote.agent_named("A").unwrap().fields.contains_key("shared.block.kb"));
}

#[tokio::test]
async fn test_prune_spares_unmanaged_resources() {
    let (remote, reconciler) = setup();
    remote.insert_agent("handmade", FieldMap::new());
    remote.insert_shared_resource(ResourceKind::Folder, "manuals");

    let report = reconciler
        .apply(
            &fleet("agents:\n  - name: a\n"),
            &ApplyOptions {
                prune: true,
                ..ApplyOptions::default()
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(report.pruned.is_empty());
    assert!(remote.agent_named("handmade").is_some());
    assert!(remote.shared_resource(ResourceKind::Folder, "manuals").is_some());
}

#[tokio::test]
async fn test_prune_requires_full_fleet() {
    let (_remote, reconciler) = setup();
    let options = ApplyOptions {
        prune: true,
        selector: Selector::parse("A").unwrap(),
        ..ApplyOptions::default()
    };

    let result = reconciler
        .apply(&fleet(SUPPORT_FLEET), &options, &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(FleetError::Validation(_))));
}

#[tokio::test]
async fn test_selector_limits_apply() {
    let (remote, reconciler) = setup();
    let options = ApplyOptions {
        selector: Selector::parse("A").unwrap(),
        ..ApplyOptions::default()
    };

    let report = reconciler
        .apply(&fleet(SUPPORT_FLEET), &options, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.agents.len(), 1);
    assert_eq!(remote.agent_names(), vec!["A".to_string()]);
}

#[tokio::test]
async fn test_template_mode_is_additive() {
    let (remote, reconciler) = setup();
    let cancel = CancellationToken::new();
    reconciler
        .apply(&fleet(SUPPORT_FLEET), &ApplyOptions::default(), &cancel)
        .await
        .unwrap();
    remote.insert_agent("unrelated", FieldMap::new());

    let template = fleet(
        r#"
agents:
  - name: template
    tools: [web_search]
"#,
    );
    let options = ApplyOptions {
        mode: ApplyMode::Template(Selector::parse("role:support").unwrap()),
        ..ApplyOptions::default()
    };
    let report = reconciler.apply(&template, &options, &cancel).await.unwrap();

    assert_eq!(report.agents.len(), 2);
    assert!(report.agents.iter().all(|a| a.action == EntityAction::Updated));
    let a = remote.agent_named("A").unwrap();
    assert_eq!(a.fields["tools.web_search"], json!(true));
    // Fields the template does not mention stay in place.
    assert_eq!(a.fields["shared.block.kb"], json!(true));
    assert!(!remote.agent_named("unrelated").unwrap().fields.contains_key("tools.web_search"));
    assert!(remote.agent_named("template").is_none());
}

#[tokio::test]
async fn test_template_needs_single_agent() {
    let (_remote, reconciler) = setup();
    let options = ApplyOptions {
        mode: ApplyMode::Template(Selector::all()),
        ..ApplyOptions::default()
    };

    let result = reconciler
        .apply(&fleet(SUPPORT_FLEET), &options, &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(FleetError::Validation(_))));
}

#[tokio::test]
async fn test_first_message_calibrates_once() {
    let (remote, reconciler) = setup();
    let config = fleet("agents:\n  - name: a\n    first_message: \"Introduce yourself.\"\n");
    let cancel = CancellationToken::new();

    let report = reconciler.apply(&config, &ApplyOptions::default(), &cancel).await.unwrap();
    assert!(report.agent("a").unwrap().calibrated);
    assert_eq!(remote.message_count("a"), 2);

    let report = reconciler.apply(&config, &ApplyOptions::default(), &cancel).await.unwrap();
    assert!(!report.agent("a").unwrap().calibrated);

    let recalibrate = ApplyOptions {
        recalibrate: true,
        ..ApplyOptions::default()
    };
    let report = reconciler.apply(&config, &recalibrate, &cancel).await.unwrap();
    assert!(report.agent("a").unwrap().calibrated);
    assert_eq!(remote.message_count("a"), 4);
}

#[tokio::test]
async fn test_unauthorized_halts_apply() {
    let (remote, reconciler) = setup();
    remote.fail_agent("A", RemoteError::Unauthorized("token expired".to_string()));

    let result = reconciler
        .apply(
            &fleet("agents:\n  - name: A\n"),
            &ApplyOptions::default(),
            &CancellationToken::new(),
        )
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, FleetError::Remote(RemoteError::Unauthorized(_))));
    assert_eq!(err.exit_code(), 3);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let (remote, reconciler) = setup();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = reconciler.apply(&fleet(SUPPORT_FLEET), &ApplyOptions::default(), &cancel).await;

    assert!(matches!(result, Err(FleetError::Cancelled)));
    assert_eq!(remote.calls().mutations(), 0);
}

#[tokio::test]
async fn test_create_only_skips_existing() {
    let (remote, reconciler) = setup();
    remote.insert_agent("A", FieldMap::new());
    let options = ApplyOptions {
        mode: ApplyMode::CreateOnly,
        ..ApplyOptions::default()
    };

    let report = reconciler
        .apply(&fleet(SUPPORT_FLEET), &options, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.agent("A").unwrap().action, EntityAction::Skipped);
    assert_eq!(report.agent("B").unwrap().action, EntityAction::Created);
    assert!(remote.agent_named("A").unwrap().fields.is_empty());
}

#[tokio::test]
async fn test_ref_count_ignores_agents_outside_configuration() {
    let (remote, reconciler) = setup();
    let mut fields = FieldMap::new();
    fields.insert("shared.block.kb".to_string(), json!(true));
    remote.insert_agent("X-manual", fields);

    let report = reconciler
        .apply(&fleet(SUPPORT_FLEET), &ApplyOptions::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.shared.len(), 1);
    assert_eq!(report.shared[0].ref_count, 2);
}

#[tokio::test]
async fn test_prune_keeps_resource_attached_to_handmade_agent() {
    let (remote, reconciler) = setup();
    let cancel = CancellationToken::new();
    reconciler
        .apply(&fleet(SUPPORT_FLEET), &ApplyOptions::default(), &cancel)
        .await
        .unwrap();
    let mut fields = FieldMap::new();
    fields.insert("shared.block.kb".to_string(), json!(true));
    remote.insert_agent("X-manual", fields);

    let options = ApplyOptions {
        prune: true,
        ..ApplyOptions::default()
    };
    let report = reconciler
        .apply(&fleet("agents:\n  - name: A\n"), &options, &cancel)
        .await
        .unwrap();

    assert!(report.pruned.iter().any(|p| p.name == "B" && p.action == EntityAction::Deleted));
    assert!(!report.pruned.iter().any(|p| p.name == "kb"));
    assert!(remote.shared_resource(ResourceKind::Block, "kb").is_some());
}

#[tokio::test]
async fn test_scoped_apply_leaves_unreferenced_resources_alone() {
    let (remote, reconciler) = setup();
    let config = fleet(
        r#"
shared_blocks:
  - name: kb
    value: "Refunds are processed within 5 days."
  - name: notes
    value: "Unused for now."
agents:
  - name: A
    shared_blocks: [kb]
  - name: B
"#,
    );
    let options = ApplyOptions {
        selector: Selector::parse("A").unwrap(),
        ..ApplyOptions::default()
    };

    let report = reconciler.apply(&config, &options, &CancellationToken::new()).await.unwrap();

    assert!(remote.shared_resource(ResourceKind::Block, "kb").is_some());
    assert!(remote.shared_resource(ResourceKind::Block, "notes").is_none());
    assert_eq!(remote.calls().shared_upserts, 1);
    assert!(report.shared.iter().all(|s| s.name == "kb"));
}

#[tokio::test]
async fn test_unauthorized_on_unreferenced_resource_halts_apply() {
    let (remote, reconciler) = setup();
    remote.fail_shared_resource("notes", RemoteError::Unauthorized("token expired".to_string()));
    let config = fleet(
        r#"
shared_blocks:
  - name: notes
    value: "Unused for now."
agents:
  - name: A
"#,
    );

    let result = reconciler
        .apply(&config, &ApplyOptions::default(), &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(FleetError::Remote(RemoteError::Unauthorized(_)))));
}
