//! End-to-end promotion scenarios against the in-memory control plane.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{bundle, key, Harness};
use serde_json::json;
use stagecraft_audit::IntegrityVerifier;
use stagecraft_gateway::testing::FakeControlPlane;
use stagecraft_gateway::{ApiRequest, CallOutcome, CircuitState, Credential, EndpointClass, Transport};
use stagecraft_promotion::{PromotionConfig, PromotionError, PromotionRequest, StageOutcome};
use stagecraft_registry::{LineageStore, RegistryError, ResourceRegistry};
use stagecraft_saga::{FileJournal, InMemoryJournal};
use stagecraft_types::outcome::{EXIT_PARTIALLY_FAILED, EXIT_ROLLED_BACK, EXIT_VALIDATION};
use stagecraft_types::{
    ArtifactVersion, CapacityTier, ErrorKind, ResourceDescriptor, ResourceKind, ResourceState,
    RunId, RunStatus, Stage, StageLineage, StageOverride,
};
use tokio_util::sync::CancellationToken;

fn rejected(status: u16, code: &str) -> CallOutcome {
    CallOutcome::classify(status, json!({"errorCode": code, "message": code}))
}

#[tokio::test]
async fn test_repeat_promotion_makes_no_new_remote_calls() {
    let h = Harness::new();

    let first = h.orchestrator.promote(h.request(&["dev"])).await.unwrap();
    assert_eq!(first.status, RunStatus::Completed);
    assert_eq!(first.stages[0].created_count(), 3);
    let calls = h.plane.call_count();

    let second = h.orchestrator.promote(h.request(&["dev"])).await.unwrap();
    assert_eq!(second.status, RunStatus::Completed);
    assert_eq!(second.stages[0].created_count(), 0);
    assert_eq!(h.plane.call_count(), calls, "second run must not touch the remote");

    let ws = key(ResourceKind::Workspace, "alpha", "dev");
    assert_eq!(
        first.stages[0].resources[0].remote_id,
        second.stages[0].resources[0].remote_id
    );
    assert!(h.record(&ws).await.unwrap().is_created());
    assert_eq!(h.lineage.history(&bundle().version).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_failure_in_later_stage_rolls_back_only_that_stage() {
    let h = Harness::new();
    h.orchestrator.promote(h.request(&["dev"])).await.unwrap();

    // test's lakehouse goes through, prod's is rejected
    h.plane.inject_after(
        "create lakehouse",
        1,
        rejected(400, "InvalidDefinition"),
        None,
    );
    let report = h
        .orchestrator
        .promote(h.request(&["test", "prod"]))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::RolledBack);
    assert_eq!(report.exit_code(), EXIT_ROLLED_BACK);
    assert_eq!(report.stages[0].outcome, StageOutcome::Committed);
    assert_eq!(report.stages[1].outcome, StageOutcome::RolledBack);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].kind, ErrorKind::NonTransientRemote);

    // Only prod's workspace had been created, so only it is deleted
    assert_eq!(h.deletes(), vec!["delete workspace"]);
    let prod_ws = h.record(&key(ResourceKind::Workspace, "alpha", "prod")).await.unwrap();
    assert_eq!(prod_ws.state, ResourceState::Deleted);
    assert!(h
        .record(&key(ResourceKind::Lakehouse, "sales", "test"))
        .await
        .unwrap()
        .is_created());

    let stages: Vec<Stage> = h
        .lineage
        .history(&bundle().version)
        .await
        .unwrap()
        .into_iter()
        .map(|l| l.stage)
        .collect();
    assert_eq!(stages, vec![Stage::new("dev"), Stage::new("test")]);
}

#[tokio::test]
async fn test_circuit_opens_after_five_transient_failures() {
    let h = Harness::new();
    let class = EndpointClass::new("create", "lakehouse");
    h.plane
        .inject("create lakehouse", CallOutcome::transient("503"), Some(5));

    // Four sends exhaust the first call; the next failure trips the breaker
    let first = h.orchestrator.promote(h.request(&["dev"])).await.unwrap();
    assert_eq!(first.failures[0].kind, ErrorKind::TransientRemote);
    let second = h.orchestrator.promote(h.request(&["dev"])).await.unwrap();
    assert_eq!(second.failures[0].kind, ErrorKind::CircuitOpen);
    assert_eq!(h.plane.count_class("create lakehouse"), 5);
    assert_eq!(
        h.gateway.breakers().get(&class).unwrap().state(),
        CircuitState::Open
    );

    // Within the cool-down: refused without a network attempt
    let third = h.orchestrator.promote(h.request(&["dev"])).await.unwrap();
    assert_eq!(third.status, RunStatus::RolledBack);
    assert_eq!(third.failures[0].kind, ErrorKind::CircuitOpen);
    assert_eq!(h.plane.count_class("create lakehouse"), 5);

    // After the cool-down exactly one probe goes out and closes the circuit
    h.clock.advance(Duration::from_secs(60));
    let fourth = h.orchestrator.promote(h.request(&["dev"])).await.unwrap();
    assert_eq!(fourth.status, RunStatus::Completed);
    assert_eq!(h.plane.count_class("create lakehouse"), 6);
    assert_eq!(
        h.gateway.breakers().get(&class).unwrap().state(),
        CircuitState::Closed
    );
}

#[tokio::test]
async fn test_skipping_a_stage_is_rejected_without_remote_calls() {
    let h = Harness::new();

    let err = h
        .orchestrator
        .promote(h.request(&["test"]))
        .await
        .unwrap_err();

    assert!(matches!(err, PromotionError::StageLineageViolation { .. }));
    assert_eq!(err.kind(), ErrorKind::StageLineageViolation);
    assert_eq!(err.exit_code(), EXIT_VALIDATION);
    assert_eq!(h.plane.call_count(), 0);

    let gap = h
        .orchestrator
        .promote(h.request(&["dev", "prod"]))
        .await
        .unwrap_err();
    assert!(matches!(gap, PromotionError::NonContiguousStages(_)));
    assert_eq!(h.plane.call_count(), 0);
}

#[tokio::test]
async fn test_unsupported_tier_is_a_validation_error() {
    let h = Harness::new();
    let mut artifact = bundle();
    artifact.resources[1] = artifact.resources[1].clone().with_override(
        Stage::new("dev"),
        StageOverride {
            capacity_tier: Some(CapacityTier::Shared),
            ..Default::default()
        },
    );

    let err = h
        .orchestrator
        .promote(PromotionRequest::new(artifact, vec![Stage::new("dev")]))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnsupportedOnTier);
    assert_eq!(err.exit_code(), EXIT_VALIDATION);
    assert_eq!(h.plane.call_count(), 0);
    assert!(h.gateway.breakers().snapshots().is_empty());
}

#[tokio::test]
async fn test_run_rollback_compensates_in_reverse_order() {
    let h = Harness::new();
    let report = h.orchestrator.promote(h.request(&["dev"])).await.unwrap();
    assert_eq!(report.status, RunStatus::Completed);

    let rollback = h.orchestrator.rollback_run(report.run_id).await.unwrap();

    assert_eq!(rollback.status, RunStatus::RolledBack);
    assert_eq!(rollback.lineage_removed, 1);
    assert_eq!(
        h.deletes(),
        vec!["delete notebook", "delete lakehouse", "delete workspace"]
    );
    assert_eq!(h.plane.object_count(), 0);
    assert!(h.lineage.history(&bundle().version).await.unwrap().is_empty());
    assert_eq!(
        h.orchestrator.run(report.run_id).unwrap().status,
        RunStatus::RolledBack
    );

    // The version has to start from the first stage again
    assert!(h.orchestrator.promote(h.request(&["test"])).await.is_err());
}

#[tokio::test]
async fn test_failed_compensation_yields_partially_failed() {
    let h = Harness::new();
    h.plane
        .inject("create notebook", rejected(409, "ItemDisplayNameAlreadyInUse"), None);
    h.plane
        .inject("delete lakehouse", rejected(403, "InsufficientPrivileges"), None);

    let report = h.orchestrator.promote(h.request(&["dev"])).await.unwrap();

    assert_eq!(report.status, RunStatus::PartiallyFailed);
    assert_eq!(report.exit_code(), EXIT_PARTIALLY_FAILED);
    let kinds: Vec<ErrorKind> = report.failures.iter().map(|f| f.kind).collect();
    assert_eq!(
        kinds,
        vec![ErrorKind::NonTransientRemote, ErrorKind::CompensationFailed]
    );
    assert_eq!(
        report.failures[1].target,
        Some(key(ResourceKind::Lakehouse, "sales", "dev"))
    );
    // Rollback carried on to the workspace after the lakehouse failed
    assert_eq!(h.deletes(), vec!["delete lakehouse", "delete workspace"]);
    assert!(h.lineage.history(&bundle().version).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancelled_before_start_provisions_nothing() {
    let h = Harness::new();
    let token = CancellationToken::new();
    token.cancel();

    let report = h
        .orchestrator
        .promote_with_cancel(h.request(&["dev"]), token)
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::RolledBack);
    assert_eq!(report.failures[0].kind, ErrorKind::Cancelled);
    assert_eq!(h.plane.call_count(), 0);
}

/// Cancels the run once a call for `trigger` has gone through.
struct CancelAfter {
    plane: Arc<FakeControlPlane>,
    trigger: &'static str,
    token: CancellationToken,
}

#[async_trait]
impl Transport for CancelAfter {
    async fn send(&self, request: &ApiRequest, credential: &Credential) -> CallOutcome {
        let outcome = self.plane.send(request, credential).await;
        if request.endpoint_class.as_str() == self.trigger {
            self.token.cancel();
        }
        outcome
    }
}

#[tokio::test]
async fn test_cancellation_mid_stage_finishes_in_flight_call_then_rolls_back() {
    let plane = Arc::new(FakeControlPlane::new());
    let token = CancellationToken::new();
    let transport = Arc::new(CancelAfter {
        plane: plane.clone(),
        trigger: "create lakehouse",
        token: token.clone(),
    });
    let h = Harness::build(plane, transport, Arc::new(InMemoryJournal::new()));

    let report = h
        .orchestrator
        .promote_with_cancel(h.request(&["dev"]), token)
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::RolledBack);
    assert_eq!(report.failures[0].kind, ErrorKind::Cancelled);
    // The lakehouse create completed; the notebook was never attempted
    assert_eq!(h.plane.count_class("create lakehouse"), 1);
    assert_eq!(h.plane.count_class("create notebook"), 0);
    assert_eq!(h.deletes(), vec!["delete lakehouse", "delete workspace"]);
}

/// Holds the first `create workspace` call open for `delay`.
struct SlowWorkspace {
    plane: Arc<FakeControlPlane>,
    delay: Duration,
}

#[async_trait]
impl Transport for SlowWorkspace {
    async fn send(&self, request: &ApiRequest, credential: &Credential) -> CallOutcome {
        if request.endpoint_class.as_str() == "create workspace" {
            tokio::time::sleep(self.delay).await;
        }
        self.plane.send(request, credential).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_run_timeout_leaves_shared_token_alone() {
    let plane = Arc::new(FakeControlPlane::new());
    let transport = Arc::new(SlowWorkspace {
        plane: plane.clone(),
        delay: Duration::from_secs(5),
    });
    let config = PromotionConfig {
        run_timeout_secs: Some(1),
        ..PromotionConfig::default()
    };
    let h = Harness::assemble(
        plane,
        transport,
        Arc::new(InMemoryJournal::new()),
        ResourceRegistry::in_memory(),
        Arc::new(stagecraft_registry::InMemoryLineageStore::new()),
        config,
    );
    let shutdown = CancellationToken::new();

    let report = h
        .orchestrator
        .promote_with_cancel(h.request(&["dev"]), shutdown.clone())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::RolledBack);
    assert_eq!(report.failures[0].kind, ErrorKind::Cancelled);
    assert_eq!(h.deletes(), vec!["delete workspace"]);
    assert!(!shutdown.is_cancelled(), "timeout must only cancel its own run");
}

/// Reads fine, refuses every write.
struct ReadOnlyLineage;

#[async_trait]
impl LineageStore for ReadOnlyLineage {
    async fn append(&self, _lineage: StageLineage) -> stagecraft_registry::Result<()> {
        Err(RegistryError::Storage("disk full".to_string()))
    }

    async fn history(
        &self,
        _version: &ArtifactVersion,
    ) -> stagecraft_registry::Result<Vec<StageLineage>> {
        Ok(Vec::new())
    }

    async fn remove_run(&self, _run_id: RunId) -> stagecraft_registry::Result<usize> {
        Ok(0)
    }

    async fn all(&self) -> stagecraft_registry::Result<Vec<StageLineage>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_unrecorded_lineage_is_partial_failure() {
    let plane = Arc::new(FakeControlPlane::new());
    let h = Harness::assemble(
        plane.clone(),
        plane,
        Arc::new(InMemoryJournal::new()),
        ResourceRegistry::in_memory(),
        Arc::new(ReadOnlyLineage),
        PromotionConfig::default(),
    );

    let report = h
        .orchestrator
        .promote(h.request(&["dev", "test"]))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::PartiallyFailed);
    assert_eq!(report.exit_code(), EXIT_PARTIALLY_FAILED);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].kind, ErrorKind::Storage);
    // dev's resources stay; test is never started
    assert_eq!(report.stages.len(), 1);
    assert_eq!(report.stages[0].outcome, StageOutcome::Committed);
    assert!(h
        .record(&key(ResourceKind::Workspace, "alpha", "dev"))
        .await
        .unwrap()
        .is_created());
    assert!(h.deletes().is_empty());
}

#[tokio::test]
async fn test_plan_reports_actions_without_calling_out() {
    let h = Harness::new();

    let plan = h.orchestrator.plan(&h.request(&["dev"])).await.unwrap();
    assert_eq!(plan.creations(), 3);
    assert_eq!(h.plane.call_count(), 0);
    assert!(h.registry.list().await.unwrap().is_empty());

    h.orchestrator.promote(h.request(&["dev"])).await.unwrap();
    let replan = h.orchestrator.plan(&h.request(&["dev"])).await.unwrap();
    assert_eq!(replan.creations(), 0);

    let err = h.orchestrator.plan(&h.request(&["prod"])).await.unwrap_err();
    assert!(matches!(err, PromotionError::StageLineageViolation { .. }));
}

#[tokio::test]
async fn test_recover_rolls_back_transaction_left_by_crash() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("journal.jsonl");
    let plane = Arc::new(FakeControlPlane::new());
    let registry = stagecraft_registry::ResourceRegistry::in_memory();

    {
        // Dies after the first stage's workspace was created
        let journal = Arc::new(FileJournal::open(&path).await.unwrap());
        let h = Harness::build_with(plane.clone(), plane.clone(), journal.clone(), registry.clone());
        let manager = stagecraft_saga::TransactionManager::new(journal, h.audit.clone());
        let ctx = manager
            .begin(
                stagecraft_types::RunId::generate(),
                Some(Stage::new("dev")),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        let ws = key(ResourceKind::Workspace, "alpha", "dev");
        h.orchestrator
            .provisioner()
            .ensure(&ws, &stagecraft_types::ResourceSpec::new("alpha-dev"), ctx.as_ref())
            .await
            .unwrap();
        assert_eq!(plane.object_count(), 1);
    }

    let journal = Arc::new(FileJournal::open(&path).await.unwrap());
    let h = Harness::build_with(plane.clone(), plane.clone(), journal, registry);
    let reports = h.orchestrator.recover().await.unwrap();

    assert_eq!(reports.len(), 1);
    assert!(reports[0].is_clean());
    assert_eq!(plane.object_count(), 0);
    let ws = h.record(&key(ResourceKind::Workspace, "alpha", "dev")).await.unwrap();
    assert_eq!(ws.state, ResourceState::Deleted);
}

#[tokio::test]
async fn test_role_assignments_follow_their_workspace() {
    let h = Harness::new();
    let mut artifact = bundle();
    artifact.resources[0] = ResourceDescriptor::new(ResourceKind::Workspace, "alpha").with_role(
        stagecraft_types::RoleAssignment {
            principal: stagecraft_types::Principal {
                id: "data-engineers".into(),
                kind: stagecraft_types::PrincipalKind::Group,
            },
            role: stagecraft_types::WorkspaceRole::Contributor,
        },
    );

    let report = h
        .orchestrator
        .promote(PromotionRequest::new(artifact, vec![Stage::new("dev")]))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    let kinds: Vec<ResourceKind> = report.stages[0].resources.iter().map(|r| r.key.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ResourceKind::Workspace,
            ResourceKind::RoleAssignment,
            ResourceKind::Lakehouse,
            ResourceKind::Notebook,
        ]
    );
}

#[tokio::test]
async fn test_audit_trail_is_hash_chained() {
    let h = Harness::new();
    let report = h.orchestrator.promote(h.request(&["dev"])).await.unwrap();

    let events = h.audit.events_for_run(report.run_id);
    let states: Vec<&str> = events
        .iter()
        .filter(|e| matches!(e.body.scope, stagecraft_audit::EventScope::Run))
        .map(|e| e.to_state())
        .collect();
    assert_eq!(states, vec!["planned", "in_progress", "completed"]);

    let verification = IntegrityVerifier::verify_chain(&h.audit.events());
    assert!(verification.valid);
}
