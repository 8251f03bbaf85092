//! Provisioner - create-or-get of workspaces, items and role assignments
//!
//! Every mutating call follows the same sequence: validate, consult the
//! registry, register the compensation with the caller's [`OperationLog`],
//! then issue the remote call through the gateway and record the outcome.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stagecraft_gateway::RemoteApi;
use stagecraft_registry::{Lookup, Reservation, ResourceRegistry};
use stagecraft_types::{
    Compensation, CompensationExecutor, OperationFailure, OperationId, OperationKind,
    OperationLog, RemoteId, ResourceKey, ResourceKind, ResourceRecord, ResourceSpec,
    RoleAssignment,
};
use tracing::{debug, error, info, instrument, warn};

use crate::api;
use crate::error::{ProvisionError, Result};
use crate::validation::{validate_name, validate_spec};

/// Result of an ensure call
#[derive(Debug, Clone, PartialEq)]
pub struct Provisioned {
    pub record: ResourceRecord,
    /// `false` when the registry already held a Created record
    pub created: bool,
}

/// What an ensure call would do, without reserving or calling out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlannedAction {
    Create,
    Exists { remote_id: RemoteId },
}

/// Remote id of a resource and of its workspace, when both are live
type Location = (RemoteId, Option<RemoteId>);

#[derive(Clone)]
pub struct Provisioner {
    gateway: Arc<dyn RemoteApi>,
    registry: ResourceRegistry,
}

impl Provisioner {
    pub fn new(gateway: Arc<dyn RemoteApi>, registry: ResourceRegistry) -> Self {
        Self { gateway, registry }
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn gateway(&self) -> &Arc<dyn RemoteApi> {
        &self.gateway
    }

    /// Naming and tier checks only.
    pub fn validate(&self, key: &ResourceKey, spec: &ResourceSpec) -> Result<()> {
        validate_spec(key, spec)
    }

    /// Dry run of [`ensure`](Self::ensure): validation plus a registry read.
    pub async fn preview(&self, key: &ResourceKey, spec: &ResourceSpec) -> Result<PlannedAction> {
        validate_spec(key, spec)?;
        let existing = self.registry.get(key).await?;
        Ok(match existing.as_ref().and_then(|r| r.live_remote_id()) {
            Some(remote_id) => PlannedAction::Exists {
                remote_id: remote_id.clone(),
            },
            None => PlannedAction::Create,
        })
    }

    /// Create `key` unless the registry already holds it as Created.
    ///
    /// A repeated call with the same key returns the stored record and makes
    /// no remote call.
    #[instrument(skip(self, spec, log), fields(key = %key))]
    pub async fn ensure(
        &self,
        key: &ResourceKey,
        spec: &ResourceSpec,
        log: &dyn OperationLog,
    ) -> Result<Provisioned> {
        // 1. Validate before touching the registry or the network
        validate_spec(key, spec)?;

        // 2. Items need their workspace
        let parent_id = match &spec.parent {
            Some(parent) => Some(self.live_parent(key, parent).await?),
            None => None,
        };

        // 3. Idempotency gate; holds the per-key lock until commit/fail
        let reservation = match self.registry.get_or_reserve(key).await? {
            Lookup::Existing(record) => {
                debug!(remote_id = ?record.remote_id, "Already provisioned");
                return Ok(Provisioned {
                    record,
                    created: false,
                });
            }
            Lookup::Reserved(reservation) => reservation,
        };

        // 4. Compensation is on record before the create goes out
        let compensation = match &spec.parent {
            Some(parent) => Compensation::delete_item(key.clone(), parent.clone()),
            None => Compensation::delete(key.clone()),
        };
        let op_id = match self.write_ahead(log, OperationKind::Create, key, compensation).await {
            Ok(id) => id,
            Err(e) => {
                self.abandon(reservation, &e.to_string()).await;
                return Err(e);
            }
        };

        // 5. Forward action
        let request = api::create(key.kind, spec, parent_id.as_ref());
        let created = match self.gateway.call(request).await {
            Ok(response) => remote_id_of(key, &response.body),
            Err(e) => Err(ProvisionError::remote(key, spec.capacity_tier, e)),
        };

        match created {
            Ok(remote_id) => {
                let record = self.commit(reservation, remote_id, log, op_id, key).await?;
                log.complete(op_id, Ok(()))
                    .await
                    .map_err(ProvisionError::OperationLog)?;
                info!(remote_id = ?record.remote_id, "Resource created");
                Ok(Provisioned {
                    record,
                    created: true,
                })
            }
            Err(e) => {
                self.abandon(reservation, &e.to_string()).await;
                self.fail(log, op_id, key, &e).await;
                Err(e)
            }
        }
    }

    /// Patch display name and description, recording the previous values as
    /// the compensation.
    #[instrument(skip(self, spec, log), fields(key = %key))]
    pub async fn update(
        &self,
        key: &ResourceKey,
        spec: &ResourceSpec,
        log: &dyn OperationLog,
    ) -> Result<ResourceRecord> {
        validate_spec(key, spec)?;
        let (id, parent_id) = self
            .locate(key, spec.parent.as_ref())
            .await?
            .ok_or_else(|| ProvisionError::NotProvisioned(key.clone()))?;

        let current = match self
            .gateway
            .call(api::get(key.kind, &id, parent_id.as_ref()))
            .await
        {
            Ok(response) => response.body,
            Err(e) if e.is_not_found() => {
                self.registry.mark_deleted(key).await?;
                return Err(ProvisionError::NotProvisioned(key.clone()));
            }
            Err(e) => return Err(ProvisionError::remote(key, spec.capacity_tier, e)),
        };

        let compensation = Compensation::RestoreProperties {
            key: key.clone(),
            parent: spec.parent.clone(),
            display_name: current
                .get("displayName")
                .and_then(Value::as_str)
                .unwrap_or(&spec.display_name)
                .to_string(),
            description: current
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
        };
        let op_id = self
            .write_ahead(log, OperationKind::Update, key, compensation)
            .await?;

        let body = api::update_body(&spec.display_name, spec.description.as_deref());
        match self
            .gateway
            .call(api::update(key.kind, &id, parent_id.as_ref(), body))
            .await
        {
            Ok(_) => {
                let record = self.registry.touch(key).await?;
                log.complete(op_id, Ok(()))
                    .await
                    .map_err(ProvisionError::OperationLog)?;
                info!("Resource updated");
                Ok(record)
            }
            Err(e) => {
                let e = ProvisionError::remote(key, spec.capacity_tier, e);
                self.fail(log, op_id, key, &e).await;
                Err(e)
            }
        }
    }

    /// Grant `assignment` on `workspace`. Tracked in the registry so a repeat
    /// is a no-op.
    #[instrument(skip(self, assignment, log), fields(workspace = %workspace, principal = %assignment.principal.id))]
    pub async fn assign_role(
        &self,
        workspace: &ResourceKey,
        assignment: &RoleAssignment,
        log: &dyn OperationLog,
    ) -> Result<Provisioned> {
        validate_name(&assignment.principal.id)?;
        let key = role_key(workspace, assignment);
        let workspace_id = self.live_parent(&key, workspace).await?;

        let reservation = match self.registry.get_or_reserve(&key).await? {
            Lookup::Existing(record) => {
                return Ok(Provisioned {
                    record,
                    created: false,
                })
            }
            Lookup::Reserved(reservation) => reservation,
        };

        let compensation = Compensation::RemoveRoleAssignment {
            workspace: workspace.clone(),
            assignment: key.clone(),
            principal_id: assignment.principal.id.clone(),
        };
        let op_id = match self.write_ahead(log, OperationKind::Assign, &key, compensation).await {
            Ok(id) => id,
            Err(e) => {
                self.abandon(reservation, &e.to_string()).await;
                return Err(e);
            }
        };

        let assigned = match self
            .gateway
            .call(api::assign_role(&workspace_id, assignment))
            .await
        {
            Ok(response) => remote_id_of(&key, &response.body),
            Err(e) => Err(ProvisionError::Remote {
                key: key.clone(),
                source: e,
            }),
        };

        match assigned {
            Ok(remote_id) => {
                let record = self.commit(reservation, remote_id, log, op_id, &key).await?;
                log.complete(op_id, Ok(()))
                    .await
                    .map_err(ProvisionError::OperationLog)?;
                info!(role = %assignment.role, "Role assigned");
                Ok(Provisioned {
                    record,
                    created: true,
                })
            }
            Err(e) => {
                self.abandon(reservation, &e.to_string()).await;
                self.fail(log, op_id, &key, &e).await;
                Err(e)
            }
        }
    }

    /// Explicitly delete a resource. Irreversible: registered with no
    /// compensation. Returns `false` when there was nothing to delete.
    ///
    /// Tearing down a workspace does not touch the registry records of its
    /// items; [`verify`](Self::verify) reconciles them.
    #[instrument(skip(self, log), fields(key = %key))]
    pub async fn teardown(
        &self,
        key: &ResourceKey,
        parent: Option<&ResourceKey>,
        log: &dyn OperationLog,
    ) -> Result<bool> {
        let Some((id, parent_id)) = self.locate(key, parent).await? else {
            debug!("Nothing to tear down");
            return Ok(false);
        };

        let op_id = self
            .write_ahead(log, OperationKind::Delete, key, Compensation::None)
            .await?;

        match self
            .gateway
            .call(api::delete(key.kind, &id, parent_id.as_ref()))
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_not_found() => debug!("Already gone remotely"),
            Err(e) => {
                let e = ProvisionError::Remote {
                    key: key.clone(),
                    source: e,
                };
                self.fail(log, op_id, key, &e).await;
                return Err(e);
            }
        }

        self.registry.mark_deleted(key).await?;
        log.complete(op_id, Ok(()))
            .await
            .map_err(ProvisionError::OperationLog)?;
        info!("Resource torn down");
        Ok(true)
    }

    /// Check a Created record against the remote. Refreshes `last_seen_at`,
    /// or marks the record Deleted when the resource is gone.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn verify(
        &self,
        key: &ResourceKey,
        parent: Option<&ResourceKey>,
    ) -> Result<Option<ResourceRecord>> {
        let known = self.registry.get(key).await?;
        if !known.as_ref().is_some_and(ResourceRecord::is_created) {
            return Ok(None);
        }

        let Some((id, parent_id)) = self.locate(key, parent).await? else {
            warn!("Workspace is gone, marking item deleted");
            self.registry.mark_deleted(key).await?;
            return Ok(None);
        };

        match self
            .gateway
            .call(api::get(key.kind, &id, parent_id.as_ref()))
            .await
        {
            Ok(_) => Ok(Some(self.registry.touch(key).await?)),
            Err(e) if e.is_not_found() => {
                warn!("Resource missing remotely, marking deleted");
                self.registry.mark_deleted(key).await?;
                Ok(None)
            }
            Err(e) => Err(ProvisionError::Remote {
                key: key.clone(),
                source: e,
            }),
        }
    }

    async fn write_ahead(
        &self,
        log: &dyn OperationLog,
        kind: OperationKind,
        key: &ResourceKey,
        compensation: Compensation,
    ) -> Result<OperationId> {
        let id = log
            .register(kind, key, compensation)
            .await
            .map_err(ProvisionError::OperationLog)?;
        log.begin(id).await.map_err(ProvisionError::OperationLog)?;
        Ok(id)
    }

    async fn fail(
        &self,
        log: &dyn OperationLog,
        op_id: OperationId,
        key: &ResourceKey,
        error: &ProvisionError,
    ) {
        let failure = error.to_failure(key).with_operation(op_id);
        if let Err(e) = log.complete(op_id, Err(&failure)).await {
            warn!(operation_id = %op_id, error = %e, "Failed to record forward failure");
        }
    }

    /// Pending -> Created after a successful remote call. A failure here
    /// leaves a remote resource the registry does not know about.
    async fn commit(
        &self,
        reservation: Reservation,
        remote_id: RemoteId,
        log: &dyn OperationLog,
        op_id: OperationId,
        key: &ResourceKey,
    ) -> Result<ResourceRecord> {
        match self.registry.commit(reservation, remote_id.clone()).await {
            Ok(record) => Ok(record),
            Err(e) => {
                error!(
                    key = %key,
                    remote_id = %remote_id,
                    error = %e,
                    "Created remotely but not recorded; the resource may be orphaned"
                );
                let e = ProvisionError::from(e);
                self.fail(log, op_id, key, &e).await;
                Err(e)
            }
        }
    }

    async fn abandon(&self, reservation: Reservation, reason: &str) {
        let key = reservation.key().clone();
        if let Err(e) = self.registry.mark_failed(reservation, reason).await {
            warn!(key = %key, error = %e, "Failed to mark reservation failed");
        }
    }

    async fn live_parent(&self, key: &ResourceKey, parent: &ResourceKey) -> Result<RemoteId> {
        self.registry
            .get(parent)
            .await?
            .and_then(|r| r.live_remote_id().cloned())
            .ok_or_else(|| ProvisionError::MissingParent {
                key: key.clone(),
                parent: parent.clone(),
            })
    }

    /// `None` when the resource, or the workspace it lives in, is not live.
    async fn locate(
        &self,
        key: &ResourceKey,
        parent: Option<&ResourceKey>,
    ) -> Result<Option<Location>> {
        let nested = key.kind != ResourceKind::Workspace;
        if nested && parent.is_none() {
            return Err(ProvisionError::InvalidSpec {
                key: key.clone(),
                reason: "nested resource addressed without its workspace".into(),
            });
        }

        let Some(id) = self
            .registry
            .get(key)
            .await?
            .and_then(|r| r.live_remote_id().cloned())
        else {
            return Ok(None);
        };

        let parent_id = match parent {
            Some(parent) if nested => {
                match self
                    .registry
                    .get(parent)
                    .await?
                    .and_then(|r| r.live_remote_id().cloned())
                {
                    Some(parent_id) => Some(parent_id),
                    None => return Ok(None),
                }
            }
            _ => None,
        };
        Ok(Some((id, parent_id)))
    }

    async fn compensate_delete(&self, key: &ResourceKey, parent: Option<&ResourceKey>) -> Result<()> {
        let known = self.registry.get(key).await?;
        if !known.as_ref().is_some_and(ResourceRecord::is_created) {
            debug!(key = %key, "Never created, nothing to undo");
            return Ok(());
        }

        let Some((id, parent_id)) = self.locate(key, parent).await? else {
            // Removed along with its workspace
            self.registry.mark_deleted(key).await?;
            return Ok(());
        };

        match self
            .gateway
            .call(api::delete(key.kind, &id, parent_id.as_ref()))
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_not_found() => debug!(key = %key, "Already gone remotely"),
            Err(e) => {
                return Err(ProvisionError::Remote {
                    key: key.clone(),
                    source: e,
                })
            }
        }
        self.registry.mark_deleted(key).await?;
        info!(key = %key, "Compensated: deleted");
        Ok(())
    }

    async fn restore_properties(
        &self,
        key: &ResourceKey,
        parent: Option<&ResourceKey>,
        display_name: &str,
        description: Option<&str>,
    ) -> Result<()> {
        let Some((id, parent_id)) = self.locate(key, parent).await? else {
            return Ok(());
        };
        let body = api::update_body(display_name, description);
        match self
            .gateway
            .call(api::update(key.kind, &id, parent_id.as_ref(), body))
            .await
        {
            Ok(_) => {
                info!(key = %key, "Compensated: properties restored");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                self.registry.mark_deleted(key).await?;
                Ok(())
            }
            Err(e) => Err(ProvisionError::Remote {
                key: key.clone(),
                source: e,
            }),
        }
    }
}

#[async_trait]
impl CompensationExecutor for Provisioner {
    async fn compensate(&self, compensation: &Compensation) -> std::result::Result<(), OperationFailure> {
        match compensation {
            Compensation::DeleteResource { key, parent } => self
                .compensate_delete(key, parent.as_ref())
                .await
                .map_err(|e| e.to_failure(key)),
            Compensation::RemoveRoleAssignment {
                workspace,
                assignment,
                ..
            } => self
                .compensate_delete(assignment, Some(workspace))
                .await
                .map_err(|e| e.to_failure(assignment)),
            Compensation::RestoreProperties {
                key,
                parent,
                display_name,
                description,
            } => self
                .restore_properties(key, parent.as_ref(), display_name, description.as_deref())
                .await
                .map_err(|e| e.to_failure(key)),
            Compensation::None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("registry", &self.registry)
            .finish()
    }
}

/// Registry key tracking a role assignment on a workspace
pub fn role_key(workspace: &ResourceKey, assignment: &RoleAssignment) -> ResourceKey {
    ResourceKey::new(
        assignment.logical_name(&workspace.logical_name),
        workspace.environment.clone(),
        ResourceKind::RoleAssignment,
    )
}

fn remote_id_of(key: &ResourceKey, body: &Value) -> Result<RemoteId> {
    body.get("id")
        .and_then(Value::as_str)
        .map(RemoteId::new)
        .ok_or_else(|| ProvisionError::MalformedResponse {
            key: key.clone(),
            detail: "response has no id".into(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use stagecraft_gateway::testing::FakeControlPlane;
    use stagecraft_gateway::{
        CallOutcome, EndpointClass, GatewayConfig, HttpMethod, ManualClock, ResilientGateway,
        StaticTokenProvider,
    };
    use stagecraft_types::{
        CapacityTier, Environment, ErrorKind, Principal, PrincipalKind, ResourceState,
        WorkspaceRole,
    };

    /// Operation log that remembers how many remote calls had been made when
    /// each step was recorded.
    struct RecordingLog {
        plane: Arc<FakeControlPlane>,
        events: Mutex<Vec<(String, OperationKind, Compensation, usize)>>,
        ids: Mutex<Vec<OperationId>>,
    }

    impl RecordingLog {
        fn new(plane: Arc<FakeControlPlane>) -> Self {
            Self {
                plane,
                events: Mutex::new(Vec::new()),
                ids: Mutex::new(Vec::new()),
            }
        }

        fn steps(&self) -> Vec<String> {
            self.events.lock().iter().map(|e| e.0.clone()).collect()
        }

        fn compensations(&self) -> Vec<Compensation> {
            self.events
                .lock()
                .iter()
                .filter(|e| e.0 == "register")
                .map(|e| e.2.clone())
                .collect()
        }
    }

    #[async_trait]
    impl OperationLog for RecordingLog {
        async fn register(
            &self,
            kind: OperationKind,
            _target: &ResourceKey,
            compensation: Compensation,
        ) -> std::result::Result<OperationId, OperationFailure> {
            let id = OperationId::generate();
            self.ids.lock().push(id);
            self.events.lock().push((
                "register".into(),
                kind,
                compensation,
                self.plane.call_count(),
            ));
            Ok(id)
        }

        async fn begin(&self, _id: OperationId) -> std::result::Result<(), OperationFailure> {
            self.events.lock().push((
                "begin".into(),
                OperationKind::Create,
                Compensation::None,
                self.plane.call_count(),
            ));
            Ok(())
        }

        async fn complete(
            &self,
            _id: OperationId,
            outcome: std::result::Result<(), &OperationFailure>,
        ) -> std::result::Result<(), OperationFailure> {
            let step = if outcome.is_ok() { "committed" } else { "failed" };
            self.events.lock().push((
                step.into(),
                OperationKind::Create,
                Compensation::None,
                self.plane.call_count(),
            ));
            Ok(())
        }
    }

    struct Fixture {
        plane: Arc<FakeControlPlane>,
        gateway: Arc<ResilientGateway>,
        provisioner: Provisioner,
        log: RecordingLog,
    }

    fn fixture() -> Fixture {
        let plane = Arc::new(FakeControlPlane::new());
        let gateway = Arc::new(ResilientGateway::new(
            plane.clone(),
            Arc::new(StaticTokenProvider::new("token")),
            Arc::new(ManualClock::new()),
            GatewayConfig::default(),
        ));
        let provisioner = Provisioner::new(gateway.clone(), ResourceRegistry::in_memory());
        let log = RecordingLog::new(plane.clone());
        Fixture {
            plane,
            gateway,
            provisioner,
            log,
        }
    }

    fn dev() -> Environment {
        Environment::new("dev")
    }

    async fn workspace(f: &Fixture, name: &str) -> ResourceKey {
        let key = ResourceKey::workspace(name, dev());
        f.provisioner
            .ensure(&key, &ResourceSpec::new(name), &f.log)
            .await
            .unwrap();
        key
    }

    fn item_spec(name: &str, parent: &ResourceKey) -> ResourceSpec {
        ResourceSpec::new(name).with_parent(parent.clone())
    }

    #[tokio::test]
    async fn test_ensure_twice_creates_once() {
        let f = fixture();
        let key = ResourceKey::workspace("alpha-dev", dev());
        let spec = ResourceSpec::new("alpha-dev");

        let first = f.provisioner.ensure(&key, &spec, &f.log).await.unwrap();
        let calls = f.plane.call_count();
        let second = f.provisioner.ensure(&key, &spec, &f.log).await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.record, second.record);
        assert_eq!(f.plane.call_count(), calls);
        assert_eq!(f.plane.count(HttpMethod::Post), 1);
        // Only the first call registered an operation
        assert_eq!(f.log.steps(), vec!["register", "begin", "committed"]);
    }

    #[tokio::test]
    async fn test_compensation_registered_before_create_call() {
        let f = fixture();
        let ws = workspace(&f, "ws").await;
        let before = f.plane.call_count();

        let key = ResourceKey::new("sales", dev(), ResourceKind::Lakehouse);
        f.provisioner
            .ensure(&key, &item_spec("sales", &ws), &f.log)
            .await
            .unwrap();

        let events = f.log.events.lock().clone();
        let register = &events[3];
        assert_eq!(register.0, "register");
        assert_eq!(register.3, before, "no remote call before registration");
        assert_eq!(register.2, Compensation::delete_item(key.clone(), ws.clone()));
        assert_eq!(events[5].3, before + 1);
        assert!(f
            .plane
            .object_paths()
            .iter()
            .any(|p| p.contains("/lakehouses/")));
    }

    #[tokio::test]
    async fn test_unsupported_tier_makes_no_call_and_leaves_breaker_alone() {
        let f = fixture();
        let ws = workspace(&f, "ws").await;
        let calls = f.plane.call_count();

        let key = ResourceKey::new("lh", dev(), ResourceKind::Lakehouse);
        let spec = item_spec("lh", &ws).with_tier(CapacityTier::Shared);
        let err = f.provisioner.ensure(&key, &spec, &f.log).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UnsupportedOnTier);
        assert_eq!(f.plane.call_count(), calls);
        assert!(f
            .gateway
            .breakers()
            .get(&EndpointClass::new("create", "lakehouse"))
            .is_none());
        assert!(f.provisioner.registry().get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remote_capacity_rejection_is_unsupported_on_tier() {
        let f = fixture();
        let ws = workspace(&f, "ws").await;
        f.plane.inject(
            "create warehouse",
            CallOutcome::classify(
                403,
                json!({"errorCode": "UnsupportedCapacitySKU", "message": "trial"}),
            ),
            None,
        );

        let key = ResourceKey::new("wh", dev(), ResourceKind::Warehouse);
        let spec = item_spec("wh", &ws).with_tier(CapacityTier::Trial);
        let err = f.provisioner.ensure(&key, &spec, &f.log).await.unwrap_err();

        assert!(matches!(err, ProvisionError::UnsupportedOnTier { .. }));
        assert_eq!(f.plane.count_class("create warehouse"), 1);
        let record = f.provisioner.registry().get(&key).await.unwrap().unwrap();
        assert!(matches!(record.state, ResourceState::Failed { .. }));
        assert_eq!(f.log.steps().last().map(String::as_str), Some("failed"));
    }

    #[tokio::test]
    async fn test_missing_parent_is_rejected_before_any_call() {
        let f = fixture();
        let ws = ResourceKey::workspace("absent", dev());
        let key = ResourceKey::new("nb", dev(), ResourceKind::Notebook);

        let err = f
            .provisioner
            .ensure(&key, &item_spec("nb", &ws), &f.log)
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::MissingParent { .. }));
        assert_eq!(f.plane.call_count(), 0);
        assert!(f.log.steps().is_empty());
    }

    #[tokio::test]
    async fn test_failed_create_can_be_retried() {
        let f = fixture();
        let ws = workspace(&f, "ws").await;
        f.plane
            .inject("create notebook", CallOutcome::transient("503"), Some(4));

        let key = ResourceKey::new("nb", dev(), ResourceKind::Notebook);
        let spec = item_spec("nb", &ws);
        let err = f.provisioner.ensure(&key, &spec, &f.log).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientRemote);

        let retried = f.provisioner.ensure(&key, &spec, &f.log).await.unwrap();
        assert!(retried.created);
        assert!(retried.record.is_created());
    }

    #[tokio::test]
    async fn test_compensation_deletes_created_item() {
        let f = fixture();
        let ws = workspace(&f, "ws").await;
        let key = ResourceKey::new("sales", dev(), ResourceKind::Lakehouse);
        let made = f
            .provisioner
            .ensure(&key, &item_spec("sales", &ws), &f.log)
            .await
            .unwrap();
        let remote = made.record.remote_id.clone().unwrap();

        f.provisioner
            .compensate(&Compensation::delete_item(key.clone(), ws.clone()))
            .await
            .unwrap();

        assert!(f.plane.find(remote.as_str()).is_none());
        let record = f.provisioner.registry().get(&key).await.unwrap().unwrap();
        assert_eq!(record.state, ResourceState::Deleted);
    }

    #[tokio::test]
    async fn test_compensating_a_never_created_resource_is_a_no_op() {
        let f = fixture();
        let key = ResourceKey::workspace("ghost", dev());

        f.provisioner
            .compensate(&Compensation::delete(key))
            .await
            .unwrap();
        assert_eq!(f.plane.call_count(), 0);
    }

    #[tokio::test]
    async fn test_compensation_treats_missing_remote_as_deleted() {
        let f = fixture();
        let ws = workspace(&f, "ws").await;
        let remote = f
            .provisioner
            .registry()
            .get(&ws)
            .await
            .unwrap()
            .and_then(|r| r.remote_id)
            .unwrap();
        assert!(f.plane.delete_out_of_band(remote.as_str()));

        f.provisioner
            .compensate(&Compensation::delete(ws.clone()))
            .await
            .unwrap();
        let record = f.provisioner.registry().get(&ws).await.unwrap().unwrap();
        assert_eq!(record.state, ResourceState::Deleted);
    }

    #[tokio::test]
    async fn test_verify_detects_out_of_band_deletion() {
        let f = fixture();
        let ws = workspace(&f, "ws").await;
        assert!(f.provisioner.verify(&ws, None).await.unwrap().is_some());

        let remote = f
            .provisioner
            .registry()
            .get(&ws)
            .await
            .unwrap()
            .and_then(|r| r.remote_id)
            .unwrap();
        f.plane.delete_out_of_band(remote.as_str());

        assert!(f.provisioner.verify(&ws, None).await.unwrap().is_none());
        let again = f
            .provisioner
            .ensure(&ws, &ResourceSpec::new("ws"), &f.log)
            .await
            .unwrap();
        assert!(again.created);
    }

    #[tokio::test]
    async fn test_assign_role_is_idempotent_and_revocable() {
        let f = fixture();
        let ws = workspace(&f, "ws").await;
        let assignment = RoleAssignment {
            principal: Principal {
                id: "3f2a9c1e".into(),
                kind: PrincipalKind::Group,
            },
            role: WorkspaceRole::Contributor,
        };

        let first = f.provisioner.assign_role(&ws, &assignment, &f.log).await.unwrap();
        let second = f.provisioner.assign_role(&ws, &assignment, &f.log).await.unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(f.plane.count_class("assign role_assignment"), 1);

        let compensation = f.log.compensations().pop().unwrap();
        assert!(matches!(compensation, Compensation::RemoveRoleAssignment { .. }));
        f.provisioner.compensate(&compensation).await.unwrap();

        assert_eq!(f.plane.count_class("delete role_assignment"), 1);
        let record = f
            .provisioner
            .registry()
            .get(&role_key(&ws, &assignment))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.state, ResourceState::Deleted);
    }

    #[tokio::test]
    async fn test_update_compensation_restores_previous_name() {
        let f = fixture();
        let ws = workspace(&f, "ws").await;
        let key = ResourceKey::new("model", dev(), ResourceKind::SemanticModel);
        let made = f
            .provisioner
            .ensure(&key, &item_spec("Model v1", &ws), &f.log)
            .await
            .unwrap();
        let remote = made.record.remote_id.unwrap();

        f.provisioner
            .update(&key, &item_spec("Model v2", &ws), &f.log)
            .await
            .unwrap();
        assert_eq!(f.plane.find(remote.as_str()).unwrap()["displayName"], "Model v2");

        let compensation = f.log.compensations().pop().unwrap();
        f.provisioner.compensate(&compensation).await.unwrap();
        assert_eq!(f.plane.find(remote.as_str()).unwrap()["displayName"], "Model v1");
    }

    #[tokio::test]
    async fn test_teardown_registers_irreversible_delete() {
        let f = fixture();
        let ws = workspace(&f, "ws").await;

        assert!(f.provisioner.teardown(&ws, None, &f.log).await.unwrap());
        assert_eq!(f.log.compensations().last(), Some(&Compensation::None));
        assert!(!f.provisioner.teardown(&ws, None, &f.log).await.unwrap());
        assert_eq!(f.plane.object_count(), 0);
    }
}
