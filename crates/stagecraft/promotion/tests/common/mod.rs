//! Shared fixture: a full engine wired to an in-memory control plane.

#![allow(dead_code)]

use std::sync::Arc;

use stagecraft_audit::MemoryAuditSink;
use stagecraft_gateway::testing::FakeControlPlane;
use stagecraft_gateway::{
    GatewayConfig, HttpMethod, ManualClock, ResilientGateway, StaticTokenProvider, Transport,
};
use stagecraft_promotion::{PromotionConfig, PromotionOrchestrator, PromotionRequest};
use stagecraft_provisioner::Provisioner;
use stagecraft_registry::{InMemoryLineageStore, LineageStore, ResourceRegistry};
use stagecraft_saga::{TransactionJournal, InMemoryJournal, TransactionManager};
use stagecraft_types::{
    ArtifactBundle, ResourceDescriptor, ResourceKey, ResourceKind, ResourceRecord, Stage,
};

pub struct Harness {
    pub plane: Arc<FakeControlPlane>,
    pub clock: Arc<ManualClock>,
    pub gateway: Arc<ResilientGateway>,
    pub registry: ResourceRegistry,
    pub lineage: Arc<dyn LineageStore>,
    pub audit: Arc<MemoryAuditSink>,
    pub orchestrator: PromotionOrchestrator,
}

impl Harness {
    pub fn new() -> Self {
        let plane = Arc::new(FakeControlPlane::new());
        Self::build(plane.clone(), plane, Arc::new(InMemoryJournal::new()))
    }

    /// Route calls through `transport` (which should wrap `plane`).
    pub fn build(
        plane: Arc<FakeControlPlane>,
        transport: Arc<dyn Transport>,
        journal: Arc<dyn TransactionJournal>,
    ) -> Self {
        Self::build_with(plane, transport, journal, ResourceRegistry::in_memory())
    }

    pub fn build_with(
        plane: Arc<FakeControlPlane>,
        transport: Arc<dyn Transport>,
        journal: Arc<dyn TransactionJournal>,
        registry: ResourceRegistry,
    ) -> Self {
        Self::assemble(
            plane,
            transport,
            journal,
            registry,
            Arc::new(InMemoryLineageStore::new()),
            PromotionConfig::default(),
        )
    }

    pub fn assemble(
        plane: Arc<FakeControlPlane>,
        transport: Arc<dyn Transport>,
        journal: Arc<dyn TransactionJournal>,
        registry: ResourceRegistry,
        lineage: Arc<dyn LineageStore>,
        config: PromotionConfig,
    ) -> Self {
        let clock = Arc::new(ManualClock::new());
        let gateway = Arc::new(ResilientGateway::new(
            transport,
            Arc::new(StaticTokenProvider::new("token")),
            clock.clone(),
            GatewayConfig::default(),
        ));
        let audit = Arc::new(MemoryAuditSink::new());
        let provisioner = Provisioner::new(gateway.clone(), registry.clone());
        let transactions = Arc::new(TransactionManager::new(journal, audit.clone()));
        let orchestrator = PromotionOrchestrator::new(
            config,
            provisioner,
            transactions,
            lineage.clone(),
            audit.clone(),
        );

        Self {
            plane,
            clock,
            gateway,
            registry,
            lineage,
            audit,
            orchestrator,
        }
    }

    pub fn request(&self, stages: &[&str]) -> PromotionRequest {
        PromotionRequest::new(bundle(), stages.iter().map(|s| Stage::new(*s)).collect())
    }

    pub fn posts(&self) -> usize {
        self.plane.count(HttpMethod::Post)
    }

    /// Endpoint classes of DELETE calls, in the order they were sent
    pub fn deletes(&self) -> Vec<String> {
        self.plane
            .requests()
            .iter()
            .filter(|r| r.method == HttpMethod::Delete)
            .map(|r| r.endpoint_class.to_string())
            .collect()
    }

    pub async fn record(&self, key: &ResourceKey) -> Option<ResourceRecord> {
        self.registry.get(key).await.unwrap()
    }
}

/// Version 1.0.0: workspace "alpha" holding a lakehouse and a notebook.
pub fn bundle() -> ArtifactBundle {
    ArtifactBundle::new("1.0.0".parse().unwrap())
        .with_resource(ResourceDescriptor::new(ResourceKind::Workspace, "alpha"))
        .with_resource(ResourceDescriptor::new(ResourceKind::Lakehouse, "sales").in_workspace("alpha"))
        .with_resource(ResourceDescriptor::new(ResourceKind::Notebook, "etl").in_workspace("alpha"))
}

pub fn key(kind: ResourceKind, name: &str, stage: &str) -> ResourceKey {
    ResourceKey::new(name, Stage::new(stage).environment(), kind)
}
