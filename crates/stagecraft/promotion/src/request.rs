//! Promotion requests

use serde::{Deserialize, Serialize};
use stagecraft_registry::LineageStore;
use stagecraft_types::{ArtifactBundle, Stage, StageSequence};

use crate::error::{PromotionError, Result};

/// Promote `artifact` through `stages`, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionRequest {
    pub artifact: ArtifactBundle,
    /// Contiguous, ordered slice of the configured sequence
    pub stages: Vec<Stage>,
}

impl PromotionRequest {
    pub fn new(artifact: ArtifactBundle, stages: Vec<Stage>) -> Self {
        Self { artifact, stages }
    }

    /// Build a request that promotes from the first stage the version has not
    /// reached yet, through `target`.
    ///
    /// When `target` already has lineage the request re-applies just that stage.
    pub async fn to_stage(
        artifact: ArtifactBundle,
        target: &Stage,
        sequence: &StageSequence,
        lineage: &dyn LineageStore,
    ) -> Result<Self> {
        let target_index = sequence
            .index_of(target)
            .ok_or_else(|| PromotionError::UnknownStage(target.clone()))?;
        let history = lineage.history(&artifact.version).await?;

        let reached = |stage: &Stage| history.iter().any(|entry| &entry.stage == stage);
        let stages = if reached(target) {
            vec![target.clone()]
        } else {
            let start = sequence.stages()[..=target_index]
                .iter()
                .position(|s| !reached(s))
                .unwrap_or(target_index);
            sequence.stages()[start..=target_index].to_vec()
        };

        Ok(Self { artifact, stages })
    }

    pub fn first_stage(&self) -> Option<&Stage> {
        self.stages.first()
    }

    pub fn target_stage(&self) -> Option<&Stage> {
        self.stages.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stagecraft_registry::InMemoryLineageStore;
    use stagecraft_types::{RunId, StageLineage};

    fn bundle() -> ArtifactBundle {
        ArtifactBundle::new("1.4.0".parse().unwrap())
    }

    #[tokio::test]
    async fn test_to_stage_starts_after_last_promoted_stage() {
        let lineage = InMemoryLineageStore::new();
        let seq = StageSequence::default();

        let fresh = PromotionRequest::to_stage(bundle(), &Stage::new("test"), &seq, &lineage)
            .await
            .unwrap();
        assert_eq!(fresh.stages, vec![Stage::new("dev"), Stage::new("test")]);

        lineage
            .append(StageLineage {
                artifact_version: bundle().version,
                stage: Stage::new("dev"),
                promoted_at: Utc::now(),
                source_stage: None,
                run_id: RunId::generate(),
            })
            .await
            .unwrap();

        let next = PromotionRequest::to_stage(bundle(), &Stage::new("prod"), &seq, &lineage)
            .await
            .unwrap();
        assert_eq!(next.stages, vec![Stage::new("test"), Stage::new("prod")]);

        let again = PromotionRequest::to_stage(bundle(), &Stage::new("dev"), &seq, &lineage)
            .await
            .unwrap();
        assert_eq!(again.stages, vec![Stage::new("dev")]);
    }

    #[tokio::test]
    async fn test_to_stage_rejects_unknown_stage() {
        let lineage = InMemoryLineageStore::new();
        let err = PromotionRequest::to_stage(
            bundle(),
            &Stage::new("staging"),
            &StageSequence::default(),
            &lineage,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PromotionError::UnknownStage(_)));
    }
}
