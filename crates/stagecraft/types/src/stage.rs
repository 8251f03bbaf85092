//! Promotion stages and lineage

use crate::ids::RunId;
use crate::resource::Environment;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One environment step in the promotion sequence (e.g. dev, test, prod)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Stage(String);

impl Stage {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Environment that resources promoted to this stage live in
    pub fn environment(&self) -> Environment {
        Environment::new(self.0.clone())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Stage {
    fn from(s: String) -> Self {
        Stage::new(s)
    }
}

impl From<Stage> for String {
    fn from(stage: Stage) -> Self {
        stage.0
    }
}

impl From<&str> for Stage {
    fn from(s: &str) -> Self {
        Stage::new(s)
    }
}

/// Errors building a stage sequence
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageSequenceError {
    #[error("stage sequence is empty")]
    Empty,

    #[error("stage {0} appears more than once")]
    Duplicate(Stage),
}

/// Configured, strictly ordered stage sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Stage>", into = "Vec<Stage>")]
pub struct StageSequence {
    stages: Vec<Stage>,
}

impl StageSequence {
    pub fn new(stages: Vec<Stage>) -> Result<Self, StageSequenceError> {
        if stages.is_empty() {
            return Err(StageSequenceError::Empty);
        }
        for (i, stage) in stages.iter().enumerate() {
            if stages[..i].contains(stage) {
                return Err(StageSequenceError::Duplicate(stage.clone()));
            }
        }
        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn first(&self) -> &Stage {
        &self.stages[0]
    }

    pub fn index_of(&self, stage: &Stage) -> Option<usize> {
        self.stages.iter().position(|s| s == stage)
    }

    pub fn contains(&self, stage: &Stage) -> bool {
        self.index_of(stage).is_some()
    }

    /// Stage that must hold lineage before `stage` can be promoted to
    pub fn predecessor(&self, stage: &Stage) -> Option<&Stage> {
        match self.index_of(stage) {
            Some(i) if i > 0 => self.stages.get(i - 1),
            _ => None,
        }
    }

    pub fn successor(&self, stage: &Stage) -> Option<&Stage> {
        self.index_of(stage).and_then(|i| self.stages.get(i + 1))
    }

    /// Inclusive slice of the sequence between two stages
    pub fn range(&self, from: &Stage, to: &Stage) -> Option<&[Stage]> {
        let start = self.index_of(from)?;
        let end = self.index_of(to)?;
        if start > end {
            return None;
        }
        Some(&self.stages[start..=end])
    }
}

impl Default for StageSequence {
    fn default() -> Self {
        Self {
            stages: vec![Stage::new("dev"), Stage::new("test"), Stage::new("prod")],
        }
    }
}

impl TryFrom<Vec<Stage>> for StageSequence {
    type Error = StageSequenceError;

    fn try_from(stages: Vec<Stage>) -> Result<Self, Self::Error> {
        StageSequence::new(stages)
    }
}

impl From<StageSequence> for Vec<Stage> {
    fn from(seq: StageSequence) -> Self {
        seq.stages
    }
}

/// Version of an artifact bundle being promoted
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactVersion(semver::Version);

impl ArtifactVersion {
    pub fn new(version: semver::Version) -> Self {
        Self(version)
    }

    pub fn as_semver(&self) -> &semver::Version {
        &self.0
    }
}

impl fmt::Display for ArtifactVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl std::str::FromStr for ArtifactVersion {
    type Err = semver::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        semver::Version::parse(s.strip_prefix('v').unwrap_or(s)).map(Self)
    }
}

/// Record of a successful promotion of one version to one stage.
///
/// Per version these form a strictly increasing chain over the stage sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageLineage {
    pub artifact_version: ArtifactVersion,
    pub stage: Stage,
    pub promoted_at: DateTime<Utc>,
    pub source_stage: Option<Stage>,
    pub run_id: RunId,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq() -> StageSequence {
        StageSequence::default()
    }

    #[test]
    fn test_predecessor_and_successor() {
        let seq = seq();
        assert_eq!(seq.predecessor(&Stage::new("dev")), None);
        assert_eq!(seq.predecessor(&Stage::new("test")), Some(&Stage::new("dev")));
        assert_eq!(seq.successor(&Stage::new("test")), Some(&Stage::new("prod")));
        assert_eq!(seq.successor(&Stage::new("prod")), None);
    }

    #[test]
    fn test_range_is_inclusive_and_ordered() {
        let seq = seq();
        let range = seq.range(&Stage::new("test"), &Stage::new("prod")).unwrap();
        assert_eq!(range, &[Stage::new("test"), Stage::new("prod")]);
        assert!(seq.range(&Stage::new("prod"), &Stage::new("dev")).is_none());
    }

    #[test]
    fn test_sequence_rejects_duplicates() {
        let err = StageSequence::new(vec![Stage::new("dev"), Stage::new("DEV")]).unwrap_err();
        assert_eq!(err, StageSequenceError::Duplicate(Stage::new("dev")));
        assert_eq!(StageSequence::new(vec![]).unwrap_err(), StageSequenceError::Empty);
    }

    #[test]
    fn test_artifact_version_accepts_v_prefix() {
        let v: ArtifactVersion = "v1.2.3".parse().unwrap();
        assert_eq!(v.to_string(), "v1.2.3");
    }
}
