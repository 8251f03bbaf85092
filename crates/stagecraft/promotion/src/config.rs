//! Promotion configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use stagecraft_types::StageSequence;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionConfig {
    /// Ordered stage sequence; defaults to dev, test, prod
    pub stages: StageSequence,
    /// Cancel a run that is still going after this many seconds
    pub run_timeout_secs: Option<u64>,
}

impl PromotionConfig {
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            stages: StageSequence::default(),
            run_timeout_secs: None,
        }
    }
}
