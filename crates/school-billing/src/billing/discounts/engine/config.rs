use serde::{Deserialize, Serialize};

/// Evaluation defaults applied when a policy leaves a parameter unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub default_min_siblings: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_min_siblings: 2,
        }
    }
}
