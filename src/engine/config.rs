//! Engine tuning knobs.

use serde::{Deserialize, Serialize};

use crate::approval::ExpiryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hard cap on nodes dispatched in one traversal; exceeding it is an
    /// engine-fatal error, not a workflow failure.
    pub max_steps: u32,
    /// Default iteration cap for loop nodes without `maxIterations`.
    pub max_loop_iterations: usize,
    /// Approval requests expire this many hours after creation.
    pub approval_timeout_hours: i64,
    pub approval_expiry_policy: ExpiryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: 500,
            max_loop_iterations: 1000,
            approval_timeout_hours: 72,
            approval_expiry_policy: ExpiryPolicy::ForceReject,
        }
    }
}
