//! Core configuration for strata-nla-core.

use serde::{Deserialize, Serialize};

/// Evaluation tuning shared by every stack an engine evaluates.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Initial number of channel slots reserved per snapshot.
    pub snapshot_capacity: usize,

    /// Maximum nesting of meta/transition strips followed during one strip
    /// evaluation. Deeper nesting is truncated the same way a self reference is.
    pub max_strip_depth: usize,

    /// Tolerance for the "is this exactly zero/one" checks in the blend algebra.
    pub float_epsilon: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            snapshot_capacity: 16,
            max_strip_depth: 64,
            float_epsilon: f32::EPSILON,
        }
    }
}
