use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthStatus {
    pub status: String,
}

/// Liveness indicator served on the health path. The process is healthy while it can answer.
#[must_use]
pub fn check() -> HealthStatus {
    HealthStatus {
        status: "healthy".to_string(),
    }
}
