//! Health checking for internal dependencies (store, DNS resolver).
//!
//! Metrics dashboards and statistics aggregation are explicitly out of scope
//! for this core; what's kept here is the lean health-check vocabulary —
//! readiness of the store backend and the DNS resolver at startup and on
//! demand, surfaced through [`HealthCheckManager`].

pub mod health;

use std::{
    collections::HashMap,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

pub use health::{HealthCheckConfig, HealthCheckManager};

/// Health status of a single component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Result of a single health check run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub component: String,
    pub status: HealthStatus,
    pub message: String,
    pub timestamp: u64,
    pub response_time: u64,
    pub details: HashMap<String, String>,
}

impl HealthCheck {
    pub fn new(component: String, status: HealthStatus, message: String) -> Self {
        Self {
            component,
            status,
            message,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            response_time: 0,
            details: HashMap::new(),
        }
    }

    pub fn with_response_time(mut self, response_time: Duration) -> Self {
        self.response_time = response_time.as_millis() as u64;
        self
    }

    pub fn with_detail(mut self, key: String, value: String) -> Self {
        self.details.insert(key, value);
        self
    }
}
