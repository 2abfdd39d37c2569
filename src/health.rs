//! Health check module
//! Provides health status for the application and its storage backend

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info};

use crate::database::CommerceStore;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone)]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
pub enum ComponentState {
    Up,
    Down,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }
}

/// Health checker for the application
#[derive(Clone)]
pub struct HealthChecker {
    store: Arc<dyn CommerceStore>,
    probe_timeout: Duration,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn CommerceStore>) -> Self {
        Self {
            store,
            probe_timeout: Duration::from_secs(5),
        }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();
        let component = format!("storage:{}", self.store.backend());

        match timeout(self.probe_timeout, check_storage_health(self.store.as_ref())).await {
            Ok(Ok(response_time)) => {
                health_status
                    .checks
                    .insert(component, ComponentHealth::up(Some(response_time)));
                info!("Storage health check: OK ({}ms)", response_time);
            }
            Ok(Err(e)) => {
                health_status.status = HealthState::Unhealthy;
                health_status
                    .checks
                    .insert(component, ComponentHealth::down(Some(e)));
                error!("Storage health check failed");
            }
            Err(_) => {
                health_status.status = HealthState::Unhealthy;
                health_status.checks.insert(
                    component,
                    ComponentHealth::down(Some("Timeout".to_string())),
                );
                error!("Storage health check timed out");
            }
        }

        health_status
    }
}

pub async fn check_storage_health(store: &dyn CommerceStore) -> Result<u128, String> {
    let start = Instant::now();
    store
        .ping()
        .await
        .map(|_| start.elapsed().as_millis())
        .map_err(|e| e.to_string())
}
