//! Dependency health checks

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use medcomply_billing::{BillingProvider, BillingStore};
use serde::Serialize;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

const DATABASE_DEGRADED_AFTER: Duration = Duration::from_millis(1000);
const STRIPE_DEGRADED_AFTER: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Result of a single check
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub checks: Vec<ComponentHealth>,
}

impl IntoResponse for HealthResponse {
    fn into_response(self) -> Response {
        let status_code = match self.status {
            HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        };

        (status_code, Json(self)).into_response()
    }
}

pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;
    fn check(&self) -> Pin<Box<dyn Future<Output = ComponentHealth> + Send + '_>>;
}

/// Time a fallible check and grade it against a latency threshold
async fn timed<F, E>(name: &str, degraded_after: Duration, check: F) -> ComponentHealth
where
    F: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    let started = Instant::now();
    let result = check.await;
    let elapsed = started.elapsed();

    match result {
        Ok(()) => ComponentHealth {
            name: name.to_string(),
            status: if elapsed < degraded_after {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            response_time_ms: Some(elapsed.as_millis() as u64),
            error: None,
        },
        Err(e) => ComponentHealth {
            name: name.to_string(),
            status: HealthStatus::Unhealthy,
            response_time_ms: Some(elapsed.as_millis() as u64),
            error: Some(e.to_string()),
        },
    }
}

pub struct DatabaseCheck {
    store: Arc<dyn BillingStore>,
}

impl DatabaseCheck {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }
}

impl HealthCheck for DatabaseCheck {
    fn name(&self) -> &str {
        "database"
    }

    fn check(&self) -> Pin<Box<dyn Future<Output = ComponentHealth> + Send + '_>> {
        Box::pin(timed(self.name(), DATABASE_DEGRADED_AFTER, self.store.ping()))
    }
}

pub struct StripeCheck {
    provider: Arc<dyn BillingProvider>,
}

impl StripeCheck {
    pub fn new(provider: Arc<dyn BillingProvider>) -> Self {
        Self { provider }
    }
}

impl HealthCheck for StripeCheck {
    fn name(&self) -> &str {
        "stripe"
    }

    fn check(&self) -> Pin<Box<dyn Future<Output = ComponentHealth> + Send + '_>> {
        Box::pin(timed(self.name(), STRIPE_DEGRADED_AFTER, self.provider.ping()))
    }
}

fn overall(checks: &[ComponentHealth]) -> HealthStatus {
    if checks.iter().any(|c| c.status == HealthStatus::Unhealthy) {
        HealthStatus::Unhealthy
    } else if checks.iter().any(|c| c.status == HealthStatus::Degraded) {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// Runs every registered check concurrently
pub struct HealthChecker {
    checks: Vec<Arc<dyn HealthCheck>>,
    started_at: Instant,
    version: String,
}

impl HealthChecker {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            checks: Vec::new(),
            started_at: Instant::now(),
            version: version.into(),
        }
    }

    pub fn with_check(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.checks.push(check);
        self
    }

    pub async fn check_health(&self) -> HealthResponse {
        let checks = futures::future::join_all(self.checks.iter().map(|c| c.check())).await;
        let status = overall(&checks);

        if status != HealthStatus::Healthy {
            tracing::warn!(status = ?status, "Health check not healthy");
        }

        HealthResponse {
            status,
            timestamp: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            version: self.version.clone(),
            checks,
        }
    }
}
