//! Client-side error reports
//!
//! The dashboard posts uncaught errors here; each report becomes an audit
//! log entry.

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use medcomply_billing::NewAuditEntry;
use serde::Deserialize;
use serde_json::{json, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub const ERROR_REPORTED_ACTION: &str = "ERROR_REPORTED";
pub const ERROR_ENTITY_TYPE: &str = "ERROR";

const UNKNOWN: &str = "unknown";

#[derive(Debug, Deserialize)]
pub struct ErrorReport {
    pub message: Option<String>,
    pub context: Option<Value>,
    pub stack: Option<String>,
    pub severity: Option<String>,
    pub category: Option<String>,
}

fn is_present(value: &Option<Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

/// First hop of `x-forwarded-for`, then `x-real-ip`
fn client_ip(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        })
        .unwrap_or(UNKNOWN)
        .to_string()
}

pub async fn report_error(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let report: ErrorReport = serde_json::from_slice(&body)
        .map_err(|_| ApiError::BadRequest("Invalid error data".to_string()))?;

    let message = report.message.as_deref().filter(|m| !m.is_empty());
    let Some(message) = message.filter(|_| is_present(&report.context)) else {
        return Err(ApiError::BadRequest("Invalid error data".to_string()));
    };

    let now = OffsetDateTime::now_utc();
    let entry = NewAuditEntry {
        account_id: None,
        action: ERROR_REPORTED_ACTION.to_string(),
        entity_type: ERROR_ENTITY_TYPE.to_string(),
        entity_id: format!("error_{}", now.unix_timestamp_nanos() / 1_000_000),
        metadata: json!({
            "message": message,
            "stack": report.stack,
            "context": report.context,
            "severity": report.severity,
            "category": report.category,
            "timestamp": now.format(&Rfc3339).unwrap_or_default(),
        }),
        ip_address: Some(client_ip(&headers)),
        user_agent: Some(
            headers
                .get(axum::http::header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or(UNKNOWN)
                .to_string(),
        ),
    };

    tracing::debug!(
        severity = report.severity.as_deref().unwrap_or(UNKNOWN),
        category = report.category.as_deref().unwrap_or(UNKNOWN),
        "Client error reported"
    );

    state
        .store
        .append_audit_entry(&entry)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to log error: {}", e)))?;

    Ok(Json(json!({ "success": true })))
}
