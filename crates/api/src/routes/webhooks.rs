//! Stripe webhook endpoint

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use medcomply_billing::SIGNATURE_HEADER;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::reporting::ReportContext;
use crate::state::AppState;

/// Handle Stripe webhook
///
/// Signature failures answer 400 so Stripe stops retrying; processing
/// failures answer 500 so it redelivers.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    tracing::info!(body_len = body.len(), "Stripe webhook received");

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Stripe webhook missing signature header");
            ApiError::InvalidSignature
        })?;

    let event = state
        .webhooks
        .verify_event(&body, signature)
        .map_err(|e| {
            tracing::warn!(error = %e, "Stripe webhook verification failed");
            ApiError::from(e)
        })?;

    tracing::info!(
        event_type = %event.event_type,
        event_id = %event.id,
        "Stripe webhook event verified"
    );

    state.webhooks.handle_event(&event).await.map_err(|e| {
        state.reporter.report(
            &e,
            &ReportContext {
                event_type: Some(event.event_type.clone()),
                event_id: Some(event.id.clone()),
            },
        );
        ApiError::from(e)
    })?;

    Ok(Json(json!({ "received": true })))
}
