//! Checkout and billing portal sessions

use axum::{body::Bytes, extract::State, Extension, Json};
use medcomply_billing::{BillingError, CheckoutRequest, PurchaseMode};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::AuthAccount;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutBody {
    pub price_id: String,
    #[serde(default)]
    pub mode: PurchaseMode,
    pub course_id: Option<String>,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

fn billing_failure(err: BillingError) -> ApiError {
    match err {
        BillingError::AccountNotFound(_) => ApiError::NotFound("User not found".to_string()),
        BillingError::NoBillingAccount(_) => {
            ApiError::NotFound("No billing account found".to_string())
        }
        other => ApiError::Internal(other.to_string()),
    }
}

pub async fn create_checkout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthAccount>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let body: CheckoutBody = serde_json::from_slice(&body)
        .map_err(|_| ApiError::BadRequest("Invalid input".to_string()))?;
    if body.price_id.trim().is_empty() {
        return Err(ApiError::BadRequest("Invalid input".to_string()));
    }

    let session = state
        .checkout
        .create_checkout(
            &auth.account_id,
            CheckoutRequest {
                price_id: body.price_id,
                mode: body.mode,
                course_id: body.course_id,
                success_url: body.success_url,
                cancel_url: body.cancel_url,
            },
        )
        .await
        .map_err(billing_failure)?;

    Ok(Json(json!({ "url": session.url })))
}

pub async fn create_portal(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthAccount>,
) -> ApiResult<Json<Value>> {
    let session = state
        .checkout
        .create_portal(&auth.account_id)
        .await
        .map_err(billing_failure)?;

    Ok(Json(json!({ "url": session.url })))
}
