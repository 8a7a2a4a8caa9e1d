//! Caller identity
//!
//! Sessions are terminated at the gateway in front of this service, which
//! forwards the authenticated account id in a header. Requests reaching the
//! billing routes without it are rejected.

use axum::{
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::ApiError;

pub const ACCOUNT_ID_HEADER: &str = "x-account-id";

/// Authenticated account, inserted as a request extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthAccount {
    pub account_id: String,
}

pub async fn require_account(mut request: Request, next: Next) -> Response {
    let account_id = request
        .headers()
        .get(ACCOUNT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from);

    match account_id {
        Some(account_id) => {
            request.extensions_mut().insert(AuthAccount { account_id });
            next.run(request).await
        }
        None => {
            tracing::warn!(path = %request.uri().path(), "Billing request without account");
            ApiError::Unauthorized.into_response()
        }
    }
}
