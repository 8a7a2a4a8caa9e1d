//! Hosted checkout and billing portal sessions
//!
//! An account is linked to a provider customer the first time it checks out,
//! and the link never changes afterwards. Checkout sessions carry the account
//! and course ids in their metadata; the webhook reconciler reads them back
//! when the session completes.

use std::sync::Arc;

use serde_json::json;

use crate::error::{BillingError, BillingResult};
use crate::event::{Metadata, ACCOUNT_ID_KEY, COURSE_ID_KEY};
use crate::provider::{
    BillingProvider, CheckoutSessionParams, HostedSession, NewCustomer, PurchaseMode,
};
use crate::store::{AccountRow, BillingStore, NewAuditEntry};

pub const CHECKOUT_SESSION_CREATED_ACTION: &str = "CHECKOUT_SESSION_CREATED";
pub const BILLING_PORTAL_ACCESSED_ACTION: &str = "BILLING_PORTAL_ACCESSED";

const PAYMENT_ENTITY_TYPE: &str = "PAYMENT";
const BILLING_ENTITY_TYPE: &str = "BILLING";

/// Where the provider sends the browser back to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingUrls {
    pub success_url: String,
    pub cancel_url: String,
    pub portal_return_url: String,
}

impl BillingUrls {
    /// Dashboard and pricing pages under the public app URL
    pub fn from_app_url(app_url: &str) -> Self {
        let base = app_url.trim_end_matches('/');
        Self {
            success_url: format!("{}/dashboard?success=true", base),
            cancel_url: format!("{}/pricing", base),
            portal_return_url: format!("{}/dashboard/billing", base),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckoutRequest {
    pub price_id: String,
    pub mode: PurchaseMode,
    pub course_id: Option<String>,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

pub struct CheckoutService {
    store: Arc<dyn BillingStore>,
    provider: Arc<dyn BillingProvider>,
    urls: BillingUrls,
}

impl CheckoutService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        provider: Arc<dyn BillingProvider>,
        urls: BillingUrls,
    ) -> Self {
        Self {
            store,
            provider,
            urls,
        }
    }

    async fn load_account(&self, account_id: &str) -> BillingResult<AccountRow> {
        self.store
            .find_account(account_id)
            .await?
            .ok_or_else(|| BillingError::AccountNotFound(account_id.to_string()))
    }

    /// Provider customer for the account, created on first use
    pub async fn ensure_customer(&self, account: &AccountRow) -> BillingResult<String> {
        if let Some(customer_id) = &account.stripe_customer_id {
            return Ok(customer_id.clone());
        }

        let created = self
            .provider
            .create_customer(&NewCustomer {
                account_id: account.id.clone(),
                email: account.email.clone(),
                name: account.name.clone().filter(|n| !n.trim().is_empty()),
            })
            .await?;

        let stored = self
            .store
            .link_customer(&account.id, &created)
            .await?
            .ok_or_else(|| BillingError::AccountNotFound(account.id.clone()))?;

        if stored != created {
            tracing::warn!(
                account_id = %account.id,
                kept = %stored,
                discarded = %created,
                "Account was linked to another customer concurrently"
            );
        } else {
            tracing::info!(
                account_id = %account.id,
                customer_id = %stored,
                "Stripe customer linked"
            );
        }

        Ok(stored)
    }

    pub async fn create_checkout(
        &self,
        account_id: &str,
        request: CheckoutRequest,
    ) -> BillingResult<HostedSession> {
        let account = self.load_account(account_id).await?;
        let customer_id = self.ensure_customer(&account).await?;

        let mut metadata = Metadata::new();
        metadata.insert(ACCOUNT_ID_KEY.to_string(), account.id.clone());
        if let Some(course_id) = request.course_id.as_ref().filter(|c| !c.is_empty()) {
            metadata.insert(COURSE_ID_KEY.to_string(), course_id.clone());
        }

        let session = self
            .provider
            .create_checkout_session(&CheckoutSessionParams {
                customer_id,
                price_id: request.price_id.clone(),
                mode: request.mode,
                success_url: request
                    .success_url
                    .unwrap_or_else(|| self.urls.success_url.clone()),
                cancel_url: request
                    .cancel_url
                    .unwrap_or_else(|| self.urls.cancel_url.clone()),
                metadata,
            })
            .await?;

        tracing::info!(
            account_id = %account.id,
            session_id = %session.id,
            mode = request.mode.as_str(),
            "Checkout session created"
        );

        self.store
            .append_audit_entry(&NewAuditEntry {
                account_id: Some(account.id),
                action: CHECKOUT_SESSION_CREATED_ACTION.to_string(),
                entity_type: PAYMENT_ENTITY_TYPE.to_string(),
                entity_id: session.id.clone(),
                metadata: json!({
                    "priceId": request.price_id,
                    "mode": request.mode.as_str(),
                    "courseId": request.course_id,
                }),
                ip_address: None,
                user_agent: None,
            })
            .await?;

        Ok(session)
    }

    /// Portal session for an account that already has a customer
    pub async fn create_portal(&self, account_id: &str) -> BillingResult<HostedSession> {
        let account = self.load_account(account_id).await?;
        let Some(customer_id) = account.stripe_customer_id else {
            return Err(BillingError::NoBillingAccount(account.id));
        };

        let session = self
            .provider
            .create_portal_session(&customer_id, &self.urls.portal_return_url)
            .await?;

        self.store
            .append_audit_entry(&NewAuditEntry {
                account_id: Some(account.id),
                action: BILLING_PORTAL_ACCESSED_ACTION.to_string(),
                entity_type: BILLING_ENTITY_TYPE.to_string(),
                entity_id: session.id.clone(),
                metadata: json!({}),
                ip_address: None,
                user_agent: None,
            })
            .await?;

        Ok(session)
    }
}
