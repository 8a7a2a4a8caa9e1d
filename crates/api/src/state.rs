//! Application state

use std::sync::Arc;

use medcomply_billing::{
    BillingProvider, BillingStore, BillingUrls, CheckoutService, WebhookHandler, WebhookVerifier,
};

use crate::health::{DatabaseCheck, HealthChecker, StripeCheck};
use crate::reporting::ErrorReporter;

/// Shared application state
///
/// Every client is constructed once at startup and shared by reference.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BillingStore>,
    pub webhooks: Arc<WebhookHandler>,
    pub checkout: Arc<CheckoutService>,
    pub health: Arc<HealthChecker>,
    pub reporter: Arc<dyn ErrorReporter>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn BillingStore>,
        provider: Arc<dyn BillingProvider>,
        verifier: WebhookVerifier,
        urls: BillingUrls,
        reporter: Arc<dyn ErrorReporter>,
        version: &str,
    ) -> Self {
        let webhooks = Arc::new(WebhookHandler::new(
            store.clone(),
            provider.clone(),
            verifier,
        ));
        let checkout = Arc::new(CheckoutService::new(
            store.clone(),
            provider.clone(),
            urls,
        ));
        let health = Arc::new(
            HealthChecker::new(version)
                .with_check(Arc::new(DatabaseCheck::new(store.clone())))
                .with_check(Arc::new(StripeCheck::new(provider))),
        );

        Self {
            store,
            webhooks,
            checkout,
            health,
            reporter,
        }
    }
}
