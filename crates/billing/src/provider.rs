//! Calls made to the billing provider
//!
//! The reconciler corroborates embedded event data through the read-only
//! lookups here; checkout and the billing portal create customers and hosted
//! sessions. Stripe backs it in production and a scripted provider in tests.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::BillingResult;
use crate::event::{Metadata, PriceObject, SubscriptionObject};

/// One line of a completed checkout session
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutLineItem {
    pub id: String,
    pub description: Option<String>,
    pub quantity: Option<u64>,
    #[serde(default)]
    pub amount_total: i64,
    pub price: Option<PriceObject>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseMode {
    /// One-off purchase, used for single courses
    Payment,
    #[default]
    Subscription,
}

impl PurchaseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseMode::Payment => "payment",
            PurchaseMode::Subscription => "subscription",
        }
    }
}

/// Customer to create for a local account
#[derive(Debug, Clone, PartialEq)]
pub struct NewCustomer {
    pub account_id: String,
    pub email: String,
    pub name: Option<String>,
}

/// Hosted checkout for a single price
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSessionParams {
    pub customer_id: String,
    pub price_id: String,
    pub mode: PurchaseMode,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: Metadata,
}

/// A provider-hosted page the browser is redirected to
#[derive(Debug, Clone, PartialEq)]
pub struct HostedSession {
    pub id: String,
    pub url: String,
}

#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Fetch the live state of a subscription
    async fn retrieve_subscription(&self, subscription_id: &str)
        -> BillingResult<SubscriptionObject>;

    /// List the line items purchased in a checkout session
    async fn list_checkout_line_items(
        &self,
        session_id: &str,
    ) -> BillingResult<Vec<CheckoutLineItem>>;

    /// Create a customer and return its id
    async fn create_customer(&self, customer: &NewCustomer) -> BillingResult<String>;

    async fn create_checkout_session(
        &self,
        params: &CheckoutSessionParams,
    ) -> BillingResult<HostedSession>;

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> BillingResult<HostedSession>;

    /// Cheap authenticated call used by health checks
    async fn ping(&self) -> BillingResult<()>;
}

#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockBillingProvider;

#[cfg(any(test, feature = "test-utils"))]
mod mock {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, RwLock};

    use super::*;
    use crate::error::BillingError;

    /// Scripted provider for tests
    ///
    /// Subscriptions and line items are registered up front; unknown ids and
    /// injected failures surface as `ProviderLookupFailed`. Created customers
    /// and sessions are recorded and get sequential ids.
    #[derive(Clone, Default)]
    pub struct MockBillingProvider {
        subscriptions: Arc<RwLock<HashMap<String, SubscriptionObject>>>,
        line_items: Arc<RwLock<HashMap<String, Vec<CheckoutLineItem>>>>,
        fail_lookups: Arc<RwLock<bool>>,
        calls: Arc<AtomicUsize>,
        customers: Arc<Mutex<Vec<NewCustomer>>>,
        checkouts: Arc<Mutex<Vec<CheckoutSessionParams>>>,
        portals: Arc<Mutex<Vec<String>>>,
    }

    impl MockBillingProvider {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_subscription(self, subscription: SubscriptionObject) -> Self {
            if let Ok(mut subs) = self.subscriptions.write() {
                subs.insert(subscription.id.clone(), subscription);
            }
            self
        }

        pub fn with_line_items(self, session_id: &str, items: Vec<CheckoutLineItem>) -> Self {
            if let Ok(mut all) = self.line_items.write() {
                all.insert(session_id.to_string(), items);
            }
            self
        }

        /// Make every subsequent call fail
        pub fn failing(self) -> Self {
            if let Ok(mut fail) = self.fail_lookups.write() {
                *fail = true;
            }
            self
        }

        /// Number of calls made so far
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn created_customers(&self) -> Vec<NewCustomer> {
            self.customers.lock().map(|c| c.clone()).unwrap_or_default()
        }

        pub fn checkout_sessions(&self) -> Vec<CheckoutSessionParams> {
            self.checkouts.lock().map(|c| c.clone()).unwrap_or_default()
        }

        /// Customer ids portal sessions were opened for
        pub fn portal_sessions(&self) -> Vec<String> {
            self.portals.lock().map(|p| p.clone()).unwrap_or_default()
        }

        fn record<T>(log: &Mutex<Vec<T>>, item: T) -> usize {
            match log.lock() {
                Ok(mut log) => {
                    log.push(item);
                    log.len()
                }
                Err(_) => 0,
            }
        }

        fn check_failure(&self) -> BillingResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let failing = self.fail_lookups.read().map(|f| *f).unwrap_or(false);
            if failing {
                return Err(BillingError::ProviderLookupFailed(
                    "injected provider failure".to_string(),
                ));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl BillingProvider for MockBillingProvider {
        async fn retrieve_subscription(
            &self,
            subscription_id: &str,
        ) -> BillingResult<SubscriptionObject> {
            self.check_failure()?;
            self.subscriptions
                .read()
                .ok()
                .and_then(|subs| subs.get(subscription_id).cloned())
                .ok_or_else(|| {
                    BillingError::ProviderLookupFailed(format!(
                        "No such subscription: {}",
                        subscription_id
                    ))
                })
        }

        async fn list_checkout_line_items(
            &self,
            session_id: &str,
        ) -> BillingResult<Vec<CheckoutLineItem>> {
            self.check_failure()?;
            Ok(self
                .line_items
                .read()
                .ok()
                .and_then(|all| all.get(session_id).cloned())
                .unwrap_or_default())
        }

        async fn create_customer(&self, customer: &NewCustomer) -> BillingResult<String> {
            self.check_failure()?;
            let n = Self::record(&self.customers, customer.clone());
            Ok(format!("cus_mock_{}", n))
        }

        async fn create_checkout_session(
            &self,
            params: &CheckoutSessionParams,
        ) -> BillingResult<HostedSession> {
            self.check_failure()?;
            let n = Self::record(&self.checkouts, params.clone());
            let id = format!("cs_mock_{}", n);
            Ok(HostedSession {
                url: format!("https://checkout.stripe.test/{}", id),
                id,
            })
        }

        async fn create_portal_session(
            &self,
            customer_id: &str,
            _return_url: &str,
        ) -> BillingResult<HostedSession> {
            self.check_failure()?;
            let n = Self::record(&self.portals, customer_id.to_string());
            let id = format!("bps_mock_{}", n);
            Ok(HostedSession {
                url: format!("https://billing.stripe.test/{}", id),
                id,
            })
        }

        async fn ping(&self) -> BillingResult<()> {
            self.check_failure()
        }
    }
}
