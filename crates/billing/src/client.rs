//! Stripe client configuration and the provider implementation backed by it

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stripe::{
    BillingPortalSession, CheckoutSession, CheckoutSessionBillingAddressCollection,
    CheckoutSessionMode, Client, CreateBillingPortalSession, CreateCheckoutSession,
    CreateCheckoutSessionLineItems, CreateCustomer, Customer, CustomerId, Subscription,
    SubscriptionId,
};

use crate::error::{BillingError, BillingResult};
use crate::event::{
    Metadata, ObjectRef, PriceObject, SubscriptionItemObject, SubscriptionItems,
    SubscriptionObject, ACCOUNT_ID_KEY,
};
use crate::provider::{
    BillingProvider, CheckoutLineItem, CheckoutSessionParams, HostedSession, NewCustomer,
    PurchaseMode,
};
use crate::verifier::DEFAULT_TOLERANCE_SECS;

/// Stripe configuration
#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub webhook_tolerance_secs: i64,
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("secret_key", &"[redacted]")
            .field("webhook_secret", &"[redacted]")
            .field("webhook_tolerance_secs", &self.webhook_tolerance_secs)
            .finish()
    }
}

impl StripeConfig {
    /// Load from `STRIPE_SECRET_KEY`, `STRIPE_WEBHOOK_SECRET` and
    /// the optional `STRIPE_WEBHOOK_TOLERANCE_SECS`
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?;
        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .map_err(|_| BillingError::Config("STRIPE_WEBHOOK_SECRET not set".to_string()))?;

        let webhook_tolerance_secs = match std::env::var("STRIPE_WEBHOOK_TOLERANCE_SECS") {
            Ok(raw) => raw.parse().map_err(|_| {
                BillingError::Config(format!("Invalid STRIPE_WEBHOOK_TOLERANCE_SECS: {}", raw))
            })?,
            Err(_) => DEFAULT_TOLERANCE_SECS,
        };

        Ok(Self {
            secret_key,
            webhook_secret,
            webhook_tolerance_secs,
        })
    }
}

/// Stripe API client wrapper
#[derive(Clone)]
pub struct StripeClient {
    inner: Client,
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> Self {
        Self {
            inner: Client::new(config.secret_key.clone()),
        }
    }
}

fn parse_customer_id(customer_id: &str) -> BillingResult<CustomerId> {
    customer_id.parse().map_err(|_| {
        BillingError::ProviderLookupFailed(format!("Invalid customer ID: {}", customer_id))
    })
}

#[derive(Debug, Serialize)]
struct ListLineItemsParams {
    limit: u32,
}

#[derive(Debug, Deserialize)]
struct LineItemList {
    data: Vec<CheckoutLineItem>,
}

/// Project the SDK subscription onto the fields the reconciler reads
fn subscription_view(subscription: Subscription) -> SubscriptionObject {
    let items = subscription
        .items
        .data
        .into_iter()
        .map(|item| SubscriptionItemObject {
            price: item.price.map(|price| PriceObject {
                id: price.id.to_string(),
                product: price
                    .product
                    .map(|product| ObjectRef::Id(product.id().to_string())),
            }),
            current_period_start: None,
            current_period_end: None,
        })
        .collect();

    SubscriptionObject {
        id: subscription.id.to_string(),
        status: subscription.status.as_str().to_string(),
        current_period_start: Some(subscription.current_period_start),
        current_period_end: Some(subscription.current_period_end),
        cancel_at_period_end: subscription.cancel_at_period_end,
        canceled_at: subscription.canceled_at,
        trial_start: subscription.trial_start,
        trial_end: subscription.trial_end,
        metadata: subscription.metadata,
        items: SubscriptionItems { data: items },
    }
}

#[async_trait]
impl BillingProvider for StripeClient {
    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<SubscriptionObject> {
        let sub_id = subscription_id.parse::<SubscriptionId>().map_err(|e| {
            BillingError::ProviderLookupFailed(format!("Invalid subscription ID: {}", e))
        })?;

        let subscription = Subscription::retrieve(&self.inner, &sub_id, &[])
            .await
            .map_err(|e| {
                tracing::error!(
                    subscription_id = %subscription_id,
                    error = %e,
                    "Failed to retrieve subscription from Stripe"
                );
                BillingError::ProviderLookupFailed(format!(
                    "Failed to retrieve subscription {}: {}",
                    subscription_id, e
                ))
            })?;

        Ok(subscription_view(subscription))
    }

    async fn list_checkout_line_items(
        &self,
        session_id: &str,
    ) -> BillingResult<Vec<CheckoutLineItem>> {
        let path = format!("/checkout/sessions/{}/line_items", session_id);
        let list: LineItemList = self
            .inner
            .get_query(&path, ListLineItemsParams { limit: 100 })
            .await
            .map_err(|e| {
                tracing::error!(
                    session_id = %session_id,
                    error = %e,
                    "Failed to list checkout line items"
                );
                BillingError::ProviderLookupFailed(format!(
                    "Failed to list line items for {}: {}",
                    session_id, e
                ))
            })?;

        Ok(list.data)
    }

    async fn create_customer(&self, customer: &NewCustomer) -> BillingResult<String> {
        let mut metadata = Metadata::new();
        metadata.insert(ACCOUNT_ID_KEY.to_string(), customer.account_id.clone());

        let mut params = CreateCustomer::new();
        params.email = Some(&customer.email);
        params.name = customer.name.as_deref();
        params.metadata = Some(metadata);

        let created = Customer::create(&self.inner, params).await.map_err(|e| {
            tracing::error!(
                account_id = %customer.account_id,
                error = %e,
                "Failed to create Stripe customer"
            );
            BillingError::from(e)
        })?;

        Ok(created.id.to_string())
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionParams,
    ) -> BillingResult<HostedSession> {
        let mut params = CreateCheckoutSession::new();
        params.customer = Some(parse_customer_id(&request.customer_id)?);
        params.mode = Some(match request.mode {
            PurchaseMode::Payment => CheckoutSessionMode::Payment,
            PurchaseMode::Subscription => CheckoutSessionMode::Subscription,
        });
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(request.price_id.clone()),
            quantity: Some(1),
            ..Default::default()
        }]);
        params.success_url = Some(&request.success_url);
        params.cancel_url = Some(&request.cancel_url);
        params.allow_promotion_codes = Some(true);
        params.billing_address_collection = Some(CheckoutSessionBillingAddressCollection::Required);
        params.metadata = Some(request.metadata.clone());

        let session = CheckoutSession::create(&self.inner, params)
            .await
            .map_err(|e| {
                tracing::error!(
                    customer_id = %request.customer_id,
                    price_id = %request.price_id,
                    error = %e,
                    "Failed to create Stripe checkout session"
                );
                BillingError::from(e)
            })?;

        let url = session.url.ok_or_else(|| {
            BillingError::ProviderLookupFailed("Checkout session URL missing".to_string())
        })?;

        Ok(HostedSession {
            id: session.id.to_string(),
            url,
        })
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> BillingResult<HostedSession> {
        let mut params = CreateBillingPortalSession::new(parse_customer_id(customer_id)?);
        params.return_url = Some(return_url);

        let session = BillingPortalSession::create(&self.inner, params)
            .await
            .map_err(|e| {
                tracing::error!(
                    customer_id = %customer_id,
                    error = %e,
                    "Failed to create Stripe billing portal session"
                );
                BillingError::from(e)
            })?;

        Ok(HostedSession {
            id: session.id.to_string(),
            url: session.url,
        })
    }

    async fn ping(&self) -> BillingResult<()> {
        let _balance: serde_json::Value = self.inner.get("/balance").await?;
        Ok(())
    }
}
