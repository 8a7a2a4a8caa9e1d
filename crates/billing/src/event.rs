//! Typed view of inbound provider events
//!
//! Only the fields the reconciler reads are modelled. Unknown fields are
//! ignored so newer provider API versions keep deserializing.

use std::collections::HashMap;

use serde::{de::DeserializeOwned, Deserialize};

use crate::error::{BillingError, BillingResult};

/// Free-form string metadata attached to provider objects
pub type Metadata = HashMap<String, String>;

/// Metadata key carrying the local account id
pub const ACCOUNT_ID_KEY: &str = "userId";
/// Metadata key carrying the purchased course id
pub const COURSE_ID_KEY: &str = "courseId";

/// A verified provider event
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub livemode: bool,
    #[serde(default)]
    pub created: i64,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

impl WebhookEvent {
    pub fn kind(&self) -> Option<EventKind> {
        EventKind::parse(&self.event_type)
    }

    /// Decode the embedded object into the view its event type demands.
    ///
    /// The envelope already parsed, so a view that does not fit means a field
    /// the event type requires is absent or unusable.
    pub fn object<T: DeserializeOwned>(&self) -> BillingResult<T> {
        serde_json::from_value(self.data.object.clone()).map_err(|e| {
            tracing::warn!(
                event_id = %self.id,
                event_type = %self.event_type,
                error = %e,
                "Webhook object could not be decoded"
            );
            BillingError::missing(missing_field_name(&e.to_string()))
        })
    }
}

/// Field named by a serde "missing field" error, else the whole object
fn missing_field_name(message: &str) -> String {
    message
        .strip_prefix("missing field `")
        .and_then(|rest| rest.split('`').next())
        .map(|field| field.to_string())
        .unwrap_or_else(|| format!("data.object ({})", message))
}

/// The closed set of event types the reconciler acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    CheckoutSessionCompleted,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
    InvoicePaymentSucceeded,
    InvoicePaymentFailed,
    PaymentIntentSucceeded,
    PaymentIntentFailed,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::CheckoutSessionCompleted,
        EventKind::SubscriptionCreated,
        EventKind::SubscriptionUpdated,
        EventKind::SubscriptionDeleted,
        EventKind::InvoicePaymentSucceeded,
        EventKind::InvoicePaymentFailed,
        EventKind::PaymentIntentSucceeded,
        EventKind::PaymentIntentFailed,
    ];

    pub fn parse(event_type: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == event_type)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::CheckoutSessionCompleted => "checkout.session.completed",
            EventKind::SubscriptionCreated => "customer.subscription.created",
            EventKind::SubscriptionUpdated => "customer.subscription.updated",
            EventKind::SubscriptionDeleted => "customer.subscription.deleted",
            EventKind::InvoicePaymentSucceeded => "invoice.payment_succeeded",
            EventKind::InvoicePaymentFailed => "invoice.payment_failed",
            EventKind::PaymentIntentSucceeded => "payment_intent.succeeded",
            EventKind::PaymentIntentFailed => "payment_intent.payment_failed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to another provider object: either its bare id or the expanded object
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ObjectRef {
    Id(String),
    Object { id: String },
}

impl ObjectRef {
    pub fn id(&self) -> &str {
        match self {
            ObjectRef::Id(id) => id,
            ObjectRef::Object { id } => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutMode {
    Payment,
    Setup,
    Subscription,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    pub mode: Option<CheckoutMode>,
    pub subscription: Option<ObjectRef>,
    pub payment_intent: Option<ObjectRef>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionObject {
    pub id: String,
    pub status: String,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<i64>,
    pub trial_start: Option<i64>,
    pub trial_end: Option<i64>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub items: SubscriptionItems,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItemObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItemObject {
    pub price: Option<PriceObject>,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceObject {
    pub id: String,
    pub product: Option<ObjectRef>,
}

impl SubscriptionObject {
    /// Price of the first subscription item
    pub fn price(&self) -> Option<&PriceObject> {
        self.items.data.first().and_then(|item| item.price.as_ref())
    }

    /// Current billing period as `(start, end)` UNIX seconds.
    ///
    /// Newer API versions carry the period on the subscription items only.
    pub fn current_period(&self) -> BillingResult<(i64, i64)> {
        let item = self.items.data.first();
        let start = self
            .current_period_start
            .or_else(|| item.and_then(|i| i.current_period_start))
            .ok_or_else(|| BillingError::missing("current_period_start"))?;
        let end = self
            .current_period_end
            .or_else(|| item.and_then(|i| i.current_period_end))
            .ok_or_else(|| BillingError::missing("current_period_end"))?;
        Ok((start, end))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceObject {
    pub id: String,
    pub subscription: Option<ObjectRef>,
    pub payment_intent: Option<ObjectRef>,
    #[serde(default)]
    pub amount_paid: i64,
    #[serde(default)]
    pub amount_due: i64,
    pub currency: String,
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntentObject {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Read a non-empty metadata value
pub fn metadata_value<'a>(metadata: Option<&'a Metadata>, key: &str) -> Option<&'a str> {
    metadata
        .and_then(|m| m.get(key))
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

/// Metadata as a JSON object for storage
pub fn metadata_json(metadata: Option<&Metadata>) -> serde_json::Value {
    metadata
        .map(|m| serde_json::to_value(m).unwrap_or_else(|_| serde_json::json!({})))
        .unwrap_or_else(|| serde_json::json!({}))
}
