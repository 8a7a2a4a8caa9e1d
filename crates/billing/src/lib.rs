// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // BillingError carries provider error text
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! MedComply Billing Module
//!
//! Reconciles Stripe webhook events into local billing records.
//!
//! ## Features
//!
//! - **Verification**: HMAC-SHA256 signature and timestamp checks on every delivery
//! - **Dispatch**: One handler per recognized event type, everything else skipped
//! - **Reconciliation**: Idempotent subscription, payment and enrollment upserts
//! - **Notifications**: User-facing messages for activation, cancellation, failed payments
//! - **Audit**: One audit entry per processed event, including failures
//! - **Checkout**: Lazily linked customers, hosted checkout and billing portal sessions

pub mod audit;
pub mod checkout;
pub mod client;
pub mod error;
pub mod event;
pub mod money;
pub mod notifications;
pub mod pg_store;
pub mod provider;
pub mod status;
pub mod store;
pub mod verifier;
pub mod webhooks;

// Audit
pub use audit::{AuditEntryBuilder, AuditLogger, AuditOutcome};

// Checkout
pub use checkout::{BillingUrls, CheckoutRequest, CheckoutService};

// Client
pub use client::{StripeClient, StripeConfig};

// Errors
pub use error::{BillingError, BillingResult};

// Events
pub use event::{EventKind, WebhookEvent};

// Money
pub use money::{major_to_minor, minor_to_major};

// Persistence
pub use pg_store::PgBillingStore;
pub use store::{
    AccountRow, BillingStore, NewAuditEntry, NewNotification, PaymentRecord, PaymentRow, SubscriptionRecord,
    SubscriptionRow, SubscriptionState,
};

// Provider
pub use provider::{
    BillingProvider, CheckoutLineItem, CheckoutSessionParams, HostedSession, NewCustomer,
    PurchaseMode,
};

// Status
pub use status::{EnrollmentStatus, NotificationType, PaymentStatus, SubscriptionStatus};

// Verification
pub use verifier::{sign_payload, WebhookVerifier, SIGNATURE_HEADER};

// Webhooks
pub use webhooks::{Effect, ReconcileOutcome, SkipReason, WebhookHandler};

#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockBillingProvider;
#[cfg(any(test, feature = "test-utils"))]
pub use store::InMemoryBillingStore;
