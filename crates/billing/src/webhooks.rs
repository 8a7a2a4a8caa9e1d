//! Stripe webhook handling
//!
//! Verified events are dispatched by type to exactly one handler which
//! reconciles local subscription, payment and enrollment records. Every event
//! that gets past verification is audited once, whatever the outcome.

use std::sync::Arc;

use time::OffsetDateTime;

use crate::audit::{AuditEntryBuilder, AuditLogger, AuditOutcome};
use crate::error::{BillingError, BillingResult};
use crate::event::{
    metadata_json, metadata_value, CheckoutMode, CheckoutSessionObject, EventKind, InvoiceObject,
    PaymentIntentObject, SubscriptionObject, WebhookEvent, ACCOUNT_ID_KEY, COURSE_ID_KEY,
};
use crate::money::minor_to_major;
use crate::notifications;
use crate::provider::BillingProvider;
use crate::status::{PaymentStatus, SubscriptionStatus};
use crate::store::{BillingStore, NewNotification, PaymentRecord, SubscriptionRecord, SubscriptionState};
use crate::verifier::WebhookVerifier;

/// A single write performed while reconciling an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    SubscriptionUpserted { subscription_id: String },
    SubscriptionCanceled { subscription_id: String },
    SubscriptionPastDue { subscription_id: String },
    PaymentRecorded { payment_id: String, status: PaymentStatus },
    EnrollmentCreated { account_id: String, course_id: String },
    /// The (account, course) pair was already enrolled
    EnrollmentExisted { account_id: String, course_id: String },
    NotificationCreated { account_id: String, title: String },
}

/// Why an event was accepted without changing anything
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    UnrecognizedEventType,
    MissingAccountId,
    MissingCourseId,
    NotSubscriptionInvoice,
    UnsupportedCheckoutMode,
    UnknownSubscription(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::UnrecognizedEventType => write!(f, "unrecognized event type"),
            SkipReason::MissingAccountId => write!(f, "no account id in metadata"),
            SkipReason::MissingCourseId => write!(f, "no course id in metadata"),
            SkipReason::NotSubscriptionInvoice => write!(f, "invoice not attached to a subscription"),
            SkipReason::UnsupportedCheckoutMode => write!(f, "checkout mode not handled"),
            SkipReason::UnknownSubscription(id) => write!(f, "no local subscription {}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied(Vec<Effect>),
    Skipped(SkipReason),
}

impl ReconcileOutcome {
    pub fn effects(&self) -> &[Effect] {
        match self {
            ReconcileOutcome::Applied(effects) => effects,
            ReconcileOutcome::Skipped(_) => &[],
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ReconcileOutcome::Skipped(_))
    }
}

fn timestamp(field: &str, secs: i64) -> BillingResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(secs)
        .map_err(|_| BillingError::missing(format!("{} (out of range: {})", field, secs)))
}

fn optional_timestamp(field: &str, secs: Option<i64>) -> BillingResult<Option<OffsetDateTime>> {
    secs.map(|s| timestamp(field, s)).transpose()
}

fn subscription_state(subscription: &SubscriptionObject) -> BillingResult<SubscriptionState> {
    let (period_start, period_end) = subscription.current_period()?;
    Ok(SubscriptionState {
        status: SubscriptionStatus::from_provider(&subscription.status)?,
        current_period_start: timestamp("current_period_start", period_start)?,
        current_period_end: timestamp("current_period_end", period_end)?,
        cancel_at_period_end: subscription.cancel_at_period_end,
        canceled_at: optional_timestamp("canceled_at", subscription.canceled_at)?,
        metadata: metadata_json(Some(&subscription.metadata)),
    })
}

fn subscription_record(
    account_id: &str,
    subscription: &SubscriptionObject,
) -> BillingResult<SubscriptionRecord> {
    let price = subscription.price();
    Ok(SubscriptionRecord {
        account_id: account_id.to_string(),
        stripe_subscription_id: subscription.id.clone(),
        stripe_price_id: price.map(|p| p.id.clone()),
        stripe_product_id: price
            .and_then(|p| p.product.as_ref())
            .map(|product| product.id().to_string()),
        trial_start: optional_timestamp("trial_start", subscription.trial_start)?,
        trial_end: optional_timestamp("trial_end", subscription.trial_end)?,
        state: subscription_state(subscription)?,
    })
}

/// Webhook handler for Stripe events
pub struct WebhookHandler {
    store: Arc<dyn BillingStore>,
    provider: Arc<dyn BillingProvider>,
    verifier: WebhookVerifier,
    audit: AuditLogger,
}

impl WebhookHandler {
    pub fn new(
        store: Arc<dyn BillingStore>,
        provider: Arc<dyn BillingProvider>,
        verifier: WebhookVerifier,
    ) -> Self {
        let audit = AuditLogger::new(store.clone());
        Self {
            store,
            provider,
            verifier,
            audit,
        }
    }

    /// Verify the signature header and parse the event
    pub fn verify_event(&self, payload: &[u8], signature: &str) -> BillingResult<WebhookEvent> {
        self.verifier.verify(payload, signature)
    }

    /// Verify, reconcile and audit one delivery
    pub async fn process(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> BillingResult<(WebhookEvent, ReconcileOutcome)> {
        let event = self.verify_event(payload, signature)?;
        let outcome = self.handle_event(&event).await?;
        Ok((event, outcome))
    }

    /// Reconcile a verified event and write its audit entry
    pub async fn handle_event(&self, event: &WebhookEvent) -> BillingResult<ReconcileOutcome> {
        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            livemode = event.livemode,
            "Processing Stripe webhook event"
        );

        let result = self.dispatch(event).await;

        let entry = match &result {
            Ok(ReconcileOutcome::Applied(effects)) => {
                tracing::info!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    effects = effects.len(),
                    "Webhook event applied"
                );
                AuditEntryBuilder::new(event, AuditOutcome::Applied)
            }
            Ok(ReconcileOutcome::Skipped(reason)) => {
                tracing::info!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    reason = %reason,
                    "Webhook event skipped"
                );
                AuditEntryBuilder::new(event, AuditOutcome::Skipped).detail(reason.to_string())
            }
            Err(e) => {
                tracing::error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %e,
                    "Webhook event processing failed"
                );
                AuditEntryBuilder::new(event, AuditOutcome::Failed).error(e.to_string())
            }
        };
        self.audit.record(entry).await;

        result
    }

    async fn dispatch(&self, event: &WebhookEvent) -> BillingResult<ReconcileOutcome> {
        let Some(kind) = event.kind() else {
            tracing::debug!(event_type = %event.event_type, "Unhandled webhook event type");
            return Ok(ReconcileOutcome::Skipped(SkipReason::UnrecognizedEventType));
        };

        match kind {
            EventKind::CheckoutSessionCompleted => {
                self.handle_checkout_completed(event.object()?).await
            }
            EventKind::SubscriptionCreated | EventKind::SubscriptionUpdated => {
                self.handle_subscription_changed(event.object()?).await
            }
            EventKind::SubscriptionDeleted => {
                self.handle_subscription_deleted(event.object()?).await
            }
            EventKind::InvoicePaymentSucceeded => {
                self.handle_invoice_payment(event.object()?, PaymentStatus::Succeeded)
                    .await
            }
            EventKind::InvoicePaymentFailed => {
                self.handle_invoice_payment(event.object()?, PaymentStatus::Failed)
                    .await
            }
            EventKind::PaymentIntentSucceeded => {
                self.handle_payment_intent(event.object()?, PaymentStatus::Succeeded)
                    .await
            }
            EventKind::PaymentIntentFailed => {
                self.handle_payment_intent(event.object()?, PaymentStatus::Failed)
                    .await
            }
        }
    }

    async fn notify(&self, notification: NewNotification) -> BillingResult<Effect> {
        self.store.create_notification(&notification).await?;
        Ok(Effect::NotificationCreated {
            account_id: notification.account_id,
            title: notification.title,
        })
    }

    async fn handle_checkout_completed(
        &self,
        session: CheckoutSessionObject,
    ) -> BillingResult<ReconcileOutcome> {
        match session.mode {
            Some(CheckoutMode::Subscription) => self.handle_subscription_checkout(session).await,
            Some(CheckoutMode::Payment) => self.handle_payment_checkout(session).await,
            _ => Ok(ReconcileOutcome::Skipped(SkipReason::UnsupportedCheckoutMode)),
        }
    }

    async fn handle_subscription_checkout(
        &self,
        session: CheckoutSessionObject,
    ) -> BillingResult<ReconcileOutcome> {
        let subscription_id = session
            .subscription
            .as_ref()
            .map(|s| s.id().to_string())
            .ok_or_else(|| BillingError::missing("subscription"))?;
        let account_id = metadata_value(session.metadata.as_ref(), ACCOUNT_ID_KEY)
            .ok_or_else(|| BillingError::missing("metadata.userId"))?;

        // The embedded session can lag behind; read the live subscription
        let subscription = self.provider.retrieve_subscription(&subscription_id).await?;
        let record = subscription_record(account_id, &subscription)?;
        self.store.upsert_subscription(&record).await?;

        tracing::info!(
            session_id = %session.id,
            subscription_id = %subscription_id,
            account_id = %account_id,
            status = %record.state.status,
            "Subscription activated from checkout"
        );

        let notified = self
            .notify(notifications::subscription_activated(account_id))
            .await?;

        Ok(ReconcileOutcome::Applied(vec![
            Effect::SubscriptionUpserted { subscription_id },
            notified,
        ]))
    }

    async fn handle_payment_checkout(
        &self,
        session: CheckoutSessionObject,
    ) -> BillingResult<ReconcileOutcome> {
        let metadata = session.metadata.as_ref();
        let Some(course_id) = metadata_value(metadata, COURSE_ID_KEY) else {
            return Ok(ReconcileOutcome::Skipped(SkipReason::MissingCourseId));
        };
        let Some(account_id) = metadata_value(metadata, ACCOUNT_ID_KEY) else {
            return Ok(ReconcileOutcome::Skipped(SkipReason::MissingAccountId));
        };

        let line_items = self.provider.list_checkout_line_items(&session.id).await?;
        tracing::debug!(
            session_id = %session.id,
            line_items = line_items.len(),
            "Checkout line items retrieved"
        );

        let amount_total = session
            .amount_total
            .ok_or_else(|| BillingError::missing("amount_total"))?;
        let currency = session
            .currency
            .clone()
            .ok_or_else(|| BillingError::missing("currency"))?;

        let mut effects = Vec::with_capacity(2);

        if self.store.create_enrollment(account_id, course_id).await? {
            tracing::info!(
                account_id = %account_id,
                course_id = %course_id,
                "Course enrollment created"
            );
            effects.push(Effect::EnrollmentCreated {
                account_id: account_id.to_string(),
                course_id: course_id.to_string(),
            });
        } else {
            effects.push(Effect::EnrollmentExisted {
                account_id: account_id.to_string(),
                course_id: course_id.to_string(),
            });
        }

        let payment_id = session
            .payment_intent
            .as_ref()
            .map(|pi| pi.id().to_string())
            .unwrap_or_else(|| session.id.clone());

        let payment = PaymentRecord {
            account_id: account_id.to_string(),
            stripe_payment_id: payment_id.clone(),
            stripe_invoice_id: None,
            amount: minor_to_major(amount_total),
            currency,
            status: PaymentStatus::Succeeded,
            description: Some(format!("Course purchase: {}", course_id)),
            metadata: metadata_json(metadata),
        };
        self.store.upsert_payment(&payment).await?;
        effects.push(Effect::PaymentRecorded {
            payment_id,
            status: PaymentStatus::Succeeded,
        });

        Ok(ReconcileOutcome::Applied(effects))
    }

    async fn handle_subscription_changed(
        &self,
        subscription: SubscriptionObject,
    ) -> BillingResult<ReconcileOutcome> {
        let effect = Effect::SubscriptionUpserted {
            subscription_id: subscription.id.clone(),
        };

        match metadata_value(Some(&subscription.metadata), ACCOUNT_ID_KEY) {
            Some(account_id) => {
                let record = subscription_record(account_id, &subscription)?;
                self.store.upsert_subscription(&record).await?;
            }
            None => {
                let state = subscription_state(&subscription)?;
                if !self
                    .store
                    .refresh_subscription(&subscription.id, &state)
                    .await?
                {
                    tracing::warn!(
                        subscription_id = %subscription.id,
                        "Subscription without account id and no local row"
                    );
                    return Ok(ReconcileOutcome::Skipped(SkipReason::MissingAccountId));
                }
            }
        }

        tracing::info!(
            subscription_id = %subscription.id,
            status = %subscription.status,
            "Subscription synced"
        );

        Ok(ReconcileOutcome::Applied(vec![effect]))
    }

    async fn handle_subscription_deleted(
        &self,
        subscription: SubscriptionObject,
    ) -> BillingResult<ReconcileOutcome> {
        let Some(owner) = self
            .store
            .cancel_subscription(&subscription.id, OffsetDateTime::now_utc())
            .await?
        else {
            tracing::warn!(
                subscription_id = %subscription.id,
                "Deleted subscription has no local row"
            );
            return Ok(ReconcileOutcome::Skipped(SkipReason::UnknownSubscription(
                subscription.id,
            )));
        };

        let account_id = metadata_value(Some(&subscription.metadata), ACCOUNT_ID_KEY)
            .map(str::to_string)
            .unwrap_or(owner);

        tracing::info!(
            subscription_id = %subscription.id,
            account_id = %account_id,
            "Subscription canceled"
        );

        let notified = self
            .notify(notifications::subscription_canceled(&account_id))
            .await?;

        Ok(ReconcileOutcome::Applied(vec![
            Effect::SubscriptionCanceled {
                subscription_id: subscription.id,
            },
            notified,
        ]))
    }

    async fn handle_invoice_payment(
        &self,
        invoice: InvoiceObject,
        status: PaymentStatus,
    ) -> BillingResult<ReconcileOutcome> {
        let Some(subscription_id) = invoice.subscription.as_ref().map(|s| s.id().to_string())
        else {
            return Ok(ReconcileOutcome::Skipped(SkipReason::NotSubscriptionInvoice));
        };
        let Some(account_id) = metadata_value(invoice.metadata.as_ref(), ACCOUNT_ID_KEY) else {
            return Ok(ReconcileOutcome::Skipped(SkipReason::MissingAccountId));
        };

        let amount = match status {
            PaymentStatus::Succeeded => invoice.amount_paid,
            PaymentStatus::Failed => invoice.amount_due,
        };
        let payment_id = invoice
            .payment_intent
            .as_ref()
            .map(|pi| pi.id().to_string())
            .unwrap_or_else(|| invoice.id.clone());

        let payment = PaymentRecord {
            account_id: account_id.to_string(),
            stripe_payment_id: payment_id.clone(),
            stripe_invoice_id: Some(invoice.id.clone()),
            amount: minor_to_major(amount),
            currency: invoice.currency.clone(),
            status,
            description: invoice.description.clone(),
            metadata: metadata_json(invoice.metadata.as_ref()),
        };
        self.store.upsert_payment(&payment).await?;

        tracing::info!(
            invoice_id = %invoice.id,
            subscription_id = %subscription_id,
            status = %status,
            amount = %payment.amount,
            "Invoice payment recorded"
        );

        let mut effects = vec![Effect::PaymentRecorded { payment_id, status }];

        if status == PaymentStatus::Failed {
            effects.push(self.notify(notifications::payment_failed(account_id)).await?);

            if self
                .store
                .mark_subscription_past_due(&subscription_id)
                .await?
            {
                effects.push(Effect::SubscriptionPastDue { subscription_id });
            } else {
                tracing::warn!(
                    subscription_id = %subscription_id,
                    "Failed invoice references unknown subscription"
                );
            }
        }

        Ok(ReconcileOutcome::Applied(effects))
    }

    async fn handle_payment_intent(
        &self,
        intent: PaymentIntentObject,
        status: PaymentStatus,
    ) -> BillingResult<ReconcileOutcome> {
        let Some(account_id) = metadata_value(Some(&intent.metadata), ACCOUNT_ID_KEY) else {
            return Ok(ReconcileOutcome::Skipped(SkipReason::MissingAccountId));
        };

        let payment = PaymentRecord {
            account_id: account_id.to_string(),
            stripe_payment_id: intent.id.clone(),
            stripe_invoice_id: None,
            amount: minor_to_major(intent.amount),
            currency: intent.currency.clone(),
            status,
            description: intent.description.clone(),
            metadata: metadata_json(Some(&intent.metadata)),
        };
        self.store.upsert_payment(&payment).await?;

        tracing::info!(
            payment_intent_id = %intent.id,
            status = %status,
            "Payment intent recorded"
        );

        Ok(ReconcileOutcome::Applied(vec![Effect::PaymentRecorded {
            payment_id: intent.id,
            status,
        }]))
    }
}
