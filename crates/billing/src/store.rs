//! Persistence of reconciled billing records
//!
//! Every write the reconciler makes goes through [`BillingStore`]. Writes are
//! keyed on the provider's natural ids and are idempotent, which is the only
//! concurrency protection redelivered or concurrent events get.

use async_trait::async_trait;
use rust_decimal::Decimal;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::status::{NotificationType, PaymentStatus, SubscriptionStatus};

/// Fields of a subscription that follow the provider on every update
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionState {
    pub status: SubscriptionStatus,
    pub current_period_start: OffsetDateTime,
    pub current_period_end: OffsetDateTime,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<OffsetDateTime>,
    pub metadata: serde_json::Value,
}

/// Full subscription as inserted the first time it is seen
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRecord {
    pub account_id: String,
    pub stripe_subscription_id: String,
    pub stripe_price_id: Option<String>,
    pub stripe_product_id: Option<String>,
    pub trial_start: Option<OffsetDateTime>,
    pub trial_end: Option<OffsetDateTime>,
    pub state: SubscriptionState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRecord {
    pub account_id: String,
    pub stripe_payment_id: String,
    pub stripe_invoice_id: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub description: Option<String>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub account_id: String,
    pub title: String,
    pub message: String,
    pub notification_type: NotificationType,
    pub action_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub account_id: Option<String>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub metadata: serde_json::Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Local account and its provider customer link
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct AccountRow {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub stripe_customer_id: Option<String>,
}

/// Stored subscription row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SubscriptionRow {
    pub id: Uuid,
    pub user_id: String,
    pub stripe_subscription_id: String,
    pub stripe_price_id: Option<String>,
    pub stripe_product_id: Option<String>,
    pub status: String,
    pub current_period_start: OffsetDateTime,
    pub current_period_end: OffsetDateTime,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<OffsetDateTime>,
    pub trial_start: Option<OffsetDateTime>,
    pub trial_end: Option<OffsetDateTime>,
    pub ended_at: Option<OffsetDateTime>,
    pub metadata: serde_json::Value,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Stored payment row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PaymentRow {
    pub id: Uuid,
    pub user_id: String,
    pub stripe_payment_id: String,
    pub stripe_invoice_id: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub status: String,
    pub description: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[async_trait]
pub trait BillingStore: Send + Sync {
    /// Insert the subscription, or refresh its mutable state if the
    /// external subscription id already exists. Identity fields and the
    /// trial window are only written on insert.
    async fn upsert_subscription(&self, record: &SubscriptionRecord) -> BillingResult<()>;

    /// Refresh the mutable state of an existing subscription.
    /// Returns `false` when no row matched.
    async fn refresh_subscription(
        &self,
        stripe_subscription_id: &str,
        state: &SubscriptionState,
    ) -> BillingResult<bool>;

    /// Mark a subscription canceled and ended. Returns the owning account
    /// when a row matched.
    async fn cancel_subscription(
        &self,
        stripe_subscription_id: &str,
        ended_at: OffsetDateTime,
    ) -> BillingResult<Option<String>>;

    /// Returns `false` when no row matched.
    async fn mark_subscription_past_due(&self, stripe_subscription_id: &str)
        -> BillingResult<bool>;

    /// Insert the payment, or converge an existing one to the new status.
    /// Amount, currency and description never change after insert; an
    /// invoice id is attached if the row did not have one yet.
    async fn upsert_payment(&self, record: &PaymentRecord) -> BillingResult<()>;

    /// Returns `true` when a new enrollment was created.
    async fn create_enrollment(&self, account_id: &str, course_id: &str) -> BillingResult<bool>;

    async fn create_notification(&self, notification: &NewNotification) -> BillingResult<()>;

    async fn append_audit_entry(&self, entry: &NewAuditEntry) -> BillingResult<()>;

    async fn find_account(&self, account_id: &str) -> BillingResult<Option<AccountRow>>;

    /// Link a provider customer to the account unless one is already linked.
    /// Returns the customer id stored afterwards, or `None` when the account
    /// does not exist.
    async fn link_customer(
        &self,
        account_id: &str,
        customer_id: &str,
    ) -> BillingResult<Option<String>>;

    async fn find_subscription(
        &self,
        stripe_subscription_id: &str,
    ) -> BillingResult<Option<SubscriptionRow>>;

    async fn find_payment(&self, stripe_payment_id: &str) -> BillingResult<Option<PaymentRow>>;

    /// Round-trip to the backing store, used by health checks
    async fn ping(&self) -> BillingResult<()>;
}

#[cfg(any(test, feature = "test-utils"))]
pub use memory::{AuditEntryRow, EnrollmentRow, InMemoryBillingStore, NotificationRow};

#[cfg(any(test, feature = "test-utils"))]
mod memory {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use tokio::sync::RwLock;

    use super::*;
    use crate::error::BillingError;
    use crate::status::EnrollmentStatus;

    #[derive(Debug, Clone)]
    pub struct EnrollmentRow {
        pub id: Uuid,
        pub user_id: String,
        pub course_id: String,
        pub status: String,
        pub created_at: OffsetDateTime,
    }

    #[derive(Debug, Clone)]
    pub struct NotificationRow {
        pub id: Uuid,
        pub user_id: String,
        pub title: String,
        pub message: String,
        pub notification_type: String,
        pub action_url: Option<String>,
        pub created_at: OffsetDateTime,
    }

    #[derive(Debug, Clone)]
    pub struct AuditEntryRow {
        pub id: Uuid,
        pub user_id: Option<String>,
        pub action: String,
        pub entity_type: String,
        pub entity_id: String,
        pub metadata: serde_json::Value,
        pub ip_address: Option<String>,
        pub user_agent: Option<String>,
        pub created_at: OffsetDateTime,
    }

    #[derive(Default)]
    struct Tables {
        accounts: HashMap<String, AccountRow>,
        subscriptions: HashMap<String, SubscriptionRow>,
        payments: HashMap<String, PaymentRow>,
        enrollments: HashMap<(String, String), EnrollmentRow>,
        notifications: Vec<NotificationRow>,
        audit_logs: Vec<AuditEntryRow>,
    }

    /// In-memory store with the same conflict semantics as the Postgres one
    #[derive(Clone, Default)]
    pub struct InMemoryBillingStore {
        tables: Arc<RwLock<Tables>>,
        fail_writes: Arc<AtomicBool>,
        fail_audit: Arc<AtomicBool>,
    }

    impl InMemoryBillingStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every reconciliation write fail with a persistence error
        pub fn set_fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        /// Make audit appends fail
        pub fn set_fail_audit(&self, fail: bool) {
            self.fail_audit.store(fail, Ordering::SeqCst);
        }

        fn check_writes(&self) -> BillingResult<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(BillingError::Persistence(
                    "injected write failure".to_string(),
                ));
            }
            Ok(())
        }

        /// Seed an account, as the sign-up flow would
        pub async fn insert_account(&self, id: &str, email: &str, name: Option<&str>) {
            self.tables.write().await.accounts.insert(
                id.to_string(),
                AccountRow {
                    id: id.to_string(),
                    email: email.to_string(),
                    name: name.map(str::to_string),
                    stripe_customer_id: None,
                },
            );
        }

        pub async fn subscriptions(&self) -> Vec<SubscriptionRow> {
            self.tables.read().await.subscriptions.values().cloned().collect()
        }

        pub async fn payments(&self) -> Vec<PaymentRow> {
            self.tables.read().await.payments.values().cloned().collect()
        }

        pub async fn enrollments(&self) -> Vec<EnrollmentRow> {
            self.tables.read().await.enrollments.values().cloned().collect()
        }

        pub async fn notifications(&self) -> Vec<NotificationRow> {
            self.tables.read().await.notifications.clone()
        }

        pub async fn audit_entries(&self) -> Vec<AuditEntryRow> {
            self.tables.read().await.audit_logs.clone()
        }

        /// Count of every row a reconciliation can write, audit log excluded
        pub async fn reconciled_row_count(&self) -> usize {
            let tables = self.tables.read().await;
            tables.subscriptions.len()
                + tables.payments.len()
                + tables.enrollments.len()
                + tables.notifications.len()
        }
    }

    fn apply_state(row: &mut SubscriptionRow, state: &SubscriptionState, now: OffsetDateTime) {
        row.status = state.status.as_db_str().to_string();
        row.current_period_start = state.current_period_start;
        row.current_period_end = state.current_period_end;
        row.cancel_at_period_end = state.cancel_at_period_end;
        row.canceled_at = state.canceled_at;
        row.metadata = state.metadata.clone();
        row.updated_at = now;
    }

    #[async_trait]
    impl BillingStore for InMemoryBillingStore {
        async fn upsert_subscription(&self, record: &SubscriptionRecord) -> BillingResult<()> {
            self.check_writes()?;
            let now = OffsetDateTime::now_utc();
            let mut tables = self.tables.write().await;
            match tables.subscriptions.get_mut(&record.stripe_subscription_id) {
                Some(row) => apply_state(row, &record.state, now),
                None => {
                    let row = SubscriptionRow {
                        id: Uuid::new_v4(),
                        user_id: record.account_id.clone(),
                        stripe_subscription_id: record.stripe_subscription_id.clone(),
                        stripe_price_id: record.stripe_price_id.clone(),
                        stripe_product_id: record.stripe_product_id.clone(),
                        status: record.state.status.as_db_str().to_string(),
                        current_period_start: record.state.current_period_start,
                        current_period_end: record.state.current_period_end,
                        cancel_at_period_end: record.state.cancel_at_period_end,
                        canceled_at: record.state.canceled_at,
                        trial_start: record.trial_start,
                        trial_end: record.trial_end,
                        ended_at: None,
                        metadata: record.state.metadata.clone(),
                        created_at: now,
                        updated_at: now,
                    };
                    tables
                        .subscriptions
                        .insert(record.stripe_subscription_id.clone(), row);
                }
            }
            Ok(())
        }

        async fn refresh_subscription(
            &self,
            stripe_subscription_id: &str,
            state: &SubscriptionState,
        ) -> BillingResult<bool> {
            self.check_writes()?;
            let now = OffsetDateTime::now_utc();
            let mut tables = self.tables.write().await;
            Ok(match tables.subscriptions.get_mut(stripe_subscription_id) {
                Some(row) => {
                    apply_state(row, state, now);
                    true
                }
                None => false,
            })
        }

        async fn cancel_subscription(
            &self,
            stripe_subscription_id: &str,
            ended_at: OffsetDateTime,
        ) -> BillingResult<Option<String>> {
            self.check_writes()?;
            let mut tables = self.tables.write().await;
            Ok(tables
                .subscriptions
                .get_mut(stripe_subscription_id)
                .map(|row| {
                    row.status = SubscriptionStatus::Canceled.as_db_str().to_string();
                    row.ended_at = Some(ended_at);
                    row.updated_at = OffsetDateTime::now_utc();
                    row.user_id.clone()
                }))
        }

        async fn mark_subscription_past_due(
            &self,
            stripe_subscription_id: &str,
        ) -> BillingResult<bool> {
            self.check_writes()?;
            let mut tables = self.tables.write().await;
            Ok(match tables.subscriptions.get_mut(stripe_subscription_id) {
                Some(row) => {
                    row.status = SubscriptionStatus::PastDue.as_db_str().to_string();
                    row.updated_at = OffsetDateTime::now_utc();
                    true
                }
                None => false,
            })
        }

        async fn upsert_payment(&self, record: &PaymentRecord) -> BillingResult<()> {
            self.check_writes()?;
            let now = OffsetDateTime::now_utc();
            let mut tables = self.tables.write().await;
            match tables.payments.get_mut(&record.stripe_payment_id) {
                Some(row) => {
                    row.status = record.status.as_db_str().to_string();
                    if row.stripe_invoice_id.is_none() {
                        row.stripe_invoice_id = record.stripe_invoice_id.clone();
                    }
                    row.updated_at = now;
                }
                None => {
                    let row = PaymentRow {
                        id: Uuid::new_v4(),
                        user_id: record.account_id.clone(),
                        stripe_payment_id: record.stripe_payment_id.clone(),
                        stripe_invoice_id: record.stripe_invoice_id.clone(),
                        amount: record.amount,
                        currency: record.currency.clone(),
                        status: record.status.as_db_str().to_string(),
                        description: record.description.clone(),
                        metadata: record.metadata.clone(),
                        created_at: now,
                        updated_at: now,
                    };
                    tables.payments.insert(record.stripe_payment_id.clone(), row);
                }
            }
            Ok(())
        }

        async fn create_enrollment(
            &self,
            account_id: &str,
            course_id: &str,
        ) -> BillingResult<bool> {
            self.check_writes()?;
            let key = (account_id.to_string(), course_id.to_string());
            let mut tables = self.tables.write().await;
            if tables.enrollments.contains_key(&key) {
                return Ok(false);
            }
            tables.enrollments.insert(
                key,
                EnrollmentRow {
                    id: Uuid::new_v4(),
                    user_id: account_id.to_string(),
                    course_id: course_id.to_string(),
                    status: EnrollmentStatus::Active.as_db_str().to_string(),
                    created_at: OffsetDateTime::now_utc(),
                },
            );
            Ok(true)
        }

        async fn create_notification(&self, notification: &NewNotification) -> BillingResult<()> {
            self.check_writes()?;
            self.tables.write().await.notifications.push(NotificationRow {
                id: Uuid::new_v4(),
                user_id: notification.account_id.clone(),
                title: notification.title.clone(),
                message: notification.message.clone(),
                notification_type: notification.notification_type.as_db_str().to_string(),
                action_url: notification.action_url.clone(),
                created_at: OffsetDateTime::now_utc(),
            });
            Ok(())
        }

        async fn append_audit_entry(&self, entry: &NewAuditEntry) -> BillingResult<()> {
            if self.fail_audit.load(Ordering::SeqCst) {
                return Err(BillingError::Persistence(
                    "injected audit failure".to_string(),
                ));
            }
            self.tables.write().await.audit_logs.push(AuditEntryRow {
                id: Uuid::new_v4(),
                user_id: entry.account_id.clone(),
                action: entry.action.clone(),
                entity_type: entry.entity_type.clone(),
                entity_id: entry.entity_id.clone(),
                metadata: entry.metadata.clone(),
                ip_address: entry.ip_address.clone(),
                user_agent: entry.user_agent.clone(),
                created_at: OffsetDateTime::now_utc(),
            });
            Ok(())
        }

        async fn find_account(&self, account_id: &str) -> BillingResult<Option<AccountRow>> {
            Ok(self.tables.read().await.accounts.get(account_id).cloned())
        }

        async fn link_customer(
            &self,
            account_id: &str,
            customer_id: &str,
        ) -> BillingResult<Option<String>> {
            self.check_writes()?;
            let mut tables = self.tables.write().await;
            Ok(tables.accounts.get_mut(account_id).map(|account| {
                account
                    .stripe_customer_id
                    .get_or_insert_with(|| customer_id.to_string())
                    .clone()
            }))
        }

        async fn find_subscription(
            &self,
            stripe_subscription_id: &str,
        ) -> BillingResult<Option<SubscriptionRow>> {
            Ok(self
                .tables
                .read()
                .await
                .subscriptions
                .get(stripe_subscription_id)
                .cloned())
        }

        async fn find_payment(&self, stripe_payment_id: &str) -> BillingResult<Option<PaymentRow>> {
            Ok(self
                .tables
                .read()
                .await
                .payments
                .get(stripe_payment_id)
                .cloned())
        }

        async fn ping(&self) -> BillingResult<()> {
            Ok(())
        }
    }
}
