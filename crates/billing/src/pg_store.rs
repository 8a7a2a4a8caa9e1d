//! Postgres-backed billing store
//!
//! Upserts use the native `ON CONFLICT` clause against the unique external
//! ids so concurrent or repeated deliveries converge without locking.

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::status::{EnrollmentStatus, SubscriptionStatus};
use crate::store::{
    AccountRow, BillingStore, NewAuditEntry, NewNotification, PaymentRecord, PaymentRow,
    SubscriptionRecord, SubscriptionRow, SubscriptionState,
};

#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn upsert_subscription(&self, record: &SubscriptionRecord) -> BillingResult<()> {
        let state = &record.state;
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, user_id, stripe_subscription_id, stripe_price_id, stripe_product_id,
                status, current_period_start, current_period_end, cancel_at_period_end,
                canceled_at, trial_start, trial_end, metadata, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NOW(), NOW()
            )
            ON CONFLICT (stripe_subscription_id) DO UPDATE SET
                status = EXCLUDED.status,
                current_period_start = EXCLUDED.current_period_start,
                current_period_end = EXCLUDED.current_period_end,
                cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                canceled_at = EXCLUDED.canceled_at,
                metadata = EXCLUDED.metadata,
                updated_at = NOW()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&record.account_id)
        .bind(&record.stripe_subscription_id)
        .bind(&record.stripe_price_id)
        .bind(&record.stripe_product_id)
        .bind(state.status.as_db_str())
        .bind(state.current_period_start)
        .bind(state.current_period_end)
        .bind(state.cancel_at_period_end)
        .bind(state.canceled_at)
        .bind(record.trial_start)
        .bind(record.trial_end)
        .bind(&state.metadata)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn refresh_subscription(
        &self,
        stripe_subscription_id: &str,
        state: &SubscriptionState,
    ) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET
                status = $2,
                current_period_start = $3,
                current_period_end = $4,
                cancel_at_period_end = $5,
                canceled_at = $6,
                metadata = $7,
                updated_at = NOW()
            WHERE stripe_subscription_id = $1
            "#,
        )
        .bind(stripe_subscription_id)
        .bind(state.status.as_db_str())
        .bind(state.current_period_start)
        .bind(state.current_period_end)
        .bind(state.cancel_at_period_end)
        .bind(state.canceled_at)
        .bind(&state.metadata)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn cancel_subscription(
        &self,
        stripe_subscription_id: &str,
        ended_at: OffsetDateTime,
    ) -> BillingResult<Option<String>> {
        let owner: Option<(String,)> = sqlx::query_as(
            r#"
            UPDATE subscriptions
            SET status = $2, ended_at = $3, updated_at = NOW()
            WHERE stripe_subscription_id = $1
            RETURNING user_id
            "#,
        )
        .bind(stripe_subscription_id)
        .bind(SubscriptionStatus::Canceled.as_db_str())
        .bind(ended_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(owner.map(|(user_id,)| user_id))
    }

    async fn mark_subscription_past_due(
        &self,
        stripe_subscription_id: &str,
    ) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = $2, updated_at = NOW()
            WHERE stripe_subscription_id = $1
            "#,
        )
        .bind(stripe_subscription_id)
        .bind(SubscriptionStatus::PastDue.as_db_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn upsert_payment(&self, record: &PaymentRecord) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (
                id, user_id, stripe_payment_id, stripe_invoice_id, amount, currency,
                status, description, metadata, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), NOW()
            )
            ON CONFLICT (stripe_payment_id) DO UPDATE SET
                status = EXCLUDED.status,
                stripe_invoice_id = COALESCE(payments.stripe_invoice_id, EXCLUDED.stripe_invoice_id),
                updated_at = NOW()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&record.account_id)
        .bind(&record.stripe_payment_id)
        .bind(&record.stripe_invoice_id)
        .bind(record.amount)
        .bind(&record.currency)
        .bind(record.status.as_db_str())
        .bind(&record.description)
        .bind(&record.metadata)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_enrollment(&self, account_id: &str, course_id: &str) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO enrollments (id, user_id, course_id, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            ON CONFLICT (user_id, course_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(account_id)
        .bind(course_id)
        .bind(EnrollmentStatus::Active.as_db_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn create_notification(&self, notification: &NewNotification) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, title, message, type, action_url, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&notification.account_id)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.notification_type.as_db_str())
        .bind(&notification.action_url)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_audit_entry(&self, entry: &NewAuditEntry) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, user_id, action, entity_type, entity_id, metadata,
                ip_address, user_agent, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&entry.account_id)
        .bind(&entry.action)
        .bind(&entry.entity_type)
        .bind(&entry.entity_id)
        .bind(&entry.metadata)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_account(&self, account_id: &str) -> BillingResult<Option<AccountRow>> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT id, email, name, stripe_customer_id
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn link_customer(
        &self,
        account_id: &str,
        customer_id: &str,
    ) -> BillingResult<Option<String>> {
        // COALESCE keeps the first link when two checkouts race
        let stored: Option<(String,)> = sqlx::query_as(
            r#"
            UPDATE users
            SET stripe_customer_id = COALESCE(stripe_customer_id, $2), updated_at = NOW()
            WHERE id = $1
            RETURNING stripe_customer_id
            "#,
        )
        .bind(account_id)
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(stored.map(|(customer_id,)| customer_id))
    }

    async fn find_subscription(
        &self,
        stripe_subscription_id: &str,
    ) -> BillingResult<Option<SubscriptionRow>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT id, user_id, stripe_subscription_id, stripe_price_id, stripe_product_id,
                   status, current_period_start, current_period_end, cancel_at_period_end,
                   canceled_at, trial_start, trial_end, ended_at, metadata,
                   created_at, updated_at
            FROM subscriptions
            WHERE stripe_subscription_id = $1
            "#,
        )
        .bind(stripe_subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn find_payment(&self, stripe_payment_id: &str) -> BillingResult<Option<PaymentRow>> {
        let row = sqlx::query_as::<_, PaymentRow>(
            r#"
            SELECT id, user_id, stripe_payment_id, stripe_invoice_id, amount, currency,
                   status, description, metadata, created_at, updated_at
            FROM payments
            WHERE stripe_payment_id = $1
            "#,
        )
        .bind(stripe_payment_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn ping(&self) -> BillingResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
