//! Postgres store tests
//!
//! These run against the database named by `DATABASE_URL` and are skipped
//! when it is not set. Every test works on its own freshly generated ids.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use medcomply_billing::{
    BillingStore, PaymentRecord, PaymentStatus, PgBillingStore, SubscriptionRecord,
    SubscriptionState, SubscriptionStatus,
};
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

async fn setup_test_pool() -> Option<PgPool> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping Postgres store test");
        return None;
    };

    let pool = PgPool::connect(&database_url)
        .await
        .expect("Failed to create test pool");
    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");
    Some(pool)
}

async fn insert_user(pool: &PgPool) -> String {
    let id = format!("user_{}", Uuid::new_v4().simple());
    sqlx::query("INSERT INTO users (id, email, name) VALUES ($1, $2, $3)")
        .bind(&id)
        .bind(format!("{}@clinic.test", id))
        .bind("Test Nurse")
        .execute(pool)
        .await
        .expect("Failed to insert user");
    id
}

async fn cleanup(pool: &PgPool, user_id: &str) {
    // Child rows cascade
    sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user_id)
        .execute(pool)
        .await
        .expect("Failed to cleanup");
}

fn at(secs: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(secs).unwrap()
}

fn subscription(user_id: &str, subscription_id: &str) -> SubscriptionRecord {
    SubscriptionRecord {
        account_id: user_id.to_string(),
        stripe_subscription_id: subscription_id.to_string(),
        stripe_price_id: Some("price_pro".to_string()),
        stripe_product_id: Some("prod_pro".to_string()),
        trial_start: Some(at(1_700_000_000)),
        trial_end: Some(at(1_701_000_000)),
        state: SubscriptionState {
            status: SubscriptionStatus::Trialing,
            current_period_start: at(1_700_000_000),
            current_period_end: at(1_702_592_000),
            cancel_at_period_end: false,
            canceled_at: None,
            metadata: json!({"userId": user_id}),
        },
    }
}

fn payment(user_id: &str, payment_id: &str, status: PaymentStatus) -> PaymentRecord {
    PaymentRecord {
        account_id: user_id.to_string(),
        stripe_payment_id: payment_id.to_string(),
        stripe_invoice_id: None,
        amount: Decimal::new(12000, 2),
        currency: "USD".to_string(),
        status,
        description: Some("Course purchase".to_string()),
        metadata: json!({}),
    }
}

#[tokio::test]
async fn test_subscription_upsert_keeps_identity_fields() {
    let Some(pool) = setup_test_pool().await else {
        return;
    };
    let store = PgBillingStore::new(pool.clone());
    let user_id = insert_user(&pool).await;
    let sub_id = format!("sub_{}", Uuid::new_v4().simple());

    store
        .upsert_subscription(&subscription(&user_id, &sub_id))
        .await
        .unwrap();

    let mut redelivered = subscription(&user_id, &sub_id);
    redelivered.stripe_price_id = Some("price_other".to_string());
    redelivered.trial_end = None;
    redelivered.state.status = SubscriptionStatus::Active;
    redelivered.state.current_period_end = at(1_705_000_000);
    redelivered.state.cancel_at_period_end = true;
    store.upsert_subscription(&redelivered).await.unwrap();
    store.upsert_subscription(&redelivered).await.unwrap();

    let row = store.find_subscription(&sub_id).await.unwrap().unwrap();
    assert_eq!(row.status, "ACTIVE");
    assert_eq!(row.current_period_end, at(1_705_000_000));
    assert!(row.cancel_at_period_end);
    assert_eq!(row.stripe_price_id.as_deref(), Some("price_pro"));
    assert_eq!(row.trial_end, Some(at(1_701_000_000)));

    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM subscriptions WHERE stripe_subscription_id = $1")
            .bind(&sub_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(count, 1);

    cleanup(&pool, &user_id).await;
}

#[tokio::test]
async fn test_payment_upsert_only_converges_status() {
    let Some(pool) = setup_test_pool().await else {
        return;
    };
    let store = PgBillingStore::new(pool.clone());
    let user_id = insert_user(&pool).await;
    let payment_id = format!("pi_{}", Uuid::new_v4().simple());

    store
        .upsert_payment(&payment(&user_id, &payment_id, PaymentStatus::Failed))
        .await
        .unwrap();

    let mut retried = payment(&user_id, &payment_id, PaymentStatus::Succeeded);
    retried.amount = Decimal::new(1, 2);
    retried.description = Some("changed".to_string());
    retried.stripe_invoice_id = Some("in_first".to_string());
    store.upsert_payment(&retried).await.unwrap();

    retried.stripe_invoice_id = Some("in_second".to_string());
    store.upsert_payment(&retried).await.unwrap();

    let row = store.find_payment(&payment_id).await.unwrap().unwrap();
    assert_eq!(row.status, "SUCCEEDED");
    assert_eq!(row.amount, Decimal::new(12000, 2));
    assert_eq!(row.description.as_deref(), Some("Course purchase"));
    assert_eq!(row.stripe_invoice_id.as_deref(), Some("in_first"));

    cleanup(&pool, &user_id).await;
}

#[tokio::test]
async fn test_enrollment_is_created_once() {
    let Some(pool) = setup_test_pool().await else {
        return;
    };
    let store = PgBillingStore::new(pool.clone());
    let user_id = insert_user(&pool).await;

    assert!(store.create_enrollment(&user_id, "course_1").await.unwrap());
    assert!(!store.create_enrollment(&user_id, "course_1").await.unwrap());
    assert!(store.create_enrollment(&user_id, "course_2").await.unwrap());

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM enrollments WHERE user_id = $1")
        .bind(&user_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 2);

    cleanup(&pool, &user_id).await;
}

#[tokio::test]
async fn test_status_updates_report_missing_rows() {
    let Some(pool) = setup_test_pool().await else {
        return;
    };
    let store = PgBillingStore::new(pool.clone());
    let user_id = insert_user(&pool).await;
    let unknown = format!("sub_{}", Uuid::new_v4().simple());

    assert!(!store.mark_subscription_past_due(&unknown).await.unwrap());
    assert_eq!(
        store.cancel_subscription(&unknown, at(1_703_000_000)).await.unwrap(),
        None
    );

    let sub_id = format!("sub_{}", Uuid::new_v4().simple());
    store
        .upsert_subscription(&subscription(&user_id, &sub_id))
        .await
        .unwrap();

    assert!(store.mark_subscription_past_due(&sub_id).await.unwrap());
    assert_eq!(
        store.cancel_subscription(&sub_id, at(1_703_000_000)).await.unwrap(),
        Some(user_id.clone())
    );

    let row = store.find_subscription(&sub_id).await.unwrap().unwrap();
    assert_eq!(row.status, "CANCELED");
    assert_eq!(row.ended_at, Some(at(1_703_000_000)));

    cleanup(&pool, &user_id).await;
}

#[tokio::test]
async fn test_customer_link_is_set_once() {
    let Some(pool) = setup_test_pool().await else {
        return;
    };
    let store = PgBillingStore::new(pool.clone());
    let user_id = insert_user(&pool).await;
    let first = format!("cus_{}", Uuid::new_v4().simple());
    let second = format!("cus_{}", Uuid::new_v4().simple());

    assert_eq!(
        store.link_customer(&user_id, &first).await.unwrap(),
        Some(first.clone())
    );
    assert_eq!(
        store.link_customer(&user_id, &second).await.unwrap(),
        Some(first.clone())
    );

    let account = store.find_account(&user_id).await.unwrap().unwrap();
    assert_eq!(account.stripe_customer_id, Some(first));
    assert_eq!(account.name.as_deref(), Some("Test Nurse"));

    assert_eq!(store.link_customer("user_missing", &second).await.unwrap(), None);
    assert_eq!(store.find_account("user_missing").await.unwrap(), None);

    cleanup(&pool, &user_id).await;
}
