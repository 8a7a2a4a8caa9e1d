//! HTTP routes

pub mod billing;
pub mod errors;
pub mod health;
pub mod webhooks;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::auth::require_account;
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let billing = Router::new()
        .route("/api/stripe/checkout", post(billing::create_checkout))
        .route("/api/stripe/portal", post(billing::create_portal))
        .route_layer(middleware::from_fn(require_account));

    Router::new()
        .merge(billing)
        .route("/api/webhooks/stripe", post(webhooks::stripe_webhook))
        .route("/api/health", get(health::health))
        .route("/api/errors", post(errors::report_error))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
        response::Response,
    };
    use medcomply_billing::{
        sign_payload, BillingStore, BillingUrls, InMemoryBillingStore, MockBillingProvider,
        WebhookVerifier,
    };
    use serde_json::{json, Value};
    use time::OffsetDateTime;
    use tower::ServiceExt;

    use super::*;
    use crate::reporting::testing::RecordingReporter;

    const SECRET: &str = "whsec_route_secret";

    struct TestApp {
        router: Router,
        store: InMemoryBillingStore,
        reporter: RecordingReporter,
        provider: MockBillingProvider,
    }

    fn app_with(provider: MockBillingProvider) -> TestApp {
        let store = InMemoryBillingStore::new();
        let reporter = RecordingReporter::default();
        let state = AppState::new(
            Arc::new(store.clone()),
            Arc::new(provider.clone()),
            WebhookVerifier::new(SECRET),
            BillingUrls::from_app_url("https://app.test"),
            Arc::new(reporter.clone()),
            "0.1.0-test",
        );
        TestApp {
            router: create_router(state),
            store,
            reporter,
            provider,
        }
    }

    fn app() -> TestApp {
        app_with(MockBillingProvider::new())
    }

    fn event_body(id: &str, event_type: &str, object: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": id,
            "type": event_type,
            "livemode": false,
            "data": {"object": object}
        }))
        .unwrap()
    }

    fn webhook_request(body: Vec<u8>, signature: Option<String>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/webhooks/stripe")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header("stripe-signature", signature);
        }
        builder.body(Body::from(body)).unwrap()
    }

    fn sign(body: &[u8]) -> String {
        sign_payload(SECRET, OffsetDateTime::now_utc().unix_timestamp(), body).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_webhook_acknowledges_processed_event() {
        let app = app();
        let body = event_body(
            "evt_1",
            "payment_intent.succeeded",
            json!({
                "id": "pi_1",
                "amount": 12000,
                "currency": "usd",
                "metadata": {"userId": "user_123"}
            }),
        );
        let signature = sign(&body);

        let response = app
            .router
            .oneshot(webhook_request(body, Some(signature)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({"received": true}));
        assert_eq!(app.store.payments().await.len(), 1);
        assert_eq!(app.store.audit_entries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_webhook_acknowledges_unrecognized_event() {
        let app = app();
        let body = event_body("evt_2", "product.created", json!({"id": "prod_1"}));
        let signature = sign(&body);

        let response = app
            .router
            .oneshot(webhook_request(body, Some(signature)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(app.store.audit_entries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_webhook_without_signature_is_rejected() {
        let app = app();
        let body = event_body("evt_3", "payment_intent.succeeded", json!({}));

        let response = app
            .router
            .oneshot(webhook_request(body, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await, json!({"error": "Invalid signature"}));
        assert!(app.store.audit_entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_webhook_with_tampered_body_is_rejected() {
        let app = app();
        let body = event_body(
            "evt_4",
            "payment_intent.succeeded",
            json!({"id": "pi_1", "amount": 100, "currency": "usd", "metadata": {"userId": "u"}}),
        );
        let signature = sign(&body);
        let mut tampered = body.clone();
        tampered.extend_from_slice(b" ");

        let response = app
            .router
            .oneshot(webhook_request(tampered, Some(signature)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(app.store.reconciled_row_count().await, 0);
        assert!(app.store.audit_entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_webhook_hard_failure_is_reported_and_retried() {
        let app = app_with(MockBillingProvider::new().failing());
        let body = event_body(
            "evt_5",
            "checkout.session.completed",
            json!({
                "id": "cs_1",
                "mode": "subscription",
                "subscription": "sub_1",
                "metadata": {"userId": "user_123"}
            }),
        );
        let signature = sign(&body);

        let response = app
            .router
            .oneshot(webhook_request(body, Some(signature)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json_body(response).await,
            json!({"error": "Webhook handler failed"})
        );

        let reports = app.reporter.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].1.event_id.as_deref(), Some("evt_5"));
        assert_eq!(
            reports[0].1.event_type.as_deref(),
            Some("checkout.session.completed")
        );

        let audit = app.store.audit_entries().await;
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].metadata["outcome"], "failed");
    }

    #[tokio::test]
    async fn test_webhook_missing_required_field_is_retried() {
        let app = app();
        let body = event_body(
            "evt_6",
            "payment_intent.succeeded",
            json!({"id": "pi_6", "currency": "usd", "metadata": {"userId": "user_123"}}),
        );
        let signature = sign(&body);

        let response = app
            .router
            .oneshot(webhook_request(body, Some(signature)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(app.reporter.reports().len(), 1);
        assert!(app.store.payments().await.is_empty());
    }

    fn billing_request(uri: &str, account_id: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(account_id) = account_id {
            builder = builder.header("x-account-id", account_id);
        }
        builder
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_checkout_returns_hosted_url() {
        let app = app();
        app.store
            .insert_account("user_123", "nurse@clinic.test", None)
            .await;

        let response = app
            .router
            .oneshot(billing_request(
                "/api/stripe/checkout",
                Some("user_123"),
                json!({"priceId": "price_course", "mode": "payment", "courseId": "course_1"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({"url": "https://checkout.stripe.test/cs_mock_1"})
        );
        let sessions = app.provider.checkout_sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].success_url, "https://app.test/dashboard?success=true");

        let audit = app.store.audit_entries().await;
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, "CHECKOUT_SESSION_CREATED");
        assert_eq!(audit[0].metadata["courseId"], "course_1");
    }

    #[tokio::test]
    async fn test_checkout_requires_account_header() {
        let app = app();

        let response = app
            .router
            .oneshot(billing_request(
                "/api/stripe/checkout",
                None,
                json!({"priceId": "price_course"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(app.provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_checkout_rejects_invalid_input() {
        let app = app();
        app.store.insert_account("user_123", "a@b.test", None).await;

        let response = app
            .router
            .oneshot(billing_request(
                "/api/stripe/checkout",
                Some("user_123"),
                json!({"mode": "payment"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await, json!({"error": "Invalid input"}));
    }

    #[tokio::test]
    async fn test_checkout_for_unknown_account_is_404() {
        let app = app();

        let response = app
            .router
            .oneshot(billing_request(
                "/api/stripe/checkout",
                Some("ghost"),
                json!({"priceId": "price_course"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await, json!({"error": "User not found"}));
    }

    #[tokio::test]
    async fn test_portal_without_customer_is_404() {
        let app = app();
        app.store.insert_account("user_123", "a@b.test", None).await;

        let response = app
            .router
            .oneshot(billing_request("/api/stripe/portal", Some("user_123"), json!({})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            json_body(response).await,
            json!({"error": "No billing account found"})
        );
    }

    #[tokio::test]
    async fn test_portal_returns_hosted_url() {
        let app = app();
        app.store.insert_account("user_123", "a@b.test", None).await;
        app.store
            .link_customer("user_123", "cus_existing")
            .await
            .unwrap();

        let response = app
            .router
            .oneshot(billing_request("/api/stripe/portal", Some("user_123"), json!({})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({"url": "https://billing.stripe.test/bps_mock_1"})
        );
        assert_eq!(app.store.audit_entries().await[0].action, "BILLING_PORTAL_ACCESSED");
    }

    #[tokio::test]
    async fn test_portal_provider_failure_is_500() {
        let app = app_with(MockBillingProvider::new().failing());
        app.store.insert_account("user_123", "a@b.test", None).await;
        app.store
            .link_customer("user_123", "cus_existing")
            .await
            .unwrap();

        let response = app
            .router
            .oneshot(billing_request("/api/stripe/portal", Some("user_123"), json!({})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json_body(response).await,
            json!({"error": "Internal server error"})
        );
    }

    #[tokio::test]
    async fn test_health_reports_dependencies() {
        let app = app();

        let response = app
            .router
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], "0.1.0-test");
        let names: Vec<&str> = body["checks"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["database", "stripe"]);
    }

    #[tokio::test]
    async fn test_health_unavailable_when_stripe_down() {
        let app = app_with(MockBillingProvider::new().failing());

        let response = app
            .router
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(response).await["status"], "unhealthy");
    }

    fn error_request(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/errors")
            .header("content-type", "application/json")
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .header("user-agent", "Mozilla/5.0")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_error_report_is_audited() {
        let app = app();

        let response = app
            .router
            .oneshot(error_request(json!({
                "message": "Cannot read properties of undefined",
                "context": {"route": "/dashboard/courses"},
                "severity": "high",
                "category": "javascript"
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({"success": true}));

        let audit = app.store.audit_entries().await;
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, "ERROR_REPORTED");
        assert_eq!(audit[0].entity_type, "ERROR");
        assert!(audit[0].entity_id.starts_with("error_"));
        assert_eq!(audit[0].ip_address.as_deref(), Some("203.0.113.7"));
        assert_eq!(audit[0].user_agent.as_deref(), Some("Mozilla/5.0"));
        assert_eq!(audit[0].metadata["severity"], "high");
    }

    #[tokio::test]
    async fn test_error_report_requires_message_and_context() {
        let app = app();

        let response = app
            .router
            .clone()
            .oneshot(error_request(json!({"message": "boom"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await, json!({"error": "Invalid error data"}));

        let response = app
            .router
            .oneshot(error_request(json!({"context": "checkout"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(app.store.audit_entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_error_report_store_failure_is_500() {
        let app = app();
        app.store.set_fail_audit(true);

        let response = app
            .router
            .oneshot(error_request(json!({"message": "boom", "context": "checkout"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
