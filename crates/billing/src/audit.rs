//! Append-only audit trail of processed webhook events
//!
//! Exactly one entry is written per event that reaches the reconciler,
//! whatever the outcome. Writing the entry is best-effort: a failure is
//! logged and never undoes reconciliation work already done.

use std::sync::Arc;

use serde_json::json;

use crate::event::WebhookEvent;
use crate::store::{BillingStore, NewAuditEntry};

pub const WEBHOOK_ENTITY_TYPE: &str = "WEBHOOK";
const ACTION_PREFIX: &str = "STRIPE_WEBHOOK_";

/// How processing of an event ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    Applied,
    Skipped,
    Failed,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Applied => "applied",
            AuditOutcome::Skipped => "skipped",
            AuditOutcome::Failed => "failed",
        }
    }
}

/// `STRIPE_WEBHOOK_CUSTOMER.SUBSCRIPTION.UPDATED` and friends
pub fn webhook_action(event_type: &str) -> String {
    format!("{}{}", ACTION_PREFIX, event_type.to_uppercase())
}

/// Builds an audit entry for one webhook event
#[derive(Debug, Clone)]
pub struct AuditEntryBuilder {
    entry: NewAuditEntry,
    outcome: AuditOutcome,
    detail: Option<String>,
    error: Option<String>,
}

impl AuditEntryBuilder {
    pub fn new(event: &WebhookEvent, outcome: AuditOutcome) -> Self {
        Self {
            entry: NewAuditEntry {
                account_id: None,
                action: webhook_action(&event.event_type),
                entity_type: WEBHOOK_ENTITY_TYPE.to_string(),
                entity_id: event.id.clone(),
                metadata: json!({
                    "type": event.event_type,
                    "livemode": event.livemode,
                }),
                ip_address: None,
                user_agent: None,
            },
            outcome,
            detail: None,
            error: None,
        }
    }

    /// Short description of what was applied or why it was skipped
    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn build(mut self) -> NewAuditEntry {
        if let Some(metadata) = self.entry.metadata.as_object_mut() {
            metadata.insert("outcome".to_string(), json!(self.outcome.as_str()));
            if let Some(detail) = self.detail {
                metadata.insert("detail".to_string(), json!(detail));
            }
            if let Some(error) = self.error {
                metadata.insert("error".to_string(), json!(error));
            }
        }
        self.entry
    }
}

/// Writes audit entries through the billing store
#[derive(Clone)]
pub struct AuditLogger {
    store: Arc<dyn BillingStore>,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Append the entry, logging instead of failing
    pub async fn record(&self, entry: AuditEntryBuilder) {
        let entry = entry.build();
        if let Err(e) = self.store.append_audit_entry(&entry).await {
            tracing::warn!(
                entity_id = %entry.entity_id,
                action = %entry.action,
                error = %e,
                "Failed to write webhook audit entry"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventData;
    use crate::store::InMemoryBillingStore;

    fn event() -> WebhookEvent {
        WebhookEvent {
            id: "evt_1".to_string(),
            event_type: "invoice.payment_failed".to_string(),
            livemode: true,
            created: 0,
            data: EventData { object: json!({}) },
        }
    }

    #[test]
    fn test_action_uppercases_event_type() {
        assert_eq!(
            webhook_action("checkout.session.completed"),
            "STRIPE_WEBHOOK_CHECKOUT.SESSION.COMPLETED"
        );
    }

    #[test]
    fn test_builder_records_outcome_and_error() {
        let entry = AuditEntryBuilder::new(&event(), AuditOutcome::Failed)
            .error("Persistence failure: down")
            .build();

        assert_eq!(entry.entity_id, "evt_1");
        assert_eq!(entry.entity_type, "WEBHOOK");
        assert_eq!(entry.metadata["type"], "invoice.payment_failed");
        assert_eq!(entry.metadata["livemode"], true);
        assert_eq!(entry.metadata["outcome"], "failed");
        assert_eq!(entry.metadata["error"], "Persistence failure: down");
    }

    #[tokio::test]
    async fn test_record_swallows_store_failure() {
        let store = InMemoryBillingStore::new();
        store.set_fail_audit(true);
        let logger = AuditLogger::new(Arc::new(store.clone()));

        logger
            .record(AuditEntryBuilder::new(&event(), AuditOutcome::Applied))
            .await;

        assert!(store.audit_entries().await.is_empty());
    }
}
