//! Operator error reporting
//!
//! Hard webhook failures are handed to an [`ErrorReporter`] before the 5xx
//! goes out. The default reporter emits a structured `tracing` error that the
//! log pipeline alerts on.

use medcomply_billing::BillingError;

/// Context attached to a reported failure
#[derive(Debug, Clone, Default)]
pub struct ReportContext {
    pub event_type: Option<String>,
    pub event_id: Option<String>,
}

pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &BillingError, context: &ReportContext);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn report(&self, error: &BillingError, context: &ReportContext) {
        tracing::error!(
            target: "medcomply::alerts",
            event_type = context.event_type.as_deref().unwrap_or("unknown"),
            event_id = context.event_id.as_deref().unwrap_or("unknown"),
            error = %error,
            "Stripe webhook processing failed"
        );
    }
}
