//! Billing error types

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    /// The payload did not carry a valid provider signature. Never retried by us.
    #[error("Webhook signature verification failed")]
    SignatureInvalid,

    /// The signed body is not a JSON event at all
    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    /// A field the event type structurally requires was absent.
    #[error("Missing required field: {0}")]
    MissingRequiredField(String),

    #[error("Billing provider call failed: {0}")]
    ProviderLookupFailed(String),

    #[error("Unknown subscription status: {0}")]
    UnknownSubscriptionStatus(String),

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// The account has never been linked to a provider customer
    #[error("No billing account for {0}")]
    NoBillingAccount(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BillingError {
    pub fn missing(field: impl Into<String>) -> Self {
        BillingError::MissingRequiredField(field.into())
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Persistence(err.to_string())
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::ProviderLookupFailed(err.to_string())
    }
}
