//! Local status enums and their mapping from provider values
//!
//! Provider status strings are mapped through explicit tables. Anything the
//! table does not know is rejected so an invalid value never reaches the
//! database.

use serde::{Deserialize, Serialize};

use crate::error::{BillingError, BillingResult};

/// Subscription lifecycle status as stored locally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Canceled,
    Trialing,
    Incomplete,
    IncompleteExpired,
    Unpaid,
    Paused,
}

impl SubscriptionStatus {
    /// Map a provider status string (`"past_due"`, `"trialing"`, ...)
    pub fn from_provider(status: &str) -> BillingResult<Self> {
        let mapped = match status {
            "active" => SubscriptionStatus::Active,
            "past_due" => SubscriptionStatus::PastDue,
            "canceled" => SubscriptionStatus::Canceled,
            "trialing" => SubscriptionStatus::Trialing,
            "incomplete" => SubscriptionStatus::Incomplete,
            "incomplete_expired" => SubscriptionStatus::IncompleteExpired,
            "unpaid" => SubscriptionStatus::Unpaid,
            "paused" => SubscriptionStatus::Paused,
            other => return Err(BillingError::UnknownSubscriptionStatus(other.to_string())),
        };
        Ok(mapped)
    }

    pub fn as_db_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "ACTIVE",
            SubscriptionStatus::PastDue => "PAST_DUE",
            SubscriptionStatus::Canceled => "CANCELED",
            SubscriptionStatus::Trialing => "TRIALING",
            SubscriptionStatus::Incomplete => "INCOMPLETE",
            SubscriptionStatus::IncompleteExpired => "INCOMPLETE_EXPIRED",
            SubscriptionStatus::Unpaid => "UNPAID",
            SubscriptionStatus::Paused => "PAUSED",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

/// Terminal outcome of a single charge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Succeeded,
    Failed,
}

impl PaymentStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            PaymentStatus::Succeeded => "SUCCEEDED",
            PaymentStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentStatus {
    Active,
}

impl EnrollmentStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Active => "ACTIVE",
        }
    }
}

/// Severity shown with a user notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    Info,
    Success,
    Warning,
    Error,
}

impl NotificationType {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            NotificationType::Info => "INFO",
            NotificationType::Success => "SUCCESS",
            NotificationType::Warning => "WARNING",
            NotificationType::Error => "ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_known_provider_status_maps() {
        let table = [
            ("active", SubscriptionStatus::Active, "ACTIVE"),
            ("past_due", SubscriptionStatus::PastDue, "PAST_DUE"),
            ("canceled", SubscriptionStatus::Canceled, "CANCELED"),
            ("trialing", SubscriptionStatus::Trialing, "TRIALING"),
            ("incomplete", SubscriptionStatus::Incomplete, "INCOMPLETE"),
            (
                "incomplete_expired",
                SubscriptionStatus::IncompleteExpired,
                "INCOMPLETE_EXPIRED",
            ),
            ("unpaid", SubscriptionStatus::Unpaid, "UNPAID"),
            ("paused", SubscriptionStatus::Paused, "PAUSED"),
        ];

        for (provider, expected, db) in table {
            let status = SubscriptionStatus::from_provider(provider).unwrap();
            assert_eq!(status, expected);
            assert_eq!(status.as_db_str(), db);
        }
    }

    #[test]
    fn test_unknown_status_rejected() {
        let err = SubscriptionStatus::from_provider("frozen").unwrap_err();
        assert!(matches!(err, BillingError::UnknownSubscriptionStatus(s) if s == "frozen"));
    }

    #[test]
    fn test_status_is_case_sensitive() {
        // Uppercased input is not a provider value
        assert!(SubscriptionStatus::from_provider("ACTIVE").is_err());
    }
}
