//! User-facing notifications emitted by billing state changes

use crate::status::NotificationType;
use crate::store::NewNotification;

/// Where users manage payment methods
pub const BILLING_ACTION_URL: &str = "/dashboard/billing";

pub fn subscription_activated(account_id: &str) -> NewNotification {
    NewNotification {
        account_id: account_id.to_string(),
        title: "Subscription Activated".to_string(),
        message: "Your subscription has been successfully activated.".to_string(),
        notification_type: NotificationType::Success,
        action_url: None,
    }
}

pub fn subscription_canceled(account_id: &str) -> NewNotification {
    NewNotification {
        account_id: account_id.to_string(),
        title: "Subscription Canceled".to_string(),
        message: "Your subscription has been canceled.".to_string(),
        notification_type: NotificationType::Warning,
        action_url: None,
    }
}

pub fn payment_failed(account_id: &str) -> NewNotification {
    NewNotification {
        account_id: account_id.to_string(),
        title: "Payment Failed".to_string(),
        message: "Your payment failed. Please update your payment method.".to_string(),
        notification_type: NotificationType::Error,
        action_url: Some(BILLING_ACTION_URL.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_payment_failed_links_to_billing() {
        assert_eq!(subscription_activated("u").action_url, None);
        assert_eq!(subscription_canceled("u").action_url, None);
        assert_eq!(
            payment_failed("u").action_url.as_deref(),
            Some("/dashboard/billing")
        );
        assert_eq!(payment_failed("u").notification_type, NotificationType::Error);
    }
}
