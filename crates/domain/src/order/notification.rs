//! Asynchronous payment notifications from the gateway.

use serde::{Deserialize, Serialize};

use super::PaymentStatus;

/// Webhook body posted by the payment gateway.
///
/// `order_id` carries the transaction number the charge was created with.
/// Fields the service does not act on are kept for logging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentNotification {
    pub transaction_type: String,
    pub transaction_time: String,
    pub transaction_status: String,
    pub transaction_id: String,
    pub status_message: String,
    pub status_code: String,
    pub signature_key: String,
    pub settlement_time: String,
    pub payment_type: String,
    pub order_id: String,
    pub merchant_id: String,
    pub gross_amount: String,
    pub fraud_status: String,
    pub currency: String,
}

impl PaymentNotification {
    /// Maps the gateway status to the payment status it implies, if any.
    ///
    /// `None` means the notification carries no state change (e.g. `pending`,
    /// or a capture still under fraud review).
    pub fn resolved_status(&self) -> Option<PaymentStatus> {
        match self.transaction_status.as_str() {
            "capture" if self.fraud_status == "accept" => Some(PaymentStatus::Success),
            "settlement" => Some(PaymentStatus::Success),
            "cancel" | "deny" | "expire" => Some(PaymentStatus::Expired),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(status: &str, fraud: &str) -> PaymentNotification {
        PaymentNotification {
            transaction_status: status.into(),
            fraud_status: fraud.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_settlement_and_accepted_capture_are_success() {
        assert_eq!(
            notification("settlement", "").resolved_status(),
            Some(PaymentStatus::Success)
        );
        assert_eq!(
            notification("capture", "accept").resolved_status(),
            Some(PaymentStatus::Success)
        );
    }

    #[test]
    fn test_capture_under_review_has_no_effect() {
        assert_eq!(notification("capture", "challenge").resolved_status(), None);
    }

    #[test]
    fn test_cancellations_expire() {
        for status in ["cancel", "deny", "expire"] {
            assert_eq!(
                notification(status, "").resolved_status(),
                Some(PaymentStatus::Expired)
            );
        }
    }

    #[test]
    fn test_pending_has_no_effect() {
        assert_eq!(notification("pending", "").resolved_status(), None);
    }

    #[test]
    fn test_deserializes_partial_body() {
        let n: PaymentNotification = serde_json::from_str(
            r#"{"order_id":"abc","transaction_status":"settlement","issuer":"x"}"#,
        )
        .unwrap();
        assert_eq!(n.order_id, "abc");
        assert!(n.fraud_status.is_empty());
    }
}
