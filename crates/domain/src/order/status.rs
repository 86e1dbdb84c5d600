//! Payment status state machine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::OrderError;

/// Payment status of an order.
///
/// State transitions:
/// ```text
/// Pending ──┬──► Success
///           └──► Expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Charge created, awaiting payment.
    #[default]
    Pending,

    /// Gateway confirmed the payment (terminal state).
    Success,

    /// Payment deadline passed or the gateway cancelled the charge (terminal state).
    Expired,
}

impl PaymentStatus {
    /// Returns true if an order in this status may move to `next`.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Success)
                | (PaymentStatus::Pending, PaymentStatus::Expired)
        )
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Success | PaymentStatus::Expired)
    }

    /// Returns the status as it is stored and rendered.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "success" => Ok(PaymentStatus::Success),
            "expired" => Ok(PaymentStatus::Expired),
            other => Err(OrderError::UnknownPaymentStatus(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_is_pending() {
        assert_eq!(PaymentStatus::default(), PaymentStatus::Pending);
    }

    #[test]
    fn test_transitions_only_leave_pending() {
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Success));
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Expired));
        assert!(!PaymentStatus::Pending.can_transition_to(PaymentStatus::Pending));
        assert!(!PaymentStatus::Success.can_transition_to(PaymentStatus::Expired));
        assert!(!PaymentStatus::Expired.can_transition_to(PaymentStatus::Success));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Success.is_terminal());
        assert!(PaymentStatus::Expired.is_terminal());
    }

    #[test]
    fn test_parse_and_display() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Success,
            PaymentStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<PaymentStatus>().unwrap(), status);
        }
        assert!("settled".parse::<PaymentStatus>().is_err());
    }

    #[test]
    fn test_serialization_is_lowercase() {
        let json = serde_json::to_string(&PaymentStatus::Expired).unwrap();
        assert_eq!(json, "\"expired\"");
    }
}
