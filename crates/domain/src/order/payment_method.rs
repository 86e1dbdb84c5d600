//! Payment methods and the gateway instrument they resolve to.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{Money, OrderError, PaymentMethodId};

/// How a payment method's merchant discount rate is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MdrType {
    /// `mdr` is a percentage of the order amount.
    Percentage,
    /// `mdr` is a flat amount in whole currency units.
    Fixed,
}

impl FromStr for MdrType {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "percentage" => Ok(MdrType::Percentage),
            "fixed" => Ok(MdrType::Fixed),
            other => Err(OrderError::UnknownMdrType(other.to_string())),
        }
    }
}

impl MdrType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MdrType::Percentage => "percentage",
            MdrType::Fixed => "fixed",
        }
    }
}

/// A configured payment method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: PaymentMethodId,
    pub name: String,
    pub mdr: f64,
    pub mdr_type: MdrType,
}

impl PaymentMethod {
    /// Resolves the gateway instrument this method charges through.
    pub fn payment_type(&self) -> Result<PaymentType, OrderError> {
        PaymentType::from_method_name(&self.name)
    }

    /// Merchant fee for an order of `amount`.
    pub fn fee_for(&self, amount: Money) -> Money {
        match self.mdr_type {
            MdrType::Percentage => amount.percentage(self.mdr),
            MdrType::Fixed => Money::from_decimal(self.mdr),
        }
    }
}

/// Gateway payment instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    /// QR code; the redemption payload is a scannable code.
    Qris,
    /// E-wallet deeplink.
    Gopay,
    /// Virtual account; the redemption payload is the account number.
    BankTransfer,
}

impl PaymentType {
    /// Maps a payment method name (case-insensitive) to its instrument.
    pub fn from_method_name(name: &str) -> Result<Self, OrderError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "qris" => Ok(PaymentType::Qris),
            "gopay" => Ok(PaymentType::Gopay),
            "bank_transfer" | "bank transfer" | "virtual account" => Ok(PaymentType::BankTransfer),
            _ => Err(OrderError::UnsupportedPaymentMethod(name.to_string())),
        }
    }

    /// Gateway wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Qris => "qris",
            PaymentType::Gopay => "gopay",
            PaymentType::BankTransfer => "bank_transfer",
        }
    }
}

impl std::fmt::Display for PaymentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
