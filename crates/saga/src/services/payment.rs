//! Payment gateway trait, Midtrans Core API client and in-memory gateway.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::TransactionNumber;
use domain::{Money, NewOrderItem, PaymentType, format_gateway_expiry};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status code the gateway returns when a charge was created.
pub const CHARGE_CREATED: &str = "201";

/// Midtrans sandbox base URL.
pub const MIDTRANS_SANDBOX_URL: &str = "https://api.sandbox.midtrans.com";

/// Errors returned by a [`PaymentGateway`].
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Payment request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The gateway answered with a non-success HTTP status.
    #[error("Payment gateway returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Payment gateway unavailable: {0}")]
    Unavailable(String),
}

impl PaymentError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, PaymentError::Http(e) if e.is_timeout())
    }
}

/// One line of a charge, priced in whole currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChargeItem {
    pub id: String,
    pub price: i64,
    pub quantity: u32,
    pub name: String,
}

impl From<&NewOrderItem> for ChargeItem {
    fn from(item: &NewOrderItem) -> Self {
        ChargeItem {
            id: item.product_id.to_string(),
            price: item.unit_amount.whole_units(),
            quantity: item.quantity,
            name: item.product_name.clone(),
        }
    }
}

/// A charge for one order. The transaction number is the idempotency key.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub transaction_number: TransactionNumber,
    pub payment_type: PaymentType,
    pub gross_amount: Money,
    pub items: Vec<ChargeItem>,
}

/// Gateway answer to a charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeResponse {
    pub status_code: String,
    pub status_message: String,
    pub transaction_id: String,
    /// Payment deadline in the gateway's local time, if one was given.
    pub expiry_time: Option<String>,
    /// What the customer uses to pay: a QR or deeplink URL, or a VA number.
    pub redemption: Option<String>,
}

impl ChargeResponse {
    pub fn is_created(&self) -> bool {
        self.status_code == CHARGE_CREATED
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a charge with the gateway.
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeResponse, PaymentError>;
}

#[derive(Serialize)]
struct TransactionDetails {
    order_id: String,
    gross_amount: i64,
}

#[derive(Serialize)]
struct BankTransferDetails {
    bank: &'static str,
}

#[derive(Serialize)]
struct MidtransChargeBody<'a> {
    payment_type: &'static str,
    transaction_details: TransactionDetails,
    item_details: &'a [ChargeItem],
    #[serde(skip_serializing_if = "Option::is_none")]
    bank_transfer: Option<BankTransferDetails>,
}

impl<'a> MidtransChargeBody<'a> {
    /// The gateway rejects a charge whose gross amount differs from the sum
    /// of its item lines, so the gross is taken from the lines as sent.
    fn new(request: &'a ChargeRequest) -> Self {
        let gross_amount = request
            .items
            .iter()
            .map(|item| item.price * i64::from(item.quantity))
            .sum();
        if gross_amount != request.gross_amount.whole_units() {
            tracing::debug!(
                gross_amount,
                order_amount = %request.gross_amount,
                "charge lines truncated to whole units"
            );
        }

        Self {
            payment_type: request.payment_type.as_str(),
            transaction_details: TransactionDetails {
                order_id: request.transaction_number.to_string(),
                gross_amount,
            },
            item_details: &request.items,
            bank_transfer: matches!(request.payment_type, PaymentType::BankTransfer)
                .then_some(BankTransferDetails { bank: "bca" }),
        }
    }
}

#[derive(Deserialize)]
struct MidtransAction {
    name: String,
    url: String,
}

#[derive(Deserialize)]
struct MidtransVaNumber {
    va_number: String,
}

#[derive(Deserialize)]
struct MidtransChargeResponse {
    status_code: String,
    #[serde(default)]
    status_message: String,
    #[serde(default)]
    transaction_id: String,
    expiry_time: Option<String>,
    #[serde(default)]
    actions: Vec<MidtransAction>,
    #[serde(default)]
    va_numbers: Vec<MidtransVaNumber>,
}

impl MidtransChargeResponse {
    fn redemption(&self, payment_type: PaymentType) -> Option<String> {
        let action = |name: &str| {
            self.actions
                .iter()
                .find(|a| a.name == name)
                .map(|a| a.url.clone())
        };
        match payment_type {
            PaymentType::Qris => action("generate-qr-code"),
            PaymentType::Gopay => action("deeplink-redirect").or_else(|| action("generate-qr-code")),
            PaymentType::BankTransfer => self.va_numbers.first().map(|va| va.va_number.clone()),
        }
    }
}

/// Midtrans Core API client.
pub struct MidtransGateway {
    client: Client,
    base_url: String,
    server_key: String,
}

impl MidtransGateway {
    pub fn new(
        base_url: impl Into<String>,
        server_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, PaymentError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            server_key: server_key.into(),
        })
    }
}

#[async_trait]
impl PaymentGateway for MidtransGateway {
    #[tracing::instrument(
        skip(self, request),
        fields(transaction_number = %request.transaction_number, payment_type = request.payment_type.as_str())
    )]
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeResponse, PaymentError> {
        let body = MidtransChargeBody::new(request);

        let response = self
            .client
            .post(format!("{}/v2/charge", self.base_url))
            .basic_auth(&self.server_key, Some(""))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let parsed: MidtransChargeResponse = response.json().await?;
        tracing::debug!(status_code = %parsed.status_code, "charge answered");

        Ok(ChargeResponse {
            redemption: parsed.redemption(request.payment_type),
            status_code: parsed.status_code,
            status_message: parsed.status_message,
            transaction_id: parsed.transaction_id,
            expiry_time: parsed.expiry_time,
        })
    }
}

#[derive(Debug)]
struct InMemoryPaymentState {
    charges: Vec<ChargeRequest>,
    fail_on_charge: bool,
    status_code: String,
    payment_window: chrono::Duration,
}

impl Default for InMemoryPaymentState {
    fn default() -> Self {
        Self {
            charges: Vec::new(),
            fail_on_charge: false,
            status_code: CHARGE_CREATED.to_string(),
            payment_window: chrono::Duration::minutes(15),
        }
    }
}

/// In-memory gateway for standalone mode and testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<InMemoryPaymentState>>,
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the gateway to fail charge calls.
    pub fn set_fail_on_charge(&self, fail: bool) {
        self.write().fail_on_charge = fail;
    }

    /// Sets the status code returned by charge calls.
    pub fn set_status_code(&self, status_code: &str) {
        self.write().status_code = status_code.to_string();
    }

    /// Sets how long after a charge its payment deadline falls.
    pub fn set_payment_window(&self, window: chrono::Duration) {
        self.write().payment_window = window;
    }

    /// Returns the number of charge calls received.
    pub fn charge_count(&self) -> usize {
        self.read().charges.len()
    }

    /// Returns the most recent charge request.
    pub fn last_charge(&self) -> Option<ChargeRequest> {
        self.read().charges.last().cloned()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, InMemoryPaymentState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, InMemoryPaymentState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeResponse, PaymentError> {
        let mut state = self.write();
        state.charges.push(request.clone());

        if state.fail_on_charge {
            return Err(PaymentError::Unavailable("Payment declined".to_string()));
        }

        let sequence = state.charges.len();
        Ok(ChargeResponse {
            status_code: state.status_code.clone(),
            status_message: "Success, transaction is created".to_string(),
            transaction_id: format!("PAY-{:04}", sequence),
            expiry_time: Some(format_gateway_expiry(Utc::now() + state.payment_window)),
            redemption: Some(format!(
                "https://pay.example/{}/{}",
                request.payment_type.as_str(),
                request.transaction_number
            )),
        })
    }
}
