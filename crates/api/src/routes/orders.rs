//! Order placement, payment notification and order lookup endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::OrderId;
use domain::{Order, PaymentNotification};
use saga::{OrderConfirmation, OrderDetails, OrderSaga, PlaceOrder};
use serde::Serialize;

use super::ApiResponse;
use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub saga: Arc<OrderSaga>,
}

/// Body returned after a payment notification is applied.
#[derive(Serialize)]
pub struct NotificationAck {
    pub transaction_number: String,
    pub payment_status: String,
}

/// POST /orders: price, reserve, charge and persist a new order.
#[tracing::instrument(skip(state, body))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    body: Result<Json<PlaceOrder>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<OrderConfirmation>>), ApiError> {
    let Json(command) = body?;
    let confirmation = state.saga.place_order(command).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success("Order placed", confirmation)),
    ))
}

/// POST /orders/payments/notifications: payment gateway webhook.
#[tracing::instrument(skip(state, body))]
pub async fn payment_notification(
    State(state): State<Arc<AppState>>,
    body: Result<Json<PaymentNotification>, JsonRejection>,
) -> Result<Json<ApiResponse<NotificationAck>>, ApiError> {
    let Json(notification) = body?;
    tracing::info!(
        order_id = %notification.order_id,
        transaction_status = %notification.transaction_status,
        fraud_status = %notification.fraud_status,
        "payment notification received"
    );
    metrics::counter!(
        "payment_notifications_total",
        "transaction_status" => notification.transaction_status.clone()
    )
    .increment(1);

    let order = state.saga.handle_payment_notification(&notification).await?;

    Ok(Json(ApiResponse::success(
        "Notification processed",
        NotificationAck {
            transaction_number: order.transaction_number.to_string(),
            payment_status: order.payment_status.to_string(),
        },
    )))
}

/// GET /orders: every stored order, newest first.
#[tracing::instrument(skip(state))]
pub async fn list(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<Order>>>, ApiError> {
    let orders = state.saga.list_orders().await?;
    Ok(Json(ApiResponse::success("Orders retrieved", orders)))
}

/// GET /orders/{id}: one order with its line items.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<OrderDetails>>, ApiError> {
    let id = parse_order_id(&id)?;
    let details = state.saga.get_order(id).await?;
    Ok(Json(ApiResponse::success("Order retrieved", details)))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse::<i64>()
        .map(OrderId::new)
        .map_err(|e| ApiError::BadRequest(format!("Invalid order id {id:?}: {e}")))
}
