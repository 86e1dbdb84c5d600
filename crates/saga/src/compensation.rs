//! Stock restoration shared by the saga, the webhook and the expiry sweeper.

use domain::ReservationIntent;
use messaging::{BrokerMessage, RetryPublisher};

use crate::error::{Result, SagaError};

/// Publishes `restore_product_stock` for `intent`, keyed by its transaction
/// number so it lands after the original reservation request.
///
/// When every attempt fails the stock stays decremented at the catalog; that
/// is logged as a reconciliation gap and returned as
/// [`SagaError::CompensationFailed`].
#[tracing::instrument(
    name = "saga.compensate",
    skip(publisher, intent),
    fields(transaction_number = %intent.transaction_number)
)]
pub(crate) async fn restore_stock(
    publisher: &RetryPublisher,
    intent: &ReservationIntent,
    reason: &str,
) -> Result<()> {
    metrics::counter!("saga_compensations_total").increment(1);
    let key = intent.transaction_number.to_string();

    match publisher
        .publish_with_retry(&BrokerMessage::RestoreProductStock(intent.clone()), Some(&key))
        .await
    {
        Ok(()) => {
            tracing::info!(reason, lines = intent.order_items.len(), "stock restore published");
            Ok(())
        }
        Err(source) => {
            tracing::error!(
                component = "saga",
                reason,
                error = %source,
                units = intent.total_quantity(),
                "stock restore failed; catalog needs reconciliation"
            );
            Err(SagaError::CompensationFailed {
                transaction_number: intent.transaction_number,
                source,
            })
        }
    }
}
