//! Cart validation and server-side pricing.
//!
//! Prices always come from the catalog; the cart only names products and
//! quantities.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{Money, NewOrderItem, OrderError, ProductId};

/// One requested line of a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl CartLine {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// Catalog price record for a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductPrice {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    /// Stock on hand as reported by the catalog. Informational only.
    pub quantity: i64,
}

/// Largest quantity a single line may carry; stored quantities are `INTEGER`.
pub const MAX_LINE_QUANTITY: u32 = i32::MAX as u32;

/// Rejects an empty cart or any line with a quantity outside
/// `1..=MAX_LINE_QUANTITY`.
pub fn validate_cart(lines: &[CartLine]) -> Result<(), OrderError> {
    if lines.is_empty() {
        return Err(OrderError::EmptyCart);
    }
    if let Some(line) = lines
        .iter()
        .find(|l| !(1..=MAX_LINE_QUANTITY).contains(&l.quantity))
    {
        return Err(OrderError::InvalidQuantity {
            product_id: line.product_id.clone(),
        });
    }
    Ok(())
}

/// Joins cart lines with catalog prices.
///
/// Fails with [`OrderError::ProductNotFound`] for the first requested product
/// the catalog did not return. Extra catalog records are ignored.
pub fn price_cart(
    lines: &[CartLine],
    prices: &[ProductPrice],
) -> Result<Vec<NewOrderItem>, OrderError> {
    let by_id: HashMap<&ProductId, &ProductPrice> = prices.iter().map(|p| (&p.id, p)).collect();

    lines
        .iter()
        .map(|line| {
            let record = by_id
                .get(&line.product_id)
                .ok_or_else(|| OrderError::ProductNotFound(line.product_id.clone()))?;
            Ok(NewOrderItem {
                product_id: line.product_id.clone(),
                quantity: line.quantity,
                unit_amount: record.price,
                product_name: record.name.clone(),
            })
        })
        .collect()
}

/// Sum of quantity * unit amount over all items.
pub fn order_total(items: &[NewOrderItem]) -> Money {
    items.iter().map(NewOrderItem::line_total).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn price(id: &str, cents: i64) -> ProductPrice {
        ProductPrice {
            id: ProductId::new(id),
            name: format!("Product {id}"),
            price: Money::from_cents(cents),
            quantity: 10,
        }
    }

    #[test]
    fn test_empty_cart_is_rejected() {
        assert!(matches!(validate_cart(&[]), Err(OrderError::EmptyCart)));
    }

    #[test]
    fn test_zero_quantity_is_rejected() {
        let lines = vec![CartLine::new("P1", 1), CartLine::new("P2", 0)];
        match validate_cart(&lines) {
            Err(OrderError::InvalidQuantity { product_id }) => assert_eq!(product_id.as_str(), "P2"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_quantity_above_storable_range_is_rejected() {
        assert!(validate_cart(&[CartLine::new("P1", MAX_LINE_QUANTITY)]).is_ok());

        let lines = vec![CartLine::new("P1", MAX_LINE_QUANTITY + 1)];
        let err = validate_cart(&lines).unwrap_err();
        assert!(matches!(err, OrderError::InvalidQuantity { .. }));
        assert!(err.to_string().contains("between 1 and 2147483647"));
    }

    #[test]
    fn test_price_cart_uses_catalog_prices() {
        let lines = vec![CartLine::new("P1", 2)];
        let items = price_cart(&lines, &[price("P1", 1000), price("P9", 1)]).unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].unit_amount.cents(), 1000);
        assert_eq!(items[0].product_name, "Product P1");
        assert_eq!(order_total(&items).cents(), 2000);
    }

    #[test]
    fn test_missing_product_is_reported() {
        let lines = vec![CartLine::new("P1", 1), CartLine::new("P404", 1)];
        let err = price_cart(&lines, &[price("P1", 1000)]).unwrap_err();
        assert!(matches!(err, OrderError::ProductNotFound(id) if id.as_str() == "P404"));
    }

    #[test]
    fn test_total_over_multiple_lines() {
        let lines = vec![CartLine::new("P1", 2), CartLine::new("P2", 3)];
        let items = price_cart(&lines, &[price("P1", 1000), price("P2", 250)]).unwrap();
        assert_eq!(order_total(&items).cents(), 2750);
    }
}
