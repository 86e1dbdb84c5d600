//! Integration tests for the order domain.
//!
//! These tests run a cart through the same sequence of pure steps the
//! placement flow uses: validation, pricing, fees, reservation intent and
//! gateway expiry conversion.

use chrono::{Duration, TimeZone, Utc};
use common::TransactionNumber;
use domain::{
    CartLine, MdrType, Money, OrderError, PaymentMethod, PaymentMethodId, PaymentNotification,
    PaymentStatus, PaymentType, ProductId, ProductPrice, ReservationIntent, format_gateway_expiry,
    order_total, parse_gateway_expiry, price_cart, validate_cart,
};

fn catalog() -> Vec<ProductPrice> {
    vec![
        ProductPrice {
            id: ProductId::new("P1"),
            name: "Iced Coffee".to_string(),
            price: Money::from_decimal(10.0),
            quantity: 50,
        },
        ProductPrice {
            id: ProductId::new("P2"),
            name: "Croissant".to_string(),
            price: Money::from_decimal(3.5),
            quantity: 1,
        },
    ]
}

fn qris() -> PaymentMethod {
    PaymentMethod {
        id: PaymentMethodId::new(1),
        name: "QRIS".to_string(),
        mdr: 0.7,
        mdr_type: MdrType::Percentage,
    }
}

mod placement_flow {
    use super::*;

    #[test]
    fn two_units_at_ten_total_twenty() {
        let lines = vec![CartLine::new("P1", 2)];
        validate_cart(&lines).unwrap();

        let items = price_cart(&lines, &catalog()).unwrap();
        let total = order_total(&items);
        assert_eq!(total, Money::from_cents(2000));
        assert_eq!(total.to_string(), "20.00");

        let method = qris();
        assert_eq!(method.payment_type().unwrap(), PaymentType::Qris);
        assert_eq!(method.fee_for(total).cents(), 14);
    }

    #[test]
    fn client_cannot_influence_price() {
        // Cart lines carry no price field; the catalog price is the only source.
        let items = price_cart(&[CartLine::new("P2", 4)], &catalog()).unwrap();
        assert_eq!(items[0].unit_amount, Money::from_cents(350));
        assert_eq!(order_total(&items).cents(), 1400);
    }

    #[test]
    fn reservation_intent_mirrors_the_cart() {
        let txn = TransactionNumber::generate();
        let lines = vec![CartLine::new("P1", 2), CartLine::new("P2", 1)];
        let items = price_cart(&lines, &catalog()).unwrap();

        let intent = ReservationIntent::for_new_items(txn, &items);
        assert_eq!(intent.transaction_number, txn);
        let pairs: Vec<(&str, u32)> = intent
            .order_items
            .iter()
            .map(|l| (l.product_id.as_str(), l.quantity))
            .collect();
        assert_eq!(pairs, vec![("P1", 2), ("P2", 1)]);
    }

    #[test]
    fn unknown_product_fails_before_anything_else() {
        let err = price_cart(&[CartLine::new("P404", 1)], &catalog()).unwrap_err();
        assert!(matches!(err, OrderError::ProductNotFound(_)));
    }
}

mod gateway_expiry {
    use super::*;

    #[test]
    fn fifteen_minute_window_round_trips_through_gateway_format() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        let expiry = now + Duration::minutes(15);

        let reported = format_gateway_expiry(expiry);
        assert_eq!(reported, "2024-06-01 15:15:00");
        assert_eq!(parse_gateway_expiry(&reported).unwrap(), expiry);
    }
}

mod payment_lifecycle {
    use super::*;

    #[test]
    fn settlement_moves_pending_to_success() {
        let n = PaymentNotification {
            transaction_status: "settlement".to_string(),
            ..Default::default()
        };
        let next = n.resolved_status().unwrap();
        assert_eq!(next, PaymentStatus::Success);
        assert!(PaymentStatus::Pending.can_transition_to(next));
    }

    #[test]
    fn terminal_states_do_not_move() {
        let n = PaymentNotification {
            transaction_status: "expire".to_string(),
            ..Default::default()
        };
        let next = n.resolved_status().unwrap();
        assert!(!PaymentStatus::Success.can_transition_to(next));
    }
}
