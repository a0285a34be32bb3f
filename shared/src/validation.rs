//! Validation utilities for ledger inputs

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::PurchaseReceiptItem;

// ============================================================================
// Quantity Validations
// ============================================================================

/// Decimal places kept by the stored quantity and cost columns
pub const QUANTITY_SCALE: u32 = 6;

/// Exclusive upper bound on the magnitude of stored quantities and costs
pub fn quantity_limit() -> Decimal {
    Decimal::from(100_000_000_000_000i64)
}

/// Quantities and costs must fit `NUMERIC(20, 6)` exactly
pub fn validate_quantity_precision(value: Decimal) -> Result<(), &'static str> {
    if value.normalize().scale() > QUANTITY_SCALE {
        return Err("At most six decimal places are supported");
    }
    if value.abs() >= quantity_limit() {
        return Err("Quantity exceeds the supported range");
    }
    Ok(())
}

/// Ledger quantities are magnitudes; direction comes from the movement type
pub fn validate_positive_quantity(quantity: Decimal) -> Result<(), &'static str> {
    if quantity <= Decimal::ZERO {
        return Err("Quantity must be positive");
    }
    validate_quantity_precision(quantity)
}

/// Physical counts and thresholds may be zero but never negative
pub fn validate_non_negative(quantity: Decimal) -> Result<(), &'static str> {
    if quantity < Decimal::ZERO {
        return Err("Quantity cannot be negative");
    }
    validate_quantity_precision(quantity)
}

/// Validate a unit cost when one is supplied
pub fn validate_unit_cost(unit_cost: Option<Decimal>) -> Result<(), &'static str> {
    match unit_cost {
        Some(cost) if cost < Decimal::ZERO => Err("Unit cost cannot be negative"),
        Some(cost) => validate_quantity_precision(cost),
        None => Ok(()),
    }
}

/// Validate minimum stock and reorder point settings
pub fn validate_stock_levels(minimum_stock: Decimal, reorder_point: Decimal) -> Result<(), &'static str> {
    if minimum_stock < Decimal::ZERO {
        return Err("Minimum stock cannot be negative");
    }
    if reorder_point < Decimal::ZERO {
        return Err("Reorder point cannot be negative");
    }
    validate_quantity_precision(minimum_stock)?;
    validate_quantity_precision(reorder_point)
}

// ============================================================================
// Document Validations
// ============================================================================

/// Accepted and rejected units must account for everything received
pub fn validate_receipt_item(item: &PurchaseReceiptItem) -> Result<(), &'static str> {
    if item.quantity_received < Decimal::ZERO
        || item.quantity_accepted < Decimal::ZERO
        || item.quantity_rejected < Decimal::ZERO
    {
        return Err("Receipt quantities cannot be negative");
    }
    validate_quantity_precision(item.quantity_received)?;
    validate_quantity_precision(item.quantity_accepted)?;
    validate_quantity_precision(item.quantity_rejected)?;
    if item.quantity_accepted + item.quantity_rejected != item.quantity_received {
        return Err("Accepted plus rejected quantity must equal received quantity");
    }
    Ok(())
}

/// A transfer must move stock between two different warehouses
pub fn validate_transfer_warehouses(from: Uuid, to: Uuid) -> Result<(), &'static str> {
    if from == to {
        return Err("Source and destination warehouse must differ");
    }
    Ok(())
}

/// Shipped quantity must be positive and within what was requested
pub fn validate_shipped_quantity(requested: Decimal, shipped: Decimal) -> Result<(), &'static str> {
    if shipped <= Decimal::ZERO {
        return Err("Shipped quantity must be positive");
    }
    if shipped > requested {
        return Err("Shipped quantity cannot exceed requested quantity");
    }
    validate_quantity_precision(shipped)
}

/// A receipt line must confirm at least one unit, good or damaged
pub fn validate_receipt_split(received: Decimal, damaged: Decimal) -> Result<(), &'static str> {
    if received < Decimal::ZERO || damaged < Decimal::ZERO {
        return Err("Received and damaged quantities cannot be negative");
    }
    if received + damaged <= Decimal::ZERO {
        return Err("Receipt must confirm a positive quantity");
    }
    validate_quantity_precision(received)?;
    validate_quantity_precision(damaged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn receipt_item(received: &str, accepted: &str, rejected: &str) -> PurchaseReceiptItem {
        PurchaseReceiptItem {
            product_id: Uuid::new_v4(),
            unit_id: Uuid::new_v4(),
            lot_number: None,
            quantity_received: dec(received),
            quantity_accepted: dec(accepted),
            quantity_rejected: dec(rejected),
            unit_cost: None,
        }
    }

    #[test]
    fn test_validate_positive_quantity() {
        assert!(validate_positive_quantity(dec("0.5")).is_ok());
        assert!(validate_positive_quantity(Decimal::ZERO).is_err());
        assert!(validate_positive_quantity(dec("-1")).is_err());
    }

    #[test]
    fn test_validate_non_negative() {
        assert!(validate_non_negative(Decimal::ZERO).is_ok());
        assert!(validate_non_negative(dec("-0.01")).is_err());
    }

    #[test]
    fn test_validate_unit_cost() {
        assert!(validate_unit_cost(None).is_ok());
        assert!(validate_unit_cost(Some(dec("12.50"))).is_ok());
        assert!(validate_unit_cost(Some(dec("-1"))).is_err());
    }

    #[test]
    fn test_validate_receipt_item_balanced() {
        assert!(validate_receipt_item(&receipt_item("10", "8", "2")).is_ok());
        assert!(validate_receipt_item(&receipt_item("10", "10", "0")).is_ok());
    }

    #[test]
    fn test_validate_receipt_item_mismatch() {
        assert!(validate_receipt_item(&receipt_item("10", "8", "1")).is_err());
        assert!(validate_receipt_item(&receipt_item("10", "12", "-2")).is_err());
    }

    #[test]
    fn test_validate_transfer_warehouses() {
        let w = Uuid::new_v4();
        assert!(validate_transfer_warehouses(w, Uuid::new_v4()).is_ok());
        assert!(validate_transfer_warehouses(w, w).is_err());
    }

    #[test]
    fn test_validate_shipped_quantity() {
        assert!(validate_shipped_quantity(dec("20"), dec("20")).is_ok());
        assert!(validate_shipped_quantity(dec("20"), dec("15")).is_ok());
        assert!(validate_shipped_quantity(dec("20"), dec("21")).is_err());
        assert!(validate_shipped_quantity(dec("20"), Decimal::ZERO).is_err());
    }

    #[test]
    fn test_validate_receipt_split() {
        assert!(validate_receipt_split(dec("18"), dec("2")).is_ok());
        assert!(validate_receipt_split(Decimal::ZERO, dec("2")).is_ok());
        assert!(validate_receipt_split(Decimal::ZERO, Decimal::ZERO).is_err());
        assert!(validate_receipt_split(dec("-1"), dec("2")).is_err());
    }

    #[test]
    fn test_validate_stock_levels() {
        assert!(validate_stock_levels(dec("5"), dec("10")).is_ok());
        assert!(validate_stock_levels(dec("-5"), dec("10")).is_err());
        assert!(validate_stock_levels(dec("5"), dec("-1")).is_err());
    }

    #[test]
    fn test_validate_quantity_precision() {
        assert!(validate_quantity_precision(dec("0.000001")).is_ok());
        assert!(validate_quantity_precision(dec("1.500000000")).is_ok());
        assert!(validate_quantity_precision(dec("0.0000006")).is_err());
        assert!(validate_quantity_precision(dec("99999999999999.999999")).is_ok());
        assert!(validate_quantity_precision(dec("100000000000000")).is_err());
        assert!(validate_positive_quantity(Decimal::MAX).is_err());
        assert!(validate_unit_cost(Some(dec("1000000000000000"))).is_err());
        assert!(validate_non_negative(dec("2.1234567")).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_six_places_within_range_is_accepted(
            units in 0i64..100_000_000_000_000i64,
            scale in 0u32..=6,
        ) {
            let quantity = Decimal::new(units, scale);
            prop_assert!(validate_non_negative(quantity).is_ok());
        }

        #[test]
        fn prop_seventh_place_is_rejected(units in 1i64..1_000_000_000i64) {
            // Ending in a non-zero digit keeps the scale after normalizing
            let quantity = Decimal::new(units * 10 + 7, 7);
            prop_assert!(validate_positive_quantity(quantity).is_err());
        }
    }
}
