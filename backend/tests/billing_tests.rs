//! Billing tests
//!
//! Property-based and unit tests for:
//! - line item pricing and document totals
//! - payments against invoices and the resulting status
//! - proforma to tax invoice conversion rules

use lims_backend::error::AppError;
use lims_backend::services::invoice::{apply_payment, check_not_converted};
use proptest::prelude::*;
use rust_decimal::Decimal;
use shared::{
    can_convert_to_tax, compute_totals, round_money, status_after_payment, InvoiceStatus, InvoiceType,
    LineItemInput,
};
use std::str::FromStr;
use tokio_test::assert_ok;

fn dec(value: &str) -> Decimal {
    Decimal::from_str(value).unwrap()
}

fn line(quantity: &str, unit_price: &str, discount: &str, tax: &str) -> LineItemInput {
    LineItemInput {
        description: "Kinematic viscosity at 40°C".to_string(),
        sample_type_id: None,
        quantity: dec(quantity),
        unit_price: dec(unit_price),
        discount_percent: dec(discount),
        tax_percent: dec(tax),
    }
}

// ============================================================================
// Property Test Strategies
// ============================================================================

/// Money amounts with two decimals, 0.00 - 99,999.99
fn money_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..10_000_000).prop_map(|cents| Decimal::new(cents, 2))
}

fn percent_strategy() -> impl Strategy<Value = Decimal> {
    prop_oneof![
        Just(Decimal::ZERO),
        Just(Decimal::from(5)),
        Just(Decimal::from(12)),
        Just(Decimal::from(18)),
        (0i64..=10_000).prop_map(|bp| Decimal::new(bp, 2)),
    ]
}

fn line_strategy() -> impl Strategy<Value = LineItemInput> {
    (1i64..100, money_strategy(), percent_strategy(), percent_strategy()).prop_map(
        |(quantity, unit_price, discount_percent, tax_percent)| LineItemInput {
            description: "Test".to_string(),
            sample_type_id: None,
            quantity: Decimal::from(quantity),
            unit_price,
            discount_percent,
            tax_percent,
        },
    )
}

// ============================================================================
// Property-Based Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Document totals reconcile: total = subtotal - discount + tax
    #[test]
    fn prop_totals_reconcile(items in prop::collection::vec(line_strategy(), 0..12)) {
        let totals = compute_totals(&items).unwrap();
        prop_assert_eq!(totals.total, totals.subtotal - totals.discount_total + totals.tax_total);
    }

    /// The document total is the sum of its rounded line totals
    #[test]
    fn prop_total_is_sum_of_lines(items in prop::collection::vec(line_strategy(), 0..12)) {
        let totals = compute_totals(&items).unwrap();
        let sum: Decimal = items.iter().map(|i| i.amounts().unwrap().total).sum();
        prop_assert_eq!(totals.total, sum);
    }

    /// Any line that passes validation can be priced, however large
    #[test]
    fn prop_valid_lines_always_price(
        quantity in 1i64..=999_999_999_999,
        cents in 0i64..=99_999_999_999_999,
        discount in percent_strategy(),
        tax in percent_strategy(),
    ) {
        let item = LineItemInput {
            description: "Sulphur content".to_string(),
            sample_type_id: None,
            quantity: Decimal::new(quantity, 3),
            unit_price: Decimal::new(cents, 2),
            discount_percent: discount,
            tax_percent: tax,
        };
        prop_assert!(item.validate().is_ok());
        // Pricing may refuse an oversized product but must never overflow
        if let Ok(amounts) = item.amounts() {
            prop_assert!(amounts.total <= shared::MAX_AMOUNT);
        }
    }

    /// Every computed amount is already rounded to cents and never negative
    #[test]
    fn prop_line_amounts_rounded(item in line_strategy()) {
        let amounts = item.amounts().unwrap();
        for value in [amounts.gross, amounts.discount, amounts.tax, amounts.total] {
            prop_assert_eq!(round_money(value), value);
            prop_assert!(value >= Decimal::ZERO);
        }
        prop_assert!(amounts.discount <= amounts.gross);
    }

    /// Payments never push the amount paid beyond the total
    #[test]
    fn prop_payment_bounded_by_total(
        total in money_strategy(),
        paid_share in 0u32..=100,
        amount in money_strategy(),
    ) {
        let paid = round_money(total * Decimal::from(paid_share) / Decimal::from(100));
        let status = status_after_payment(total, paid);
        if let Ok(new_paid) = apply_payment(status, total, paid, amount) {
            prop_assert!(new_paid <= total);
            prop_assert!(new_paid > paid);
        }
    }

    /// Paying the full balance settles the invoice
    #[test]
    fn prop_full_balance_settles(total in 1i64..10_000_000, first in 1i64..10_000_000) {
        let total = Decimal::new(total, 2);
        let first = Decimal::new(first, 2).min(total);
        let paid = apply_payment(InvoiceStatus::Issued, total, Decimal::ZERO, first).unwrap();
        let status = status_after_payment(total, paid);
        if status == InvoiceStatus::Paid {
            prop_assert_eq!(paid, total);
        } else {
            let settled = apply_payment(status, total, paid, total - paid).unwrap();
            prop_assert_eq!(status_after_payment(total, settled), InvoiceStatus::Paid);
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod pricing_tests {
    use super::*;

    #[test]
    fn test_line_with_discount_and_tax() {
        let amounts = line("3", "1250.00", "10", "18").amounts().unwrap();
        assert_eq!(amounts.gross, dec("3750.00"));
        assert_eq!(amounts.discount, dec("375.00"));
        assert_eq!(amounts.taxable, dec("3375.00"));
        assert_eq!(amounts.tax, dec("607.50"));
        assert_eq!(amounts.total, dec("3982.50"));
    }

    #[test]
    fn test_half_cent_rounds_away_from_zero() {
        assert_eq!(round_money(dec("10.005")), dec("10.01"));
        assert_eq!(round_money(dec("10.004")), dec("10.00"));
    }

    #[test]
    fn test_oversized_line_is_refused_without_panicking() {
        let item = line("100000000000000000000", "100000000000000000000", "0", "0");
        assert!(item.validate().is_err());
        assert_eq!(item.amounts(), Err("Line item amount is too large"));
    }

    #[test]
    fn test_precision_beyond_storage_is_refused() {
        assert!(line("1", "10.005", "0", "0").validate().is_err());
        assert!(line("1.0005", "10", "0", "0").validate().is_err());
        assert!(line("1", "10", "12.345", "0").validate().is_err());
        assert!(line("1.500", "10.50", "12.5", "18").validate().is_ok());
    }

    #[test]
    fn test_empty_document_totals_zero() {
        let totals = compute_totals(&[]).unwrap();
        assert_eq!(totals.total, Decimal::ZERO);
        assert_eq!(totals.subtotal, Decimal::ZERO);
    }

    #[test]
    fn test_invalid_lines_rejected() {
        assert!(line("0", "100", "0", "0").validate().is_err());
        assert!(line("1", "-1", "0", "0").validate().is_err());
        assert!(line("1", "100", "101", "0").validate().is_err());
        assert!(line("1", "100", "0", "-5").validate().is_err());
        let mut blank = line("1", "100", "0", "0");
        blank.description = "   ".to_string();
        assert!(blank.validate().is_err());
        assert!(line("1", "100", "100", "28").validate().is_ok());
    }
}

#[cfg(test)]
mod payment_tests {
    use super::*;

    #[test]
    fn test_partial_then_full_payment() {
        let total = dec("1180.00");
        let paid = apply_payment(InvoiceStatus::Issued, total, Decimal::ZERO, dec("500")).unwrap();
        assert_eq!(paid, dec("500.00"));
        assert_eq!(status_after_payment(total, paid), InvoiceStatus::PartiallyPaid);

        let paid = apply_payment(InvoiceStatus::PartiallyPaid, total, paid, dec("680")).unwrap();
        assert_eq!(status_after_payment(total, paid), InvoiceStatus::Paid);
    }

    #[test]
    fn test_overpayment_rejected() {
        let err = apply_payment(InvoiceStatus::Issued, dec("100"), dec("60"), dec("40.01")).unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[test]
    fn test_zero_payment_rejected() {
        assert!(apply_payment(InvoiceStatus::Issued, dec("100"), Decimal::ZERO, Decimal::ZERO).is_err());
        assert!(apply_payment(InvoiceStatus::Issued, dec("100"), Decimal::ZERO, dec("-5")).is_err());
    }

    #[test]
    fn test_payments_need_an_open_invoice() {
        for status in [InvoiceStatus::Draft, InvoiceStatus::Paid, InvoiceStatus::Cancelled] {
            let err = apply_payment(status, dec("100"), Decimal::ZERO, dec("10")).unwrap_err();
            assert!(matches!(err, AppError::InvalidStateTransition(_)));
        }
    }
}

#[cfg(test)]
mod conversion_tests {
    use super::*;

    #[test]
    fn test_only_issued_proformas_convert() {
        assert!(can_convert_to_tax(InvoiceType::Proforma, InvoiceStatus::Issued, false));
        assert!(can_convert_to_tax(InvoiceType::Proforma, InvoiceStatus::PartiallyPaid, false));
        assert!(can_convert_to_tax(InvoiceType::Proforma, InvoiceStatus::Paid, false));
        assert!(!can_convert_to_tax(InvoiceType::Proforma, InvoiceStatus::Draft, false));
        assert!(!can_convert_to_tax(InvoiceType::Proforma, InvoiceStatus::Cancelled, false));
    }

    #[test]
    fn test_conversion_happens_once() {
        assert!(!can_convert_to_tax(InvoiceType::Proforma, InvoiceStatus::Issued, true));
    }

    #[test]
    fn test_converted_proforma_takes_no_payments_or_transitions() {
        // The proforma stays issued after conversion, so the status check alone
        // would still accept a payment; the conversion link must refuse it.
        assert!(InvoiceStatus::Issued.accepts_payment());
        let err = check_not_converted("PI-240301-004", Some(uuid::Uuid::new_v4())).unwrap_err();
        assert!(matches!(err, AppError::InvalidStateTransition(_)));
        assert_ok!(check_not_converted("PI-240301-004", None));
    }

    #[test]
    fn test_tax_invoices_do_not_convert() {
        assert!(!can_convert_to_tax(InvoiceType::Tax, InvoiceStatus::Issued, false));
    }

    #[test]
    fn test_converted_status_follows_amount_paid() {
        assert_eq!(status_after_payment(dec("500"), Decimal::ZERO), InvoiceStatus::Issued);
        assert_eq!(status_after_payment(dec("500"), dec("200")), InvoiceStatus::PartiallyPaid);
        assert_eq!(status_after_payment(dec("500"), dec("500")), InvoiceStatus::Paid);
    }
}
