//! WebAssembly module for the LIMS platform
//!
//! Provides client-side computation for:
//! - Line item and document totals on billing forms
//! - Pass/fail evaluation while results are being typed in
//! - Document number previews and prefix validation
//! - Offline form validation

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::str::FromStr;
use wasm_bindgen::prelude::*;

// Re-export shared types for use in JavaScript
pub use shared::models::*;
pub use shared::types::*;
pub use shared::validation::*;

/// Initialize the WASM module
#[wasm_bindgen(start)]
pub fn init() {
    web_sys::console::log_1(&JsValue::from_str("LIMS client helpers loaded"));
}

fn js_error(message: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&message.to_string())
}

fn parse_decimal(value: &str) -> Result<Option<Decimal>, JsValue> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    Decimal::from_str(value)
        .map(Some)
        .map_err(|e| js_error(format!("Invalid number '{}': {}", value, e)))
}

/// Totals of a quotation, contract or invoice.
///
/// Takes the line items as JSON and returns the totals as JSON, using the
/// same rounding as the server.
#[wasm_bindgen]
pub fn calculate_document_totals(items_json: &str) -> Result<String, JsValue> {
    let items: Vec<LineItemInput> = serde_json::from_str(items_json)
        .map_err(|e| js_error(format!("Invalid line items JSON: {}", e)))?;
    for item in &items {
        item.validate().map_err(js_error)?;
    }
    let totals = compute_totals(&items).map_err(js_error)?;
    serde_json::to_string(&totals).map_err(js_error)
}

/// Evaluate a result against its limits; empty strings mean "not set".
///
/// Returns `pass`, `fail` or `not_applicable`.
#[wasm_bindgen]
pub fn evaluate_result_value(value: &str, min: &str, max: &str) -> Result<String, JsValue> {
    let limits = SpecLimits::new(parse_decimal(min)?, parse_decimal(max)?);
    if !limits.is_consistent() {
        return Err(js_error("Minimum limit exceeds maximum limit"));
    }
    Ok(evaluate_result(parse_decimal(value)?, &limits).as_str().to_string())
}

/// Specification text as printed on the certificate
#[wasm_bindgen]
pub fn describe_spec_limits(min: &str, max: &str) -> Result<String, JsValue> {
    Ok(SpecLimits::new(parse_decimal(min)?, parse_decimal(max)?).describe())
}

/// Preview a document number for a prefix, ISO date and sequence
#[wasm_bindgen]
pub fn preview_document_number(prefix: &str, date: &str, sequence: i64) -> Result<String, JsValue> {
    validate_prefix(prefix).map_err(js_error)?;
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| js_error(format!("Invalid date '{}': {}", date, e)))?;
    Ok(format_document_number(prefix, date, sequence))
}

/// Preview the number a document created today would get, using the
/// browser's local date
#[wasm_bindgen]
pub fn preview_number_for_today(prefix: &str, sequence: i64) -> Result<String, JsValue> {
    let now = js_sys::Date::new_0();
    let date = NaiveDate::from_ymd_opt(now.get_full_year() as i32, now.get_month() + 1, now.get_date())
        .ok_or_else(|| js_error("Browser returned an invalid date"))?;
    validate_prefix(prefix).map_err(js_error)?;
    Ok(format_document_number(prefix, date, sequence))
}

#[wasm_bindgen]
pub fn is_valid_prefix(prefix: &str) -> bool {
    validate_prefix(prefix).is_ok()
}

#[wasm_bindgen]
pub fn is_valid_gstin(gstin: &str) -> bool {
    validate_gstin(gstin).is_ok()
}

/// Whether the sample workflow allows moving from `current` to `next`
#[wasm_bindgen]
pub fn can_transition_sample(current: &str, next: &str) -> bool {
    match (SampleStatus::from_str(current), SampleStatus::from_str(next)) {
        (Some(current), Some(next)) => current.can_transition_to(next),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_totals() {
        let items = r#"[
            {"description": "Flash point", "quantity": "2", "unit_price": "1500.00", "tax_percent": "18"},
            {"description": "Density", "quantity": "1", "unit_price": "800.00", "discount_percent": "10"}
        ]"#;
        let totals: DocumentTotals = serde_json::from_str(&calculate_document_totals(items).unwrap()).unwrap();
        assert_eq!(totals.subtotal, Decimal::from_str("3800.00").unwrap());
        assert_eq!(totals.discount_total, Decimal::from_str("80.00").unwrap());
        assert_eq!(totals.tax_total, Decimal::from_str("540.00").unwrap());
        assert_eq!(totals.total, Decimal::from_str("4260.00").unwrap());
    }

    #[test]
    fn test_evaluate_result_value() {
        assert_eq!(evaluate_result_value("0.84", "0.82", "0.85").unwrap(), "pass");
        assert_eq!(evaluate_result_value("0.86", "0.82", "0.85").unwrap(), "fail");
        assert_eq!(evaluate_result_value("", "0.82", "0.85").unwrap(), "not_applicable");
        assert_eq!(evaluate_result_value("12", "", "").unwrap(), "not_applicable");
    }

    #[test]
    fn test_preview_document_number() {
        assert_eq!(
            preview_document_number("SMP", "2024-03-05", 7).unwrap(),
            "SMP-240305-007"
        );
        assert!(!is_valid_prefix("smp"));
        assert!(is_valid_prefix("INV2"));
    }

    #[test]
    fn test_sample_transitions() {
        assert!(can_transition_sample("registered", "testing"));
        assert!(!can_transition_sample("reported", "draft"));
        assert!(!can_transition_sample("unknown", "testing"));
    }
}
