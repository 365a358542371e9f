//! Document numbering tests
//!
//! Property-based and unit tests for `{prefix}-{YYMMDD}-{seq:03}` numbers:
//! - formatting and parsing agree
//! - sequences order the same way their numbers sort within a day
//! - prefix rules and linked report numbers

use chrono::NaiveDate;
use proptest::prelude::*;
use shared::{
    format_document_number, format_linked_number, validate_prefix, DocumentModule, DocumentNumber,
    NumberingError,
};

// ============================================================================
// Property Test Strategies
// ============================================================================

/// Valid prefixes (1-10 uppercase letters or digits)
fn prefix_strategy() -> impl Strategy<Value = String> {
    "[A-Z0-9]{1,10}"
}

/// Dates inside the two-digit year window
fn date_strategy() -> impl Strategy<Value = NaiveDate> {
    (2000i32..2099, 1u32..=12, 1u32..=28)
        .prop_map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

fn sequence_strategy() -> impl Strategy<Value = i64> {
    1i64..100_000
}

// ============================================================================
// Property-Based Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Formatted numbers parse back to their parts
    #[test]
    fn prop_number_parses_back(
        prefix in prefix_strategy(),
        date in date_strategy(),
        sequence in sequence_strategy(),
    ) {
        let number = format_document_number(&prefix, date, sequence);
        let parsed = DocumentNumber::parse(&number).unwrap();
        prop_assert_eq!(parsed.prefix, prefix);
        prop_assert_eq!(parsed.date, date);
        prop_assert_eq!(parsed.sequence, sequence);
    }

    /// The sequence is padded to at least three digits
    #[test]
    fn prop_sequence_is_padded(
        prefix in prefix_strategy(),
        date in date_strategy(),
        sequence in 1i64..1000,
    ) {
        let number = format_document_number(&prefix, date, sequence);
        let seq_part = number.rsplit('-').next().unwrap();
        prop_assert_eq!(seq_part.len(), 3);
    }

    /// Within one prefix and day, a higher sequence never sorts before a lower one
    #[test]
    fn prop_sequence_order_within_a_day(
        prefix in prefix_strategy(),
        date in date_strategy(),
        a in 1i64..1000,
        b in 1i64..1000,
    ) {
        let first = format_document_number(&prefix, date, a);
        let second = format_document_number(&prefix, date, b);
        prop_assert_eq!(a.cmp(&b), first.cmp(&second));
    }

    /// Lowercase prefixes are rejected
    #[test]
    fn prop_lowercase_prefix_rejected(prefix in "[a-z]{1,10}") {
        prop_assert_eq!(validate_prefix(&prefix), Err(NumberingError::InvalidPrefix));
    }

    /// Revisions keep the sample's date and sequence
    #[test]
    fn prop_linked_number_keeps_sample_parts(
        date in date_strategy(),
        sequence in sequence_strategy(),
        revision in 0i64..20,
    ) {
        let number = format_linked_number("RPT", date, sequence, revision);
        let parsed = DocumentNumber::parse(&number).unwrap();
        prop_assert_eq!(parsed.prefix.as_str(), "RPT");
        prop_assert_eq!(parsed.date, date);
        prop_assert_eq!(parsed.sequence, sequence);
        prop_assert_eq!(number.ends_with(&format!("-R{}", revision)), revision > 0);
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod format_tests {
    use super::*;

    #[test]
    fn test_known_numbers() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(format_document_number("SMP", date, 1), "SMP-240305-001");
        assert_eq!(format_document_number("INV", date, 42), "INV-240305-042");
        assert_eq!(format_document_number("QT", date, 1234), "QT-240305-1234");
    }

    #[test]
    fn test_first_report_has_no_revision_suffix() {
        let date = NaiveDate::from_ymd_opt(2024, 11, 30).unwrap();
        assert_eq!(format_linked_number("RPT", date, 7, 0), "RPT-241130-007");
        assert_eq!(format_linked_number("RPT", date, 7, 2), "RPT-241130-007-R2");
    }
}

#[cfg(test)]
mod parse_tests {
    use super::*;

    #[test]
    fn test_malformed_numbers() {
        assert_eq!(DocumentNumber::parse("SMP240305001"), Err(NumberingError::Malformed));
        assert_eq!(DocumentNumber::parse("SMP-240305"), Err(NumberingError::Malformed));
        assert_eq!(DocumentNumber::parse("SMP-240305-001-X"), Err(NumberingError::Malformed));
    }

    #[test]
    fn test_invalid_segments() {
        assert_eq!(DocumentNumber::parse("SMP-241341-001"), Err(NumberingError::InvalidDate));
        assert_eq!(DocumentNumber::parse("SMP-2403-001"), Err(NumberingError::InvalidDate));
        assert_eq!(DocumentNumber::parse("SMP-240305-01"), Err(NumberingError::InvalidSequence));
        assert_eq!(DocumentNumber::parse("SMP-240305-000"), Err(NumberingError::InvalidSequence));
        assert_eq!(DocumentNumber::parse("smp-240305-001"), Err(NumberingError::InvalidPrefix));
    }

    #[test]
    fn test_prefix_length_limits() {
        assert!(validate_prefix("A").is_ok());
        assert!(validate_prefix("ABCDEFGHIJ").is_ok());
        assert_eq!(validate_prefix(""), Err(NumberingError::InvalidPrefix));
        assert_eq!(validate_prefix("ABCDEFGHIJK"), Err(NumberingError::InvalidPrefix));
        assert_eq!(validate_prefix("IN-V"), Err(NumberingError::InvalidPrefix));
    }
}

#[cfg(test)]
mod module_tests {
    use super::*;

    #[test]
    fn test_default_prefixes_are_valid() {
        for module in DocumentModule::ALL {
            assert!(
                validate_prefix(module.default_prefix()).is_ok(),
                "default prefix of {} should be valid",
                module.as_str()
            );
        }
    }
}
