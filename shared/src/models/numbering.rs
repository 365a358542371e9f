//! Document numbering models
//!
//! Every lab owns one counter per document module. Numbers are rendered as
//! `{prefix}-{YYMMDD}-{sequence}` with the sequence zero-padded to three
//! digits. Report numbers are "linked": they reuse the date and sequence of
//! the sample they certify so the two numbers can be matched at a glance.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Modules that allocate document numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentModule {
    Sample,
    Report,
    Quotation,
    Contract,
    ProformaInvoice,
    TaxInvoice,
}

impl DocumentModule {
    pub const ALL: [DocumentModule; 6] = [
        DocumentModule::Sample,
        DocumentModule::Report,
        DocumentModule::Quotation,
        DocumentModule::Contract,
        DocumentModule::ProformaInvoice,
        DocumentModule::TaxInvoice,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentModule::Sample => "sample",
            DocumentModule::Report => "report",
            DocumentModule::Quotation => "quotation",
            DocumentModule::Contract => "contract",
            DocumentModule::ProformaInvoice => "proforma_invoice",
            DocumentModule::TaxInvoice => "tax_invoice",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "sample" => Some(DocumentModule::Sample),
            "report" => Some(DocumentModule::Report),
            "quotation" => Some(DocumentModule::Quotation),
            "contract" => Some(DocumentModule::Contract),
            "proforma_invoice" => Some(DocumentModule::ProformaInvoice),
            "tax_invoice" => Some(DocumentModule::TaxInvoice),
            _ => None,
        }
    }

    /// Prefix used until a lab configures its own
    pub fn default_prefix(&self) -> &'static str {
        match self {
            DocumentModule::Sample => "SMP",
            DocumentModule::Report => "RPT",
            DocumentModule::Quotation => "QTN",
            DocumentModule::Contract => "CTR",
            DocumentModule::ProformaInvoice => "PI",
            DocumentModule::TaxInvoice => "INV",
        }
    }
}

impl std::fmt::Display for DocumentModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while parsing or configuring document numbers
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NumberingError {
    #[error("document number must have the form PREFIX-YYMMDD-NNN")]
    Malformed,

    #[error("invalid date segment in document number")]
    InvalidDate,

    #[error("invalid sequence segment in document number")]
    InvalidSequence,

    #[error("prefix must be 1-10 uppercase letters or digits")]
    InvalidPrefix,
}

/// A document number split into its parts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentNumber {
    pub prefix: String,
    pub date: NaiveDate,
    pub sequence: i64,
}

impl DocumentNumber {
    pub fn new(prefix: impl Into<String>, date: NaiveDate, sequence: i64) -> Self {
        Self {
            prefix: prefix.into(),
            date,
            sequence,
        }
    }

    /// Parse `PREFIX-YYMMDD-NNN`. A trailing revision suffix (`-R2`) is
    /// ignored so linked report numbers parse back to their sample parts.
    pub fn parse(value: &str) -> Result<Self, NumberingError> {
        let mut parts: Vec<&str> = value.split('-').collect();

        if parts.len() == 4 && is_revision_suffix(parts[3]) {
            parts.pop();
        }

        if parts.len() != 3 {
            return Err(NumberingError::Malformed);
        }

        validate_prefix(parts[0])?;

        let date_part = parts[1];
        if date_part.len() != 6 || !date_part.chars().all(|c| c.is_ascii_digit()) {
            return Err(NumberingError::InvalidDate);
        }
        let date = NaiveDate::parse_from_str(&format!("20{}", date_part), "%Y%m%d")
            .map_err(|_| NumberingError::InvalidDate)?;

        let seq_part = parts[2];
        if seq_part.len() < 3 || !seq_part.chars().all(|c| c.is_ascii_digit()) {
            return Err(NumberingError::InvalidSequence);
        }
        let sequence: i64 = seq_part
            .parse()
            .map_err(|_| NumberingError::InvalidSequence)?;
        if sequence < 1 {
            return Err(NumberingError::InvalidSequence);
        }

        Ok(Self {
            prefix: parts[0].to_string(),
            date,
            sequence,
        })
    }
}

impl std::fmt::Display for DocumentNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}-{:03}",
            self.prefix,
            self.date.format("%y%m%d"),
            self.sequence
        )
    }
}

fn is_revision_suffix(part: &str) -> bool {
    part.len() > 1 && part.starts_with('R') && part[1..].chars().all(|c| c.is_ascii_digit())
}

/// Format a document number: `{prefix}-{YYMMDD}-{seq:03}`
pub fn format_document_number(prefix: &str, date: NaiveDate, sequence: i64) -> String {
    DocumentNumber::new(prefix, date, sequence).to_string()
}

/// Format a report number linked to its sample.
///
/// `revision` is the number of reports already issued for the sample; the
/// first report carries no suffix.
pub fn format_linked_number(
    report_prefix: &str,
    sample_date: NaiveDate,
    sample_sequence: i64,
    revision: i64,
) -> String {
    let base = format_document_number(report_prefix, sample_date, sample_sequence);
    if revision > 0 {
        format!("{}-R{}", base, revision)
    } else {
        base
    }
}

/// Prefixes are 1-10 uppercase ASCII letters or digits
pub fn validate_prefix(prefix: &str) -> Result<(), NumberingError> {
    if prefix.is_empty()
        || prefix.len() > 10
        || !prefix
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
    {
        return Err(NumberingError::InvalidPrefix);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_format_pads_sequence() {
        assert_eq!(
            format_document_number("SMP", date(2024, 3, 7), 5),
            "SMP-240307-005"
        );
        assert_eq!(
            format_document_number("INV", date(2025, 12, 31), 123),
            "INV-251231-123"
        );
    }

    #[test]
    fn test_format_widens_past_999() {
        assert_eq!(
            format_document_number("SMP", date(2024, 1, 1), 1000),
            "SMP-240101-1000"
        );
    }

    #[test]
    fn test_parse_round_trip() {
        let parsed = DocumentNumber::parse("QTN-240615-042").unwrap();
        assert_eq!(parsed.prefix, "QTN");
        assert_eq!(parsed.date, date(2024, 6, 15));
        assert_eq!(parsed.sequence, 42);
        assert_eq!(parsed.to_string(), "QTN-240615-042");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(
            DocumentNumber::parse("SMP240615042"),
            Err(NumberingError::Malformed)
        );
        assert_eq!(
            DocumentNumber::parse("SMP-241315-001"),
            Err(NumberingError::InvalidDate)
        );
        assert_eq!(
            DocumentNumber::parse("SMP-240615-01"),
            Err(NumberingError::InvalidSequence)
        );
        assert_eq!(
            DocumentNumber::parse("smp-240615-001"),
            Err(NumberingError::InvalidPrefix)
        );
    }

    #[test]
    fn test_linked_number_mirrors_sample() {
        let sample = DocumentNumber::parse("SMP-240310-017").unwrap();
        let report = format_linked_number("RPT", sample.date, sample.sequence, 0);
        assert_eq!(report, "RPT-240310-017");

        let reissued = format_linked_number("RPT", sample.date, sample.sequence, 2);
        assert_eq!(reissued, "RPT-240310-017-R2");

        // Revision suffix is ignored when parsing back
        let parsed = DocumentNumber::parse(&reissued).unwrap();
        assert_eq!(parsed.sequence, sample.sequence);
        assert_eq!(parsed.date, sample.date);
    }

    #[test]
    fn test_prefix_validation() {
        assert!(validate_prefix("SMP").is_ok());
        assert!(validate_prefix("LAB2").is_ok());
        assert!(validate_prefix("").is_err());
        assert!(validate_prefix("TOOLONGPREF").is_err());
        assert!(validate_prefix("S-P").is_err());
    }

    #[test]
    fn test_module_round_trip() {
        for module in DocumentModule::ALL {
            assert_eq!(DocumentModule::from_str(module.as_str()), Some(module));
        }
    }
}
