//! Status workflow tests
//!
//! Samples, reports, quotations, contracts and invoices each move through a
//! fixed set of states. These tests pin the allowed edges and the guards the
//! services layer adds on top of them.

use lims_backend::error::AppError;
use lims_backend::services::invoice::check_invoice_transition;
use lims_backend::services::quotation::check_quotation_transition;
use proptest::prelude::*;
use shared::{ContractStatus, InvoiceStatus, QuotationStatus, ReportStatus, SampleStatus};
use tokio_test::{assert_err, assert_ok};

const SAMPLE_STATES: [SampleStatus; 5] = [
    SampleStatus::Draft,
    SampleStatus::Registered,
    SampleStatus::Testing,
    SampleStatus::Completed,
    SampleStatus::Reported,
];

const REPORT_STATES: [ReportStatus; 5] = [
    ReportStatus::Draft,
    ReportStatus::Review,
    ReportStatus::Approved,
    ReportStatus::Published,
    ReportStatus::Superseded,
];

const INVOICE_STATES: [InvoiceStatus; 5] = [
    InvoiceStatus::Draft,
    InvoiceStatus::Issued,
    InvoiceStatus::PartiallyPaid,
    InvoiceStatus::Paid,
    InvoiceStatus::Cancelled,
];

fn sample_status_strategy() -> impl Strategy<Value = SampleStatus> {
    prop::sample::select(SAMPLE_STATES.to_vec())
}

fn report_status_strategy() -> impl Strategy<Value = ReportStatus> {
    prop::sample::select(REPORT_STATES.to_vec())
}

fn invoice_status_strategy() -> impl Strategy<Value = InvoiceStatus> {
    prop::sample::select(INVOICE_STATES.to_vec())
}

proptest! {
    /// `transition` succeeds exactly when `can_transition_to` allows it
    #[test]
    fn prop_sample_transition_matches_guard(
        from in sample_status_strategy(),
        to in sample_status_strategy(),
    ) {
        prop_assert_eq!(from.transition(to).is_ok(), from.can_transition_to(to));
    }

    #[test]
    fn prop_report_transition_matches_guard(
        from in report_status_strategy(),
        to in report_status_strategy(),
    ) {
        prop_assert_eq!(from.transition(to).is_ok(), from.can_transition_to(to));
    }

    /// No workflow allows staying in place
    #[test]
    fn prop_no_self_transitions(
        sample in sample_status_strategy(),
        report in report_status_strategy(),
        invoice in invoice_status_strategy(),
    ) {
        prop_assert!(!sample.can_transition_to(sample));
        prop_assert!(!report.can_transition_to(report));
        prop_assert!(!invoice.can_transition_to(invoice));
    }

    /// Payment states are never set by hand
    #[test]
    fn prop_payment_states_not_manual(from in invoice_status_strategy()) {
        prop_assert!(check_invoice_transition(from, InvoiceStatus::Paid).is_err());
        prop_assert!(check_invoice_transition(from, InvoiceStatus::PartiallyPaid).is_err());
    }

    /// Status names survive a trip through their database form
    #[test]
    fn prop_status_names_round_trip(
        sample in sample_status_strategy(),
        report in report_status_strategy(),
        invoice in invoice_status_strategy(),
    ) {
        prop_assert_eq!(SampleStatus::from_str(sample.as_str()), Some(sample));
        prop_assert_eq!(ReportStatus::from_str(report.as_str()), Some(report));
        prop_assert_eq!(InvoiceStatus::from_str(invoice.as_str()), Some(invoice));
    }
}

#[cfg(test)]
mod sample_workflow_tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let path = [
            SampleStatus::Draft,
            SampleStatus::Registered,
            SampleStatus::Testing,
            SampleStatus::Completed,
            SampleStatus::Reported,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_completed_sample_can_be_retested() {
        assert!(SampleStatus::Completed.can_transition_to(SampleStatus::Testing));
    }

    #[test]
    fn test_reported_only_reopens_to_completed() {
        for next in SAMPLE_STATES {
            assert_eq!(
                SampleStatus::Reported.can_transition_to(next),
                next == SampleStatus::Completed,
                "reported -> {}",
                next
            );
        }
    }

    #[test]
    fn test_cannot_skip_testing() {
        assert!(!SampleStatus::Registered.can_transition_to(SampleStatus::Completed));
        assert!(!SampleStatus::Draft.can_transition_to(SampleStatus::Testing));
    }
}

#[cfg(test)]
mod report_workflow_tests {
    use super::*;

    #[test]
    fn test_review_can_be_rejected_to_draft() {
        assert!(ReportStatus::Review.can_transition_to(ReportStatus::Draft));
        assert!(!ReportStatus::Approved.can_transition_to(ReportStatus::Draft));
    }

    #[test]
    fn test_publish_requires_approval() {
        assert!(!ReportStatus::Review.can_transition_to(ReportStatus::Published));
        assert!(ReportStatus::Approved.can_transition_to(ReportStatus::Published));
    }

    #[test]
    fn test_only_published_reports_are_public() {
        let public: Vec<_> = REPORT_STATES.iter().filter(|s| s.is_public()).collect();
        assert_eq!(public, vec![&ReportStatus::Published]);
    }

    #[test]
    fn test_only_drafts_are_editable() {
        assert!(ReportStatus::Draft.is_editable());
        assert!(!ReportStatus::Review.is_editable());
        assert!(!ReportStatus::Approved.is_editable());
    }
}

#[cfg(test)]
mod billing_workflow_tests {
    use super::*;

    #[test]
    fn test_quotation_conversion_is_not_a_manual_transition() {
        let err = check_quotation_transition(QuotationStatus::Accepted, QuotationStatus::Converted).unwrap_err();
        assert!(matches!(err, AppError::InvalidStateTransition(_)));
    }

    #[test]
    fn test_quotation_conversion_states() {
        assert!(QuotationStatus::Sent.can_convert());
        assert!(QuotationStatus::Accepted.can_convert());
        assert!(!QuotationStatus::Draft.can_convert());
        assert!(!QuotationStatus::Rejected.can_convert());
        assert!(!QuotationStatus::Converted.can_convert());
    }

    #[test]
    fn test_sent_quotation_can_be_recalled() {
        assert_ok!(check_quotation_transition(QuotationStatus::Sent, QuotationStatus::Draft));
        assert_err!(check_quotation_transition(QuotationStatus::Accepted, QuotationStatus::Draft));
    }

    #[test]
    fn test_contract_lifecycle() {
        assert!(ContractStatus::Draft.can_transition_to(ContractStatus::Active));
        assert!(ContractStatus::Active.can_transition_to(ContractStatus::Completed));
        assert!(ContractStatus::Active.can_transition_to(ContractStatus::Terminated));
        assert!(!ContractStatus::Completed.can_transition_to(ContractStatus::Active));
        assert!(ContractStatus::Draft.is_deletable());
        assert!(!ContractStatus::Active.is_deletable());
    }

    #[test]
    fn test_invoice_manual_transitions() {
        assert_ok!(check_invoice_transition(InvoiceStatus::Draft, InvoiceStatus::Issued));
        assert_ok!(check_invoice_transition(InvoiceStatus::Issued, InvoiceStatus::Cancelled));
        assert_err!(check_invoice_transition(InvoiceStatus::Paid, InvoiceStatus::Cancelled));
        assert_err!(check_invoice_transition(InvoiceStatus::Cancelled, InvoiceStatus::Issued));
    }

    #[test]
    fn test_drafts_are_hidden_from_the_portal() {
        assert!(!InvoiceStatus::Draft.is_public());
        assert!(InvoiceStatus::Issued.is_public());
        assert!(InvoiceStatus::Paid.is_public());
    }
}
