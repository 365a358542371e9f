//! Printable documents rendered with Handlebars.
//!
//! Certificates of analysis, invoices and quotations are produced as
//! self-contained HTML meant for the browser's print dialog.

use chrono::{DateTime, NaiveDate, Utc};
use handlebars::{Handlebars, Template};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::services::customer::Customer;
use crate::services::lab::Lab;
use crate::services::line_items::LineItem;
use crate::services::sample::Sample;
use crate::services::test_result::TestResult;
use shared::{round_money, DocumentTotals};

const COA_TEMPLATE: &str = include_str!("../../templates/coa.hbs");
const BILLING_TEMPLATE: &str = include_str!("../../templates/billing.hbs");

/// Reject a lab-supplied template body that does not compile
pub fn check_template_syntax(body: &str) -> AppResult<()> {
    Template::compile(body)
        .map(|_| ())
        .map_err(|e| AppError::validation("body_template", format!("Invalid template: {}", e)))
}

pub fn format_money(value: Decimal) -> String {
    format!("{:.2}", round_money(value))
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%d %b %Y").to_string()
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    format_date(ts.date_naive())
}

/// One row of the results table
#[derive(Debug, Serialize)]
pub struct ResultLine {
    pub position: usize,
    pub parameter: String,
    pub method: String,
    pub unit: String,
    pub specification: String,
    pub value: String,
    pub evaluation: String,
    pub failed: bool,
}

impl ResultLine {
    pub fn from_result(position: usize, result: &TestResult) -> Self {
        let evaluation = match result.evaluation.as_deref() {
            Some("pass") => "Pass",
            Some("fail") => "Fail",
            _ => "-",
        };
        ResultLine {
            position,
            parameter: result.parameter_name.clone(),
            method: result.method.clone().unwrap_or_default(),
            unit: result.unit.clone().unwrap_or_default(),
            specification: result.limits().describe(),
            value: result
                .value
                .map(|v| v.normalize().to_string())
                .unwrap_or_else(|| "-".to_string()),
            evaluation: evaluation.to_string(),
            failed: result.evaluation.as_deref() == Some("fail"),
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Signatory {
    pub name: String,
    pub designation: Option<String>,
    pub signature_url: Option<String>,
    #[sqlx(skip)]
    pub role: String,
}

/// Report fields printed on the certificate
#[derive(Debug, Serialize)]
pub struct CoaReport<'a> {
    pub report_number: &'a str,
    pub status: &'a str,
    pub conclusion: Option<&'a str>,
    pub remarks: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct CoaDocument<'a> {
    pub lab: &'a Lab,
    pub customer: &'a Customer,
    pub sample: &'a Sample,
    pub report: CoaReport<'a>,
    pub results: Vec<ResultLine>,
    pub signatories: Vec<Signatory>,
    pub verification_url: Option<String>,
    pub header_text: Option<&'a str>,
    pub footer_text: Option<&'a str>,
    pub issued_on: String,
    pub received_on: String,
    pub is_final: bool,
}

#[derive(Debug, Serialize)]
pub struct ItemLine {
    pub position: usize,
    pub description: String,
    pub quantity: String,
    pub unit_price: String,
    pub discount_percent: String,
    pub tax_percent: String,
    pub line_total: String,
}

impl ItemLine {
    pub fn from_item(position: usize, item: &LineItem) -> Self {
        ItemLine {
            position,
            description: item.description.clone(),
            quantity: item.quantity.normalize().to_string(),
            unit_price: format_money(item.unit_price),
            discount_percent: item.discount_percent.normalize().to_string(),
            tax_percent: item.tax_percent.normalize().to_string(),
            line_total: format_money(item.line_total),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TotalsView {
    pub subtotal: String,
    pub discount_total: String,
    pub tax_total: String,
    pub total: String,
}

impl From<&DocumentTotals> for TotalsView {
    fn from(totals: &DocumentTotals) -> Self {
        TotalsView {
            subtotal: format_money(totals.subtotal),
            discount_total: format_money(totals.discount_total),
            tax_total: format_money(totals.tax_total),
            total: format_money(totals.total),
        }
    }
}

/// Context for invoices and quotations
#[derive(Debug, Serialize)]
pub struct BillingDocument<'a> {
    pub title: &'a str,
    pub number: &'a str,
    pub status_note: Option<String>,
    pub lab: &'a Lab,
    pub customer: &'a Customer,
    pub issue_date: String,
    pub secondary_date_label: &'a str,
    pub secondary_date: Option<String>,
    pub reference: Option<String>,
    pub currency: &'a str,
    pub items: Vec<ItemLine>,
    pub totals: TotalsView,
    pub amount_paid: Option<String>,
    pub balance_due: Option<String>,
    pub notes: Option<&'a str>,
    pub terms: Option<&'a str>,
}

impl<'a> BillingDocument<'a> {
    pub fn item_lines(items: &[LineItem]) -> Vec<ItemLine> {
        items
            .iter()
            .enumerate()
            .map(|(i, item)| ItemLine::from_item(i + 1, item))
            .collect()
    }
}

/// Handlebars renderer for the built-in document layouts
pub struct DocumentRenderer {
    handlebars: Handlebars<'static>,
}

impl DocumentRenderer {
    pub fn new() -> Self {
        Self {
            handlebars: Handlebars::new(),
        }
    }

    /// Render a certificate; a lab template body replaces the built-in layout
    pub fn render_coa(&self, document: &CoaDocument<'_>, custom_body: Option<&str>) -> AppResult<String> {
        let source = custom_body
            .filter(|body| !body.trim().is_empty())
            .unwrap_or(COA_TEMPLATE);
        self.handlebars
            .render_template(source, document)
            .map_err(|e| AppError::Internal(format!("Failed to render certificate: {}", e)))
    }

    pub fn render_billing(&self, document: &BillingDocument<'_>) -> AppResult<String> {
        self.handlebars
            .render_template(BILLING_TEMPLATE, document)
            .map_err(|e| AppError::Internal(format!("Failed to render {}: {}", document.title, e)))
    }
}

impl Default for DocumentRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn lab() -> Lab {
        Lab {
            id: Uuid::new_v4(),
            name: "Western Petro Testing Lab".into(),
            code: "WPTL".into(),
            address: Some("Plot 12, MIDC".into()),
            city: Some("Navi Mumbai".into()),
            state: Some("MH".into()),
            postal_code: Some("400710".into()),
            country: Some("IN".into()),
            phone: None,
            email: None,
            website: None,
            accreditation_number: Some("TC-1234".into()),
            tax_id: None,
            currency: "INR".into(),
            logo_url: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn customer(lab_id: Uuid) -> Customer {
        Customer {
            id: Uuid::new_v4(),
            lab_id,
            code: "BPCL".into(),
            name: "Bharat <Fuels>".into(),
            email: None,
            phone: None,
            gstin: None,
            billing_address: None,
            city: None,
            state: None,
            postal_code: None,
            country: None,
            notes: None,
            zoho_contact_id: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample(lab_id: Uuid, customer_id: Uuid) -> Sample {
        Sample {
            id: Uuid::new_v4(),
            lab_id,
            sample_number: "SMP-240115-007".into(),
            customer_id,
            customer_name: "Bharat Fuels".into(),
            sample_type_id: Uuid::new_v4(),
            sample_type_name: "High Speed Diesel".into(),
            status: "completed".into(),
            description: None,
            batch_number: Some("B-77".into()),
            quantity: Some("1 L".into()),
            source: None,
            collected_at: None,
            received_at: Utc::now(),
            remarks: None,
            registered_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn result(value: &str, evaluation: &str) -> TestResult {
        TestResult {
            id: Uuid::new_v4(),
            sample_id: Uuid::new_v4(),
            parameter_id: None,
            parameter_name: "Density @15°C".into(),
            method: Some("ASTM D4052".into()),
            unit: Some("kg/m3".into()),
            spec_min: Some("820".parse().unwrap()),
            spec_max: Some("860".parse().unwrap()),
            value: Some(value.parse().unwrap()),
            evaluation: Some(evaluation.into()),
            status: "completed".into(),
            remarks: None,
            sort_order: 1,
            tested_by: None,
            tested_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn test_coa_renders_results_and_escapes_html() {
        let lab = lab();
        let customer = customer(lab.id);
        let sample = sample(lab.id, customer.id);
        let results = [result("870.5", "fail")];
        let document = CoaDocument {
            lab: &lab,
            customer: &customer,
            sample: &sample,
            report: CoaReport {
                report_number: "RPT-240115-007",
                status: "published",
                conclusion: Some("Does not conform"),
                remarks: None,
            },
            results: results
                .iter()
                .enumerate()
                .map(|(i, r)| ResultLine::from_result(i + 1, r))
                .collect(),
            signatories: vec![],
            verification_url: Some("https://lims.example.com/api/v1/verify/abc.def".into()),
            header_text: None,
            footer_text: None,
            issued_on: "15 Jan 2024".into(),
            received_on: format_timestamp(sample.received_at),
            is_final: true,
        };

        let html = DocumentRenderer::new().render_coa(&document, None).unwrap();
        assert!(html.contains("RPT-240115-007"));
        assert!(html.contains("820 - 860"));
        assert!(html.contains("class=\"fail\""));
        assert!(html.contains("Bharat &lt;Fuels&gt;"));
        assert!(html.contains("/verify/abc.def"));
        assert!(!html.contains("DRAFT - NOT VALID"));
    }

    #[test]
    fn test_custom_body_replaces_layout() {
        let lab = lab();
        let customer = customer(lab.id);
        let sample = sample(lab.id, customer.id);
        let document = CoaDocument {
            lab: &lab,
            customer: &customer,
            sample: &sample,
            report: CoaReport {
                report_number: "RPT-240115-007",
                status: "draft",
                conclusion: None,
                remarks: None,
            },
            results: vec![],
            signatories: vec![],
            verification_url: None,
            header_text: None,
            footer_text: None,
            issued_on: "-".into(),
            received_on: "-".into(),
            is_final: false,
        };

        let html = DocumentRenderer::new()
            .render_coa(&document, Some("<p>{{lab.code}} / {{report.report_number}}</p>"))
            .unwrap();
        assert_eq!(html, "<p>WPTL / RPT-240115-007</p>");
    }

    #[test]
    fn test_template_syntax_check() {
        assert!(check_template_syntax("{{#each results}}{{this.value}}{{/each}}").is_ok());
        assert!(check_template_syntax("{{#each results}}").is_err());
    }

    #[test]
    fn test_money_format() {
        assert_eq!(format_money("1180".parse().unwrap()), "1180.00");
        assert_eq!(format_money("10.005".parse().unwrap()), "10.01");
    }
}
