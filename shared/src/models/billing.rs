//! Quotation, contract and invoice models with line-item arithmetic

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use super::TransitionError;

/// Quotation lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotationStatus {
    Draft,
    Sent,
    Accepted,
    Rejected,
    Converted,
}

impl QuotationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotationStatus::Draft => "draft",
            QuotationStatus::Sent => "sent",
            QuotationStatus::Accepted => "accepted",
            QuotationStatus::Rejected => "rejected",
            QuotationStatus::Converted => "converted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(QuotationStatus::Draft),
            "sent" => Some(QuotationStatus::Sent),
            "accepted" => Some(QuotationStatus::Accepted),
            "rejected" => Some(QuotationStatus::Rejected),
            "converted" => Some(QuotationStatus::Converted),
            _ => None,
        }
    }

    /// Manual transitions. `Converted` is reached only through conversion.
    pub fn can_transition_to(&self, next: QuotationStatus) -> bool {
        use QuotationStatus::*;
        matches!(
            (self, next),
            (Draft, Sent) | (Sent, Accepted) | (Sent, Rejected) | (Sent, Draft)
        )
    }

    pub fn transition(&self, next: QuotationStatus) -> Result<QuotationStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError::new("quotation", self.as_str(), next.as_str()))
        }
    }

    pub fn is_editable(&self) -> bool {
        matches!(self, QuotationStatus::Draft)
    }

    pub fn is_deletable(&self) -> bool {
        matches!(self, QuotationStatus::Draft)
    }

    pub fn can_convert(&self) -> bool {
        matches!(self, QuotationStatus::Sent | QuotationStatus::Accepted)
    }
}

/// Contract lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Draft,
    Active,
    Completed,
    Terminated,
}

impl ContractStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractStatus::Draft => "draft",
            ContractStatus::Active => "active",
            ContractStatus::Completed => "completed",
            ContractStatus::Terminated => "terminated",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(ContractStatus::Draft),
            "active" => Some(ContractStatus::Active),
            "completed" => Some(ContractStatus::Completed),
            "terminated" => Some(ContractStatus::Terminated),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: ContractStatus) -> bool {
        use ContractStatus::*;
        matches!(
            (self, next),
            (Draft, Active) | (Draft, Terminated) | (Active, Completed) | (Active, Terminated)
        )
    }

    pub fn transition(&self, next: ContractStatus) -> Result<ContractStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError::new("contract", self.as_str(), next.as_str()))
        }
    }

    pub fn is_deletable(&self) -> bool {
        matches!(self, ContractStatus::Draft)
    }
}

/// Proforma invoices are requests for payment; tax invoices are the
/// fiscal documents they convert into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceType {
    Proforma,
    Tax,
}

impl InvoiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceType::Proforma => "proforma",
            InvoiceType::Tax => "tax",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "proforma" => Some(InvoiceType::Proforma),
            "tax" => Some(InvoiceType::Tax),
            _ => None,
        }
    }

    pub fn numbering_module(&self) -> super::DocumentModule {
        match self {
            InvoiceType::Proforma => super::DocumentModule::ProformaInvoice,
            InvoiceType::Tax => super::DocumentModule::TaxInvoice,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            InvoiceType::Proforma => "Proforma Invoice",
            InvoiceType::Tax => "Tax Invoice",
        }
    }
}

/// Invoice payment lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Issued,
    PartiallyPaid,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Issued => "issued",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(InvoiceStatus::Draft),
            "issued" => Some(InvoiceStatus::Issued),
            "partially_paid" => Some(InvoiceStatus::PartiallyPaid),
            "paid" => Some(InvoiceStatus::Paid),
            "cancelled" => Some(InvoiceStatus::Cancelled),
            _ => None,
        }
    }

    /// Manual transitions; payment states follow from `record_payment`
    pub fn can_transition_to(&self, next: InvoiceStatus) -> bool {
        use InvoiceStatus::*;
        matches!(
            (self, next),
            (Draft, Issued) | (Draft, Cancelled) | (Issued, Cancelled)
        )
    }

    pub fn transition(&self, next: InvoiceStatus) -> Result<InvoiceStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError::new("invoice", self.as_str(), next.as_str()))
        }
    }

    pub fn is_editable(&self) -> bool {
        matches!(self, InvoiceStatus::Draft)
    }

    pub fn is_deletable(&self) -> bool {
        matches!(self, InvoiceStatus::Draft)
    }

    pub fn accepts_payment(&self) -> bool {
        matches!(self, InvoiceStatus::Issued | InvoiceStatus::PartiallyPaid)
    }

    /// Visible to portal users
    pub fn is_public(&self) -> bool {
        !matches!(self, InvoiceStatus::Draft)
    }
}

/// A proforma can be converted once it has been issued and not cancelled
pub fn can_convert_to_tax(
    invoice_type: InvoiceType,
    status: InvoiceStatus,
    already_converted: bool,
) -> bool {
    invoice_type == InvoiceType::Proforma
        && !already_converted
        && matches!(
            status,
            InvoiceStatus::Issued | InvoiceStatus::PartiallyPaid | InvoiceStatus::Paid
        )
}

/// Payment status implied by the amount paid so far
pub fn status_after_payment(total: Decimal, amount_paid: Decimal) -> InvoiceStatus {
    if amount_paid >= total {
        InvoiceStatus::Paid
    } else if amount_paid > Decimal::ZERO {
        InvoiceStatus::PartiallyPaid
    } else {
        InvoiceStatus::Issued
    }
}

/// Line item as entered on a quotation, contract or invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItemInput {
    pub description: String,
    #[serde(default)]
    pub sample_type_id: Option<uuid::Uuid>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    #[serde(default)]
    pub discount_percent: Decimal,
    #[serde(default)]
    pub tax_percent: Decimal,
}

/// Computed amounts of one line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAmounts {
    pub gross: Decimal,
    pub discount: Decimal,
    pub taxable: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

/// Document totals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DocumentTotals {
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub tax_total: Decimal,
    pub total: Decimal,
}

/// Round a monetary amount to 2 decimal places, half away from zero
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Largest quantity a line can hold (9 integer digits, 3 decimals)
pub const MAX_QUANTITY: Decimal = Decimal::from_parts(3_567_587_327, 232, 0, false, 3);
pub const QUANTITY_SCALE: u32 = 3;

/// Largest unit price or amount a document can hold (12 integer digits, 2 decimals)
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(276_447_231, 23_283, 0, false, 2);
pub const AMOUNT_SCALE: u32 = 2;

/// Percentages are stored with 2 decimals
pub const PERCENT_SCALE: u32 = 2;

fn scale_of(value: Decimal) -> u32 {
    value.normalize().scale()
}

impl LineItemInput {
    /// Validate a line before it is priced. Bounds follow the storage
    /// precision, so a stored line reproduces its computed total.
    pub fn validate(&self) -> Result<(), &'static str> {
        let hundred = Decimal::from(100);
        if self.description.trim().is_empty() {
            return Err("Line item description cannot be empty");
        }
        if self.quantity <= Decimal::ZERO {
            return Err("Line item quantity must be greater than zero");
        }
        if self.quantity > MAX_QUANTITY {
            return Err("Line item quantity is too large");
        }
        if scale_of(self.quantity) > QUANTITY_SCALE {
            return Err("Line item quantity allows at most 3 decimal places");
        }
        if self.unit_price < Decimal::ZERO {
            return Err("Line item unit price cannot be negative");
        }
        if self.unit_price > MAX_AMOUNT {
            return Err("Line item unit price is too large");
        }
        if scale_of(self.unit_price) > AMOUNT_SCALE {
            return Err("Line item unit price allows at most 2 decimal places");
        }
        if self.discount_percent < Decimal::ZERO || self.discount_percent > hundred {
            return Err("Line item discount must be between 0 and 100 percent");
        }
        if self.tax_percent < Decimal::ZERO || self.tax_percent > hundred {
            return Err("Line item tax must be between 0 and 100 percent");
        }
        if scale_of(self.discount_percent) > PERCENT_SCALE || scale_of(self.tax_percent) > PERCENT_SCALE {
            return Err("Line item percentages allow at most 2 decimal places");
        }
        Ok(())
    }

    /// Price the line. Fails instead of overflowing, and when an amount
    /// would not fit a stored money column.
    pub fn amounts(&self) -> Result<LineAmounts, &'static str> {
        const TOO_LARGE: &str = "Line item amount is too large";
        let hundred = Decimal::from(100);
        let percent_of = |base: Decimal, percent: Decimal| {
            base.checked_mul(percent)
                .and_then(|v| v.checked_div(hundred))
                .map(round_money)
                .ok_or(TOO_LARGE)
        };

        let gross = self
            .quantity
            .checked_mul(self.unit_price)
            .map(round_money)
            .ok_or(TOO_LARGE)?;
        let discount = percent_of(gross, self.discount_percent)?;
        let taxable = gross - discount;
        let tax = percent_of(taxable, self.tax_percent)?;
        let total = taxable.checked_add(tax).ok_or(TOO_LARGE)?;
        if gross > MAX_AMOUNT || total > MAX_AMOUNT {
            return Err(TOO_LARGE);
        }
        Ok(LineAmounts {
            gross,
            discount,
            taxable,
            tax,
            total,
        })
    }
}

/// Sum a document's lines
pub fn compute_totals(items: &[LineItemInput]) -> Result<DocumentTotals, &'static str> {
    const TOO_LARGE: &str = "Document total is too large";
    let mut acc = DocumentTotals::default();
    for item in items {
        let line = item.amounts()?;
        acc.subtotal = acc.subtotal.checked_add(line.gross).ok_or(TOO_LARGE)?;
        acc.discount_total = acc.discount_total.checked_add(line.discount).ok_or(TOO_LARGE)?;
        acc.tax_total = acc.tax_total.checked_add(line.tax).ok_or(TOO_LARGE)?;
        acc.total = acc.total.checked_add(line.total).ok_or(TOO_LARGE)?;
    }
    if acc.subtotal > MAX_AMOUNT || acc.total > MAX_AMOUNT {
        return Err(TOO_LARGE);
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(qty: i64, price: &str, discount: i64, tax: i64) -> LineItemInput {
        LineItemInput {
            description: "Density @15°C (ASTM D4052)".to_string(),
            sample_type_id: None,
            quantity: Decimal::from(qty),
            unit_price: price.parse().unwrap(),
            discount_percent: Decimal::from(discount),
            tax_percent: Decimal::from(tax),
        }
    }

    #[test]
    fn test_line_amounts() {
        let amounts = line(3, "1500.00", 10, 18).amounts().unwrap();
        assert_eq!(amounts.gross, Decimal::new(450000, 2));
        assert_eq!(amounts.discount, Decimal::new(45000, 2));
        assert_eq!(amounts.taxable, Decimal::new(405000, 2));
        assert_eq!(amounts.tax, Decimal::new(72900, 2));
        assert_eq!(amounts.total, Decimal::new(477900, 2));
    }

    #[test]
    fn test_totals_sum_lines() {
        let items = vec![line(1, "2500", 0, 18), line(2, "800.50", 5, 18)];
        let totals = compute_totals(&items).unwrap();
        assert_eq!(totals.subtotal, "4101.00".parse::<Decimal>().unwrap());
        assert_eq!(totals.discount_total, "80.05".parse::<Decimal>().unwrap());
        assert_eq!(
            totals.total,
            totals.subtotal - totals.discount_total + totals.tax_total
        );
    }

    #[test]
    fn test_rounding_half_away_from_zero() {
        assert_eq!(round_money("2.345".parse().unwrap()), "2.35".parse::<Decimal>().unwrap());
        assert_eq!(round_money("2.344".parse().unwrap()), "2.34".parse::<Decimal>().unwrap());
    }

    #[test]
    fn test_line_validation() {
        assert!(line(1, "10", 0, 0).validate().is_ok());
        assert!(line(0, "10", 0, 0).validate().is_err());
        assert!(line(1, "-1", 0, 0).validate().is_err());
        assert!(line(1, "10", 101, 0).validate().is_err());
        let mut blank = line(1, "10", 0, 0);
        blank.description = "  ".to_string();
        assert!(blank.validate().is_err());
    }

    #[test]
    fn test_line_bounds_follow_storage_precision() {
        let mut huge = line(1, "10", 0, 0);
        huge.quantity = "100000000000000000000".parse().unwrap();
        huge.unit_price = "100000000000000000000".parse().unwrap();
        assert!(huge.validate().is_err());
        assert_eq!(huge.amounts(), Err("Line item amount is too large"));

        assert!(line(1, "10.001", 0, 0).validate().is_err());
        assert!(line(1, "10.50", 0, 0).validate().is_ok());
        let mut fine_quantity = line(1, "10", 0, 0);
        fine_quantity.quantity = "1.2345".parse().unwrap();
        assert!(fine_quantity.validate().is_err());
        fine_quantity.quantity = "1.250".parse().unwrap();
        assert!(fine_quantity.validate().is_ok());
    }

    #[test]
    fn test_max_amount_matches_money_column() {
        assert_eq!(MAX_AMOUNT, "999999999999.99".parse::<Decimal>().unwrap());
        assert_eq!(MAX_QUANTITY, "999999999.999".parse::<Decimal>().unwrap());
    }

    #[test]
    fn test_document_total_overflow_is_an_error() {
        let big = line(1, "900000000000.00", 0, 0);
        assert!(big.validate().is_ok());
        assert!(compute_totals(&[big.clone()]).is_ok());
        assert_eq!(
            compute_totals(&[big.clone(), big]),
            Err("Document total is too large")
        );
    }

    #[test]
    fn test_quotation_guards() {
        assert!(QuotationStatus::Draft.is_deletable());
        assert!(!QuotationStatus::Sent.is_deletable());
        assert!(QuotationStatus::Accepted.can_convert());
        assert!(QuotationStatus::Sent.can_convert());
        assert!(!QuotationStatus::Draft.can_convert());
        assert!(!QuotationStatus::Converted.can_convert());
        assert!(!QuotationStatus::Accepted.can_transition_to(QuotationStatus::Converted));
    }

    #[test]
    fn test_proforma_conversion_rules() {
        assert!(can_convert_to_tax(InvoiceType::Proforma, InvoiceStatus::Issued, false));
        assert!(can_convert_to_tax(InvoiceType::Proforma, InvoiceStatus::Paid, false));
        assert!(!can_convert_to_tax(InvoiceType::Proforma, InvoiceStatus::Draft, false));
        assert!(!can_convert_to_tax(InvoiceType::Proforma, InvoiceStatus::Cancelled, false));
        assert!(!can_convert_to_tax(InvoiceType::Proforma, InvoiceStatus::Issued, true));
        assert!(!can_convert_to_tax(InvoiceType::Tax, InvoiceStatus::Issued, false));
    }

    #[test]
    fn test_status_after_payment() {
        let total = Decimal::from(1000);
        assert_eq!(status_after_payment(total, Decimal::ZERO), InvoiceStatus::Issued);
        assert_eq!(
            status_after_payment(total, Decimal::from(400)),
            InvoiceStatus::PartiallyPaid
        );
        assert_eq!(status_after_payment(total, total), InvoiceStatus::Paid);
    }

    #[test]
    fn test_contract_transitions() {
        assert!(ContractStatus::Draft.can_transition_to(ContractStatus::Active));
        assert!(ContractStatus::Active.can_transition_to(ContractStatus::Terminated));
        assert!(!ContractStatus::Completed.can_transition_to(ContractStatus::Active));
        assert!(ContractStatus::Draft.is_deletable());
        assert!(!ContractStatus::Active.is_deletable());
    }
}
