//! Business logic services for the LIMS platform

pub mod audit;
pub mod auth;
pub mod contract;
pub mod csv_io;
pub mod customer;
pub mod dashboard;
pub mod document;
pub mod invoice;
pub mod lab;
pub mod line_items;
pub mod numbering;
pub mod portal;
pub mod quotation;
pub mod report;
pub mod report_template;
pub mod role;
pub mod sample;
pub mod sample_type;
pub mod test_result;
pub mod user;
pub mod zoho_sync;

pub use audit::AuditService;
pub use auth::AuthService;
pub use contract::ContractService;
pub use customer::CustomerService;
pub use dashboard::DashboardService;
pub use document::DocumentRenderer;
pub use invoice::InvoiceService;
pub use lab::LabService;
pub use numbering::NumberingService;
pub use portal::PortalService;
pub use quotation::QuotationService;
pub use report::ReportService;
pub use report_template::ReportTemplateService;
pub use role::RoleService;
pub use sample::SampleService;
pub use sample_type::SampleTypeService;
pub use test_result::TestResultService;
pub use user::UserService;
pub use zoho_sync::ZohoSyncService;
