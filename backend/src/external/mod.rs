//! External API integrations

pub mod storage;
pub mod zoho;

pub use storage::StorageClient;
pub use zoho::ZohoClient;
