//! Domain models for the LIMS platform

mod access;
mod billing;
mod numbering;
mod report;
mod sample;

pub use access::*;
pub use billing::*;
pub use numbering::*;
pub use report::*;
pub use sample::*;

use thiserror::Error;

/// Rejected status change of a workflow document
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Cannot move {entity} from {from} to {to}")]
pub struct TransitionError {
    pub entity: &'static str,
    pub from: &'static str,
    pub to: &'static str,
}

impl TransitionError {
    pub fn new(entity: &'static str, from: &'static str, to: &'static str) -> Self {
        Self { entity, from, to }
    }
}
