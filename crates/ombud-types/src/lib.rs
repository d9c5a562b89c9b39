//! Shared types for the ombud workspace.
//!
//! Every other crate depends on this one for the common error enum,
//! the environment-driven configuration, and the complaint domain types
//! that flow between the portal, the ledger, and the chat gateway.

pub mod complaint;
pub mod config;
pub mod error;

pub use complaint::{ComplaintDetail, ComplaintRef, LedgerRecord, ProcessResult};
pub use config::Config;
pub use error::OmbudError;
