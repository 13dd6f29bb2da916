//! Collaborators consumed by the engine.
//!
//! Each collaborator is a trait with a storage-backed implementation so the
//! engine runs standalone; deployments can swap in their own.

pub mod audit;
pub mod cash_reports;
pub mod riders;

pub use audit::{AuditEntry, AuditLog, AuditSink, StorageAuditSink, TracingAuditSink};
pub use cash_reports::{CashReportSource, StorageCashReportSource};
pub use riders::{RiderDirectory, StorageRiderDirectory};
