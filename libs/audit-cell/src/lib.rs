// Audit trail for clinical records. Entries carry an expiry computed from
// AUDIT_LOG_TTL_DAYS and are purged by the background sweeper.

pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{AuditEntry, AuditOutcome, NewAuditEntry};
pub use services::AuditService;
pub use router::audit_routes;
