use parley_core::audit::{AuditEvent, AuditOutcome, AuditSink};
use tracing::{info, warn};

/// Writes audit events to the log under the `audit` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let session_id = event.session_id.as_ref().map(|id| id.as_str()).unwrap_or("unknown");
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();

        match event.outcome {
            AuditOutcome::Success => info!(
                target: "audit",
                event_name = %event.event_type,
                audit_event_id = %event.event_id,
                category = ?event.category,
                session_id,
                correlation_id = %event.correlation_id,
                metadata = %metadata,
                "audit event"
            ),
            AuditOutcome::Rejected | AuditOutcome::Failed => warn!(
                target: "audit",
                event_name = %event.event_type,
                audit_event_id = %event.event_id,
                category = ?event.category,
                outcome = ?event.outcome,
                session_id,
                correlation_id = %event.correlation_id,
                metadata = %metadata,
                "audit event"
            ),
        }
    }
}
