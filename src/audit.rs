/// Audit sink for mutations. Every template change and every posted document
/// gets one record naming who did it.
pub trait AuditLog: Send + Sync {
    fn record(&self, actor: &str, action: &str, entity: &str, entity_id: &str);
}

/// Emits audit records as structured log events under the `audit` target, so
/// they can be routed or filtered independently of application logs.
pub struct TracingAuditLog;

impl AuditLog for TracingAuditLog {
    fn record(&self, actor: &str, action: &str, entity: &str, entity_id: &str) {
        tracing::info!(target: "audit", actor, action, entity, entity_id);
    }
}
