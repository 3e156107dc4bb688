use std::sync::Arc;

use cadence_core::audit::{AuditEvent, AuditSink};
use cadence_db::repositories::{AnalyticsEvent, AnalyticsRepository};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::warn;

/// Forwards engine audit events into the analytics table.
///
/// `emit` is synchronous, so events are queued and written by a background
/// task. The task ends once every sink handle has been dropped.
#[derive(Clone)]
pub struct AnalyticsAuditSink {
    queue: mpsc::UnboundedSender<AuditEvent>,
}

impl AnalyticsAuditSink {
    pub fn spawn(analytics: Arc<dyn AnalyticsRepository>) -> Self {
        let (queue, mut events) = mpsc::unbounded_channel::<AuditEvent>();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let event_type = event.event_type.clone();
                if let Err(error) = analytics.log_event(to_analytics(event)).await {
                    warn!(
                        event_name = "system.audit.persist_failed",
                        audit_event = %event_type,
                        error = %error,
                        "audit event could not be stored"
                    );
                }
            }
        });
        Self { queue }
    }
}

impl AuditSink for AnalyticsAuditSink {
    fn emit(&self, event: AuditEvent) {
        if self.queue.send(event).is_err() {
            warn!(event_name = "system.audit.dropped", "audit forwarder stopped, event dropped");
        }
    }
}

fn to_analytics(event: AuditEvent) -> AnalyticsEvent {
    let metadata = json!({
        "event_id": event.event_id,
        "category": event.category,
        "actor": event.actor,
        "outcome": event.outcome,
        "details": event.metadata,
    });
    let mut record = AnalyticsEvent::new(event.event_type, metadata)
        .with_correlation(event.correlation_id);
    record.occurred_at = event.occurred_at;
    if let Some(thread_key) = event.thread_key {
        record = record.for_thread(thread_key);
    }
    record
}
