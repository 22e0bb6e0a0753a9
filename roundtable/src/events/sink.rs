//! Audit sink seam
//!
//! Sinks are fire-and-forget from the caller's point of view: a failing
//! sink is logged and ignored, never surfaced through routing or
//! consensus.

use std::sync::Arc;

use tracing::{info, warn};

use super::types::DispatchEvent;
use crate::error::AuditError;

/// Receives every audit event
pub trait AuditSink: Send + Sync {
    fn log(&self, event: &DispatchEvent) -> Result<(), AuditError>;
}

/// Shared sink handle
pub type SharedAuditSink = Arc<dyn AuditSink>;

/// Deliver `event`, downgrading a sink failure to a warning
pub fn emit(sink: &dyn AuditSink, event: &DispatchEvent) {
    if let Err(e) = sink.log(event) {
        warn!(event_type = event.event_type(), error = %e, "Audit sink failed");
    }
}

/// Emits each event as a structured `info!` record on `roundtable::audit`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn log(&self, event: &DispatchEvent) -> Result<(), AuditError> {
        let data =
            serde_json::to_string(event).map_err(|e| AuditError::DeliveryFailed(e.to_string()))?;
        info!(
            target: "roundtable::audit",
            event_type = event.event_type(),
            task_id = event.task_id(),
            %data,
            "audit"
        );
        Ok(())
    }
}

/// Forwards each event to several sinks; the first failure is reported
/// after every sink has been tried
pub struct FanoutAuditSink {
    sinks: Vec<SharedAuditSink>,
}

impl FanoutAuditSink {
    pub fn new(sinks: Vec<SharedAuditSink>) -> Self {
        Self { sinks }
    }
}

impl AuditSink for FanoutAuditSink {
    fn log(&self, event: &DispatchEvent) -> Result<(), AuditError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.log(event) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
