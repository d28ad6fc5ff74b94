//! # Audit sink
//!
//! Writes audit events through the structured [`Logger`] port. Intended
//! for deployments where stdout logging is collected; other sinks can
//! persist events elsewhere without touching the services.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::SecondsFormat;

use crate::domain::AuditEvent;
use crate::service::{AuditSink, Logger};

/// Emits one structured log line per audit event, under the `audit` group.
/// Success events log at info, failures at warn.
pub struct StdoutSink {
    log: Box<dyn Logger>,
}

impl StdoutSink {
    pub fn new(log: Arc<dyn Logger>) -> Self {
        StdoutSink {
            log: log.with_group("audit"),
        }
    }
}

#[async_trait]
impl AuditSink for StdoutSink {
    async fn write(&self, event: &AuditEvent) -> Result<()> {
        let fields = event_fields(event);
        if event.is_success() {
            self.log.info("audit_success", &fields);
        } else {
            self.log.warn("audit_failure", &fields);
        }
        Ok(())
    }
}

/// Renders the stable audit field set. Principals appear as a repeated
/// `principal` key, extra attributes gain an `attr_` prefix.
pub fn event_fields(event: &AuditEvent) -> Vec<(String, String)> {
    let mut fields = vec![
        (
            "time".to_string(),
            event.time.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        ),
        ("action".to_string(), event.action.as_str().to_string()),
        ("stage".to_string(), event.stage.as_str().to_string()),
        ("trace_id".to_string(), event.trace_id.clone()),
        ("subject".to_string(), event.subject.clone()),
        ("source_ip".to_string(), event.source_ip.clone()),
    ];
    for principal in &event.principals {
        fields.push(("principal".to_string(), principal.clone()));
    }
    if let Some(serial) = event.serial {
        fields.push(("serial".to_string(), serial.to_string()));
    }
    if let Some(not_before) = event.not_before {
        fields.push((
            "not_before".to_string(),
            not_before.to_rfc3339_opts(SecondsFormat::Secs, true),
        ));
    }
    if let Some(not_after) = event.not_after {
        fields.push((
            "not_after".to_string(),
            not_after.to_rfc3339_opts(SecondsFormat::Secs, true),
        ));
    }
    if !event.key_fp.is_empty() {
        fields.push(("key_fp".to_string(), event.key_fp.clone()));
    }
    if !event.key_id.is_empty() {
        fields.push(("key_id".to_string(), event.key_id.clone()));
    }
    if let Some(code) = event.error_code {
        fields.push(("error_code".to_string(), code.as_str().to_string()));
    }
    if !event.error_message.is_empty() {
        fields.push(("error_message".to_string(), event.error_message.clone()));
    }
    for (name, value) in &event.attrs {
        fields.push((format!("attr_{}", name), value.clone()));
    }
    fields
}
