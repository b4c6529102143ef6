//! Audit trail for transfer transitions and swallowed handler failures.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use stockflow_core::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// A persisted state change observed on the bus.
    Transition,
    /// A subscriber failed and the error was contained.
    HandlerFailure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub kind: AuditKind,
    pub tenant_id: Option<TenantId>,
    /// Subscriber or component name.
    pub source: String,
    pub event_type: Option<String>,
    pub detail: String,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn transition(tenant_id: TenantId, event_type: &str, detail: impl Into<String>) -> Self {
        Self {
            kind: AuditKind::Transition,
            tenant_id: Some(tenant_id),
            source: "audit".to_string(),
            event_type: Some(event_type.to_string()),
            detail: detail.into(),
            recorded_at: Utc::now(),
        }
    }

    pub fn handler_failure(
        source: &str,
        tenant_id: Option<TenantId>,
        event_type: Option<&str>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind: AuditKind::HandlerFailure,
            tenant_id,
            source: source.to_string(),
            event_type: event_type.map(str::to_string),
            detail: detail.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// Write-only audit sink. Recording must not fail the caller.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry);
}

/// Sink that emits each entry as a structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: AuditEntry) {
        let tenant = entry.tenant_id.map(|t| t.to_string()).unwrap_or_default();
        let event_type = entry.event_type.as_deref().unwrap_or("-");
        match entry.kind {
            AuditKind::Transition => info!(
                audit = "transition",
                tenant = %tenant,
                event_type,
                detail = %entry.detail,
                "audit"
            ),
            AuditKind::HandlerFailure => warn!(
                audit = "handler_failure",
                source = %entry.source,
                tenant = %tenant,
                event_type,
                detail = %entry.detail,
                "audit"
            ),
        }
    }
}

/// In-memory sink for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn of_kind(&self, kind: AuditKind) -> Vec<AuditEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, entry: AuditEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}
