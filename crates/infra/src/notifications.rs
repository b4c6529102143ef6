//! Outbound operational alerts.
//!
//! The core only names a template and supplies variables. Rendering and
//! delivery (email, chat, pager) belong to the gateway, and so does any
//! retry policy: callers log a failed send and move on.

use std::sync::Mutex;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;

/// Alert templates raised by the core.
pub mod templates {
    pub const INVENTORY_DRIFT: &str = "inventory.drift_detected";
    pub const MISSING_INVENTORY_RECORD: &str = "inventory.missing_record";
    pub const TRANSFER_REQUESTED: &str = "transfer.requested";
    pub const TRANSFER_APPROVED: &str = "transfer.approved";
    pub const TRANSFER_REJECTED: &str = "transfer.rejected";
    pub const TRANSFER_CANCELLED: &str = "transfer.cancelled";
    pub const TRANSFER_COMPLETED: &str = "transfer.completed";
}

pub type AlertVariables = Map<String, Value>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotificationError {
    #[error("notification gateway unavailable: {0}")]
    Unavailable(String),

    #[error("notification rejected: {0}")]
    Rejected(String),
}

pub trait NotificationGateway: Send + Sync {
    fn send_alert(&self, template: &str, variables: &AlertVariables) -> Result<(), NotificationError>;
}

/// Gateway that only writes alerts to the log. Used by the worker binary
/// until a real delivery channel is wired in.
#[derive(Debug, Clone)]
pub struct LogNotificationGateway {
    recipient: String,
}

impl LogNotificationGateway {
    pub fn new(recipient: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
        }
    }
}

impl NotificationGateway for LogNotificationGateway {
    fn send_alert(&self, template: &str, variables: &AlertVariables) -> Result<(), NotificationError> {
        let variables = Value::Object(variables.clone());
        info!(
            recipient = %self.recipient,
            template,
            variables = %variables,
            "alert"
        );
        Ok(())
    }
}

/// A captured alert.
#[derive(Debug, Clone, PartialEq)]
pub struct SentAlert {
    pub template: String,
    pub variables: AlertVariables,
}

/// In-memory gateway for tests/dev. Can be switched into a failing mode.
#[derive(Debug, Default)]
pub struct InMemoryNotificationGateway {
    sent: Mutex<Vec<SentAlert>>,
    failing: Mutex<bool>,
}

impl InMemoryNotificationGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut f) = self.failing.lock() {
            *f = failing;
        }
    }

    pub fn sent(&self) -> Vec<SentAlert> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn sent_with(&self, template: &str) -> Vec<SentAlert> {
        self.sent()
            .into_iter()
            .filter(|a| a.template == template)
            .collect()
    }
}

impl NotificationGateway for InMemoryNotificationGateway {
    fn send_alert(&self, template: &str, variables: &AlertVariables) -> Result<(), NotificationError> {
        if self.failing.lock().map(|f| *f).unwrap_or(true) {
            return Err(NotificationError::Unavailable("gateway switched off".into()));
        }
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| NotificationError::Unavailable("lock poisoned".into()))?;
        sent.push(SentAlert {
            template: template.to_string(),
            variables: variables.clone(),
        });
        Ok(())
    }
}
