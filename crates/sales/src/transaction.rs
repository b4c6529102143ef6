use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{AggregateId, DomainError, LocationId, ProductId, TenantId};
use stockflow_events::Event;
use stockflow_inventory::{BatchId, Scope, SourceRef, StockKey};

pub mod event_types {
    pub const TRANSACTION_COMPLETED: &str = "TRANSACTION_COMPLETED";
    pub const REFUND_COMPLETED: &str = "REFUND_COMPLETED";
}

/// Sales transaction identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub AggregateId);

impl TransactionId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Open,
    Completed,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Open => "open",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Refunded => "refunded",
        }
    }
}

impl core::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sold product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub batch: Option<BatchId>,
    pub quantity: i64,
}

/// A point-of-sale transaction at one location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesTransaction {
    pub transaction_id: TransactionId,
    pub tenant_id: TenantId,
    pub location_id: LocationId,
    pub status: TransactionStatus,
    pub lines: Vec<SaleLine>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SalesTransaction {
    pub fn open(
        transaction_id: TransactionId,
        tenant_id: TenantId,
        location_id: LocationId,
        lines: Vec<SaleLine>,
    ) -> Result<Self, DomainError> {
        if lines.is_empty() {
            return Err(DomainError::validation("transaction needs at least one line"));
        }
        if let Some(line) = lines.iter().find(|l| l.quantity <= 0) {
            return Err(DomainError::validation(format!(
                "line {} quantity must be positive",
                line.line_no
            )));
        }
        let mut line_nos: Vec<u32> = lines.iter().map(|l| l.line_no).collect();
        line_nos.sort_unstable();
        line_nos.dedup();
        if line_nos.len() != lines.len() {
            return Err(DomainError::validation("line numbers must be unique"));
        }

        Ok(Self {
            transaction_id,
            tenant_id,
            location_id,
            status: TransactionStatus::Open,
            lines,
            completed_at: None,
        })
    }

    pub fn scope(&self) -> Scope {
        Scope::new(self.tenant_id, self.location_id)
    }

    /// Full stock key of a line (tenant, location, product, batch).
    pub fn line_key(&self, line: &SaleLine) -> StockKey {
        StockKey::at(self.scope(), line.product_id, line.batch.clone())
    }

    /// Ledger deltas a completed sale implies: one negative entry per line.
    pub fn sale_movements(&self) -> Vec<(StockKey, i64, SourceRef)> {
        self.lines
            .iter()
            .map(|l| {
                (
                    self.line_key(l),
                    -l.quantity,
                    SourceRef::Sale {
                        transaction_id: self.transaction_id.0,
                        line_no: l.line_no,
                    },
                )
            })
            .collect()
    }

    /// Ledger deltas a full refund implies: the sale reversed line by line.
    pub fn refund_movements(&self) -> Vec<(StockKey, i64, SourceRef)> {
        self.lines
            .iter()
            .map(|l| {
                (
                    self.line_key(l),
                    l.quantity,
                    SourceRef::Refund {
                        transaction_id: self.transaction_id.0,
                        line_no: l.line_no,
                    },
                )
            })
            .collect()
    }

    pub fn complete(&mut self, occurred_at: DateTime<Utc>) -> Result<SalesEvent, DomainError> {
        if self.status != TransactionStatus::Open {
            return Err(DomainError::invalid_transition(self.status, "complete"));
        }
        self.status = TransactionStatus::Completed;
        self.completed_at = Some(occurred_at);

        Ok(SalesEvent::TransactionCompleted(TransactionCompleted {
            transaction: self.clone(),
            occurred_at,
        }))
    }

    pub fn refund(&mut self, occurred_at: DateTime<Utc>) -> Result<SalesEvent, DomainError> {
        if self.status != TransactionStatus::Completed {
            return Err(DomainError::invalid_transition(self.status, "refund"));
        }
        self.status = TransactionStatus::Refunded;

        Ok(SalesEvent::RefundCompleted(RefundCompleted {
            transaction: self.clone(),
            occurred_at,
        }))
    }
}

/// Event: TransactionCompleted. Carries the whole transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionCompleted {
    pub transaction: SalesTransaction,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RefundCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundCompleted {
    pub transaction: SalesTransaction,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SalesEvent {
    TransactionCompleted(TransactionCompleted),
    RefundCompleted(RefundCompleted),
}

impl SalesEvent {
    pub fn transaction(&self) -> &SalesTransaction {
        match self {
            SalesEvent::TransactionCompleted(e) => &e.transaction,
            SalesEvent::RefundCompleted(e) => &e.transaction,
        }
    }
}

impl Event for SalesEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SalesEvent::TransactionCompleted(_) => event_types::TRANSACTION_COMPLETED,
            SalesEvent::RefundCompleted(_) => event_types::REFUND_COMPLETED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SalesEvent::TransactionCompleted(e) => e.occurred_at,
            SalesEvent::RefundCompleted(e) => e.occurred_at,
        }
    }
}
