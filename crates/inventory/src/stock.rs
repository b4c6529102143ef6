//! Ledger and snapshot value types.
//!
//! The ledger is the append-only source of truth; the snapshot is a derived
//! per-key cache. Both are addressed by the full [`StockKey`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockflow_core::{AggregateId, LocationId, ProductId, TenantId, ValueObject};

use crate::transfer::TransferId;

/// Where inventory physically sits: a store or warehouse of one tenant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub tenant_id: TenantId,
    pub location_id: LocationId,
}

impl Scope {
    pub fn new(tenant_id: TenantId, location_id: LocationId) -> Self {
        Self {
            tenant_id,
            location_id,
        }
    }
}

impl ValueObject for Scope {}

impl core::fmt::Display for Scope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.location_id)
    }
}

/// Batch / lot identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub String);

impl BatchId {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for BatchId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one ledger stream and its snapshot row.
///
/// Always the full scope: tenant, location, product (variants are distinct
/// products) and batch. Reconciliation never compares on a narrower key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub tenant_id: TenantId,
    pub location_id: LocationId,
    pub product_id: ProductId,
    pub batch: Option<BatchId>,
}

impl StockKey {
    pub fn new(
        tenant_id: TenantId,
        location_id: LocationId,
        product_id: ProductId,
        batch: Option<BatchId>,
    ) -> Self {
        Self {
            tenant_id,
            location_id,
            product_id,
            batch,
        }
    }

    pub fn at(scope: Scope, product_id: ProductId, batch: Option<BatchId>) -> Self {
        Self::new(scope.tenant_id, scope.location_id, product_id, batch)
    }

    pub fn scope(&self) -> Scope {
        Scope::new(self.tenant_id, self.location_id)
    }
}

impl ValueObject for StockKey {}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.tenant_id,
            self.location_id,
            self.product_id,
            self.batch.as_ref().map(BatchId::as_str).unwrap_or("-")
        )
    }
}

/// Which side of a transfer a ledger entry belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferLeg {
    Source,
    Destination,
}

/// The business event that caused a ledger entry.
///
/// `(key, source)` is unique in the ledger: writing the same source twice to
/// the same key is a no-op, which is what makes retries safe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceRef {
    Transfer {
        transfer_id: TransferId,
        leg: TransferLeg,
    },
    Sale {
        transaction_id: AggregateId,
        line_no: u32,
    },
    Refund {
        transaction_id: AggregateId,
        line_no: u32,
    },
    PurchaseReceipt {
        receipt_id: AggregateId,
        line_no: u32,
    },
    Adjustment {
        reference: AggregateId,
    },
}

impl SourceRef {
    pub fn transfer(transfer_id: TransferId, leg: TransferLeg) -> Self {
        Self::Transfer { transfer_id, leg }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SourceRef::Transfer { .. } => "transfer",
            SourceRef::Sale { .. } => "sale",
            SourceRef::Refund { .. } => "refund",
            SourceRef::PurchaseReceipt { .. } => "purchase_receipt",
            SourceRef::Adjustment { .. } => "adjustment",
        }
    }
}

/// One immutable ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: Uuid,
    pub key: StockKey,
    pub delta: i64,
    pub source: SourceRef,
    pub recorded_at: DateTime<Utc>,
}

/// Materialized quantity for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSnapshot {
    pub key: StockKey,
    pub quantity: i64,
    pub updated_at: DateTime<Utc>,
}

/// A ledger append paired with the snapshot update it implies.
///
/// `expected_snapshot` is the snapshot value the writer read before deciding
/// (`None` when no row existed). The store applies the movement only if the
/// row still holds that value, and then sets it to `expected + delta`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Movement {
    pub key: StockKey,
    pub delta: i64,
    pub source: SourceRef,
    pub expected_snapshot: Option<i64>,
}

impl Movement {
    pub fn new(key: StockKey, delta: i64, source: SourceRef, expected_snapshot: Option<i64>) -> Self {
        Self {
            key,
            delta,
            source,
            expected_snapshot,
        }
    }

    /// Snapshot value after this movement is applied.
    pub fn resulting_quantity(&self) -> i64 {
        self.expected_snapshot.unwrap_or(0) + self.delta
    }
}
