use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{AggregateId, DomainError, LocationId, ProductId, TenantId};
use stockflow_events::Event;
use stockflow_inventory::{BatchId, Scope, SourceRef, StockKey};

pub mod event_types {
    pub const PURCHASE_ORDER_RECEIVED: &str = "PURCHASE_ORDER_RECEIVED";
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReceiptId(pub AggregateId);

impl ReceiptId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ReceiptId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub batch: Option<BatchId>,
    pub quantity: i64,
}

/// Goods received against a purchase order at one location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseReceipt {
    pub receipt_id: ReceiptId,
    pub tenant_id: TenantId,
    pub location_id: LocationId,
    /// Supplier-facing purchase order number.
    pub purchase_order_ref: String,
    pub lines: Vec<ReceiptLine>,
    pub received_at: DateTime<Utc>,
}

impl PurchaseReceipt {
    pub fn new(
        receipt_id: ReceiptId,
        tenant_id: TenantId,
        location_id: LocationId,
        purchase_order_ref: impl Into<String>,
        lines: Vec<ReceiptLine>,
        received_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let purchase_order_ref = purchase_order_ref.into();
        if purchase_order_ref.trim().is_empty() {
            return Err(DomainError::validation("purchase order reference cannot be empty"));
        }
        if lines.is_empty() {
            return Err(DomainError::validation("receipt needs at least one line"));
        }
        if let Some(line) = lines.iter().find(|l| l.quantity <= 0) {
            return Err(DomainError::validation(format!(
                "receipt line {} quantity must be positive",
                line.line_no
            )));
        }

        Ok(Self {
            receipt_id,
            tenant_id,
            location_id,
            purchase_order_ref,
            lines,
            received_at,
        })
    }

    pub fn line_key(&self, line: &ReceiptLine) -> StockKey {
        StockKey::at(
            Scope::new(self.tenant_id, self.location_id),
            line.product_id,
            line.batch.clone(),
        )
    }

    /// Ledger deltas implied by the receipt: one positive entry per line.
    pub fn movements(&self) -> Vec<(StockKey, i64, SourceRef)> {
        self.lines
            .iter()
            .map(|l| {
                (
                    self.line_key(l),
                    l.quantity,
                    SourceRef::PurchaseReceipt {
                        receipt_id: self.receipt_id.0,
                        line_no: l.line_no,
                    },
                )
            })
            .collect()
    }
}

/// Event: PurchaseOrderReceived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderReceived {
    pub receipt: PurchaseReceipt,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchasingEvent {
    PurchaseOrderReceived(PurchaseOrderReceived),
}

impl Event for PurchasingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchasingEvent::PurchaseOrderReceived(_) => event_types::PURCHASE_ORDER_RECEIVED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PurchasingEvent::PurchaseOrderReceived(e) => e.occurred_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receipt_lines_become_positive_movements() {
        let receipt = PurchaseReceipt::new(
            ReceiptId::new(AggregateId::new()),
            TenantId::new(),
            LocationId::new(),
            "PO-1001",
            vec![
                ReceiptLine {
                    line_no: 1,
                    product_id: ProductId::new(),
                    batch: Some(BatchId::new("LOT-9")),
                    quantity: 12,
                },
                ReceiptLine {
                    line_no: 2,
                    product_id: ProductId::new(),
                    batch: None,
                    quantity: 3,
                },
            ],
            Utc::now(),
        )
        .unwrap();

        let movements = receipt.movements();
        assert_eq!(movements.len(), 2);
        assert_eq!(movements[0].1, 12);
        assert_eq!(movements[0].0.batch, Some(BatchId::new("LOT-9")));
        assert_eq!(movements[1].1, 3);
    }

    #[test]
    fn receipt_validates_input() {
        let mk = |po: &str, quantity: i64| {
            PurchaseReceipt::new(
                ReceiptId::new(AggregateId::new()),
                TenantId::new(),
                LocationId::new(),
                po,
                vec![ReceiptLine {
                    line_no: 1,
                    product_id: ProductId::new(),
                    batch: None,
                    quantity,
                }],
                Utc::now(),
            )
        };
        assert!(mk(" ", 1).is_err());
        assert!(mk("PO-1", 0).is_err());
        assert!(mk("PO-1", 1).is_ok());
    }
}
