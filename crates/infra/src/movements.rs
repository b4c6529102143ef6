//! Non-transfer stock write paths: sales, refunds, purchase receipts and
//! manual adjustments.
//!
//! Each path writes through [`InventoryStore::commit`] with the snapshot it
//! just read as the expected value, retrying on conflict. Legs whose source
//! is already in the ledger are skipped, so every path is safe to retry.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use stockflow_core::{AggregateId, DomainError};
use stockflow_events::EventBus;
use stockflow_inventory::{LedgerEntry, Movement, SourceRef, StockKey};
use stockflow_purchasing::{PurchaseOrderReceived, PurchaseReceipt, PurchasingEvent};
use stockflow_sales::{SalesTransaction, TransactionId, TransactionStatus};

use crate::domain_event::{StockflowEnvelope, publish_committed, purchasing_envelope, sales_envelope};
use crate::store::{
    InventoryStore, IsConflict, PurchaseReceiptStore, SalesTransactionStore, StoreError,
    retry_on_conflict,
};

#[derive(Debug, Error)]
pub enum MovementError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MovementError {
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            MovementError::Domain(e) => Some(e),
            MovementError::Store(_) => None,
        }
    }

    fn surfaced(self) -> Self {
        match self {
            MovementError::Store(StoreError::Conflict(msg)) => {
                MovementError::Domain(DomainError::conflict(msg))
            }
            other => other,
        }
    }
}

impl IsConflict for MovementError {
    fn is_conflict(&self) -> bool {
        matches!(self, MovementError::Store(e) if e.is_conflict())
    }
}

/// What to do with a leg whose key has no snapshot row yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MissingRow {
    /// Create the row from the movement.
    Create,
    /// Write the ledger entry only and leave the gap for reconciliation.
    LedgerOnly,
}

pub struct StockMovementService<B> {
    inventory: Arc<dyn InventoryStore>,
    sales: Arc<dyn SalesTransactionStore>,
    receipts: Arc<dyn PurchaseReceiptStore>,
    bus: B,
    max_write_attempts: u32,
}

impl<B> StockMovementService<B>
where
    B: EventBus<StockflowEnvelope>,
{
    pub fn new(
        inventory: Arc<dyn InventoryStore>,
        sales: Arc<dyn SalesTransactionStore>,
        receipts: Arc<dyn PurchaseReceiptStore>,
        bus: B,
        max_write_attempts: u32,
    ) -> Self {
        Self {
            inventory,
            sales,
            receipts,
            bus,
            max_write_attempts: max_write_attempts.max(1),
        }
    }

    /// Complete an open sale and deduct its lines.
    ///
    /// A line whose key has no inventory record is still written to the
    /// ledger: the sale already happened and is never rolled back.
    pub fn complete_sale(&self, mut transaction: SalesTransaction) -> Result<SalesTransaction, MovementError> {
        let event = transaction.complete(Utc::now())?;

        self.apply(&transaction.sale_movements(), MissingRow::LedgerOnly)?;
        self.sales
            .insert_transaction(&transaction)
            .map_err(|e| MovementError::from(e).surfaced())?;

        info!(
            tenant = %transaction.tenant_id,
            transaction_id = %transaction.transaction_id,
            lines = transaction.lines.len(),
            "sale completed"
        );
        publish_committed(&self.bus, sales_envelope(&transaction, event));
        Ok(transaction)
    }

    /// Refund a completed sale in full, returning every line to stock.
    pub fn refund_sale(&self, id: TransactionId) -> Result<SalesTransaction, MovementError> {
        let (transaction, event) = retry_on_conflict::<_, MovementError, _>(self.max_write_attempts, |_| {
            let mut transaction = self
                .sales
                .read_transaction(id)?
                .ok_or_else(|| DomainError::not_found(format!("transaction {id}")))?;
            let event = transaction.refund(Utc::now())?;

            self.apply(&transaction.refund_movements(), MissingRow::Create)?;
            self.sales
                .write_transaction(&transaction, TransactionStatus::Completed)?;
            Ok((transaction, event))
        })
        .map_err(MovementError::surfaced)?;

        info!(
            tenant = %transaction.tenant_id,
            transaction_id = %id,
            "refund completed"
        );
        publish_committed(&self.bus, sales_envelope(&transaction, event));
        Ok(transaction)
    }

    /// Book goods received against a purchase order.
    pub fn receive_purchase(&self, receipt: PurchaseReceipt) -> Result<PurchaseReceipt, MovementError> {
        self.apply(&receipt.movements(), MissingRow::Create)?;
        self.receipts
            .insert_receipt(&receipt)
            .map_err(|e| MovementError::from(e).surfaced())?;

        info!(
            tenant = %receipt.tenant_id,
            receipt_id = %receipt.receipt_id,
            purchase_order = %receipt.purchase_order_ref,
            "purchase order received"
        );
        let event = PurchasingEvent::PurchaseOrderReceived(PurchaseOrderReceived {
            receipt: receipt.clone(),
            occurred_at: Utc::now(),
        });
        publish_committed(&self.bus, purchasing_envelope(&receipt, event));
        Ok(receipt)
    }

    /// Manual stock correction. `reference` identifies the adjustment so a
    /// retry is not applied twice.
    pub fn adjust(
        &self,
        key: &StockKey,
        delta: i64,
        reference: AggregateId,
    ) -> Result<Vec<LedgerEntry>, MovementError> {
        if delta == 0 {
            return Err(DomainError::validation("adjustment delta cannot be zero").into());
        }
        let legs = [(key.clone(), delta, SourceRef::Adjustment { reference })];
        let written = self.apply(&legs, MissingRow::Create)?;
        info!(key = %key, delta, "stock adjusted");
        Ok(written)
    }

    fn apply(
        &self,
        legs: &[(StockKey, i64, SourceRef)],
        missing: MissingRow,
    ) -> Result<Vec<LedgerEntry>, MovementError> {
        retry_on_conflict::<_, MovementError, _>(self.max_write_attempts, |_| {
            let mut batch = Vec::with_capacity(legs.len());
            let mut ledger_only = Vec::new();
            let mut expected: HashMap<&StockKey, Option<i64>> = HashMap::new();

            for (key, delta, source) in legs {
                if self.inventory.has_entry(key, source)? {
                    continue;
                }
                let current = match expected.get(key) {
                    Some(q) => *q,
                    None => self.inventory.read_snapshot(key)?.map(|s| s.quantity),
                };

                match (current, missing) {
                    (None, MissingRow::LedgerOnly) => ledger_only.push((key, *delta, source)),
                    _ => {
                        let movement = Movement::new(key.clone(), *delta, source.clone(), current);
                        expected.insert(key, Some(movement.resulting_quantity()));
                        batch.push(movement);
                    }
                }
            }

            let mut written = self.inventory.commit(&batch)?;
            for (key, delta, source) in ledger_only {
                warn!(
                    key = %key,
                    source = source.kind(),
                    "no inventory record for key; ledger entry written without snapshot"
                );
                written.push(self.inventory.create_ledger_entry(key, delta, source.clone())?);
            }
            Ok(written)
        })
        .map_err(MovementError::surfaced)
    }
}
