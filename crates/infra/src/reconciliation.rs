//! Reconciliation engine.
//!
//! Compares the ledger-derived quantity with the materialized snapshot per
//! [`StockKey`]. Drift found by [`ReconciliationEngine::reconcile_key`] or the
//! sweep is reported (log + alert), never corrected. The only paths that
//! write a snapshot are the transfer-receipt repair and, when enabled by
//! configuration, the purchase-receipt repair; both set the snapshot to the
//! ledger sum through compare-and-swap.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use stockflow_core::{DomainError, TenantId, UserId};
use stockflow_inventory::{StockKey, TransferId, TransferStatus};
use stockflow_invoicing::{InvoiceId, InvoiceStatus};
use stockflow_purchasing::ReceiptId;
use stockflow_sales::{TransactionId, TransactionStatus};

use crate::config::StockflowConfig;
use crate::notifications::{AlertVariables, NotificationGateway, templates};
use crate::store::{IsConflict, StoreError, StoreSet, retry_on_conflict};

#[derive(Debug, Error)]
pub enum ReconciliationError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReconciliationError {
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            ReconciliationError::Domain(e) => Some(e),
            ReconciliationError::Store(_) => None,
        }
    }
}

impl IsConflict for ReconciliationError {
    fn is_conflict(&self) -> bool {
        matches!(self, ReconciliationError::Store(e) if e.is_conflict())
    }
}

/// Outcome of comparing one key. Produced per run; not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationResult {
    pub key: StockKey,
    /// Σ delta over the ledger. The expected on-hand quantity.
    pub ledger_quantity: i64,
    /// Snapshot as read, before any repair. `None` when no row exists.
    pub snapshot_quantity: Option<i64>,
    pub mismatch: bool,
    /// The snapshot was rewritten to `ledger_quantity`.
    pub repaired: bool,
    pub checked_at: DateTime<Utc>,
}

impl ReconciliationResult {
    /// Snapshot minus ledger; a missing row counts as zero.
    pub fn drift(&self) -> i64 {
        self.snapshot_quantity.unwrap_or(0) - self.ledger_quantity
    }
}

/// Summary of one full sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// One entry per ledger key, in key order.
    pub results: Vec<ReconciliationResult>,
    pub mismatches: usize,
    /// Drift alerts the gateway refused. The sweep carries on regardless.
    pub alert_failures: usize,
    /// Keys that could not be read at all.
    pub key_failures: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SweepReport {
    pub fn mismatched(&self) -> impl Iterator<Item = &ReconciliationResult> {
        self.results.iter().filter(|r| r.mismatch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AlertOutcome {
    NotNeeded,
    Sent,
    Failed,
}

pub struct ReconciliationEngine {
    stores: StoreSet,
    notifications: Arc<dyn NotificationGateway>,
    max_write_attempts: u32,
    repair_purchase_receipts: bool,
    alert_recipient: String,
}

impl ReconciliationEngine {
    pub fn new(
        stores: StoreSet,
        notifications: Arc<dyn NotificationGateway>,
        config: &StockflowConfig,
    ) -> Self {
        Self {
            stores,
            notifications,
            max_write_attempts: config.max_write_attempts.max(1),
            repair_purchase_receipts: config.repair_purchase_receipts,
            alert_recipient: config.alert_recipient.clone(),
        }
    }

    /// Compare ledger sum and snapshot for one key.
    ///
    /// A match is a silent no-op. A mismatch is logged and alerted; running
    /// it again without new writes yields the same result.
    pub fn reconcile_key(&self, key: &StockKey) -> Result<ReconciliationResult, ReconciliationError> {
        self.check_key(key).map(|(result, _)| result)
    }

    /// Repair the destination snapshot of a completed transfer from the
    /// ledger. `tenant_id` must be a party to the transfer.
    pub fn reconcile_stock_transfer_receipt(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        transfer_id: TransferId,
    ) -> Result<ReconciliationResult, ReconciliationError> {
        let transfer = self
            .stores
            .transfers
            .read_transfer(transfer_id)?
            .filter(|t| {
                let d = t.details();
                d.source.tenant_id == tenant_id || d.destination.tenant_id == tenant_id
            })
            .ok_or_else(|| DomainError::not_found(format!("transfer {transfer_id}")))?;

        if transfer.status() != TransferStatus::Completed {
            return Err(DomainError::validation(format!(
                "transfer {transfer_id} is {}, not completed",
                transfer.status()
            ))
            .into());
        }

        let key = transfer.details().destination_key();
        let result = self.repair_to_ledger(&key)?;
        if result.repaired {
            warn!(
                tenant = %tenant_id,
                user = %user_id,
                transfer_id = %transfer_id,
                key = %key,
                ledger = result.ledger_quantity,
                snapshot = ?result.snapshot_quantity,
                "destination snapshot repaired from ledger"
            );
        } else {
            debug!(transfer_id = %transfer_id, key = %key, "transfer receipt consistent");
        }
        Ok(result)
    }

    /// Settle invoice status from its payments: `paid` once they cover the
    /// total, `partially_paid` otherwise.
    pub fn reconcile_invoice_payment(&self, invoice_id: InvoiceId) -> Result<InvoiceStatus, ReconciliationError> {
        let invoice = self
            .stores
            .invoices
            .read_invoice(invoice_id)?
            .ok_or_else(|| DomainError::not_found(format!("invoice {invoice_id}")))?;
        let payments = self.stores.invoices.payments_for(invoice_id)?;

        let status = invoice.settle(&payments);
        if status != invoice.status {
            self.stores.invoices.set_invoice_status(invoice_id, status)?;
            info!(
                tenant = %invoice.tenant_id,
                invoice_id = %invoice_id,
                status = status.as_str(),
                payments = payments.len(),
                "invoice settled"
            );
        }
        Ok(status)
    }

    /// Check that every line of a completed sale has an inventory record.
    ///
    /// Missing records are warned and alerted, never an error: the sale has
    /// already happened. Returns the keys without a record.
    pub fn reconcile_transaction_inventory(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<StockKey>, ReconciliationError> {
        let transaction = self
            .stores
            .sales
            .read_transaction(transaction_id)?
            .ok_or_else(|| DomainError::not_found(format!("transaction {transaction_id}")))?;

        if transaction.status == TransactionStatus::Open {
            return Err(DomainError::validation(format!(
                "transaction {transaction_id} is not completed"
            ))
            .into());
        }

        let mut missing = Vec::new();
        for line in &transaction.lines {
            let key = transaction.line_key(line);
            if self.stores.inventory.read_snapshot(&key)?.is_some() {
                continue;
            }

            warn!(
                tenant = %transaction.tenant_id,
                transaction_id = %transaction_id,
                line = line.line_no,
                key = %key,
                "sold line has no inventory record"
            );
            let mut vars = key_variables(&key);
            vars.insert("transaction_id".into(), json!(transaction_id.to_string()));
            vars.insert("line_no".into(), json!(line.line_no));
            vars.insert("quantity".into(), json!(line.quantity));
            self.alert(templates::MISSING_INVENTORY_RECORD, vars);
            missing.push(key);
        }
        Ok(missing)
    }

    /// Check every key a purchase receipt touched.
    ///
    /// Repairs the snapshot from the ledger when `repair_purchase_receipts`
    /// is on; otherwise only reports, like [`reconcile_key`](Self::reconcile_key).
    pub fn reconcile_purchase_order_receipt(
        &self,
        tenant_id: TenantId,
        receipt_id: ReceiptId,
    ) -> Result<Vec<ReconciliationResult>, ReconciliationError> {
        let receipt = self
            .stores
            .receipts
            .read_receipt(receipt_id)?
            .filter(|r| r.tenant_id == tenant_id)
            .ok_or_else(|| DomainError::not_found(format!("receipt {receipt_id}")))?;

        let keys: BTreeSet<StockKey> = receipt.lines.iter().map(|l| receipt.line_key(l)).collect();
        let mut results = Vec::with_capacity(keys.len());
        for key in &keys {
            let result = if self.repair_purchase_receipts {
                let r = self.repair_to_ledger(key)?;
                if r.repaired {
                    warn!(
                        tenant = %tenant_id,
                        receipt_id = %receipt_id,
                        key = %key,
                        ledger = r.ledger_quantity,
                        snapshot = ?r.snapshot_quantity,
                        "receipt snapshot repaired from ledger"
                    );
                }
                r
            } else {
                self.reconcile_key(key)?
            };
            results.push(result);
        }
        Ok(results)
    }

    /// Reconcile every key that appears in the ledger.
    ///
    /// Keys are isolated: a failed read or a refused alert on one key is
    /// counted and the sweep moves on. Only failing to list the ledger fails
    /// the sweep.
    pub fn scheduled_sweep(&self) -> Result<SweepReport, ReconciliationError> {
        let started_at = Utc::now();
        let keys: BTreeSet<StockKey> = self
            .stores
            .inventory
            .all_ledger_entries()?
            .into_iter()
            .map(|e| e.key)
            .collect();

        info!(keys = keys.len(), "reconciliation sweep started");

        let mut results = Vec::with_capacity(keys.len());
        let mut alert_failures = 0;
        let mut key_failures = 0;
        for key in &keys {
            match self.check_key(key) {
                Ok((result, outcome)) => {
                    if outcome == AlertOutcome::Failed {
                        alert_failures += 1;
                    }
                    results.push(result);
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "reconciliation failed for key");
                    key_failures += 1;
                }
            }
        }

        let mismatches = results.iter().filter(|r| r.mismatch).count();
        let report = SweepReport {
            results,
            mismatches,
            alert_failures,
            key_failures,
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            keys = keys.len(),
            mismatches,
            alert_failures,
            key_failures,
            "reconciliation sweep finished"
        );
        Ok(report)
    }

    fn check_key(&self, key: &StockKey) -> Result<(ReconciliationResult, AlertOutcome), ReconciliationError> {
        let ledger_quantity = self.stores.inventory.sum_ledger(key)?;
        let snapshot_quantity = self.stores.inventory.read_snapshot(key)?.map(|s| s.quantity);
        let mismatch = snapshot_quantity.unwrap_or(0) != ledger_quantity;

        let result = ReconciliationResult {
            key: key.clone(),
            ledger_quantity,
            snapshot_quantity,
            mismatch,
            repaired: false,
            checked_at: Utc::now(),
        };

        if !mismatch {
            return Ok((result, AlertOutcome::NotNeeded));
        }

        warn!(
            tenant = %key.tenant_id,
            key = %key,
            expected = ledger_quantity,
            actual = ?snapshot_quantity,
            drift = result.drift(),
            "inventory drift detected"
        );
        let mut vars = key_variables(key);
        vars.insert("expected".into(), json!(ledger_quantity));
        vars.insert("actual".into(), json!(snapshot_quantity));
        vars.insert("drift".into(), json!(result.drift()));
        vars.insert("checked_at".into(), json!(result.checked_at.to_rfc3339()));
        let outcome = self.alert(templates::INVENTORY_DRIFT, vars);

        Ok((result, outcome))
    }

    /// Set the snapshot to the ledger sum, compare-and-swap with bounded
    /// retry. A no-op when they already agree.
    fn repair_to_ledger(&self, key: &StockKey) -> Result<ReconciliationResult, ReconciliationError> {
        retry_on_conflict::<_, ReconciliationError, _>(self.max_write_attempts, |_| {
            let ledger_quantity = self.stores.inventory.sum_ledger(key)?;
            let snapshot_quantity = self.stores.inventory.read_snapshot(key)?.map(|s| s.quantity);
            let mismatch = snapshot_quantity != Some(ledger_quantity);

            if mismatch {
                self.stores
                    .inventory
                    .write_snapshot(key, ledger_quantity, snapshot_quantity)?;
            }

            Ok(ReconciliationResult {
                key: key.clone(),
                ledger_quantity,
                snapshot_quantity,
                mismatch,
                repaired: mismatch,
                checked_at: Utc::now(),
            })
        })
        .map_err(|err| match err {
            ReconciliationError::Store(StoreError::Conflict(msg)) => DomainError::conflict(msg).into(),
            other => other,
        })
    }

    /// Fire-and-forget: a refused alert is logged, not retried.
    fn alert(&self, template: &str, mut vars: AlertVariables) -> AlertOutcome {
        vars.insert("recipient".into(), json!(self.alert_recipient));
        match self.notifications.send_alert(template, &vars) {
            Ok(()) => AlertOutcome::Sent,
            Err(err) => {
                warn!(template, error = %err, "alert dispatch failed");
                AlertOutcome::Failed
            }
        }
    }
}

fn key_variables(key: &StockKey) -> AlertVariables {
    let mut vars = AlertVariables::new();
    vars.insert("tenant_id".into(), json!(key.tenant_id.to_string()));
    vars.insert("location_id".into(), json!(key.location_id.to_string()));
    vars.insert("product_id".into(), json!(key.product_id.to_string()));
    vars.insert(
        "batch".into(),
        json!(key.batch.as_ref().map(|b| b.as_str().to_string())),
    );
    vars
}
