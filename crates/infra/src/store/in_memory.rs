use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};

use chrono::Utc;
use uuid::Uuid;

use stockflow_core::{AggregateRoot, ExpectedVersion, TenantId};
use stockflow_inventory::{
    LedgerEntry, Movement, SourceRef, StockKey, StockSnapshot, StockTransfer, TransferId,
    TransferStatus,
};
use stockflow_invoicing::{Invoice, InvoiceId, InvoiceStatus, Payment};
use stockflow_purchasing::{PurchaseReceipt, ReceiptId};
use stockflow_sales::{SalesTransaction, TransactionId, TransactionStatus};

use super::r#trait::{
    InventoryStore, InvoiceStore, LedgerStore, PurchaseReceiptStore, SalesTransactionStore,
    SnapshotStore, StoreError, TransferStore,
};

fn poisoned() -> StoreError {
    StoreError::backend("lock poisoned")
}

#[derive(Debug, Default)]
struct InventoryState {
    ledger: Vec<LedgerEntry>,
    sources: HashSet<(StockKey, SourceRef)>,
    snapshots: HashMap<StockKey, StockSnapshot>,
}

impl InventoryState {
    fn snapshot_quantity(&self, key: &StockKey) -> Option<i64> {
        self.snapshots.get(key).map(|s| s.quantity)
    }

    fn check_snapshot(&self, key: &StockKey, expected: Option<i64>) -> Result<(), StoreError> {
        let actual = self.snapshot_quantity(key);
        if actual != expected {
            return Err(StoreError::conflict(format!(
                "snapshot {key} changed (expected {expected:?}, found {actual:?})"
            )));
        }
        Ok(())
    }

    fn append(&mut self, key: &StockKey, delta: i64, source: SourceRef) -> LedgerEntry {
        let entry = LedgerEntry {
            entry_id: Uuid::now_v7(),
            key: key.clone(),
            delta,
            source: source.clone(),
            recorded_at: Utc::now(),
        };
        self.sources.insert((key.clone(), source));
        self.ledger.push(entry.clone());
        entry
    }

    fn set_snapshot(&mut self, key: &StockKey, quantity: i64) {
        self.snapshots.insert(
            key.clone(),
            StockSnapshot {
                key: key.clone(),
                quantity,
                updated_at: Utc::now(),
            },
        );
    }
}

/// In-memory ledger + snapshot store.
///
/// A single mutex guards both, which makes [`InventoryStore::commit`] one
/// transaction. Intended for tests/dev and the single-process worker.
#[derive(Debug, Default)]
pub struct InMemoryInventoryStore {
    inner: Mutex<InventoryState>,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for InMemoryInventoryStore {
    fn create_ledger_entry(
        &self,
        key: &StockKey,
        delta: i64,
        source: SourceRef,
    ) -> Result<LedgerEntry, StoreError> {
        let mut state = self.inner.lock().map_err(|_| poisoned())?;
        if state.sources.contains(&(key.clone(), source.clone())) {
            return Err(StoreError::conflict(format!(
                "ledger already holds a {} entry for {key}",
                source.kind()
            )));
        }
        Ok(state.append(key, delta, source))
    }

    fn sum_ledger(&self, key: &StockKey) -> Result<i64, StoreError> {
        let state = self.inner.lock().map_err(|_| poisoned())?;
        Ok(state
            .ledger
            .iter()
            .filter(|e| &e.key == key)
            .map(|e| e.delta)
            .sum())
    }

    fn ledger_entries(&self, key: &StockKey) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.inner.lock().map_err(|_| poisoned())?;
        Ok(state
            .ledger
            .iter()
            .filter(|e| &e.key == key)
            .cloned()
            .collect())
    }

    fn has_entry(&self, key: &StockKey, source: &SourceRef) -> Result<bool, StoreError> {
        let state = self.inner.lock().map_err(|_| poisoned())?;
        Ok(state.sources.contains(&(key.clone(), source.clone())))
    }

    fn all_ledger_entries(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.inner.lock().map_err(|_| poisoned())?;
        Ok(state.ledger.clone())
    }
}

impl SnapshotStore for InMemoryInventoryStore {
    fn read_snapshot(&self, key: &StockKey) -> Result<Option<StockSnapshot>, StoreError> {
        let state = self.inner.lock().map_err(|_| poisoned())?;
        Ok(state.snapshots.get(key).cloned())
    }

    fn write_snapshot(
        &self,
        key: &StockKey,
        quantity: i64,
        expected_previous: Option<i64>,
    ) -> Result<(), StoreError> {
        let mut state = self.inner.lock().map_err(|_| poisoned())?;
        state.check_snapshot(key, expected_previous)?;
        state.set_snapshot(key, quantity);
        Ok(())
    }
}

impl InventoryStore for InMemoryInventoryStore {
    fn commit(&self, movements: &[Movement]) -> Result<Vec<LedgerEntry>, StoreError> {
        if movements.is_empty() {
            return Ok(vec![]);
        }

        let mut state = self.inner.lock().map_err(|_| poisoned())?;

        // Validate the whole batch before writing anything. A key may appear
        // more than once; each movement expects the value the previous one
        // left behind.
        let mut batch_sources = HashSet::with_capacity(movements.len());
        let mut pending: HashMap<&StockKey, Option<i64>> = HashMap::new();
        for m in movements {
            let pair = (m.key.clone(), m.source.clone());
            if state.sources.contains(&pair) || !batch_sources.insert(pair) {
                return Err(StoreError::conflict(format!(
                    "ledger already holds a {} entry for {}",
                    m.source.kind(),
                    m.key
                )));
            }
            let current = match pending.get(&m.key) {
                Some(q) => *q,
                None => state.snapshot_quantity(&m.key),
            };
            if current != m.expected_snapshot {
                return Err(StoreError::conflict(format!(
                    "snapshot {} changed (expected {:?}, found {current:?})",
                    m.key, m.expected_snapshot
                )));
            }
            pending.insert(&m.key, Some(m.resulting_quantity()));
        }

        let mut committed = Vec::with_capacity(movements.len());
        for m in movements {
            committed.push(state.append(&m.key, m.delta, m.source.clone()));
            state.set_snapshot(&m.key, m.resulting_quantity());
        }

        Ok(committed)
    }
}

/// In-memory transfer records.
#[derive(Debug, Default)]
pub struct InMemoryTransferStore {
    transfers: RwLock<HashMap<TransferId, StockTransfer>>,
}

impl InMemoryTransferStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransferStore for InMemoryTransferStore {
    fn insert_transfer(&self, transfer: &StockTransfer) -> Result<(), StoreError> {
        let mut map = self.transfers.write().map_err(|_| poisoned())?;
        let id = transfer.id_typed();
        if map.contains_key(&id) {
            return Err(StoreError::conflict(format!("transfer {id} already exists")));
        }
        map.insert(id, transfer.clone());
        Ok(())
    }

    fn read_transfer(&self, id: TransferId) -> Result<Option<StockTransfer>, StoreError> {
        let map = self.transfers.read().map_err(|_| poisoned())?;
        Ok(map.get(&id).cloned())
    }

    fn write_transfer(
        &self,
        transfer: &StockTransfer,
        expected_status: TransferStatus,
    ) -> Result<(), StoreError> {
        let mut map = self.transfers.write().map_err(|_| poisoned())?;
        let id = transfer.id_typed();
        let stored = map
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("transfer {id}")))?;

        if stored.status() != expected_status {
            return Err(StoreError::conflict(format!(
                "transfer {id} is {} (expected {expected_status})",
                stored.status()
            )));
        }
        if !ExpectedVersion::Exact(transfer.version().saturating_sub(1)).matches(stored.version()) {
            return Err(StoreError::conflict(format!(
                "transfer {id} is at version {} (writing {})",
                stored.version(),
                transfer.version()
            )));
        }

        map.insert(id, transfer.clone());
        Ok(())
    }

    fn list_transfers(&self, tenant_id: TenantId) -> Result<Vec<StockTransfer>, StoreError> {
        let map = self.transfers.read().map_err(|_| poisoned())?;
        let mut out: Vec<StockTransfer> = map
            .values()
            .filter(|t| {
                t.details().source.tenant_id == tenant_id
                    || t.details().destination.tenant_id == tenant_id
            })
            .cloned()
            .collect();
        out.sort_by_key(|t| t.created_at());
        Ok(out)
    }
}

/// In-memory invoices and payments.
#[derive(Debug, Default)]
pub struct InMemoryInvoiceStore {
    invoices: RwLock<HashMap<InvoiceId, Invoice>>,
    payments: RwLock<Vec<Payment>>,
}

impl InMemoryInvoiceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InvoiceStore for InMemoryInvoiceStore {
    fn insert_invoice(&self, invoice: &Invoice) -> Result<(), StoreError> {
        let mut map = self.invoices.write().map_err(|_| poisoned())?;
        if map.contains_key(&invoice.invoice_id) {
            return Err(StoreError::conflict(format!(
                "invoice {} already exists",
                invoice.invoice_id
            )));
        }
        map.insert(invoice.invoice_id, invoice.clone());
        Ok(())
    }

    fn read_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
        let map = self.invoices.read().map_err(|_| poisoned())?;
        Ok(map.get(&id).cloned())
    }

    fn add_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        let mut payments = self.payments.write().map_err(|_| poisoned())?;
        if payments.iter().any(|p| p.payment_id == payment.payment_id) {
            return Err(StoreError::conflict(format!(
                "payment {} already recorded",
                payment.payment_id
            )));
        }
        payments.push(payment.clone());
        Ok(())
    }

    fn payments_for(&self, id: InvoiceId) -> Result<Vec<Payment>, StoreError> {
        let payments = self.payments.read().map_err(|_| poisoned())?;
        Ok(payments.iter().filter(|p| p.invoice_id == id).cloned().collect())
    }

    fn set_invoice_status(&self, id: InvoiceId, status: InvoiceStatus) -> Result<(), StoreError> {
        let mut map = self.invoices.write().map_err(|_| poisoned())?;
        let invoice = map
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("invoice {id}")))?;
        invoice.status = status;
        Ok(())
    }
}

/// In-memory sales transactions.
#[derive(Debug, Default)]
pub struct InMemorySalesStore {
    transactions: RwLock<HashMap<TransactionId, SalesTransaction>>,
}

impl InMemorySalesStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SalesTransactionStore for InMemorySalesStore {
    fn insert_transaction(&self, transaction: &SalesTransaction) -> Result<(), StoreError> {
        let mut map = self.transactions.write().map_err(|_| poisoned())?;
        let id = transaction.transaction_id;
        if map.contains_key(&id) {
            return Err(StoreError::conflict(format!("transaction {id} already exists")));
        }
        map.insert(id, transaction.clone());
        Ok(())
    }

    fn read_transaction(&self, id: TransactionId) -> Result<Option<SalesTransaction>, StoreError> {
        let map = self.transactions.read().map_err(|_| poisoned())?;
        Ok(map.get(&id).cloned())
    }

    fn write_transaction(
        &self,
        transaction: &SalesTransaction,
        expected_status: TransactionStatus,
    ) -> Result<(), StoreError> {
        let mut map = self.transactions.write().map_err(|_| poisoned())?;
        let id = transaction.transaction_id;
        let stored = map
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("transaction {id}")))?;
        if stored.status != expected_status {
            return Err(StoreError::conflict(format!(
                "transaction {id} is {} (expected {expected_status})",
                stored.status
            )));
        }
        map.insert(id, transaction.clone());
        Ok(())
    }
}

/// In-memory purchase receipts.
#[derive(Debug, Default)]
pub struct InMemoryReceiptStore {
    receipts: RwLock<HashMap<ReceiptId, PurchaseReceipt>>,
}

impl InMemoryReceiptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PurchaseReceiptStore for InMemoryReceiptStore {
    fn insert_receipt(&self, receipt: &PurchaseReceipt) -> Result<(), StoreError> {
        let mut map = self.receipts.write().map_err(|_| poisoned())?;
        if map.contains_key(&receipt.receipt_id) {
            return Err(StoreError::conflict(format!(
                "receipt {} already exists",
                receipt.receipt_id
            )));
        }
        map.insert(receipt.receipt_id, receipt.clone());
        Ok(())
    }

    fn read_receipt(&self, id: ReceiptId) -> Result<Option<PurchaseReceipt>, StoreError> {
        let map = self.receipts.read().map_err(|_| poisoned())?;
        Ok(map.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockflow_core::aggregate::execute;
    use stockflow_core::{AggregateId, LocationId, ProductId, UserId};
    use stockflow_inventory::{
        ApproveTransfer, CancelTransfer, CompleteTransfer, RequestTransfer, Scope, TransferCommand,
        TransferLeg, TransferType,
    };

    fn key() -> StockKey {
        StockKey::at(Scope::new(TenantId::new(), LocationId::new()), ProductId::new(), None)
    }

    fn adjustment() -> SourceRef {
        SourceRef::Adjustment {
            reference: AggregateId::new(),
        }
    }

    #[test]
    fn commit_appends_and_updates_snapshot_together() {
        let store = InMemoryInventoryStore::new();
        let k = key();

        let committed = store
            .commit(&[Movement::new(k.clone(), 7, adjustment(), None)])
            .unwrap();

        assert_eq!(committed.len(), 1);
        assert_eq!(store.sum_ledger(&k).unwrap(), 7);
        assert_eq!(store.read_snapshot(&k).unwrap().unwrap().quantity, 7);
    }

    #[test]
    fn commit_is_all_or_nothing() {
        let store = InMemoryInventoryStore::new();
        let a = key();
        let b = key();
        store.write_snapshot(&b, 3, None).unwrap();

        // Second movement carries a stale expectation for `b`.
        let err = store
            .commit(&[
                Movement::new(a.clone(), 5, adjustment(), None),
                Movement::new(b.clone(), 1, adjustment(), Some(99)),
            ])
            .unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(store.sum_ledger(&a).unwrap(), 0);
        assert!(store.read_snapshot(&a).unwrap().is_none());
        assert_eq!(store.read_snapshot(&b).unwrap().unwrap().quantity, 3);
    }

    #[test]
    fn same_key_twice_in_one_commit_chains_expectations() {
        let store = InMemoryInventoryStore::new();
        let k = key();
        store.write_snapshot(&k, 10, None).unwrap();

        store
            .commit(&[
                Movement::new(k.clone(), -2, adjustment(), Some(10)),
                Movement::new(k.clone(), -3, adjustment(), Some(8)),
            ])
            .unwrap();
        assert_eq!(store.read_snapshot(&k).unwrap().unwrap().quantity, 5);

        let err = store
            .commit(&[
                Movement::new(k.clone(), -1, adjustment(), Some(5)),
                Movement::new(k.clone(), -1, adjustment(), Some(5)),
            ])
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.sum_ledger(&k).unwrap(), -5);
    }

    #[test]
    fn duplicate_source_is_a_conflict() {
        let store = InMemoryInventoryStore::new();
        let k = key();
        let source = SourceRef::transfer(TransferId::new(AggregateId::new()), TransferLeg::Destination);

        store
            .commit(&[Movement::new(k.clone(), 2, source.clone(), None)])
            .unwrap();
        assert!(store.has_entry(&k, &source).unwrap());

        let err = store
            .commit(&[Movement::new(k.clone(), 2, source.clone(), Some(2))])
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(store.create_ledger_entry(&k, 2, source).unwrap_err().is_conflict());
        assert_eq!(store.sum_ledger(&k).unwrap(), 2);
    }

    #[test]
    fn snapshot_write_is_compare_and_swap() {
        let store = InMemoryInventoryStore::new();
        let k = key();

        store.write_snapshot(&k, 10, None).unwrap();
        assert!(store.write_snapshot(&k, 11, None).unwrap_err().is_conflict());
        assert!(store.write_snapshot(&k, 11, Some(9)).unwrap_err().is_conflict());
        store.write_snapshot(&k, 11, Some(10)).unwrap();
        assert_eq!(store.read_snapshot(&k).unwrap().unwrap().quantity, 11);
    }

    #[test]
    fn ledger_entry_without_snapshot_leaves_snapshot_alone() {
        let store = InMemoryInventoryStore::new();
        let k = key();
        store.write_snapshot(&k, 4, None).unwrap();

        store.create_ledger_entry(&k, -1, adjustment()).unwrap();

        assert_eq!(store.sum_ledger(&k).unwrap(), -1);
        assert_eq!(store.read_snapshot(&k).unwrap().unwrap().quantity, 4);
        assert_eq!(store.ledger_entries(&k).unwrap().len(), 1);
        assert_eq!(store.all_ledger_entries().unwrap().len(), 1);
    }

    #[test]
    fn transfer_write_rejects_a_record_that_came_back_to_the_same_status() {
        let store = InMemoryTransferStore::new();
        let tenant = TenantId::new();
        let (mut transfer, _) = StockTransfer::request(&RequestTransfer {
            transfer_id: TransferId::generate(),
            transfer_type: TransferType::IntraTenant,
            source: Scope::new(tenant, LocationId::new()),
            destination: Scope::new(tenant, LocationId::new()),
            product_id: ProductId::new(),
            batch: None,
            quantity: 2,
            requested_by: UserId::new(),
            notes: None,
            occurred_at: Utc::now(),
        })
        .unwrap();
        let id = transfer.id_typed();
        store.insert_transfer(&transfer).unwrap();

        let approve = TransferCommand::Approve(ApproveTransfer {
            transfer_id: id,
            approver_id: UserId::new(),
            occurred_at: Utc::now(),
        });
        execute(&mut transfer, &approve).unwrap();
        store.write_transfer(&transfer, TransferStatus::Pending).unwrap();

        // Read while approved, written after a completion was claimed and released.
        let mut stale = transfer.clone();
        let cancel = TransferCommand::Cancel(CancelTransfer {
            transfer_id: id,
            reason: "duplicate".into(),
            occurred_at: Utc::now(),
        });
        execute(&mut stale, &cancel).unwrap();

        let complete = TransferCommand::Complete(CompleteTransfer {
            transfer_id: id,
            occurred_at: Utc::now(),
        });
        execute(&mut transfer, &complete).unwrap();
        store.write_transfer(&transfer, TransferStatus::Approved).unwrap();
        transfer.release_completion(Utc::now()).unwrap();
        store.write_transfer(&transfer, TransferStatus::Completed).unwrap();

        assert!(store.write_transfer(&stale, TransferStatus::Approved).unwrap_err().is_conflict());
        let stored = store.read_transfer(id).unwrap().unwrap();
        assert_eq!(stored.status(), TransferStatus::Approved);
        assert_eq!(stored.version(), transfer.version());
    }
}
