use thiserror::Error;

use stockflow_core::TenantId;
use stockflow_inventory::{
    LedgerEntry, Movement, SourceRef, StockKey, StockSnapshot, StockTransfer, TransferId,
    TransferStatus,
};
use stockflow_invoicing::{Invoice, InvoiceId, InvoiceStatus, Payment};
use stockflow_purchasing::{PurchaseReceipt, ReceiptId};
use stockflow_sales::{SalesTransaction, TransactionId, TransactionStatus};

/// Persistence failure.
///
/// These are infrastructure errors. `Conflict` is the optimistic-write
/// signal every compare-and-swap in this crate returns when it loses.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Append-only movement history: the source of truth for on-hand quantity.
///
/// `(key, source)` is unique. Appending a duplicate fails with `Conflict`.
pub trait LedgerStore: Send + Sync {
    /// Append one entry without touching the snapshot.
    fn create_ledger_entry(
        &self,
        key: &StockKey,
        delta: i64,
        source: SourceRef,
    ) -> Result<LedgerEntry, StoreError>;

    /// Σ delta over every entry for the key (0 for an unknown key).
    fn sum_ledger(&self, key: &StockKey) -> Result<i64, StoreError>;

    fn ledger_entries(&self, key: &StockKey) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Whether an entry caused by `source` already exists for the key.
    fn has_entry(&self, key: &StockKey, source: &SourceRef) -> Result<bool, StoreError>;

    /// Full history, in append order. Drives the reconciliation sweep.
    fn all_ledger_entries(&self) -> Result<Vec<LedgerEntry>, StoreError>;
}

/// Materialized per-key quantity.
pub trait SnapshotStore: Send + Sync {
    fn read_snapshot(&self, key: &StockKey) -> Result<Option<StockSnapshot>, StoreError>;

    /// Compare-and-swap write.
    ///
    /// Succeeds only if the stored quantity equals `expected_previous`
    /// (`None` = the row must not exist yet). Never a blind overwrite.
    fn write_snapshot(
        &self,
        key: &StockKey,
        quantity: i64,
        expected_previous: Option<i64>,
    ) -> Result<(), StoreError>;
}

/// Ledger + snapshot behind one transactional boundary.
pub trait InventoryStore: LedgerStore + SnapshotStore {
    /// Apply movements atomically: every snapshot must still hold its
    /// `expected_snapshot` and no `(key, source)` may already exist, or
    /// nothing is written and `Conflict` is returned.
    fn commit(&self, movements: &[Movement]) -> Result<Vec<LedgerEntry>, StoreError>;
}

/// Stock transfer records.
pub trait TransferStore: Send + Sync {
    /// Persist a brand-new transfer. Fails with `Conflict` if the id exists.
    fn insert_transfer(&self, transfer: &StockTransfer) -> Result<(), StoreError>;

    fn read_transfer(&self, id: TransferId) -> Result<Option<StockTransfer>, StoreError>;

    /// Status-checked write: succeeds only if the stored transfer is still in
    /// `expected_status` and one version behind `transfer`. A record that left
    /// `expected_status` and came back in the meantime is a conflict.
    fn write_transfer(
        &self,
        transfer: &StockTransfer,
        expected_status: TransferStatus,
    ) -> Result<(), StoreError>;

    /// Transfers where the tenant is source or destination.
    fn list_transfers(&self, tenant_id: TenantId) -> Result<Vec<StockTransfer>, StoreError>;
}

/// Invoices and their payments.
pub trait InvoiceStore: Send + Sync {
    fn insert_invoice(&self, invoice: &Invoice) -> Result<(), StoreError>;

    fn read_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>, StoreError>;

    fn add_payment(&self, payment: &Payment) -> Result<(), StoreError>;

    fn payments_for(&self, id: InvoiceId) -> Result<Vec<Payment>, StoreError>;

    fn set_invoice_status(&self, id: InvoiceId, status: InvoiceStatus) -> Result<(), StoreError>;
}

/// Point-of-sale transactions.
pub trait SalesTransactionStore: Send + Sync {
    fn insert_transaction(&self, transaction: &SalesTransaction) -> Result<(), StoreError>;

    fn read_transaction(&self, id: TransactionId) -> Result<Option<SalesTransaction>, StoreError>;

    /// Status-checked write, same contract as [`TransferStore::write_transfer`].
    fn write_transaction(
        &self,
        transaction: &SalesTransaction,
        expected_status: TransactionStatus,
    ) -> Result<(), StoreError>;
}

/// Purchase-order receipts.
pub trait PurchaseReceiptStore: Send + Sync {
    fn insert_receipt(&self, receipt: &PurchaseReceipt) -> Result<(), StoreError>;

    fn read_receipt(&self, id: ReceiptId) -> Result<Option<PurchaseReceipt>, StoreError>;
}
