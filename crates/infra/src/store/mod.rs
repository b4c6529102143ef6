//! Persistence boundary.
//!
//! Traits describing the transactional store the core runs against, plus
//! in-memory adapters. Every write that can race is a compare-and-swap that
//! returns [`StoreError::Conflict`] when it loses.

use std::sync::Arc;

pub mod in_memory;
pub mod r#trait;

pub use in_memory::{
    InMemoryInventoryStore, InMemoryInvoiceStore, InMemoryReceiptStore, InMemorySalesStore,
    InMemoryTransferStore,
};
pub use r#trait::{
    InventoryStore, InvoiceStore, LedgerStore, PurchaseReceiptStore, SalesTransactionStore,
    SnapshotStore, StoreError, TransferStore,
};

/// Every store the core talks to, constructed once per process and shared.
#[derive(Clone)]
pub struct StoreSet {
    pub inventory: Arc<dyn InventoryStore>,
    pub transfers: Arc<dyn TransferStore>,
    pub invoices: Arc<dyn InvoiceStore>,
    pub sales: Arc<dyn SalesTransactionStore>,
    pub receipts: Arc<dyn PurchaseReceiptStore>,
}

impl StoreSet {
    pub fn in_memory() -> Self {
        Self {
            inventory: Arc::new(InMemoryInventoryStore::new()),
            transfers: Arc::new(InMemoryTransferStore::new()),
            invoices: Arc::new(InMemoryInvoiceStore::new()),
            sales: Arc::new(InMemorySalesStore::new()),
            receipts: Arc::new(InMemoryReceiptStore::new()),
        }
    }
}

/// Run `op` until it returns something other than a conflict, at most
/// `attempts` times. `op` must re-read whatever it compares against.
///
/// The last conflict is returned once attempts are exhausted.
pub fn retry_on_conflict<T, E, F>(attempts: u32, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Result<T, E>,
    E: IsConflict,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Err(err) if err.is_conflict() && attempt < attempts => {
                tracing::debug!(attempt, "write conflict; re-reading");
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Errors that can signal a lost optimistic write.
pub trait IsConflict {
    fn is_conflict(&self) -> bool;
}

impl IsConflict for StoreError {
    fn is_conflict(&self) -> bool {
        StoreError::is_conflict(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_conflicts_up_to_the_limit() {
        let mut calls = 0;
        let out: Result<(), StoreError> = retry_on_conflict(3, |_| {
            calls += 1;
            Err(StoreError::conflict("lost"))
        });
        assert!(out.unwrap_err().is_conflict());
        assert_eq!(calls, 3);
    }

    #[test]
    fn other_errors_are_not_retried() {
        let mut calls = 0;
        let out: Result<(), StoreError> = retry_on_conflict(3, |_| {
            calls += 1;
            Err(StoreError::backend("down"))
        });
        assert!(matches!(out, Err(StoreError::Backend(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn succeeds_after_a_conflict() {
        let out: Result<u32, StoreError> = retry_on_conflict(3, |attempt| {
            if attempt == 1 {
                Err(StoreError::conflict("lost"))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(out.unwrap(), 2);
    }
}
