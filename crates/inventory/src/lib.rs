//! Inventory domain module.
//!
//! Ledger and snapshot value types plus the stock transfer state machine,
//! implemented as deterministic domain logic (no IO, no storage).

pub mod stock;
pub mod transfer;

pub use stock::{
    BatchId, LedgerEntry, Movement, Scope, SourceRef, StockKey, StockSnapshot, TransferLeg,
};
pub use transfer::{
    ApproveTransfer, CancelTransfer, CompleteTransfer, RejectTransfer, RequestTransfer,
    StockTransfer, TransferAction, TransferApproved, TransferCancelled, TransferCommand,
    TransferCompleted, TransferDetails, TransferEvent, TransferId, TransferRejected,
    TransferRequested, TransferStatus, TransferType, event_types,
};
