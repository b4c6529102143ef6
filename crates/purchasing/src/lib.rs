//! Purchase-order receipts: goods arriving at a location from a supplier.

pub mod receipt;

pub use receipt::{
    PurchaseOrderReceived, PurchaseReceipt, PurchasingEvent, ReceiptId, ReceiptLine, event_types,
};
