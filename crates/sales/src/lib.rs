//! Point-of-sale transactions.
//!
//! A completed sale consumes stock at the selling location; a refund puts it
//! back. This crate only describes those movements; infra writes them.

pub mod transaction;

pub use transaction::{
    RefundCompleted, SaleLine, SalesEvent, SalesTransaction, TransactionCompleted, TransactionId,
    TransactionStatus, event_types,
};
