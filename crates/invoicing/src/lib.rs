//! Invoices and the payments applied against them.

pub mod invoice;

pub use invoice::{
    Invoice, InvoiceId, InvoiceStatus, InvoicingEvent, Payment, PaymentRecorded, event_types,
    settlement_status,
};
