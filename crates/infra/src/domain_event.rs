//! The one message type carried on the process bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use stockflow_core::AggregateRoot;
use stockflow_events::{Event, EventBus, EventEnvelope};
use stockflow_inventory::{StockTransfer, TransferEvent};
use stockflow_invoicing::{Invoice, InvoicingEvent};
use stockflow_purchasing::{PurchaseReceipt, PurchasingEvent};
use stockflow_sales::{SalesEvent, SalesTransaction};

/// Union of every domain's events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "domain", content = "event", rename_all = "snake_case")]
pub enum StockflowEvent {
    Transfer(TransferEvent),
    Sales(SalesEvent),
    Invoicing(InvoicingEvent),
    Purchasing(PurchasingEvent),
}

impl Event for StockflowEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockflowEvent::Transfer(e) => e.event_type(),
            StockflowEvent::Sales(e) => e.event_type(),
            StockflowEvent::Invoicing(e) => e.event_type(),
            StockflowEvent::Purchasing(e) => e.event_type(),
        }
    }

    fn version(&self) -> u32 {
        match self {
            StockflowEvent::Transfer(e) => e.version(),
            StockflowEvent::Sales(e) => e.version(),
            StockflowEvent::Invoicing(e) => e.version(),
            StockflowEvent::Purchasing(e) => e.version(),
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockflowEvent::Transfer(e) => e.occurred_at(),
            StockflowEvent::Sales(e) => e.occurred_at(),
            StockflowEvent::Invoicing(e) => e.occurred_at(),
            StockflowEvent::Purchasing(e) => e.occurred_at(),
        }
    }
}

pub type StockflowEnvelope = EventEnvelope<StockflowEvent>;

pub mod aggregate_types {
    pub const STOCK_TRANSFER: &str = "stock_transfer";
    pub const SALES_TRANSACTION: &str = "sales_transaction";
    pub const INVOICE: &str = "invoice";
    pub const PURCHASE_RECEIPT: &str = "purchase_receipt";
}

/// Envelope a transfer event. Owned by the source tenant; the sequence
/// number is the transfer version after the change.
pub fn transfer_envelope(transfer: &StockTransfer, event: TransferEvent) -> StockflowEnvelope {
    let details = transfer.details();
    EventEnvelope::wrap(
        details.source.tenant_id,
        details.transfer_id.0,
        aggregate_types::STOCK_TRANSFER,
        transfer.version(),
        StockflowEvent::Transfer(event),
    )
}

pub fn sales_envelope(transaction: &SalesTransaction, event: SalesEvent) -> StockflowEnvelope {
    let seq = match event {
        SalesEvent::TransactionCompleted(_) => 1,
        SalesEvent::RefundCompleted(_) => 2,
    };
    EventEnvelope::wrap(
        transaction.tenant_id,
        transaction.transaction_id.0,
        aggregate_types::SALES_TRANSACTION,
        seq,
        StockflowEvent::Sales(event),
    )
}

/// `sequence` is the number of payments recorded so far, this one included.
pub fn invoicing_envelope(invoice: &Invoice, sequence: u64, event: InvoicingEvent) -> StockflowEnvelope {
    EventEnvelope::wrap(
        invoice.tenant_id,
        invoice.invoice_id.0,
        aggregate_types::INVOICE,
        sequence,
        StockflowEvent::Invoicing(event),
    )
}

pub fn purchasing_envelope(receipt: &PurchaseReceipt, event: PurchasingEvent) -> StockflowEnvelope {
    EventEnvelope::wrap(
        receipt.tenant_id,
        receipt.receipt_id.0,
        aggregate_types::PURCHASE_RECEIPT,
        1,
        StockflowEvent::Purchasing(event),
    )
}

/// Publish after the caller's write has committed.
///
/// A failed publish is logged and swallowed: the state change stands and the
/// sweep is the backstop for anything a subscriber missed.
pub fn publish_committed<B>(bus: &B, envelope: StockflowEnvelope)
where
    B: EventBus<StockflowEnvelope>,
{
    let event_type = envelope.event_type();
    let tenant = envelope.tenant_id();
    let aggregate_id = envelope.aggregate_id();
    if let Err(err) = bus.publish(envelope) {
        warn!(
            event_type,
            tenant = %tenant,
            aggregate_id = %aggregate_id,
            error = ?err,
            "event publish failed after commit"
        );
    }
}
