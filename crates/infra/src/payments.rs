//! Invoice payments.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::info;

use stockflow_core::DomainError;
use stockflow_events::EventBus;
use stockflow_invoicing::{InvoiceId, InvoicingEvent, Payment, PaymentRecorded};

use crate::domain_event::{StockflowEnvelope, invoicing_envelope, publish_committed};
use crate::store::{InvoiceStore, StoreError};

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct PaymentService<B> {
    invoices: Arc<dyn InvoiceStore>,
    bus: B,
}

impl<B> PaymentService<B>
where
    B: EventBus<StockflowEnvelope>,
{
    pub fn new(invoices: Arc<dyn InvoiceStore>, bus: B) -> Self {
        Self { invoices, bus }
    }

    /// Append a payment and publish `PAYMENT_RECORDED`.
    ///
    /// Invoice status is not touched here; the reconciliation subscriber
    /// settles it from the full payment list.
    pub fn record_payment(&self, invoice_id: InvoiceId, amount: u64) -> Result<Payment, PaymentError> {
        let invoice = self
            .invoices
            .read_invoice(invoice_id)?
            .ok_or_else(|| DomainError::not_found(format!("invoice {invoice_id}")))?;

        let payment = Payment::new(invoice_id, amount, Utc::now())?;
        self.invoices.add_payment(&payment)?;
        let sequence = self.invoices.payments_for(invoice_id)?.len() as u64;

        info!(
            tenant = %invoice.tenant_id,
            invoice_id = %invoice_id,
            amount,
            "payment recorded"
        );
        let event = InvoicingEvent::PaymentRecorded(PaymentRecorded {
            tenant_id: invoice.tenant_id,
            payment: payment.clone(),
            invoice_total: invoice.total,
            occurred_at: payment.received_at,
        });
        publish_committed(&self.bus, invoicing_envelope(&invoice, sequence, event));
        Ok(payment)
    }
}
