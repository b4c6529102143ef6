use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockflow_core::{AggregateId, DomainError, TenantId};
use stockflow_events::Event;

pub mod event_types {
    pub const PAYMENT_RECORDED: &str = "PAYMENT_RECORDED";
}

/// Invoice identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub AggregateId);

impl InvoiceId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Issued,
    PartiallyPaid,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Issued => "issued",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Paid => "paid",
        }
    }
}

/// Settlement rule: `paid` once payments cover the total, `partially_paid`
/// otherwise.
pub fn settlement_status(total: u64, paid: u64) -> InvoiceStatus {
    if paid >= total {
        InvoiceStatus::Paid
    } else {
        InvoiceStatus::PartiallyPaid
    }
}

/// Invoice header. Amounts are in the smallest currency unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub invoice_id: InvoiceId,
    pub tenant_id: TenantId,
    pub total: u64,
    pub status: InvoiceStatus,
    pub issued_at: DateTime<Utc>,
}

impl Invoice {
    pub fn issue(
        invoice_id: InvoiceId,
        tenant_id: TenantId,
        total: u64,
        issued_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if total == 0 {
            return Err(DomainError::validation("invoice total must be positive"));
        }
        Ok(Self {
            invoice_id,
            tenant_id,
            total,
            status: InvoiceStatus::Issued,
            issued_at,
        })
    }

    /// Status implied by the given payments.
    pub fn settle<'a>(&self, payments: impl IntoIterator<Item = &'a Payment>) -> InvoiceStatus {
        let paid = payments
            .into_iter()
            .filter(|p| p.invoice_id == self.invoice_id)
            .fold(0u64, |acc, p| acc.saturating_add(p.amount));
        settlement_status(self.total, paid)
    }
}

/// A payment received against an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: Uuid,
    pub invoice_id: InvoiceId,
    pub amount: u64,
    pub received_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(invoice_id: InvoiceId, amount: u64, received_at: DateTime<Utc>) -> Result<Self, DomainError> {
        if amount == 0 {
            return Err(DomainError::validation("payment amount must be positive"));
        }
        Ok(Self {
            payment_id: Uuid::now_v7(),
            invoice_id,
            amount,
            received_at,
        })
    }
}

/// Event: PaymentRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecorded {
    pub tenant_id: TenantId,
    pub payment: Payment,
    pub invoice_total: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoicingEvent {
    PaymentRecorded(PaymentRecorded),
}

impl Event for InvoicingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoicingEvent::PaymentRecorded(_) => event_types::PAYMENT_RECORDED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoicingEvent::PaymentRecorded(e) => e.occurred_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn invoice(total: u64) -> Invoice {
        Invoice::issue(InvoiceId::new(AggregateId::new()), TenantId::new(), total, Utc::now()).unwrap()
    }

    #[test]
    fn partial_then_full_payment() {
        let inv = invoice(1_000);
        let p1 = Payment::new(inv.invoice_id, 400, Utc::now()).unwrap();
        assert_eq!(inv.settle([&p1]), InvoiceStatus::PartiallyPaid);

        let p2 = Payment::new(inv.invoice_id, 600, Utc::now()).unwrap();
        assert_eq!(inv.settle([&p1, &p2]), InvoiceStatus::Paid);
    }

    #[test]
    fn overpayment_is_paid() {
        assert_eq!(settlement_status(100, 150), InvoiceStatus::Paid);
    }

    #[test]
    fn payments_for_other_invoices_are_ignored() {
        let inv = invoice(100);
        let other = Payment::new(InvoiceId::new(AggregateId::new()), 500, Utc::now()).unwrap();
        assert_eq!(inv.settle([&other]), InvoiceStatus::PartiallyPaid);
    }

    #[test]
    fn zero_amounts_are_rejected() {
        assert!(Invoice::issue(InvoiceId::new(AggregateId::new()), TenantId::new(), 0, Utc::now()).is_err());
        assert!(Payment::new(InvoiceId::new(AggregateId::new()), 0, Utc::now()).is_err());
    }

    proptest! {
        /// Property: status is `paid` exactly when the sum covers the total.
        #[test]
        fn settlement_matches_sum(
            total in 1u64..1_000_000,
            amounts in prop::collection::vec(1u64..200_000, 0..10)
        ) {
            let inv = invoice(total);
            let payments: Vec<Payment> = amounts
                .iter()
                .map(|a| Payment::new(inv.invoice_id, *a, Utc::now()).unwrap())
                .collect();
            let sum: u64 = amounts.iter().sum();
            let expected = if sum >= total { InvoiceStatus::Paid } else { InvoiceStatus::PartiallyPaid };
            prop_assert_eq!(inv.settle(&payments), expected);
        }
    }
}
