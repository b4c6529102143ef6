//! Default subscriber set.
//!
//! Every handler works from the event payload alone; none re-reads what the
//! publisher already knew. All of them are idempotent under redelivery.

use std::sync::Arc;

use serde_json::json;

use stockflow_events::{Event, EventBus};
use stockflow_inventory::{TransferDetails, TransferEvent, event_types as transfer_events};
use stockflow_invoicing::{InvoicingEvent, event_types as invoicing_events};
use stockflow_purchasing::{PurchasingEvent, event_types as purchasing_events};
use stockflow_sales::{SalesEvent, event_types as sales_events};

use crate::audit::{AuditEntry, AuditSink};
use crate::dispatch::{EventFilter, SubscriberRegistry};
use crate::domain_event::{StockflowEnvelope, StockflowEvent};
use crate::notifications::{AlertVariables, NotificationGateway, templates};
use crate::reconciliation::{ReconciliationEngine, ReconciliationError};

pub const RECONCILE_TRANSFER_RECEIPT: &str = "reconcile-transfer-receipt";
pub const RECONCILE_INVOICE_PAYMENT: &str = "reconcile-invoice-payment";
pub const RECONCILE_TRANSACTION_INVENTORY: &str = "reconcile-transaction-inventory";
pub const RECONCILE_PURCHASE_RECEIPT: &str = "reconcile-purchase-receipt";
pub const TRANSFER_NOTIFICATIONS: &str = "transfer-notifications";
pub const AUDIT_TRAIL: &str = "audit-trail";

/// Register reconciliation triggers, transfer notifications and the audit
/// trail on `registry`.
pub fn register_default_subscribers<B>(
    registry: &mut SubscriberRegistry<B>,
    engine: Arc<ReconciliationEngine>,
    notifications: Arc<dyn NotificationGateway>,
    audit: Arc<dyn AuditSink>,
) -> std::io::Result<()>
where
    B: EventBus<StockflowEnvelope> + Clone + Send + Sync + 'static,
{
    let e = engine.clone();
    registry.register(
        RECONCILE_TRANSFER_RECEIPT,
        EventFilter::types(&[transfer_events::TRANSFER_COMPLETED]),
        move |env: &StockflowEnvelope| -> Result<(), ReconciliationError> {
            if let StockflowEvent::Transfer(TransferEvent::TransferCompleted(ev)) = env.payload() {
                let d = &ev.details;
                let user = ev.approved_by.unwrap_or(d.requested_by);
                e.reconcile_stock_transfer_receipt(d.destination.tenant_id, user, d.transfer_id)?;
            }
            Ok(())
        },
    )?;

    let e = engine.clone();
    registry.register(
        RECONCILE_INVOICE_PAYMENT,
        EventFilter::types(&[invoicing_events::PAYMENT_RECORDED]),
        move |env: &StockflowEnvelope| -> Result<(), ReconciliationError> {
            if let StockflowEvent::Invoicing(InvoicingEvent::PaymentRecorded(ev)) = env.payload() {
                e.reconcile_invoice_payment(ev.payment.invoice_id)?;
            }
            Ok(())
        },
    )?;

    let e = engine.clone();
    registry.register(
        RECONCILE_TRANSACTION_INVENTORY,
        EventFilter::types(&[sales_events::TRANSACTION_COMPLETED]),
        move |env: &StockflowEnvelope| -> Result<(), ReconciliationError> {
            if let StockflowEvent::Sales(SalesEvent::TransactionCompleted(ev)) = env.payload() {
                e.reconcile_transaction_inventory(ev.transaction.transaction_id)?;
            }
            Ok(())
        },
    )?;

    let e = engine;
    registry.register(
        RECONCILE_PURCHASE_RECEIPT,
        EventFilter::types(&[purchasing_events::PURCHASE_ORDER_RECEIVED]),
        move |env: &StockflowEnvelope| -> Result<(), ReconciliationError> {
            if let StockflowEvent::Purchasing(PurchasingEvent::PurchaseOrderReceived(ev)) = env.payload() {
                e.reconcile_purchase_order_receipt(ev.receipt.tenant_id, ev.receipt.receipt_id)?;
            }
            Ok(())
        },
    )?;

    registry.register(
        TRANSFER_NOTIFICATIONS,
        EventFilter::types(&[
            transfer_events::TRANSFER_REQUESTED,
            transfer_events::TRANSFER_APPROVED,
            transfer_events::TRANSFER_REJECTED,
            transfer_events::TRANSFER_CANCELLED,
            transfer_events::TRANSFER_COMPLETED,
        ]),
        move |env: &StockflowEnvelope| {
            let StockflowEvent::Transfer(ev) = env.payload() else {
                return Ok(());
            };
            let (template, vars) = transfer_alert(ev);
            notifications.send_alert(template, &vars)
        },
    )?;

    registry.register(AUDIT_TRAIL, EventFilter::all(), move |env: &StockflowEnvelope| {
        audit.record(AuditEntry::transition(
            env.tenant_id(),
            env.event_type(),
            format!(
                "{} {} seq={} event_id={}",
                env.aggregate_type(),
                env.aggregate_id(),
                env.sequence_number(),
                env.event_id()
            ),
        ));
        Ok::<(), std::convert::Infallible>(())
    })?;

    Ok(())
}

fn transfer_alert(event: &TransferEvent) -> (&'static str, AlertVariables) {
    let mut vars = details_variables(event.details());
    vars.insert("occurred_at".into(), json!(event.occurred_at().to_rfc3339()));

    let template = match event {
        TransferEvent::TransferRequested(_) => templates::TRANSFER_REQUESTED,
        TransferEvent::TransferApproved(e) => {
            vars.insert("approved_by".into(), json!(e.approved_by.to_string()));
            templates::TRANSFER_APPROVED
        }
        TransferEvent::TransferRejected(e) => {
            vars.insert("reason".into(), json!(e.reason));
            templates::TRANSFER_REJECTED
        }
        TransferEvent::TransferCancelled(e) => {
            vars.insert("reason".into(), json!(e.reason));
            vars.insert("previous_status".into(), json!(e.previous_status.as_str()));
            templates::TRANSFER_CANCELLED
        }
        TransferEvent::TransferCompleted(_) => templates::TRANSFER_COMPLETED,
    };
    (template, vars)
}

fn details_variables(d: &TransferDetails) -> AlertVariables {
    let mut vars = AlertVariables::new();
    vars.insert("transfer_id".into(), json!(d.transfer_id.to_string()));
    vars.insert("transfer_type".into(), json!(d.transfer_type));
    vars.insert("source_tenant_id".into(), json!(d.source.tenant_id.to_string()));
    vars.insert("source_location_id".into(), json!(d.source.location_id.to_string()));
    vars.insert("destination_tenant_id".into(), json!(d.destination.tenant_id.to_string()));
    vars.insert(
        "destination_location_id".into(),
        json!(d.destination.location_id.to_string()),
    );
    vars.insert("product_id".into(), json!(d.product_id.to_string()));
    vars.insert(
        "batch".into(),
        json!(d.batch.as_ref().map(|b| b.as_str().to_string())),
    );
    vars.insert("quantity".into(), json!(d.quantity));
    vars.insert("requested_by".into(), json!(d.requested_by.to_string()));
    vars.insert("notes".into(), json!(d.notes));
    vars
}
