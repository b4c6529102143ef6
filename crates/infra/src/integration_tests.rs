//! Integration tests for the full transfer + reconciliation pipeline.
//!
//! Tests: Service → Store → EventBus → Subscribers → Reconciliation
//!
//! Verifies:
//! - Transfers move stock exactly once and publish in order
//! - Concurrent completions have a single winner
//! - Drift is reported by the sweep and repaired only on receipt paths
//! - Subscriber side effects (settlement, alerts, audit) follow the events

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier, Mutex};
    use std::time::Duration;

    use chrono::Utc;

    use stockflow_core::{AggregateId, DomainError, LocationId, ProductId, TenantId, UserId};
    use stockflow_events::{EventBus, InMemoryEventBus};
    use stockflow_inventory::{
        RequestTransfer, Scope, SourceRef, StockKey, StockTransfer, TransferStatus, TransferType,
        TransferId, event_types,
    };
    use stockflow_invoicing::{Invoice, InvoiceId, InvoiceStatus};
    use stockflow_purchasing::{PurchaseReceipt, ReceiptId, ReceiptLine};
    use stockflow_sales::{SaleLine, SalesTransaction, TransactionId};

    use crate::audit::{AuditKind, InMemoryAuditSink};
    use crate::config::StockflowConfig;
    use crate::connections::InMemoryTenantDirectory;
    use crate::dispatch::SubscriberRegistry;
    use crate::domain_event::StockflowEnvelope;
    use crate::movements::StockMovementService;
    use crate::notifications::{InMemoryNotificationGateway, templates};
    use crate::payments::PaymentService;
    use crate::reconciliation::{ReconciliationEngine, SweepReport};
    use crate::scheduler::SweepScheduler;
    use crate::store::StoreSet;
    use crate::subscribers::register_default_subscribers;
    use crate::transfers::TransferService;

    type Bus = Arc<InMemoryEventBus<StockflowEnvelope>>;

    struct App {
        stores: StoreSet,
        bus: Bus,
        directory: Arc<InMemoryTenantDirectory>,
        gateway: Arc<InMemoryNotificationGateway>,
        audit: Arc<InMemoryAuditSink>,
        engine: Arc<ReconciliationEngine>,
        transfers: TransferService<Bus>,
        movements: StockMovementService<Bus>,
        payments: PaymentService<Bus>,
    }

    fn app_with(config: StockflowConfig) -> App {
        let stores = StoreSet::in_memory();
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let directory = Arc::new(InMemoryTenantDirectory::new());
        let gateway = Arc::new(InMemoryNotificationGateway::new());
        let audit = Arc::new(InMemoryAuditSink::new());

        let engine = Arc::new(ReconciliationEngine::new(stores.clone(), gateway.clone(), &config));
        let transfers = TransferService::new(
            stores.transfers.clone(),
            stores.inventory.clone(),
            directory.clone(),
            bus.clone(),
            config.max_write_attempts,
        );
        let movements = StockMovementService::new(
            stores.inventory.clone(),
            stores.sales.clone(),
            stores.receipts.clone(),
            bus.clone(),
            config.max_write_attempts,
        );
        let payments = PaymentService::new(stores.invoices.clone(), bus.clone());

        App {
            stores,
            bus,
            directory,
            gateway,
            audit,
            engine,
            transfers,
            movements,
            payments,
        }
    }

    fn app() -> App {
        app_with(StockflowConfig::default())
    }

    fn start_subscribers(app: &App) -> SubscriberRegistry<Bus> {
        let mut registry = SubscriberRegistry::new(app.bus.clone(), app.audit.clone());
        register_default_subscribers(
            &mut registry,
            app.engine.clone(),
            app.gateway.clone(),
            app.audit.clone(),
        )
        .unwrap();
        registry
    }

    /// Helper: Wait a short time for subscriber workers to catch up.
    fn wait_for_processing() {
        std::thread::sleep(Duration::from_millis(150));
    }

    fn scope(tenant: TenantId) -> Scope {
        Scope::new(tenant, LocationId::new())
    }

    fn request(source: Scope, destination: Scope, product_id: ProductId, quantity: i64) -> RequestTransfer {
        let transfer_type = if source.tenant_id == destination.tenant_id {
            TransferType::IntraTenant
        } else {
            TransferType::CrossTenant
        };
        RequestTransfer {
            transfer_id: TransferId::generate(),
            transfer_type,
            source,
            destination,
            product_id,
            batch: None,
            quantity,
            requested_by: UserId::new(),
            notes: None,
            occurred_at: Utc::now(),
        }
    }

    fn stock(app: &App, key: &StockKey, quantity: i64) {
        app.movements.adjust(key, quantity, AggregateId::new()).unwrap();
    }

    fn snapshot(app: &App, key: &StockKey) -> Option<i64> {
        app.stores.inventory.read_snapshot(key).unwrap().map(|s| s.quantity)
    }

    /// Approved intra-tenant transfer with `available` units at the source.
    fn approved_transfer(app: &App, quantity: i64, available: i64) -> StockTransfer {
        let tenant = TenantId::new();
        let t = app
            .transfers
            .request(request(scope(tenant), scope(tenant), ProductId::new(), quantity))
            .unwrap();
        stock(app, &t.details().source_key(), available);
        app.transfers.approve(t.id_typed(), UserId::new()).unwrap()
    }

    #[test]
    fn transfer_lifecycle_moves_stock_and_publishes_in_order() {
        let app = app();
        let events = app.bus.subscribe();
        let tenant = TenantId::new();
        let (store_a, store_b) = (scope(tenant), scope(tenant));
        let product = ProductId::new();

        let src = StockKey::at(store_a, product, None);
        let dst = StockKey::at(store_b, product, None);
        stock(&app, &src, 25);
        stock(&app, &dst, 3);

        let t = app.transfers.request(request(store_a, store_b, product, 10)).unwrap();
        let id = t.id_typed();
        app.transfers.approve(id, UserId::new()).unwrap();
        let done = app.transfers.complete(id).unwrap();

        assert_eq!(done.status(), TransferStatus::Completed);
        assert!(done.approved_at().is_some());
        assert!(done.completed_at().is_some());
        assert_eq!(done.quantity(), 10);

        let leg = |key: &StockKey| -> i64 {
            app.stores
                .inventory
                .ledger_entries(key)
                .unwrap()
                .iter()
                .filter(|e| matches!(&e.source, SourceRef::Transfer { transfer_id, .. } if *transfer_id == id))
                .map(|e| e.delta)
                .sum()
        };
        assert_eq!(leg(&src), -10);
        assert_eq!(leg(&dst), 10);
        assert_eq!(snapshot(&app, &src), Some(15));
        assert_eq!(snapshot(&app, &dst), Some(13));

        let published: Vec<_> = events
            .drain()
            .into_iter()
            .filter(|e| e.aggregate_id() == id.0)
            .collect();
        let types: Vec<_> = published.iter().map(|e| e.event_type()).collect();
        assert_eq!(
            types,
            vec![
                event_types::TRANSFER_REQUESTED,
                event_types::TRANSFER_APPROVED,
                event_types::TRANSFER_COMPLETED
            ]
        );
        let seqs: Vec<_> = published.iter().map(|e| e.sequence_number()).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(published.iter().all(|e| e.tenant_id() == tenant));
    }

    #[test]
    fn completing_twice_does_not_double_apply() {
        let app = app();
        let t = approved_transfer(&app, 4, 4);
        let dst = t.details().destination_key();

        app.transfers.complete(t.id_typed()).unwrap();
        let err = app.transfers.complete(t.id_typed()).unwrap_err();

        assert!(matches!(err.domain(), Some(DomainError::InvalidStateTransition { .. })));
        assert_eq!(app.stores.inventory.sum_ledger(&dst).unwrap(), 4);
        assert_eq!(snapshot(&app, &dst), Some(4));
    }

    #[test]
    fn concurrent_completion_has_exactly_one_winner() {
        let app = app();
        let t = approved_transfer(&app, 7, 7);
        let id = t.id_typed();
        let (src, dst) = (t.details().source_key(), t.details().destination_key());

        let contenders = 8;
        let barrier = Barrier::new(contenders);
        let outcomes = Mutex::new(Vec::new());
        std::thread::scope(|s| {
            for _ in 0..contenders {
                s.spawn(|| {
                    barrier.wait();
                    let r = app.transfers.complete(id);
                    outcomes.lock().unwrap().push(r);
                });
            }
        });

        let outcomes = outcomes.into_inner().unwrap();
        let winners = outcomes.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        for r in outcomes.iter().filter_map(|r| r.as_ref().err()) {
            assert!(
                matches!(
                    r.domain(),
                    Some(DomainError::InvalidStateTransition { .. }) | Some(DomainError::Conflict(_))
                ),
                "unexpected loser error: {r}"
            );
        }

        assert_eq!(app.stores.inventory.sum_ledger(&src).unwrap(), 0);
        assert_eq!(app.stores.inventory.sum_ledger(&dst).unwrap(), 7);
        assert_eq!(snapshot(&app, &dst), Some(7));
        assert_eq!(app.transfers.get(id).unwrap().status(), TransferStatus::Completed);
    }

    #[test]
    fn reject_after_completion_changes_nothing() {
        let app = app();
        let t = approved_transfer(&app, 2, 5);
        let id = t.id_typed();
        app.transfers.complete(id).unwrap();

        let events = app.bus.subscribe();
        let before = app.transfers.get(id).unwrap();
        let err = app.transfers.reject(id, "changed my mind").unwrap_err();

        assert!(matches!(err.domain(), Some(DomainError::InvalidStateTransition { .. })));
        assert_eq!(app.transfers.get(id).unwrap(), before);
        assert!(events.drain().is_empty());
    }

    #[test]
    fn unflushed_sale_is_reported_once_by_sweep() {
        let app = app();
        let tenant = TenantId::new();
        let (store_a, store_b) = (scope(tenant), scope(tenant));
        let product = ProductId::new();
        let src = StockKey::at(store_a, product, None);
        let dst = StockKey::at(store_b, product, None);
        stock(&app, &src, 5);
        stock(&app, &dst, 20);

        // A sale reached the ledger but its snapshot write never happened.
        app.stores
            .inventory
            .create_ledger_entry(
                &dst,
                -5,
                SourceRef::Sale {
                    transaction_id: AggregateId::new(),
                    line_no: 1,
                },
            )
            .unwrap();

        let t = app.transfers.request(request(store_a, store_b, product, 5)).unwrap();
        app.transfers.approve(t.id_typed(), UserId::new()).unwrap();
        app.transfers.complete(t.id_typed()).unwrap();

        let report = app.engine.scheduled_sweep().unwrap();

        assert_eq!(report.results.len(), 2);
        assert_eq!(report.mismatches, 1);
        let drift: Vec<_> = report.mismatched().collect();
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].key, dst);
        assert_eq!(drift[0].ledger_quantity, 20);
        assert_eq!(drift[0].snapshot_quantity, Some(25));
        assert!(!drift[0].repaired);

        let alerts = app.gateway.sent_with(templates::INVENTORY_DRIFT);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].variables["expected"], serde_json::json!(20));
        assert_eq!(alerts[0].variables["actual"], serde_json::json!(25));
        assert_eq!(alerts[0].variables["recipient"], serde_json::json!("ops@localhost"));
    }

    #[test]
    fn reconcile_key_twice_is_stable() {
        let app = app();
        let key = StockKey::at(scope(TenantId::new()), ProductId::new(), None);
        stock(&app, &key, 9);
        app.stores.inventory.write_snapshot(&key, 6, Some(9)).unwrap();

        let a = app.engine.reconcile_key(&key).unwrap();
        let b = app.engine.reconcile_key(&key).unwrap();

        assert!(a.mismatch && b.mismatch);
        assert_eq!((a.ledger_quantity, a.snapshot_quantity), (b.ledger_quantity, b.snapshot_quantity));
        assert_eq!(snapshot(&app, &key), Some(6));
    }

    #[test]
    fn cross_tenant_transfer_requires_connection_and_moves_each_scope() {
        let app = app();
        let (a, b) = (TenantId::new(), TenantId::new());
        let product = ProductId::new();
        let (from, to) = (scope(a), scope(b));

        let err = app.transfers.request(request(from, to, product, 3)).unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::Validation(_))));

        app.directory.connect(a, b).unwrap();
        let t = app.transfers.request(request(from, to, product, 3)).unwrap();
        stock(&app, &t.details().source_key(), 3);
        app.transfers.approve(t.id_typed(), UserId::new()).unwrap();
        app.transfers.complete(t.id_typed()).unwrap();

        assert_eq!(snapshot(&app, &t.details().source_key()), Some(0));
        assert_eq!(snapshot(&app, &t.details().destination_key()), Some(3));
        assert_eq!(app.transfers.list(b).unwrap().len(), 1);
        assert_eq!(app.engine.scheduled_sweep().unwrap().mismatches, 0);
    }

    #[test]
    fn completed_transfer_triggers_destination_repair() {
        let app = app();
        let registry = start_subscribers(&app);

        let t = approved_transfer(&app, 6, 6);
        let dst = t.details().destination_key();
        // Ledger-only write at the destination: snapshot lags the ledger by 2.
        app.stores
            .inventory
            .create_ledger_entry(&dst, 2, SourceRef::Adjustment { reference: AggregateId::new() })
            .unwrap();

        app.transfers.complete(t.id_typed()).unwrap();
        wait_for_processing();

        assert_eq!(app.stores.inventory.sum_ledger(&dst).unwrap(), 8);
        assert_eq!(snapshot(&app, &dst), Some(8));
        assert!(!app.engine.reconcile_key(&dst).unwrap().mismatch);

        registry.shutdown();
    }

    #[test]
    fn payment_recorded_settles_invoice() {
        let app = app();
        let registry = start_subscribers(&app);

        let invoice = Invoice::issue(InvoiceId::new(AggregateId::new()), TenantId::new(), 500, Utc::now()).unwrap();
        let id = invoice.invoice_id;
        app.stores.invoices.insert_invoice(&invoice).unwrap();

        app.payments.record_payment(id, 200).unwrap();
        wait_for_processing();
        assert_eq!(
            app.stores.invoices.read_invoice(id).unwrap().unwrap().status,
            InvoiceStatus::PartiallyPaid
        );

        app.payments.record_payment(id, 300).unwrap();
        wait_for_processing();
        assert_eq!(app.stores.invoices.read_invoice(id).unwrap().unwrap().status, InvoiceStatus::Paid);

        assert!(app.payments.record_payment(InvoiceId::new(AggregateId::new()), 10).is_err());
        registry.shutdown();
    }

    #[test]
    fn sale_without_inventory_record_alerts_but_completes() {
        let app = app();
        let registry = start_subscribers(&app);
        let at = scope(TenantId::new());

        let tx = SalesTransaction::open(
            TransactionId::new(AggregateId::new()),
            at.tenant_id,
            at.location_id,
            vec![SaleLine {
                line_no: 1,
                product_id: ProductId::new(),
                batch: None,
                quantity: 1,
            }],
        )
        .unwrap();
        let tx = app.movements.complete_sale(tx).unwrap();
        wait_for_processing();

        let alerts = app.gateway.sent_with(templates::MISSING_INVENTORY_RECORD);
        assert_eq!(alerts.len(), 1);
        assert_eq!(
            alerts[0].variables["transaction_id"],
            serde_json::json!(tx.transaction_id.to_string())
        );
        assert!(app.audit.of_kind(AuditKind::HandlerFailure).is_empty());

        registry.shutdown();
    }

    #[test]
    fn purchase_receipt_repair_is_opt_in() {
        for repair in [false, true] {
            let app = app_with(StockflowConfig {
                repair_purchase_receipts: repair,
                ..StockflowConfig::default()
            });
            let at = scope(TenantId::new());
            let product = ProductId::new();
            let receipt = PurchaseReceipt::new(
                ReceiptId::new(AggregateId::new()),
                at.tenant_id,
                at.location_id,
                "PO-77",
                vec![ReceiptLine {
                    line_no: 1,
                    product_id: product,
                    batch: None,
                    quantity: 9,
                }],
                Utc::now(),
            )
            .unwrap();
            let receipt = app.movements.receive_purchase(receipt).unwrap();
            let key = StockKey::at(at, product, None);
            app.stores.inventory.write_snapshot(&key, 4, Some(9)).unwrap();

            let results = app
                .engine
                .reconcile_purchase_order_receipt(at.tenant_id, receipt.receipt_id)
                .unwrap();

            assert_eq!(results.len(), 1);
            assert!(results[0].mismatch);
            assert_eq!(results[0].repaired, repair);
            assert_eq!(snapshot(&app, &key), Some(if repair { 9 } else { 4 }));
        }
    }

    #[test]
    fn transfer_notifications_and_audit_follow_events() {
        let app = app();
        let registry = start_subscribers(&app);

        let tenant = TenantId::new();
        let t = app
            .transfers
            .request(request(scope(tenant), scope(tenant), ProductId::new(), 1))
            .unwrap();
        app.transfers.reject(t.id_typed(), "wrong product").unwrap();
        wait_for_processing();

        assert_eq!(app.gateway.sent_with(templates::TRANSFER_REQUESTED).len(), 1);
        let rejected = app.gateway.sent_with(templates::TRANSFER_REJECTED);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].variables["reason"], serde_json::json!("wrong product"));
        assert_eq!(rejected[0].variables["quantity"], serde_json::json!(1));

        let transitions = app.audit.of_kind(AuditKind::Transition);
        assert_eq!(transitions.len(), 2);
        assert!(transitions.iter().all(|a| a.tenant_id == Some(tenant)));

        registry.shutdown();
    }

    #[test]
    fn scheduler_runs_sweep_against_engine() {
        let app = app();
        let key = StockKey::at(scope(TenantId::new()), ProductId::new(), None);
        app.stores
            .inventory
            .create_ledger_entry(&key, 3, SourceRef::Adjustment { reference: AggregateId::new() })
            .unwrap();

        let reports: Arc<Mutex<Vec<SweepReport>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();
        let scheduler = SweepScheduler {
            interval: Duration::from_secs(3600),
            run_on_start: true,
            max_retries: 1,
            base_backoff: Duration::from_millis(10),
        };
        let handle = scheduler
            .spawn("sweep-it", app.engine.clone(), move |r: SweepReport| {
                sink.lock().unwrap().push(r)
            })
            .unwrap();
        wait_for_processing();
        handle.shutdown();

        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].mismatches, 1);
        assert_eq!(reports[0].results[0].key, key);
    }

    #[test]
    fn publish_happens_only_after_commit() {
        let app = app();
        let events = app.bus.subscribe();
        let t = approved_transfer(&app, 50, 1);
        events.drain();

        assert!(app.transfers.complete(t.id_typed()).is_err());
        assert!(events.drain().is_empty());
        assert_eq!(app.bus.subscriber_count(), 1);
    }
}
