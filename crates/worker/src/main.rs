//! Stockflow worker.
//!
//! Wires the transfer, movement and payment services, the domain event
//! subscribers and the reconciliation sweep over one store set and one event
//! bus, then runs until ctrl-c.

use std::sync::Arc;

use anyhow::Context;

use stockflow_events::InMemoryEventBus;
use stockflow_infra::audit::TracingAuditSink;
use stockflow_infra::config::StockflowConfig;
use stockflow_infra::connections::InMemoryTenantDirectory;
use stockflow_infra::dispatch::SubscriberRegistry;
use stockflow_infra::domain_event::StockflowEnvelope;
use stockflow_infra::movements::StockMovementService;
use stockflow_infra::notifications::LogNotificationGateway;
use stockflow_infra::payments::PaymentService;
use stockflow_infra::reconciliation::{ReconciliationEngine, SweepReport};
use stockflow_infra::scheduler::SweepScheduler;
use stockflow_infra::store::StoreSet;
use stockflow_infra::subscribers::register_default_subscribers;
use stockflow_infra::transfers::TransferService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockflow_observability::init();

    let config = StockflowConfig::from_env();
    tracing::info!(
        sweep_interval_secs = config.sweep_interval.as_secs(),
        sweep_on_start = config.sweep_on_start,
        repair_purchase_receipts = config.repair_purchase_receipts,
        "starting stockflow worker"
    );

    let stores = StoreSet::in_memory();
    let bus: Arc<InMemoryEventBus<StockflowEnvelope>> = Arc::new(InMemoryEventBus::new());
    let notifications = Arc::new(LogNotificationGateway::new(config.alert_recipient.clone()));
    let audit = Arc::new(TracingAuditSink);
    let directory = Arc::new(InMemoryTenantDirectory::new());

    let transfers = TransferService::new(
        stores.transfers.clone(),
        stores.inventory.clone(),
        directory,
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

    let engine = Arc::new(ReconciliationEngine::new(stores, notifications.clone(), &config));

    let mut registry = SubscriberRegistry::new(bus, audit.clone());
    register_default_subscribers(&mut registry, engine.clone(), notifications, audit)
        .context("failed to start subscribers")?;
    tracing::info!(subscribers = ?registry.names(), "subscribers running");

    let scheduler = SweepScheduler::from_config(&config)
        .spawn("reconciliation-sweep", engine, |report: SweepReport| {
            tracing::info!(
                keys = report.results.len(),
                mismatches = report.mismatches,
                alert_failures = report.alert_failures,
                key_failures = report.key_failures,
                "sweep report"
            );
        })
        .context("failed to start sweep scheduler")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested");

    // Services first so nothing publishes into a stopped registry.
    drop((transfers, movements, payments));
    scheduler.shutdown();
    registry.shutdown();

    tracing::info!("stockflow worker stopped");
    Ok(())
}
