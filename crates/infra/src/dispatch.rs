//! Subscriber dispatch.
//!
//! Each registered handler gets its own bus subscription and its own worker
//! thread, so handlers run independently of each other and of the publisher.
//! Delivery is at-least-once: handlers must be idempotent. A handler error
//! or panic is logged and sent to the audit sink, and the worker keeps going.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use stockflow_core::TenantId;
use stockflow_events::{EventBus, Subscription};

use crate::audit::{AuditEntry, AuditSink};
use crate::domain_event::StockflowEnvelope;

/// Which envelopes a handler wants.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    event_types: Vec<&'static str>,
    tenant_id: Option<TenantId>,
}

impl EventFilter {
    /// Every event type.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn types(event_types: &[&'static str]) -> Self {
        Self {
            event_types: event_types.to_vec(),
            tenant_id: None,
        }
    }

    /// Pin the handler to one tenant.
    pub fn for_tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn matches(&self, envelope: &StockflowEnvelope) -> bool {
        if let Some(t) = self.tenant_id {
            if envelope.tenant_id() != t {
                return false;
            }
        }
        self.event_types.is_empty() || self.event_types.contains(&envelope.event_type())
    }
}

/// Handle to control and join one subscriber worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Owns every subscriber worker started against one bus.
pub struct SubscriberRegistry<B> {
    bus: B,
    audit: Arc<dyn AuditSink>,
    workers: Vec<WorkerHandle>,
}

impl<B> SubscriberRegistry<B>
where
    B: EventBus<StockflowEnvelope> + Clone + Send + Sync + 'static,
{
    pub fn new(bus: B, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            bus,
            audit,
            workers: Vec::new(),
        }
    }

    /// Subscribe `handler` and start its worker.
    ///
    /// The subscription is taken before this returns, so nothing published
    /// afterwards is missed.
    pub fn register<H, E>(
        &mut self,
        name: &'static str,
        filter: EventFilter,
        handler: H,
    ) -> std::io::Result<()>
    where
        H: FnMut(&StockflowEnvelope) -> Result<(), E> + Send + 'static,
        E: core::fmt::Display + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub = self.bus.subscribe();
        let audit = self.audit.clone();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, sub, shutdown_rx, filter, audit, handler))?;

        debug!(worker = name, "subscriber registered");
        self.workers.push(WorkerHandle {
            name,
            shutdown: shutdown_tx,
            join: Some(join),
        });
        Ok(())
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.workers.iter().map(WorkerHandle::name).collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Stop every worker. Messages still queued are dropped.
    pub fn shutdown(self) {
        for w in self.workers {
            w.shutdown();
        }
    }
}

fn worker_loop<H, E>(
    name: &'static str,
    sub: Subscription<StockflowEnvelope>,
    shutdown_rx: mpsc::Receiver<()>,
    filter: EventFilter,
    audit: Arc<dyn AuditSink>,
    mut handler: H,
) where
    H: FnMut(&StockflowEnvelope) -> Result<(), E>,
    E: core::fmt::Display,
{
    info!(worker = name, "subscriber started");
    let tick = Duration::from_millis(250);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        let envelope = match sub.recv_timeout(tick) {
            Ok(env) => env,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };

        if !filter.matches(&envelope) {
            continue;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(&envelope)));
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(_) => Some("handler panicked".to_string()),
        };

        if let Some(detail) = failure {
            warn!(
                worker = name,
                event_type = envelope.event_type(),
                tenant = %envelope.tenant_id(),
                error = %detail,
                "subscriber handler failed"
            );
            audit.record(AuditEntry::handler_failure(
                name,
                Some(envelope.tenant_id()),
                Some(envelope.event_type()),
                detail,
            ));
        }
    }

    info!(worker = name, "subscriber stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::Utc;
    use stockflow_core::{LocationId, ProductId, UserId};
    use stockflow_events::InMemoryEventBus;
    use stockflow_inventory::{RequestTransfer, Scope, StockTransfer, TransferId, TransferType};

    use crate::audit::{AuditKind, InMemoryAuditSink};
    use crate::domain_event::{StockflowEvent, transfer_envelope};

    fn envelope(tenant: TenantId) -> StockflowEnvelope {
        let (transfer, event) = StockTransfer::request(&RequestTransfer {
            transfer_id: TransferId::generate(),
            transfer_type: TransferType::IntraTenant,
            source: Scope::new(tenant, LocationId::new()),
            destination: Scope::new(tenant, LocationId::new()),
            product_id: ProductId::new(),
            batch: None,
            quantity: 1,
            requested_by: UserId::new(),
            notes: None,
            occurred_at: Utc::now(),
        })
        .unwrap();
        transfer_envelope(&transfer, event)
    }

    fn wait_for_processing() {
        std::thread::sleep(Duration::from_millis(100));
    }

    #[test]
    fn failing_handler_is_audited_and_others_still_run() {
        let bus: Arc<InMemoryEventBus<StockflowEnvelope>> = Arc::new(InMemoryEventBus::new());
        let audit = Arc::new(InMemoryAuditSink::new());
        let mut registry = SubscriberRegistry::new(bus.clone(), audit.clone());

        let seen = Arc::new(Mutex::new(0u32));
        let seen_clone = seen.clone();
        registry
            .register("broken", EventFilter::all(), |_env: &StockflowEnvelope| {
                Err::<(), _>("boom")
            })
            .unwrap();
        registry
            .register("panicky", EventFilter::all(), |_env: &StockflowEnvelope| -> Result<(), String> {
                panic!("handler bug")
            })
            .unwrap();
        registry
            .register("counter", EventFilter::all(), move |_env: &StockflowEnvelope| {
                *seen_clone.lock().unwrap() += 1;
                Ok::<(), String>(())
            })
            .unwrap();

        bus.publish(envelope(TenantId::new())).unwrap();
        bus.publish(envelope(TenantId::new())).unwrap();
        wait_for_processing();

        assert_eq!(*seen.lock().unwrap(), 2);
        let failures = audit.of_kind(AuditKind::HandlerFailure);
        assert_eq!(failures.len(), 4);
        assert!(failures.iter().any(|f| f.source == "panicky"));

        registry.shutdown();
    }

    #[test]
    fn filter_respects_type_and_tenant() {
        let tenant = TenantId::new();
        let env = envelope(tenant);

        assert!(EventFilter::all().matches(&env));
        assert!(EventFilter::types(&["TRANSFER_REQUESTED"]).matches(&env));
        assert!(!EventFilter::types(&["TRANSFER_COMPLETED"]).matches(&env));
        assert!(EventFilter::all().for_tenant(tenant).matches(&env));
        assert!(!EventFilter::all().for_tenant(TenantId::new()).matches(&env));
    }

    #[test]
    fn envelopes_are_wrapped_with_source_tenant() {
        let tenant = TenantId::new();
        let env = envelope(tenant);
        assert_eq!(env.tenant_id(), tenant);
        assert!(matches!(env.payload(), StockflowEvent::Transfer(_)));
    }
}
