use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::StockflowConfig;
use crate::reconciliation::{ReconciliationEngine, ReconciliationError, SweepReport};

/// Something that can run a full reconciliation pass.
pub trait Sweep: Send + Sync + 'static {
    fn sweep(&self) -> Result<SweepReport, ReconciliationError>;
}

impl Sweep for ReconciliationEngine {
    fn sweep(&self) -> Result<SweepReport, ReconciliationError> {
        self.scheduled_sweep()
    }
}

/// Receives every finished sweep report.
pub trait SweepObserver: Send + 'static {
    fn on_report(&mut self, report: SweepReport);
}

impl<F> SweepObserver for F
where
    F: FnMut(SweepReport) + Send + 'static,
{
    fn on_report(&mut self, report: SweepReport) {
        self(report)
    }
}

/// Schedule for the periodic reconciliation sweep.
#[derive(Debug, Clone)]
pub struct SweepScheduler {
    pub interval: Duration,
    pub run_on_start: bool,
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for SweepScheduler {
    fn default() -> Self {
        Self::from_config(&StockflowConfig::default())
    }
}

/// Handle for the running scheduler (shutdown + trigger hook).
#[derive(Debug)]
pub struct SweepSchedulerHandle {
    shutdown: mpsc::Sender<()>,
    trigger: mpsc::SyncSender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl SweepSchedulerHandle {
    /// Ask for a sweep now.
    ///
    /// Triggers are coalesced: if one is already pending this is a no-op.
    pub fn trigger(&self) {
        let _ = self.trigger.try_send(());
    }

    /// Stop the scheduler thread. A sweep in progress finishes first.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Shortest cadence the scheduler runs at; shorter intervals are raised to it.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

impl SweepScheduler {
    pub fn from_config(config: &StockflowConfig) -> Self {
        Self {
            interval: config.sweep_interval.max(MIN_INTERVAL),
            run_on_start: config.sweep_on_start,
            max_retries: config.sweep_max_retries,
            base_backoff: config.sweep_base_backoff,
        }
    }

    /// Spawn the scheduler on its own thread.
    ///
    /// - Schedule: one sweep every `interval` (at least [`MIN_INTERVAL`]), on a stable cadence
    /// - Trigger: `handle.trigger()` requests an extra sweep
    /// - Failures: logged and retried with bounded exponential backoff; never propagate
    pub fn spawn<S, O>(
        &self,
        name: &'static str,
        sweeper: Arc<S>,
        observer: O,
    ) -> std::io::Result<SweepSchedulerHandle>
    where
        S: Sweep + ?Sized,
        O: SweepObserver,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let (trigger_tx, trigger_rx) = mpsc::sync_channel::<()>(1);

        let mut cfg = self.clone();
        cfg.interval = cfg.interval.max(MIN_INTERVAL);
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || scheduler_loop(name, cfg, shutdown_rx, trigger_rx, sweeper, observer))?;

        Ok(SweepSchedulerHandle {
            shutdown: shutdown_tx,
            trigger: trigger_tx,
            join: Some(join),
        })
    }
}

fn scheduler_loop<S, O>(
    name: &'static str,
    cfg: SweepScheduler,
    shutdown_rx: mpsc::Receiver<()>,
    trigger_rx: mpsc::Receiver<()>,
    sweeper: Arc<S>,
    mut observer: O,
) where
    S: Sweep + ?Sized,
    O: SweepObserver,
{
    info!(scheduler = name, interval_secs = cfg.interval.as_secs(), "sweep scheduler started");

    let mut next_tick = Instant::now() + cfg.interval;
    let mut pending = cfg.run_on_start;
    let mut failures: u32 = 0;
    let mut backoff_until: Option<Instant> = None;

    loop {
        // Shutdown has priority.
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        let now = Instant::now();
        if now >= next_tick {
            pending = true;
            // Keep a stable cadence even if we were delayed.
            while next_tick <= now {
                next_tick += cfg.interval;
            }
        }

        while trigger_rx.try_recv().is_ok() {
            pending = true;
        }

        if let Some(until) = backoff_until {
            if Instant::now() < until {
                thread::sleep(Duration::from_millis(50));
                continue;
            }
            backoff_until = None;
        }

        if !pending {
            let sleep_for = next_tick
                .saturating_duration_since(Instant::now())
                .min(Duration::from_millis(250));
            thread::sleep(sleep_for);
            continue;
        }

        pending = false;

        match sweeper.sweep() {
            Ok(report) => {
                failures = 0;
                observer.on_report(report);
            }
            Err(e) => {
                warn!(scheduler = name, error = %e, attempt = failures + 1, "reconciliation sweep failed");
                failures += 1;
                if failures <= cfg.max_retries {
                    pending = true;
                    backoff_until = Some(Instant::now() + backoff(cfg.base_backoff, failures));
                } else {
                    // Give up until the next tick or trigger.
                    failures = 0;
                }
            }
        }
    }

    info!(scheduler = name, "sweep scheduler stopped");
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    // base * 2^(attempt-1), capped at 10s.
    let pow = 1u32 << attempt.saturating_sub(1).min(10);
    let ms = base.as_millis().saturating_mul(pow as u128);
    Duration::from_millis(ms.min(10_000) as u64)
}
