use std::sync::Arc;
use std::time::Duration;

use error_stack::Report;
use tokio::sync::Mutex;
use tokio::time::{MissedTickBehavior, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::engine::deviation::reduce_readings;
use crate::engine::trigger::{Decision, TriggerStore};
use crate::error::SourceError;
use crate::model::{Alert, TokenReading};
use crate::notifier::AlertSink;
use crate::source::PriceSource;

/// Source of wall-clock unix seconds used for slot alignment.
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Whether a poll may run at `now`. Alignment is against the wall clock, so
/// the cadence does not drift after a slow cycle.
pub fn is_slot_aligned(now_unix: i64, slot_interval: u64) -> bool {
    match i64::try_from(slot_interval) {
        Ok(slot) if slot > 0 => now_unix.rem_euclid(slot) == 0,
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleSummary {
    pub readings: usize,
    pub fired: usize,
    pub delivered: usize,
}

/// Drives the trigger store on a slot-aligned cadence.
pub struct Scheduler {
    pub(crate) source: Arc<dyn PriceSource>,
    pub(crate) sink: Arc<dyn AlertSink>,
    pub(crate) store: Arc<Mutex<TriggerStore>>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) slot_interval: u64,
    pub(crate) tick: Duration,
    pub(crate) retry_backoff: Duration,
}

impl Scheduler {
    /// Keep a polling loop alive until `cancel` fires.
    ///
    /// The loop runs as a child task; a panic inside it ends only that child,
    /// and a fresh one is started after `retry_backoff`. Trigger state lives in
    /// the shared store and survives the restart.
    pub async fn supervise(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let worker = tokio::spawn(Arc::clone(&self).poll_loop(cancel.clone()));
            match worker.await {
                Ok(()) => return,
                Err(e) if e.is_panic() => {
                    error!(
                        error = %e,
                        backoff_ms = self.retry_backoff.as_millis() as u64,
                        "price notify loop panicked, restarting"
                    );
                }
                Err(e) => {
                    error!(error = %e, "price notify loop aborted");
                    return;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(self.retry_backoff) => {}
            }
        }
    }

    async fn poll_loop(self: Arc<Self>, cancel: CancellationToken) {
        debug!(source = self.source.name(), "price notify loop started");
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_slot: Option<i64> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(source = self.source.name(), "price notify loop exit");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let now = self.clock.now_unix();
            if !is_slot_aligned(now, self.slot_interval) || last_slot == Some(now) {
                continue;
            }
            last_slot = Some(now);

            let span = info_span!("poll_cycle", cycle_id = %Uuid::new_v4(), slot = now);
            match self.run_cycle().instrument(span).await {
                Ok(summary) => debug!(
                    slot = now,
                    readings = summary.readings,
                    fired = summary.fired,
                    delivered = summary.delivered,
                    "price notify cycle complete"
                ),
                Err(report) => match report.current_context() {
                    SourceError::NoData => {
                        info!(slot = now, "no token prices yet, skipping cycle")
                    }
                    _ => warn!(slot = now, error = ?report, "failed to read token prices"),
                },
            }
        }
    }

    /// One poll: read prices, update every trigger, then deliver what fired.
    ///
    /// Trigger state is committed before delivery, so a failed delivery is
    /// dropped rather than retried.
    pub async fn run_cycle(&self) -> Result<CycleSummary, Report<SourceError>> {
        info!(source = self.source.name(), "do price notify");
        let readings = self.source.get_tokens().await?;

        let (evaluated, alerts) = {
            let mut store = self.store.lock().await;
            let readings = reduce_readings(readings, |name| store.baseline_of(name));
            (readings.len(), evaluate_all(&mut store, &readings))
        };

        let mut delivered = 0;
        for alert in &alerts {
            match self.sink.notify(alert).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    token = %alert.token_name,
                    kind = %alert.kind,
                    error = ?e,
                    "alert delivery failed"
                ),
            }
        }

        Ok(CycleSummary {
            readings: evaluated,
            fired: alerts.len(),
            delivered,
        })
    }
}

/// Apply every price to the store in order. A token that cannot be evaluated
/// is logged and skipped.
fn evaluate_all(store: &mut TriggerStore, readings: &[TokenReading]) -> Vec<Alert> {
    let mut alerts = Vec::new();
    for reading in readings {
        match store.update(&reading.name, reading.price) {
            Ok(Decision::Fire(alert)) => {
                info!(
                    token = %reading.name,
                    kind = %alert.kind,
                    deviation = alert.deviation.percent_thousandths,
                    observed_at = reading.timestamp,
                    "trigger fired"
                );
                alerts.push(alert);
            }
            Ok(Decision::None) => {}
            Err(e) => warn!(
                token = %reading.name,
                price = reading.price,
                error = ?e,
                "skipping token"
            ),
        }
    }
    alerts
}
