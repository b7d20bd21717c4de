pub mod deviation;
pub mod scheduler;
#[cfg(test)]
pub mod testing;
pub mod trigger;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::deviation::reduce_baselines;
use crate::engine::scheduler::{Clock, Scheduler, SystemClock};
use crate::engine::trigger::{Thresholds, TriggerStore};
use crate::error::EngineError;
use crate::model::Trigger;
use crate::notifier::AlertSink;
use crate::source::PriceSource;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Seconds between polls; a poll runs when unix time is a multiple of this.
    pub slot_interval: u64,
    pub thresholds: Thresholds,
    /// How often the loop checks the clock.
    pub tick: Duration,
    /// Delay before restarting a polling loop that panicked.
    pub retry_backoff: Duration,
    /// Write the trigger baselines back to the source on stop.
    pub persist_on_stop: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            slot_interval: 60,
            thresholds: Thresholds::default(),
            tick: Duration::from_secs(1),
            retry_backoff: Duration::from_secs(5),
            persist_on_stop: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl EngineState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Price threshold notification service.
///
/// Owns the trigger store and the background polling task. Constructed once
/// by its caller; `start` and `stop` may each be called once.
pub struct Engine {
    config: EngineConfig,
    source: Arc<dyn PriceSource>,
    sink: Arc<dyn AlertSink>,
    store: Arc<Mutex<TriggerStore>>,
    clock: Arc<dyn Clock>,
    state: EngineState,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Engine {
    /// Build an engine and seed it from the source's persisted baselines.
    ///
    /// Fails when the baselines cannot be loaded.
    pub async fn new(
        config: EngineConfig,
        source: Arc<dyn PriceSource>,
        sink: Arc<dyn AlertSink>,
    ) -> Result<Self, Report<EngineError>> {
        let records = source
            .get_persisted_baselines()
            .await
            .change_context(EngineError::Source)
            .attach_with(|| format!("source: {}", source.name()))?;

        let mut store = TriggerStore::new(config.thresholds);
        for record in reduce_baselines(records) {
            store
                .seed(&record)
                .attach_with(|| format!("token: {}", record.token_name))?;
        }

        info!(
            source = source.name(),
            triggers = store.len(),
            slot_interval = config.slot_interval,
            "price notify engine initialized"
        );

        Ok(Self {
            config,
            source,
            sink,
            store: Arc::new(Mutex::new(store)),
            clock: Arc::new(SystemClock),
            state: EngineState::Idle,
            cancel: CancellationToken::new(),
            task: None,
        })
    }

    /// Replace the wall clock used for slot alignment.
    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Consistent copy of every trigger.
    pub async fn snapshot(&self) -> Vec<Trigger> {
        self.store.lock().await.snapshot()
    }

    /// Launch the polling loop in the background.
    pub fn start(&mut self) -> Result<(), Report<EngineError>> {
        self.expect_state(EngineState::Idle, "start")?;

        let scheduler = Arc::new(Scheduler {
            source: Arc::clone(&self.source),
            sink: Arc::clone(&self.sink),
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            slot_interval: self.config.slot_interval,
            tick: self.config.tick,
            retry_backoff: self.config.retry_backoff,
        });
        self.task = Some(tokio::spawn(scheduler.supervise(self.cancel.clone())));
        self.state = EngineState::Running;
        info!(source = self.source.name(), "start price notify");
        Ok(())
    }

    /// Signal the loop to exit and wait for it.
    ///
    /// The loop notices at its next tick; a poll already in flight completes.
    pub async fn stop(&mut self) -> Result<(), Report<EngineError>> {
        self.expect_state(EngineState::Running, "stop")?;
        self.state = EngineState::Stopping;
        self.cancel.cancel();

        if let Some(task) = self.task.take() {
            task.await.change_context(EngineError::Runtime)?;
        }

        if self.config.persist_on_stop {
            let snapshot = self.snapshot().await;
            if let Err(e) = self.source.save_baselines(&snapshot).await {
                warn!(error = ?e, triggers = snapshot.len(), "failed to persist baselines");
            }
        }

        self.state = EngineState::Stopped;
        info!(source = self.source.name(), "stop price notify");
        Ok(())
    }

    fn expect_state(
        &self,
        expected: EngineState,
        action: &'static str,
    ) -> Result<(), Report<EngineError>> {
        if self.state != expected {
            return Err(Report::new(EngineError::InvalidState {
                state: self.state.as_str(),
                action,
            }));
        }
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // A running loop must not outlive its engine
        self.cancel.cancel();
    }
}
