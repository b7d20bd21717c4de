//! Fakes shared by the engine and scheduler tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::engine::scheduler::Clock;
use crate::error::{SinkError, SourceError};
use crate::model::{Alert, BaselineRecord, TokenReading, Trigger};
use crate::notifier::AlertSink;
use crate::source::PriceSource;

pub enum Step {
    Prices(Vec<TokenReading>),
    Fail,
    Panic,
}

impl Step {
    pub fn prices(prices: &[(&str, i64)]) -> Self {
        Self::Prices(readings(prices))
    }
}

fn readings(prices: &[(&str, i64)]) -> Vec<TokenReading> {
    prices
        .iter()
        .map(|&(name, price)| TokenReading {
            name: name.into(),
            price,
            timestamp: 0,
        })
        .collect()
}

/// Plays back one step per `get_tokens` call, then reports `NoData`
/// (or repeats a fixed set of prices forever).
pub struct ScriptedSource {
    steps: Mutex<VecDeque<Step>>,
    repeat: Option<Vec<TokenReading>>,
    /// `None` makes the startup baseline load fail.
    baselines: Option<Vec<BaselineRecord>>,
    pub calls: AtomicUsize,
    pub saved: Mutex<Option<Vec<Trigger>>>,
}

impl ScriptedSource {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            repeat: None,
            baselines: Some(Vec::new()),
            calls: AtomicUsize::new(0),
            saved: Mutex::new(None),
        }
    }

    pub fn repeating(prices: &[(&str, i64)]) -> Self {
        Self {
            repeat: Some(readings(prices)),
            ..Self::new(Vec::new())
        }
    }

    pub fn with_baselines(mut self, baselines: Vec<BaselineRecord>) -> Self {
        self.baselines = Some(baselines);
        self
    }

    pub fn with_broken_baselines(mut self) -> Self {
        self.baselines = None;
        self
    }
}

impl PriceSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn get_tokens(&self) -> BoxFuture<'_, Result<Vec<TokenReading>, Report<SourceError>>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(readings) = &self.repeat {
                return Ok(readings.clone());
            }

            // Release the lock before a scripted panic so the mutex is not poisoned
            let step = self.steps.lock().unwrap().pop_front();
            match step {
                Some(Step::Prices(readings)) => Ok(readings),
                Some(Step::Fail) => Err(Report::new(SourceError::Unavailable)),
                Some(Step::Panic) => panic!("scripted source panic"),
                None => Err(Report::new(SourceError::NoData)),
            }
        })
    }

    fn get_persisted_baselines(
        &self,
    ) -> BoxFuture<'_, Result<Vec<BaselineRecord>, Report<SourceError>>> {
        Box::pin(async move {
            self.baselines
                .clone()
                .ok_or_else(|| Report::new(SourceError::Unavailable))
        })
    }

    fn save_baselines(&self, triggers: &[Trigger]) -> BoxFuture<'_, Result<(), Report<SourceError>>> {
        let triggers = triggers.to_vec();
        Box::pin(async move {
            *self.saved.lock().unwrap() = Some(triggers);
            Ok(())
        })
    }
}

#[derive(Default)]
pub struct RecordingSink {
    alerts: Mutex<Vec<Alert>>,
    fail: bool,
}

impl RecordingSink {
    /// Records every alert but reports each delivery as failed.
    pub fn failing() -> Self {
        Self {
            alerts: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }
}

impl AlertSink for RecordingSink {
    fn notify<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, Result<(), Report<SinkError>>> {
        Box::pin(async move {
            self.alerts.lock().unwrap().push(alert.clone());
            if self.fail {
                return Err(Report::new(SinkError::DeliveryFailed {
                    code: 500,
                    message: "recording sink set to fail".into(),
                }));
            }
            Ok(())
        })
    }
}

/// Returns `start`, `start + 1`, ... on successive reads.
pub struct StepClock {
    next: AtomicI64,
}

impl StepClock {
    pub fn new(start: i64) -> Self {
        Self {
            next: AtomicI64::new(start),
        }
    }

    pub fn peek(&self) -> i64 {
        self.next.load(Ordering::SeqCst)
    }
}

impl Clock for StepClock {
    fn now_unix(&self) -> i64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
