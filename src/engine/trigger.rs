use std::collections::HashMap;

use error_stack::{Report, bail};

use crate::engine::deviation::evaluate;
use crate::error::EngineError;
use crate::model::{Alert, AlertKind, BaselineRecord, Deviation, Direction, Trigger};

/// Hysteresis bands, in thousandths of the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// An armed trigger fires and disarms when the deviation is strictly above this.
    pub disarm_above: i64,
    /// A disarmed trigger fires and re-arms when the deviation is strictly below this.
    pub rearm_below: i64,
    /// Move the baseline to the breakout price when disarming.
    pub rebase_on_disarm: bool,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            disarm_above: 100,
            rearm_below: 20,
            rebase_on_disarm: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    None,
    Fire(Alert),
}

/// In-memory alert state for every tracked token.
///
/// Assumes a single writer; the engine serializes access.
#[derive(Debug)]
pub struct TriggerStore {
    thresholds: Thresholds,
    triggers: HashMap<String, Trigger>,
}

impl TriggerStore {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            triggers: HashMap::new(),
        }
    }

    /// Install a trigger from a persisted baseline.
    ///
    /// Saved arm state is restored as is. Rows without it start disarmed when
    /// the live price is already at or beyond the disarm cutoff, so no alert
    /// is raised for a move that happened while the service was down.
    pub fn seed(&mut self, record: &BaselineRecord) -> Result<(), Report<EngineError>> {
        if record.price <= 0 {
            bail!(EngineError::InvalidBaseline {
                baseline: record.price,
            });
        }
        let (direction, armed) = match record.state {
            Some(state) => (state.direction, state.armed),
            None => {
                let deviation = evaluate(record.token_price, record.price)?;
                (
                    deviation.sign,
                    deviation.percent_thousandths < self.thresholds.disarm_above,
                )
            }
        };
        self.triggers.insert(
            record.token_name.clone(),
            Trigger {
                token_name: record.token_name.clone(),
                baseline_price: record.price,
                direction,
                armed,
            },
        );
        Ok(())
    }

    /// Feed one price observation and decide whether it fires an alert.
    pub fn update(
        &mut self,
        token_name: &str,
        current_price: i64,
    ) -> Result<Decision, Report<EngineError>> {
        if current_price <= 0 {
            bail!(EngineError::InvalidBaseline {
                baseline: current_price,
            });
        }

        let Some(trigger) = self.triggers.get_mut(token_name) else {
            self.triggers.insert(
                token_name.to_owned(),
                Trigger {
                    token_name: token_name.to_owned(),
                    baseline_price: current_price,
                    direction: Direction::Up,
                    armed: true,
                },
            );
            return Ok(Decision::None);
        };

        let deviation = evaluate(current_price, trigger.baseline_price)?;

        if trigger.armed && deviation.percent_thousandths > self.thresholds.disarm_above {
            trigger.armed = false;
            if self.thresholds.rebase_on_disarm {
                trigger.baseline_price = current_price;
            }
            trigger.direction = deviation.sign;
            return Ok(Decision::Fire(alert(
                trigger,
                AlertKind::Breakout,
                current_price,
                deviation,
            )));
        }

        if !trigger.armed && deviation.percent_thousandths < self.thresholds.rearm_below {
            trigger.armed = true;
            return Ok(Decision::Fire(alert(
                trigger,
                AlertKind::Settled,
                current_price,
                deviation,
            )));
        }

        Ok(Decision::None)
    }

    #[cfg(test)]
    pub fn get(&self, token_name: &str) -> Option<&Trigger> {
        self.triggers.get(token_name)
    }

    pub fn baseline_of(&self, token_name: &str) -> Option<i64> {
        self.triggers.get(token_name).map(|t| t.baseline_price)
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    /// Every trigger, ordered by token name.
    pub fn snapshot(&self) -> Vec<Trigger> {
        let mut triggers: Vec<Trigger> = self.triggers.values().cloned().collect();
        triggers.sort_by(|a, b| a.token_name.cmp(&b.token_name));
        triggers
    }
}

fn alert(trigger: &Trigger, kind: AlertKind, current_price: i64, deviation: Deviation) -> Alert {
    Alert {
        token_name: trigger.token_name.clone(),
        kind,
        direction: trigger.direction,
        baseline_price: trigger.baseline_price,
        current_price,
        deviation,
    }
}
