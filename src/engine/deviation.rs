use std::collections::HashMap;

use error_stack::{Report, bail};

use crate::error::EngineError;
use crate::model::{BaselineRecord, Deviation, Direction, TokenReading};

/// Deviation of `current` from `baseline` in thousandths of the baseline.
///
/// The division truncates toward zero so threshold comparisons are exact
/// integer comparisons.
pub fn evaluate(current: i64, baseline: i64) -> Result<Deviation, Report<EngineError>> {
    if baseline == 0 {
        bail!(EngineError::InvalidBaseline { baseline });
    }

    let sign = if current >= baseline {
        Direction::Up
    } else {
        Direction::Down
    };
    let diff = (i128::from(current) - i128::from(baseline)).abs();
    let thousandths = diff * 1000 / i128::from(baseline);

    Ok(Deviation {
        percent_thousandths: i64::try_from(thousandths).unwrap_or(i64::MAX),
        sign,
    })
}

/// Pick the candidate whose price is nearest to `reference`; the first one wins a tie.
pub fn closest_to<T>(
    candidates: impl IntoIterator<Item = T>,
    reference: i64,
    price: impl Fn(&T) -> i64,
) -> Option<T> {
    let mut best: Option<(i128, T)> = None;
    for candidate in candidates {
        let distance = (i128::from(price(&candidate)) - i128::from(reference)).abs();
        match &best {
            Some((best_distance, _)) if *best_distance <= distance => {}
            _ => best = Some((distance, candidate)),
        }
    }
    best.map(|(_, candidate)| candidate)
}

/// Group items by key, keeping groups in the order their key was first seen.
fn group_in_order<T>(items: Vec<T>, key: impl Fn(&T) -> &str) -> Vec<Vec<T>> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<T>> = Vec::new();
    for item in items {
        let k = key(&item).to_owned();
        match index.get(&k) {
            Some(&i) => groups[i].push(item),
            None => {
                index.insert(k, groups.len());
                groups.push(vec![item]);
            }
        }
    }
    groups
}

/// Reduce persisted baselines to one record per token: the one nearest the
/// token's live price.
pub fn reduce_baselines(records: Vec<BaselineRecord>) -> Vec<BaselineRecord> {
    group_in_order(records, |r| r.token_name.as_str())
        .into_iter()
        .filter_map(|group| {
            let reference = group.first()?.token_price;
            closest_to(group, reference, |r| r.price)
        })
        .collect()
}

/// Reduce a poll's readings to one per token.
///
/// Tokens with a known baseline keep the reading nearest that baseline;
/// unseen tokens keep their first reading.
pub fn reduce_readings(
    readings: Vec<TokenReading>,
    baseline_of: impl Fn(&str) -> Option<i64>,
) -> Vec<TokenReading> {
    group_in_order(readings, |r| r.name.as_str())
        .into_iter()
        .filter_map(|group| {
            let name = group.first()?.name.clone();
            match baseline_of(&name) {
                Some(baseline) => closest_to(group, baseline, |r| r.price),
                None => group.into_iter().next(),
            }
        })
        .collect()
}
