pub mod terminal;
pub mod webhook;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::SinkError;
use crate::model::{Alert, AlertKind, format_price};

/// Sink for alert notifications.
pub trait AlertSink: Send + Sync {
    fn notify<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, Result<(), Report<SinkError>>>;
}

/// Human-readable alert text shared by every sink.
pub fn format_message(alert: &Alert) -> String {
    match alert.kind {
        AlertKind::Breakout => format!(
            "{} price is {} to {}",
            alert.token_name,
            alert.direction,
            format_price(alert.current_price)
        ),
        AlertKind::Settled => format!(
            "{} price settled back to {} (baseline {})",
            alert.token_name,
            format_price(alert.current_price),
            format_price(alert.baseline_price)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Deviation, Direction};

    fn alert(kind: AlertKind, direction: Direction, baseline: i64, current: i64) -> Alert {
        Alert {
            token_name: "BTC".into(),
            kind,
            direction,
            baseline_price: baseline,
            current_price: current,
            deviation: Deviation {
                percent_thousandths: 0,
                sign: direction,
            },
        }
    }

    #[test]
    fn breakout_message() {
        let a = alert(AlertKind::Breakout, Direction::Up, 111_00000000, 111_00000000);
        assert_eq!(format_message(&a), "BTC price is up to 111");

        let a = alert(AlertKind::Breakout, Direction::Down, 88_50000000, 88_50000000);
        assert_eq!(format_message(&a), "BTC price is down to 88.5");
    }

    #[test]
    fn settled_message() {
        let a = alert(AlertKind::Settled, Direction::Up, 100_00000000, 101_25000000);
        assert_eq!(
            format_message(&a),
            "BTC price settled back to 101.25 (baseline 100)"
        );
    }
}
