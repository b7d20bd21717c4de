use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::SinkError;
use crate::model::Alert;
use crate::notifier::{AlertSink, format_message};

/// Writes alerts to the log instead of delivering them anywhere.
pub struct TerminalSink;

impl AlertSink for TerminalSink {
    fn notify<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, Result<(), Report<SinkError>>> {
        Box::pin(async move {
            tracing::warn!(
                token = %alert.token_name,
                kind = %alert.kind,
                direction = %alert.direction,
                baseline_price = alert.baseline_price,
                current_price = alert.current_price,
                deviation = alert.deviation.percent_thousandths,
                "ALERT: {}",
                format_message(alert),
            );
            Ok(())
        })
    }
}
