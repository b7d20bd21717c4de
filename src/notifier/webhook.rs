use std::sync::Arc;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::WebhookConfig;
use crate::error::SinkError;
use crate::model::Alert;
use crate::notifier::{AlertSink, format_message};

#[derive(Debug, Serialize)]
struct TextMessage<'a> {
    msgtype: &'static str,
    text: TextContent<'a>,
    at: Mention,
}

#[derive(Debug, Serialize)]
struct TextContent<'a> {
    content: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Mention {
    is_at_all: bool,
}

#[derive(Debug, Deserialize)]
struct RobotResponse {
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

/// Posts alerts as text messages to a DingTalk-style robot webhook.
///
/// When disabled the JSON envelope is logged instead of sent.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
    access_token: String,
    enabled: bool,
    at_all: bool,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl WebhookSink {
    pub fn from_config(config: &WebhookConfig) -> Result<Self, Report<SinkError>> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .change_context(SinkError::Transport)?;

        // DingTalk custom robots accept at most 20 messages per minute
        let quota = Quota::per_minute(nonzero!(20u32));
        Ok(Self {
            client,
            url: config.url.clone(),
            access_token: config.access_token.clone(),
            enabled: config.enabled,
            at_all: config.at_all,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    async fn post(&self, message: &TextMessage<'_>) -> Result<(), Report<SinkError>> {
        self.rate_limiter.until_ready().await;

        let response = self
            .client
            .post(&self.url)
            .query(&[("access_token", self.access_token.as_str())])
            .json(message)
            .send()
            .await
            .change_context(SinkError::Transport)
            .attach_with(|| format!("url: {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Report::new(SinkError::DeliveryFailed {
                code: i64::from(status.as_u16()),
                message: body,
            }));
        }

        let result: RobotResponse = response
            .json()
            .await
            .change_context(SinkError::Transport)
            .attach("unexpected robot response body")?;

        if result.errcode != 0 {
            return Err(Report::new(SinkError::DeliveryFailed {
                code: result.errcode,
                message: result.errmsg,
            }));
        }

        debug!(errmsg = %result.errmsg, "webhook accepted alert");
        Ok(())
    }
}

fn envelope(content: &str, at_all: bool) -> TextMessage<'_> {
    TextMessage {
        msgtype: "text",
        text: TextContent { content },
        at: Mention { is_at_all: at_all },
    }
}

impl AlertSink for WebhookSink {
    fn notify<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, Result<(), Report<SinkError>>> {
        Box::pin(async move {
            let content = format_message(alert);
            let message = envelope(&content, self.at_all);

            if !self.enabled {
                let json = serde_json::to_string(&message).change_context(SinkError::Transport)?;
                info!(token = %alert.token_name, "webhook disabled, alert: {json}");
                return Ok(());
            }

            self.post(&message)
                .await
                .attach_with(|| format!("token: {}", alert.token_name))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlertKind, Deviation, Direction};
    use mockito::Matcher;
    use serde_json::json;

    fn config(url: String, enabled: bool) -> WebhookConfig {
        WebhookConfig {
            url,
            access_token: "secret".into(),
            enabled,
            at_all: true,
            timeout_secs: 5,
        }
    }

    fn breakout() -> Alert {
        Alert {
            token_name: "BTC".into(),
            kind: AlertKind::Breakout,
            direction: Direction::Up,
            baseline_price: 111_00000000,
            current_price: 111_00000000,
            deviation: Deviation {
                percent_thousandths: 110,
                sign: Direction::Up,
            },
        }
    }

    #[test]
    fn envelope_matches_robot_text_format() {
        let value = serde_json::to_value(envelope("hello", true)).unwrap();
        assert_eq!(
            value,
            json!({
                "msgtype": "text",
                "text": { "content": "hello" },
                "at": { "isAtAll": true }
            })
        );
    }

    #[tokio::test]
    async fn posts_text_message_with_access_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/robot/send")
            .match_query(Matcher::UrlEncoded("access_token".into(), "secret".into()))
            .match_body(Matcher::PartialJson(json!({
                "msgtype": "text",
                "text": { "content": "BTC price is up to 111" }
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"errcode":0,"errmsg":"ok"}"#)
            .create_async()
            .await;

        let sink = WebhookSink::from_config(&config(format!("{}/robot/send", server.url()), true))
            .unwrap();
        sink.notify(&breakout()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_zero_errcode_is_delivery_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/robot/send")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"errcode":310000,"errmsg":"keywords not in content"}"#)
            .create_async()
            .await;

        let sink = WebhookSink::from_config(&config(format!("{}/robot/send", server.url()), true))
            .unwrap();
        let err = sink.notify(&breakout()).await.unwrap_err();
        match err.current_context() {
            SinkError::DeliveryFailed { code, message } => {
                assert_eq!(*code, 310000);
                assert_eq!(message, "keywords not in content");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn http_error_status_is_delivery_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/robot/send")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("unavailable")
            .create_async()
            .await;

        let sink = WebhookSink::from_config(&config(format!("{}/robot/send", server.url()), true))
            .unwrap();
        let err = sink.notify(&breakout()).await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            SinkError::DeliveryFailed { code: 503, .. }
        ));
    }

    #[tokio::test]
    async fn disabled_sink_does_not_send() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let sink = WebhookSink::from_config(&config(server.url(), false)).unwrap();
        sink.notify(&breakout()).await.unwrap();
        mock.assert_async().await;
    }
}
