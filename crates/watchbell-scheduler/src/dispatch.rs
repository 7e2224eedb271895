//! Notification dispatch: concrete `Notifier` implementations.
//! Supports: generic HTTP webhook (JSON POST) and a log-only notifier.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use watchbell_core::config::NotifyConfig;
use watchbell_core::error::{Result, WatchbellError};
use watchbell_core::traits::{DeliveryReceipt, Notifier};
use watchbell_core::types::Strategy;

/// Recipients reached by one send: one channel post for broadcast, one
/// mention per target otherwise.
pub fn delivered_count(targets: &[String], strategy: Strategy) -> usize {
    match strategy {
        Strategy::Broadcast => 1,
        Strategy::Targeted => targets.len(),
    }
}

/// POSTs each reminder as JSON to a webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    headers: Vec<(String, String)>,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, headers: Vec<(String, String)>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            headers,
            timeout,
        }
    }

    /// `None` when no webhook is configured.
    pub fn from_config(config: &NotifyConfig) -> Option<Self> {
        let url = config.webhook_url.as_deref().filter(|u| !u.is_empty())?;
        Some(Self::new(url, config.headers.clone(), config.timeout()))
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(
        &self,
        container_id: &str,
        targets: &[String],
        strategy: Strategy,
    ) -> Result<DeliveryReceipt> {
        let mut req = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({
                "container_id": container_id,
                "strategy": strategy,
                "targets": targets,
                "sent_at": Utc::now().to_rfc3339(),
            }))
            .timeout(self.timeout);

        for (key, value) in &self.headers {
            req = req.header(key.as_str(), value.as_str());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| WatchbellError::delivery(format!("Webhook send failed: {e}")))?;

        if resp.status().is_success() {
            tracing::info!(
                "✅ Webhook reminder sent to {} ({}, {} targets)",
                container_id,
                strategy,
                targets.len()
            );
            Ok(DeliveryReceipt {
                delivered: delivered_count(targets, strategy),
            })
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(WatchbellError::delivery(format!("Webhook error {status}: {body}")))
        }
    }
}

/// Logs reminders instead of sending them. Never fails.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(
        &self,
        container_id: &str,
        targets: &[String],
        strategy: Strategy,
    ) -> Result<DeliveryReceipt> {
        match strategy {
            Strategy::Broadcast => tracing::info!("📢 [{}] reminder for everyone", container_id),
            Strategy::Targeted => {
                tracing::info!("📢 [{}] reminder for {}", container_id, targets.join(", "))
            }
        }
        Ok(DeliveryReceipt {
            delivered: delivered_count(targets, strategy),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivered_count() {
        let targets = vec!["a".to_string(), "b".to_string()];
        assert_eq!(delivered_count(&[], Strategy::Broadcast), 1);
        assert_eq!(delivered_count(&targets, Strategy::Targeted), 2);
    }

    #[test]
    fn test_from_config_requires_url() {
        assert!(WebhookNotifier::from_config(&NotifyConfig::default()).is_none());
        let config = NotifyConfig {
            webhook_url: Some("http://127.0.0.1:9/hook".into()),
            ..NotifyConfig::default()
        };
        assert!(WebhookNotifier::from_config(&config).is_some());
    }

    #[tokio::test]
    async fn test_log_notifier_always_delivers() {
        let receipt = LogNotifier
            .send("chan-1", &["a".to_string()], Strategy::Targeted)
            .await
            .unwrap();
        assert_eq!(receipt.delivered, 1);
    }

    #[tokio::test]
    async fn test_webhook_unreachable_is_delivery_error() {
        // Port 9 (discard) on loopback refuses connections.
        let notifier = WebhookNotifier::new(
            "http://127.0.0.1:9/hook",
            vec![],
            Duration::from_secs(2),
        );
        let err = notifier.send("chan-1", &[], Strategy::Broadcast).await.unwrap_err();
        assert!(matches!(err, WatchbellError::Delivery(_)));
    }
}
