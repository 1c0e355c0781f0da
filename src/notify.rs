use serde::Serialize;

use crate::Config;

#[derive(Serialize)]
struct WebhookMessage {
    content: String,
}

/// Best-effort announcement sink (a Discord-style webhook).
///
/// Messages are sent on a background task; failures are logged and dropped.
#[derive(Clone)]
pub struct Notifier {
    http_client: reqwest::Client,
    webhook_url: Option<String>,
    ping_role_id: Option<String>,
    pub(crate) base_url: String,
}

impl Notifier {
    pub fn from_config(config: &Config) -> Notifier {
        Notifier {
            http_client: reqwest::Client::new(),
            webhook_url: config.webhook_url.clone(),
            ping_role_id: config.ping_role_id.clone(),
            base_url: config.base_url.clone(),
        }
    }

    /// A notifier that only logs.
    pub fn disabled() -> Notifier {
        Notifier {
            http_client: reqwest::Client::new(),
            webhook_url: None,
            ping_role_id: None,
            base_url: "http://localhost:8080".to_owned(),
        }
    }

    pub fn link(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    pub fn notify(&self, text: impl Into<String>, urgent: bool) {
        let text = text.into();
        let Some(webhook_url) = self.webhook_url.clone() else {
            tracing::debug!(%text, "webhook not configured, dropping notification");
            return;
        };

        let content = match (&self.ping_role_id, urgent) {
            (Some(role), true) => format!("<@&{role}> {text}"),
            _ => text,
        };

        let http_client = self.http_client.clone();
        tokio::spawn(async move {
            let res = http_client
                .post(&webhook_url)
                .json(&WebhookMessage { content })
                .send()
                .await;

            match res {
                Ok(res) if res.status().is_success() => {}
                Ok(res) => {
                    let status = res.status();
                    let body = res.text().await.unwrap_or_default();
                    tracing::warn!(%status, %body, "could not send webhook message");
                }
                Err(err) => tracing::warn!(error = %err, "could not send webhook message"),
            }
        });
    }
}
