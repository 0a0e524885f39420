//! Chat webhook notifications.
//!
//! Payloads use the Slack-compatible attachment format accepted by
//! Mattermost incoming webhooks. Success reports go to the notifications
//! hook, failures to the alerts hook.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};

use dbscale_core::config::{ENV_ALERTS_HOOK, ENV_ENVIRONMENT};
use dbscale_core::{ConfigError, ScalerConfig};
use dbscale_engine::{Notifier, ScalingReport};

pub const USERNAME: &str = "Database Factory";
pub const SUCCESS_TITLE: &str = "Vertical scaling was successfully handled";
pub const CONFIG_ERROR_TITLE: &str = "The database vertical scaling could not start";
pub const ICON_URL: &str = "https://img.favpng.com/13/4/25/factory-logo-industry-computer-icons-png-favpng-BTgC49vrFrF2SmJZZywXwfL2s.jpg";

const SUCCESS_COLOR: &str = "#006400";
const FAILURE_COLOR: &str = "#FF0000";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Source marker header expected by the receiving webhooks.
const SOURCE_HEADER: (&str, &str) = ("X-Custom-Header", "aws-sns");

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Payload {
    pub username: String,
    pub icon_url: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Attachment {
    pub color: String,
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Field {
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub value: String,
    pub short: bool,
}

impl Field {
    fn heading(title: &str) -> Self {
        Self {
            title: title.to_string(),
            value: String::new(),
            short: false,
        }
    }

    fn short(title: &str, value: impl Into<String>) -> Self {
        Self {
            title: title.to_string(),
            value: value.into(),
            short: true,
        }
    }
}

fn payload(color: &str, fields: Vec<Field>) -> Payload {
    Payload {
        username: USERNAME.to_string(),
        icon_url: ICON_URL.to_string(),
        attachments: vec![Attachment {
            color: color.to_string(),
            fields,
        }],
    }
}

/// Green report of a completed scaling step.
pub fn success_payload(report: &ScalingReport, environment: &str) -> Payload {
    payload(
        SUCCESS_COLOR,
        vec![
            Field::heading(SUCCESS_TITLE),
            Field::short("DBInstanceIdentifier", report.instance_id.as_str()),
            Field::short("DBClusterIdentifier", report.cluster_id.as_str()),
            Field::short("UpgradedDBClass", report.new_class.as_str()),
            Field::short("IsClusterWriter", report.is_writer.to_string()),
            Field::short("Environment", environment),
        ],
    )
}

/// Red report of a failed invocation.
pub fn failure_payload(title: &str, error: &str, environment: &str) -> Payload {
    payload(
        FAILURE_COLOR,
        vec![
            Field::heading(title),
            Field {
                title: "Error Message".to_string(),
                value: error.to_string(),
                short: false,
            },
            Field::short("Environment", environment),
        ],
    )
}

/// Post a payload to a webhook.
pub async fn post(client: &Client, url: &str, payload: &Payload) -> Result<()> {
    debug!(%url, "posting webhook notification");
    let response = client
        .post(url)
        .header("Content-Type", "application/json")
        .header(SOURCE_HEADER.0, SOURCE_HEADER.1)
        .json(payload)
        .timeout(REQUEST_TIMEOUT)
        .send()
        .await
        .with_context(|| format!("failed to send webhook request to {url}"))?;

    let status = response.status();
    if !status.is_success() {
        bail!("webhook {url} answered {status}");
    }
    Ok(())
}

/// Report a configuration failure to the alerts hook found through
/// `lookup`. Returns whether an alert was sent; nothing is sent when the
/// hook itself is unset.
pub async fn report_config_error<F>(client: &Client, lookup: F, error: &ConfigError) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(hook) = lookup(ENV_ALERTS_HOOK).filter(|h| !h.trim().is_empty()) else {
        return Ok(false);
    };
    let environment = lookup(ENV_ENVIRONMENT).unwrap_or_default();
    let payload = failure_payload(CONFIG_ERROR_TITLE, &error.to_string(), &environment);
    post(client, &hook, &payload)
        .await
        .context("failed to send configuration alert")?;
    Ok(true)
}

/// Notifier posting to the configured webhooks.
pub struct WebhookNotifier {
    client: Client,
    environment: String,
    notifications_hook: String,
    alerts_hook: String,
}

impl WebhookNotifier {
    pub fn new(config: &ScalerConfig) -> Self {
        Self {
            client: Client::new(),
            environment: config.environment.clone(),
            notifications_hook: config.notifications_hook.clone(),
            alerts_hook: config.alerts_hook.clone(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_success(&self, report: &ScalingReport) -> Result<()> {
        let payload = success_payload(report, &self.environment);
        post(&self.client, &self.notifications_hook, &payload)
            .await
            .context("failed to send success notification")?;
        info!(instance = %report.instance_id, "success notification sent");
        Ok(())
    }

    async fn notify_failure(&self, title: &str, error: &str) -> Result<()> {
        let payload = failure_payload(title, error, &self.environment);
        post(&self.client, &self.alerts_hook, &payload)
            .await
            .context("failed to send error notification")?;
        info!("error notification sent");
        Ok(())
    }
}
