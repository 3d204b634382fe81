//! Slack failure notifications with the captured log attached.

use chrono::Utc;
use cloudnet_common::Config;
use reqwest::multipart::Form;
use reqwest::Client;
use tracing::{error, warn};

/// Where the failure originated; selects the alert label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSource {
    Data,
    Model,
    Pid,
    Wrapper,
    Img,
    Worker,
    FreezeCronjob,
    QcCronjob,
}

impl AlertSource {
    fn label(&self) -> &'static str {
        match self {
            AlertSource::Data => ":desktop_computer: Data processing",
            AlertSource::Model => ":earth_africa: Model processing",
            AlertSource::Pid => ":id: PID generation",
            AlertSource::Wrapper => ":fire: Main wrapper",
            AlertSource::Img => ":frame_with_picture: Image creation",
            AlertSource::Worker => ":construction_worker: Worker",
            AlertSource::FreezeCronjob => ":ice_cube: Freeze cronjob",
            AlertSource::QcCronjob => ":white_check_mark: QC cronjob",
        }
    }
}

/// Task context shown in the alert message.
#[derive(Debug, Clone, Default)]
pub struct AlertContext {
    pub site: Option<String>,
    pub date: Option<String>,
    pub product: Option<String>,
    pub model: Option<String>,
}

/// Send a notification to Slack. Failures to deliver are logged, never
/// propagated: alerting must not take down the worker.
pub async fn send_slack_alert(
    config: &Config,
    client: &Client,
    source: AlertSource,
    error_message: &str,
    log: Option<&str>,
    context: &AlertContext,
) {
    let (Some(token), Some(channel_id)) = (&config.slack_api_token, &config.slack_channel_id)
    else {
        warn!("Slack is not configured: no notification will be sent!");
        return;
    };

    let padding = " ".repeat(7);
    let mut msg = format!("*{}*\n\n", source.label());
    for (name, value) in [
        ("Site", &context.site),
        ("Date", &context.date),
        ("Product", &context.product),
        ("Model", &context.model),
    ] {
        if let Some(value) = value {
            msg.push_str(&format!("*{name}:* {value}{padding}"));
        }
    }
    msg.push_str(&format!("*Time:* {}\n\n", Utc::now().format("%Y-%m-%d %H:%M:%S")));
    msg.push_str(&format!("*Error:* {error_message}"));

    let form = Form::new()
        .text("content", log.unwrap_or("(empty log)").to_string())
        .text("channels", channel_id.clone())
        .text("title", "Full log")
        .text("initial_comment", msg);

    let result = client
        .post("https://slack.com/api/files.upload")
        .bearer_auth(token)
        .multipart(form)
        .send()
        .await;

    match result {
        Ok(response) => {
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            if body.get("ok").and_then(|v| v.as_bool()) != Some(true) {
                error!(response = %body, "Failed to send Slack notification");
            }
        }
        Err(err) => error!(error = %err, "Failed to send Slack notification"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_labels() {
        assert_eq!(AlertSource::Worker.label(), ":construction_worker: Worker");
        assert_eq!(AlertSource::Data.label(), ":desktop_computer: Data processing");
    }
}
