//! Outbound notification collaborator.
//!
//! Handlers send order, appointment, and trial confirmations through
//! `Notifier`. `GatewayNotifier` posts to an SMS/WhatsApp gateway's
//! `/send/message` endpoint; `LogNotifier` only logs, for deployments
//! without a gateway.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{debug, info, info_span, Instrument};

use crate::error::NotifyError;

const MAX_ERROR_BODY: usize = 512;

/// Sends a text message to a phone number.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync + std::fmt::Debug {
    /// Delivers `message` to `destination`.
    async fn send(&self, destination: &str, message: &str) -> Result<(), NotifyError>;
}

/// Gateway connection settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Gateway API root, e.g. `https://api.ng.termii.com/api`.
    pub base_url: String,
    /// API key sent in the request body.
    pub api_key: SecretString,
    /// Registered sender id.
    pub sender_id: String,
    /// Delivery channel, `whatsapp` or `generic`.
    pub channel: String,
    /// Request timeout.
    pub timeout: Duration,
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    to: &'a str,
    from: &'a str,
    sms: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    channel: &'a str,
    api_key: &'a str,
}

/// Notifier backed by an HTTP messaging gateway.
#[derive(Debug, Clone)]
pub struct GatewayNotifier {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl GatewayNotifier {
    /// Builds the notifier and its HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError::Configuration` if the HTTP client cannot be built.
    pub fn new(config: GatewayConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("tollgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NotifyError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/send/message", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait::async_trait]
impl Notifier for GatewayNotifier {
    async fn send(&self, destination: &str, message: &str) -> Result<(), NotifyError> {
        let to = normalize_phone(destination)?;
        let span = info_span!("gateway_send", to = %to, channel = %self.config.channel);

        async {
            let request = SendMessageRequest {
                to: &to,
                from: &self.config.sender_id,
                sms: message,
                kind: "plain",
                channel: &self.config.channel,
                api_key: self.config.api_key.expose_secret(),
            };

            let response = self
                .client
                .post(self.endpoint())
                .json(&request)
                .send()
                .await
                .map_err(|e| NotifyError::Transport(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let mut body = response.text().await.unwrap_or_default();
                body.truncate(floor_char_boundary(&body, MAX_ERROR_BODY));
                return Err(NotifyError::Rejected { status: status.as_u16(), body });
            }

            debug!(status = status.as_u16(), "message accepted by gateway");
            Ok(())
        }
        .instrument(span)
        .await
    }
}

/// Notifier that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, destination: &str, message: &str) -> Result<(), NotifyError> {
        let to = normalize_phone(destination)?;
        info!(
            to = %to,
            chars = message.chars().count(),
            "notification not sent, no gateway configured"
        );
        Ok(())
    }
}

/// Normalizes a phone number to the gateway's digits-only form.
///
/// Strips a `whatsapp:` prefix, the leading `+`, and spaces or dashes.
///
/// # Errors
///
/// Returns `NotifyError::InvalidDestination` if anything but digits remains.
pub fn normalize_phone(destination: &str) -> Result<String, NotifyError> {
    let trimmed = destination.trim();
    let without_prefix = trimmed.strip_prefix("whatsapp:").unwrap_or(trimmed);
    let digits: String =
        without_prefix.chars().filter(|c| !matches!(c, '+' | ' ' | '-')).collect();

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(NotifyError::InvalidDestination(destination.to_string()));
    }
    Ok(digits)
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    (0..=max).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}
