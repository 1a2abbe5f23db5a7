//! Trusted sender registry.
//!
//! Each sender owns a path segment, the header its signature arrives in, and
//! a shared secret. Built once from configuration at startup.

use std::collections::HashMap;

use axum::http::HeaderMap;
use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

use crate::{
    config::SenderConfig,
    crypto::{verify_signature, ValidationResult},
};

/// A configured webhook sender.
#[derive(Debug, Clone)]
pub struct Sender {
    name: String,
    signature_header: String,
    secret: Option<SecretString>,
}

impl Sender {
    /// Creates a sender. A `None` secret refuses every request.
    pub fn new(
        name: impl Into<String>,
        signature_header: impl Into<String>,
        secret: Option<SecretString>,
    ) -> Self {
        Self {
            name: name.into(),
            signature_header: signature_header.into().to_ascii_lowercase(),
            secret,
        }
    }

    /// Path segment and log name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lowercase name of the signature header.
    pub fn signature_header(&self) -> &str {
        &self.signature_header
    }

    /// Whether a shared secret is configured.
    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    /// Verifies `raw_body` against the signature header in `headers`.
    pub fn verify_request(&self, headers: &HeaderMap, raw_body: &[u8]) -> ValidationResult {
        let Some(secret) = &self.secret else {
            return ValidationResult::invalid("no shared secret configured for sender");
        };

        let signature = match headers.get(self.signature_header.as_str()) {
            None => return ValidationResult::invalid("signature header missing"),
            Some(value) => match value.to_str() {
                Ok(signature) => signature,
                Err(_) => return ValidationResult::invalid("signature header is not ASCII"),
            },
        };

        verify_signature(raw_body, signature, secret.expose_secret())
    }
}

/// Senders keyed by name.
#[derive(Debug, Clone, Default)]
pub struct SenderRegistry {
    senders: HashMap<String, Sender>,
}

impl SenderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry from configuration, reading secrets from the
    /// environment.
    pub fn from_config(senders: &[SenderConfig]) -> Self {
        senders.iter().fold(Self::new(), |registry, config| {
            let secret = config.secret();
            if secret.is_none() {
                warn!(
                    sender = %config.name,
                    secret_env = %config.secret_env,
                    "shared secret not set, every request from this sender will be refused"
                );
            }
            registry.with(Sender::new(&config.name, &config.signature_header, secret))
        })
    }

    /// Adds `sender`, replacing one with the same name.
    #[must_use]
    pub fn with(mut self, sender: Sender) -> Self {
        self.senders.insert(sender.name.clone(), sender);
        self
    }

    /// Looks up a sender by name.
    pub fn get(&self, name: &str) -> Option<&Sender> {
        self.senders.get(name)
    }

    /// Configured sender names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.senders.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of senders.
    pub fn len(&self) -> usize {
        self.senders.len()
    }

    /// True when no sender is configured.
    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}
