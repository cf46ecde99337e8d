//! Sender capability
//!
//! The dispatcher only ever talks to [`OutboundSender`]. The logging sender
//! stands in during development and for push delivery; the HTTP gateway
//! client carries real SMS traffic when credentials are configured.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use nightwatch_core::models::PushSubscription;

use crate::config::Config;

/// Outcome of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// Worth retrying (timeouts, 5xx, connection errors)
    Transient(String),
    /// Never retry (rejected payloads, gone endpoints)
    Permanent(String),
}

/// One outbound message
#[derive(Debug)]
pub enum Outbound<'a> {
    Sms {
        to: &'a str,
        body: &'a str,
    },
    Push {
        subscription: &'a PushSubscription,
        payload: &'a Value,
    },
}

/// Delivery capability used by the dispatcher
#[async_trait]
pub trait OutboundSender: Send + Sync {
    async fn send(&self, message: Outbound<'_>) -> SendOutcome;
}

/// Development sender: logs every message and reports success
pub struct LogSender;

#[async_trait]
impl OutboundSender for LogSender {
    async fn send(&self, message: Outbound<'_>) -> SendOutcome {
        match message {
            Outbound::Sms { to, body } => {
                tracing::info!("[log sender] SMS to {to}: {body}");
            }
            Outbound::Push {
                subscription,
                payload,
            } => {
                tracing::info!(
                    "[log sender] push to {} ({}): {payload}",
                    subscription.user_id,
                    subscription.endpoint,
                );
            }
        }
        SendOutcome::Delivered
    }
}

/// SMS via a JSON HTTP gateway; push still goes to the log
pub struct HttpSmsSender {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    from: Option<String>,
}

impl HttpSmsSender {
    pub fn new(url: String, token: Option<String>, from: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            token,
            from,
        }
    }
}

#[async_trait]
impl OutboundSender for HttpSmsSender {
    async fn send(&self, message: Outbound<'_>) -> SendOutcome {
        let Outbound::Sms { to, body } = message else {
            // Push transport is out of band; log it like the dev sender
            return LogSender.send(message).await;
        };

        let mut request = self.client.post(&self.url).json(&json!({
            "to": to,
            "message": body,
            "from": self.from,
        }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => SendOutcome::Delivered,
            Ok(response) if response.status().is_server_error() => {
                SendOutcome::Transient(format!("gateway returned {}", response.status()))
            }
            Ok(response) if response.status().as_u16() == 429 => {
                SendOutcome::Transient("gateway rate limited".to_string())
            }
            Ok(response) => SendOutcome::Permanent(format!("gateway rejected: {}", response.status())),
            // Connection errors and timeouts are worth another attempt
            Err(e) => SendOutcome::Transient(e.to_string()),
        }
    }
}

/// Select the sender implied by the configuration
pub fn build_sender(config: &Config) -> Arc<dyn OutboundSender> {
    match &config.sms_api_url {
        Some(url) => {
            tracing::info!("SMS transport: HTTP gateway at {url}");
            Arc::new(HttpSmsSender::new(
                url.clone(),
                config.sms_api_token.clone(),
                config.sms_from.clone(),
            ))
        }
        None => {
            tracing::info!("SMS transport not configured, using logging sender");
            Arc::new(LogSender)
        }
    }
}

#[cfg(test)]
pub mod test_support {
    //! Scripted senders for dispatcher tests

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails with a transient error a fixed number of times, then delivers
    pub struct FlakySender {
        failures_remaining: AtomicUsize,
        pub calls: AtomicUsize,
    }

    impl FlakySender {
        pub fn new(failures: usize) -> Self {
            Self {
                failures_remaining: AtomicUsize::new(failures),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl OutboundSender for FlakySender {
        async fn send(&self, _message: Outbound<'_>) -> SendOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
                SendOutcome::Transient("simulated gateway timeout".to_string())
            } else {
                SendOutcome::Delivered
            }
        }
    }

    /// Always reports a permanent failure
    pub struct GoneSender;

    #[async_trait]
    impl OutboundSender for GoneSender {
        async fn send(&self, _message: Outbound<'_>) -> SendOutcome {
            SendOutcome::Permanent("endpoint gone".to_string())
        }
    }
}
