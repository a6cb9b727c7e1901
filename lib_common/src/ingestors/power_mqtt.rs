//! # Power Meter MQTT Ingestor
//!
//! Keeps one subscription to the meter topic and turns each message into a
//! `PowerSample` on the dispatcher channel.
//!
//! The rumqttc event loop reconnects by itself on the next `poll()`; this
//! module only paces those attempts with an exponential backoff, re-subscribes
//! on every `ConnAck`, and mirrors the transport status into the shared state.
//! A broker refusing the credentials parks the ingestor until shutdown.

use std::time::Duration;

use chrono::Utc;
use rumqttc::{AsyncClient, ConnectReturnCode, ConnectionError, Event, MqttOptions, Packet, QoS};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::configs::settings::MqttSettings;
use crate::core::model::{ConnectionState, PowerSample};
use crate::core::shared_state::SharedState;

/// A message that is not a power reading.
#[derive(Debug, Error, PartialEq)]
pub enum PayloadError {
    /// Payload bytes are not UTF-8.
    #[error("payload is not valid UTF-8")]
    NotUtf8,
    /// Neither `{"power": <number>}` nor a (quoted) number.
    #[error("unrecognized payload: {0}")]
    Unrecognized(String),
    /// NaN or infinite.
    #[error("power value is not finite")]
    NonFinite,
}

/// Parses `{"power": 1580.5}`, `1580.5` or `"1580.5"` into watts.
pub fn parse_power_payload(payload: &[u8]) -> Result<f64, PayloadError> {
    let text = std::str::from_utf8(payload).map_err(|_| PayloadError::NotUtf8)?.trim();
    let unrecognized = || PayloadError::Unrecognized(text.chars().take(64).collect());

    let watts = match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Object(map)) => map.get("power").and_then(serde_json::Value::as_f64).ok_or_else(unrecognized)?,
        Ok(serde_json::Value::Number(n)) => n.as_f64().ok_or_else(unrecognized)?,
        Ok(serde_json::Value::String(s)) => s.trim().parse::<f64>().map_err(|_| unrecognized())?,
        Ok(_) => return Err(unrecognized()),
        Err(_) => text.parse::<f64>().map_err(|_| unrecognized())?,
    };

    if watts.is_finite() {
        Ok(watts)
    } else {
        Err(PayloadError::NonFinite)
    }
}

/// Doubling delay with a cap.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// Starts at `initial`, never exceeds `max`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max, current: initial }
    }

    /// Delay to wait now; doubles the following one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Back to the initial delay.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

fn is_auth_refusal(code: ConnectReturnCode) -> bool {
    matches!(code, ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized)
}

/// The MQTT subscriber task.
pub struct PowerSubscriber {
    settings: MqttSettings,
    shared: SharedState,
    tx: mpsc::Sender<PowerSample>,
}

impl PowerSubscriber {
    /// Subscriber forwarding samples into `tx`.
    pub fn new(settings: MqttSettings, shared: SharedState, tx: mpsc::Sender<PowerSample>) -> Self {
        Self { settings, shared, tx }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.settings.client_id, &self.settings.host, self.settings.port);
        options.set_keep_alive(self.settings.keep_alive);
        options.set_clean_session(true);
        if let Some(user) = &self.settings.username {
            options.set_credentials(user, self.settings.password.clone().unwrap_or_default());
        }
        options
    }

    /// Parses one message and queues the sample. `false` once the dispatcher is gone.
    async fn forward(&self, payload: &[u8]) -> bool {
        match parse_power_payload(payload) {
            Ok(watts) => {
                let sample = PowerSample { watts, observed_at: Utc::now() };
                self.tx.send(sample).await.is_ok()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Dropping power message");
                true
            }
        }
    }

    /// Runs until `token` is cancelled or the dispatcher channel closes.
    pub async fn run(self, token: CancellationToken) {
        tracing::info!(host = %self.settings.host, port = self.settings.port, topic = %self.settings.topic, "Power subscriber starting");
        let (client, mut eventloop) = AsyncClient::new(self.options(), 10);
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));

        loop {
            let event = tokio::select! {
                _ = token.cancelled() => break,
                event = eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    backoff.reset();
                    // try_subscribe: the request is queued for this same event loop.
                    if let Err(e) = client.try_subscribe(&self.settings.topic, QoS::AtMostOnce) {
                        tracing::error!(error = %e, "Failed to queue subscription");
                    }
                    self.shared.set_connection(ConnectionState { connected: true, last_error: None });
                    tracing::info!(topic = %self.settings.topic, "Connected to MQTT broker");
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if !self.forward(&publish.payload).await {
                        tracing::info!("Sample channel closed");
                        break;
                    }
                }
                Ok(_) => {}
                Err(ConnectionError::ConnectionRefused(code)) if is_auth_refusal(code) => {
                    tracing::error!(?code, "MQTT broker rejected credentials, power feed parked");
                    self.shared.set_connection(ConnectionState {
                        connected: false,
                        last_error: Some(format!("authentication rejected: {code:?}")),
                    });
                    token.cancelled().await;
                    break;
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(error = %e, retry_in_secs = delay.as_secs(), "MQTT connection lost");
                    self.shared.set_connection(ConnectionState { connected: false, last_error: Some(e.to_string()) });
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        let _ = client.try_disconnect();
        tracing::info!("Power subscriber stopped");
    }
}
