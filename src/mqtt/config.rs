use std::time::Duration;

use rumqttc::{MqttOptions, Transport};

use crate::cloud::MqttCredentials;

pub const MQTT_HOST: &str = "mqtt-universe.anycubic.com";
pub const MQTT_PORT: u16 = 8883;

/// Idle window after which a session may be closed (20 minutes).
pub const MQTT_IDLE_DISCONNECT: Duration = Duration::from_secs(60 * 20);
pub const MQTT_SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(15);
pub const MQTT_MESSAGE_TIMEOUT: Duration = Duration::from_secs(30);
pub const MQTT_RECONNECT_SHORT: Duration = Duration::from_secs(5);
pub const MQTT_RECONNECT_LONG: Duration = Duration::from_secs(20);
/// Consecutive failures that still use the short reconnect delay.
pub const MQTT_RECONNECT_SHORT_ATTEMPTS: u32 = 3;

pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(60);
/// Tick used while a job or a drying cycle is running.
pub const MQTT_SCAN_INTERVAL: Duration = Duration::from_secs(5);
pub const MAX_FAILED_UPDATES: u32 = 3;

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const LINK_CAPACITY: usize = 100;

/// Protocol timings copied into every session.
///
/// Always built from the constants above; the struct only exists so a session
/// carries its timings by value instead of reaching for globals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimings {
    pub idle_disconnect: Duration,
    pub subscribe_timeout: Duration,
    pub message_timeout: Duration,
    pub reconnect_short: Duration,
    pub reconnect_long: Duration,
    pub reconnect_short_attempts: u32,
    pub max_failed_updates: u32,
    pub high_frequency_interval: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            idle_disconnect: MQTT_IDLE_DISCONNECT,
            subscribe_timeout: MQTT_SUBSCRIBE_TIMEOUT,
            message_timeout: MQTT_MESSAGE_TIMEOUT,
            reconnect_short: MQTT_RECONNECT_SHORT,
            reconnect_long: MQTT_RECONNECT_LONG,
            reconnect_short_attempts: MQTT_RECONNECT_SHORT_ATTEMPTS,
            max_failed_updates: MAX_FAILED_UPDATES,
            high_frequency_interval: MQTT_SCAN_INTERVAL,
        }
    }
}

/// Channel capacity between the rumqttc client and its event loop.
pub fn link_capacity() -> usize {
    LINK_CAPACITY
}

/// Builds the rumqttc options for the fixed cloud broker.
///
/// The broker only accepts TLS, so the transport always uses the default
/// rustls configuration with the platform root certificates.
pub fn mqtt_options(credentials: &MqttCredentials) -> MqttOptions {
    let mut mqtt_options = MqttOptions::new(credentials.client_id.clone(), MQTT_HOST, MQTT_PORT);
    mqtt_options
        .set_credentials(credentials.username.clone(), credentials.password.clone())
        .set_keep_alive(KEEP_ALIVE)
        .set_clean_session(true)
        .set_transport(Transport::tls_with_default_config());
    mqtt_options
}
