//! Error types of the MQTT session.

use std::time::Duration;
use thiserror::Error;

use crate::cloud::AuthError;

/// Connection-level failures. All of them are retried by the session's backoff
/// loop; consumers only ever see them as the availability flag.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Network or TLS failure while opening or holding the session.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The broker refused the credentials.
    #[error("broker rejected credentials: {0}")]
    Auth(String),

    /// The cloud client could not hand out credentials.
    #[error("could not obtain credentials: {0}")]
    Credentials(#[from] AuthError),

    #[error("subscribe not acknowledged within {0:?}")]
    SubscribeTimeout(Duration),

    #[error("subscribe rejected for {0}")]
    SubscribeRejected(String),

    /// The established session went away.
    #[error("session dropped: {0}")]
    Dropped(String),

    /// Teardown was requested while the step was in flight.
    #[error("session torn down")]
    Cancelled,

    #[error("session task failed: {0}")]
    Task(String),
}

/// Inbound frames that could not be turned into a domain event. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Outcome of a command that did not get acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("printer session is not connected")]
    NotConnected,

    #[error("no acknowledgement within {0:?}")]
    Timeout(Duration),
}
