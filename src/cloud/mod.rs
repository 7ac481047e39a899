//! # Cloud account access
//!
//! The coordinator needs three things from the vendor cloud: credentials for
//! the MQTT broker, the list of printers on the account, and a coarse printer
//! status while a session is idle-closed. [`CloudAuthClient`] is that seam.
//!
//! The REST client itself lives outside this crate. [`StaticCloudClient`]
//! answers from the local configuration and is what the daemon uses.

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::printer::{PrinterId, PrinterIdentity, PrinterSnapshot};

/// Credentials for the cloud MQTT broker.
#[derive(Clone, PartialEq, Eq)]
pub struct MqttCredentials {
    pub client_id: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for MqttCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttCredentials")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("cloud rejected the account credentials")]
    InvalidCredentials,

    #[error("cloud unreachable: {0}")]
    Connectivity(String),
}

#[async_trait]
pub trait CloudAuthClient: Send + Sync {
    /// Validate the account and hand out broker credentials.
    async fn check_credentials(&self) -> Result<MqttCredentials, AuthError>;

    /// Printers owned by the account.
    async fn list_printers(&self) -> Result<Vec<PrinterIdentity>, AuthError>;

    /// Coarse status used while no MQTT session is open.
    async fn printer_info(&self, printer_id: PrinterId) -> Result<PrinterSnapshot, AuthError>;
}

/// Cloud client backed by the local configuration.
///
/// It knows the printers it was configured with and reports them as online
/// without job details, so only the `always` and `device_online` connect modes
/// open sessions on their own.
#[derive(Debug, Clone)]
pub struct StaticCloudClient {
    credentials: MqttCredentials,
    printers: Vec<PrinterIdentity>,
}

impl StaticCloudClient {
    pub fn new(credentials: MqttCredentials, printers: Vec<PrinterIdentity>) -> Self {
        Self {
            credentials,
            printers,
        }
    }
}

#[async_trait]
impl CloudAuthClient for StaticCloudClient {
    async fn check_credentials(&self) -> Result<MqttCredentials, AuthError> {
        if self.credentials.username.is_empty() || self.credentials.password.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(self.credentials.clone())
    }

    async fn list_printers(&self) -> Result<Vec<PrinterIdentity>, AuthError> {
        Ok(self.printers.clone())
    }

    async fn printer_info(&self, printer_id: PrinterId) -> Result<PrinterSnapshot, AuthError> {
        debug!("Static status for printer {}", printer_id);
        let known = self.printers.iter().any(|printer| printer.id == printer_id);
        Ok(PrinterSnapshot {
            online: known,
            job_status: None,
            drying_active: None,
        })
    }
}

#[cfg(test)]
pub mod testing {
    //! Cloud client whose answers tests can change while sessions run.

    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    pub struct ScriptedCloud {
        inner: Arc<Mutex<Script>>,
    }

    #[derive(Debug)]
    struct Script {
        credentials: Result<MqttCredentials, AuthError>,
        printers: Vec<PrinterIdentity>,
        snapshot: Result<PrinterSnapshot, AuthError>,
        polls: usize,
    }

    pub fn credentials() -> MqttCredentials {
        MqttCredentials {
            client_id: "bridge-test".to_string(),
            username: "user".to_string(),
            password: "secret".to_string(),
        }
    }

    impl ScriptedCloud {
        pub fn new(printers: Vec<PrinterIdentity>) -> Self {
            Self {
                inner: Arc::new(Mutex::new(Script {
                    credentials: Ok(credentials()),
                    printers,
                    snapshot: Ok(PrinterSnapshot {
                        online: true,
                        ..PrinterSnapshot::default()
                    }),
                    polls: 0,
                })),
            }
        }

        pub fn set_credentials(&self, credentials: Result<MqttCredentials, AuthError>) {
            self.inner.lock().unwrap().credentials = credentials;
        }

        pub fn set_snapshot(&self, snapshot: Result<PrinterSnapshot, AuthError>) {
            self.inner.lock().unwrap().snapshot = snapshot;
        }

        pub fn polls(&self) -> usize {
            self.inner.lock().unwrap().polls
        }
    }

    #[async_trait]
    impl CloudAuthClient for ScriptedCloud {
        async fn check_credentials(&self) -> Result<MqttCredentials, AuthError> {
            self.inner.lock().unwrap().credentials.clone()
        }

        async fn list_printers(&self) -> Result<Vec<PrinterIdentity>, AuthError> {
            Ok(self.inner.lock().unwrap().printers.clone())
        }

        async fn printer_info(&self, _printer_id: PrinterId) -> Result<PrinterSnapshot, AuthError> {
            let mut script = self.inner.lock().unwrap();
            script.polls += 1;
            script.snapshot.clone()
        }
    }
}
