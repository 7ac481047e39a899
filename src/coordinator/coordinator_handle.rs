//! Consumer-facing entry point: validates the account, starts one session per
//! selected printer and answers state and command requests.
//!
//! # Lifecycle
//!
//! ```text
//! start(config) ──► check_credentials ──► list_printers ──► spawn sessions
//!                         │                    │
//!                         └──── SetupError ◄───┘
//!
//! reload(config) = prepare new printer set ──► shut down old sessions ──► spawn new ones
//! ```
//!
//! Setup failures (bad credentials, printer not on the account) surface as
//! [`SetupError`]. Once running, connection trouble is only visible through
//! [`Coordinator::is_available`] and [`Coordinator::session_status`].

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Span};

use crate::cloud::{AuthError, CloudAuthClient};
use crate::config::{BridgeConfig, ConfigError};
use crate::mqtt::config::SessionTimings;
use crate::mqtt::{
    Ack, MqttConnector, PrinterCommand, PublishError, SessionHandle, SessionParams, SessionStatus,
};
use crate::printer::{PrinterId, PrinterIdentity, PrinterState, PrinterStateCache};

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("cloud login failed: {0}")]
    Auth(#[from] AuthError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("no printers on the account")]
    NoPrinters,

    #[error("printer {0} is not on the account")]
    PrinterNotFound(PrinterId),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown printer {0}")]
    UnknownPrinter(PrinterId),

    #[error("no drying preset {0}")]
    UnknownPreset(usize),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Coordinator for all bridged printers
///
/// Owns the shared state cache and one [`SessionHandle`] per printer. State
/// queries are synchronous reads of the cache; commands go through the
/// printer's session.
pub struct Coordinator {
    config: BridgeConfig,
    cloud: Arc<dyn CloudAuthClient>,
    connector: Arc<dyn MqttConnector>,
    timings: SessionTimings,
    span: Span,
    cache: PrinterStateCache,
    sessions: HashMap<PrinterId, SessionHandle>,
}

impl Coordinator {
    /// Validate the account and start a session for every selected printer.
    ///
    /// Log output of all sessions is nested below `span`.
    pub async fn start(
        config: BridgeConfig,
        cloud: Arc<dyn CloudAuthClient>,
        connector: Arc<dyn MqttConnector>,
        span: Span,
    ) -> Result<Self, SetupError> {
        let printers = Self::prepare(&config, cloud.as_ref()).await?;
        let cache = PrinterStateCache::new(&printers);

        let mut coordinator = Self {
            config,
            cloud,
            connector,
            timings: SessionTimings::default(),
            span,
            cache,
            sessions: HashMap::new(),
        };
        coordinator.spawn_sessions(&printers);
        Ok(coordinator)
    }

    /// Checks that can fail a start or reload, without touching running sessions.
    async fn prepare(
        config: &BridgeConfig,
        cloud: &dyn CloudAuthClient,
    ) -> Result<Vec<PrinterIdentity>, SetupError> {
        config.validate()?;
        cloud.check_credentials().await?;

        let available = cloud.list_printers().await?;
        if available.is_empty() {
            return Err(SetupError::NoPrinters);
        }
        debug!("Account lists {} printers", available.len());

        config
            .printer_ids
            .iter()
            .map(|id| {
                available
                    .iter()
                    .find(|printer| printer.id == *id)
                    .cloned()
                    .ok_or(SetupError::PrinterNotFound(*id))
            })
            .collect()
    }

    fn spawn_sessions(&mut self, printers: &[PrinterIdentity]) {
        for printer in printers {
            let params = SessionParams {
                printer_id: printer.id,
                mode: self.config.connect_mode,
                scan_interval: self.config.scan_interval(),
                timings: self.timings,
                cloud: self.cloud.clone(),
                connector: self.connector.clone(),
                cache: self.cache.clone(),
            };
            info!(
                "Starting session for {} ({}) in {:?} mode",
                printer.name, printer.id, self.config.connect_mode
            );
            self.sessions
                .insert(printer.id, SessionHandle::spawn(params, &self.span));
        }
    }

    pub fn printer_ids(&self) -> Vec<PrinterId> {
        self.cache.printer_ids()
    }

    pub fn get_state(&self, printer_id: PrinterId) -> Option<PrinterState> {
        self.cache.get(printer_id)
    }

    /// Receiver that wakes on every change of the printer's state.
    pub fn subscribe(&self, printer_id: PrinterId) -> Option<watch::Receiver<PrinterState>> {
        self.cache.subscribe(printer_id)
    }

    /// False for unknown printers and while the session reports degraded data.
    pub fn is_available(&self, printer_id: PrinterId) -> bool {
        self.sessions
            .get(&printer_id)
            .is_some_and(SessionHandle::is_available)
    }

    pub fn session_status(&self, printer_id: PrinterId) -> Option<SessionStatus> {
        self.sessions.get(&printer_id).map(SessionHandle::status)
    }

    pub fn subscribe_session(&self, printer_id: PrinterId) -> Option<watch::Receiver<SessionStatus>> {
        self.sessions
            .get(&printer_id)
            .map(SessionHandle::subscribe_status)
    }

    pub async fn send_command(
        &self,
        printer_id: PrinterId,
        command: PrinterCommand,
    ) -> Result<Ack, CommandError> {
        let session = self
            .sessions
            .get(&printer_id)
            .ok_or(CommandError::UnknownPrinter(printer_id))?;
        let ack = session.publish(command).await?;
        if !ack.is_success() {
            warn!(
                "Printer {} answered {:?} with code {:?}: {:?}",
                printer_id, ack.kind, ack.code, ack.message
            );
        }
        Ok(ack)
    }

    /// Start drying box `box_id` with the configured preset at `preset_index`.
    pub async fn start_drying_preset(
        &self,
        printer_id: PrinterId,
        box_id: u32,
        preset_index: usize,
    ) -> Result<Ack, CommandError> {
        let preset = self
            .config
            .drying_preset(preset_index)
            .ok_or(CommandError::UnknownPreset(preset_index))?;
        self.send_command(printer_id, PrinterCommand::StartDrying { box_id, preset })
            .await
    }

    /// Drop the printer's link and connect again.
    pub async fn reconnect(&self, printer_id: PrinterId) -> Result<(), CommandError> {
        let session = self
            .sessions
            .get(&printer_id)
            .ok_or(CommandError::UnknownPrinter(printer_id))?;
        session
            .reconnect()
            .await
            .map_err(|_| CommandError::Publish(PublishError::NotConnected))
    }

    /// Apply a new configuration: drain every session and start over.
    ///
    /// The new configuration is checked first; on error the running sessions
    /// stay untouched. Cache subscriptions end with the reload, subscribe again
    /// afterwards.
    pub async fn reload(&mut self, config: BridgeConfig) -> Result<(), SetupError> {
        let printers = Self::prepare(&config, self.cloud.as_ref()).await?;
        info!("Reloading with {} printers", printers.len());

        self.shutdown().await;
        self.config = config;
        self.cache = PrinterStateCache::new(&printers);
        self.spawn_sessions(&printers);
        Ok(())
    }

    /// Tear down all sessions. Outstanding commands resolve as `NotConnected`.
    pub async fn shutdown(&mut self) {
        for (printer_id, mut session) in self.sessions.drain() {
            if let Err(e) = session.shutdown().await {
                error!("Session for printer {} ended badly: {}", printer_id, e);
            }
        }
        info!("All printer sessions stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::testing::ScriptedCloud;
    use crate::coordinator::lifecycle_policy::ConnectMode;
    use crate::mqtt::transport::testing::FakeConnector;
    use crate::mqtt::{ConnectionState, DryingPreset};
    use std::time::Duration;

    fn printers() -> Vec<PrinterIdentity> {
        vec![
            PrinterIdentity {
                id: PrinterId(42),
                name: "Kobra 3".to_string(),
            },
            PrinterIdentity {
                id: PrinterId(7),
                name: "Photon".to_string(),
            },
        ]
    }

    fn config(mode: ConnectMode, ids: &[u64]) -> BridgeConfig {
        BridgeConfig {
            connect_mode: mode,
            printer_ids: ids.iter().copied().map(PrinterId).collect(),
            drying_presets: vec![DryingPreset {
                duration_min: 240,
                temperature: 55,
            }],
            ..BridgeConfig::default()
        }
    }

    async fn start(
        config: BridgeConfig,
    ) -> (Result<Coordinator, SetupError>, ScriptedCloud, FakeConnector) {
        let cloud = ScriptedCloud::new(printers());
        let broker = FakeConnector::new();
        let coordinator = Coordinator::start(
            config,
            Arc::new(cloud.clone()),
            Arc::new(broker.clone()),
            Span::none(),
        )
        .await;
        (coordinator, cloud, broker)
    }

    async fn wait_ready(coordinator: &Coordinator, printer_id: PrinterId) {
        let mut status = coordinator.subscribe_session(printer_id).unwrap();
        status
            .wait_for(|status| status.connection_state == ConnectionState::Ready)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_login_is_setup_error() {
        let cloud = ScriptedCloud::new(printers());
        cloud.set_credentials(Err(AuthError::InvalidCredentials));
        let result = Coordinator::start(
            config(ConnectMode::Always, &[42]),
            Arc::new(cloud),
            Arc::new(FakeConnector::new()),
            Span::none(),
        )
        .await;
        assert!(matches!(
            result,
            Err(SetupError::Auth(AuthError::InvalidCredentials))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_printer_is_setup_error() {
        let (result, _, broker) = start(config(ConnectMode::Always, &[42, 99])).await;
        assert!(matches!(
            result,
            Err(SetupError::PrinterNotFound(PrinterId(99)))
        ));
        assert!(broker.attempts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_config_is_setup_error() {
        let mut bad = config(ConnectMode::Always, &[42]);
        bad.scan_interval_secs = 1;
        let (result, _, _) = start(bad).await;
        assert!(matches!(
            result,
            Err(SetupError::Config(ConfigError::ScanIntervalTooShort(1)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn state_flows_to_consumers() {
        let (coordinator, _, broker) = start(config(ConnectMode::Always, &[42])).await;
        let coordinator = coordinator.unwrap();
        assert_eq!(coordinator.printer_ids(), vec![PrinterId(42)]);
        wait_ready(&coordinator, PrinterId(42)).await;

        let mut updates = coordinator.subscribe(PrinterId(42)).unwrap();
        broker
            .inject(
                "anycubic/anycubicCloud/v1/printer/public/42/print/report",
                br#"{"type":"print","state":"printing","data":{"progress":12,"filename":"cube.gcode"}}"#,
            )
            .await;
        updates.changed().await.unwrap();

        let state = coordinator.get_state(PrinterId(42)).unwrap();
        assert!(state.is_printing());
        assert_eq!(state.job.progress_pct, 12);
        assert_eq!(state.name.as_deref(), Some("Kobra 3"));
        assert!(coordinator.is_available(PrinterId(42)));
        assert!(!coordinator.is_available(PrinterId(7)));
        assert_eq!(coordinator.get_state(PrinterId(7)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn commands_reach_the_right_session() {
        let (coordinator, _, broker) = start(config(ConnectMode::Always, &[42])).await;
        let coordinator = coordinator.unwrap();
        wait_ready(&coordinator, PrinterId(42)).await;

        assert_eq!(
            coordinator
                .send_command(PrinterId(7), PrinterCommand::QueryStatus)
                .await,
            Err(CommandError::UnknownPrinter(PrinterId(7)))
        );
        assert_eq!(
            coordinator.start_drying_preset(PrinterId(42), 0, 3).await,
            Err(CommandError::UnknownPreset(3))
        );

        let (outcome, _) = tokio::join!(coordinator.start_drying_preset(PrinterId(42), 1, 0), async {
            while broker.published().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            broker.ack_last(200).await
        });
        assert!(outcome.unwrap().is_success());

        let (topic, body) = &broker.published()[0];
        assert_eq!(topic, "anycubic/anycubicCloud/v1/app/42/multiColorBox");
        assert_eq!(body["data"]["id"], 1);
        assert_eq!(body["data"]["target_temp"], 55);
    }

    #[tokio::test(start_paused = true)]
    async fn reload_drains_and_reconnects() {
        let (coordinator, _, broker) = start(config(ConnectMode::Always, &[42])).await;
        let mut coordinator = coordinator.unwrap();
        wait_ready(&coordinator, PrinterId(42)).await;

        // A bad config leaves the running session alone.
        assert!(coordinator
            .reload(config(ConnectMode::Always, &[99]))
            .await
            .is_err());
        assert_eq!(
            coordinator.session_status(PrinterId(42)).unwrap().connection_state,
            ConnectionState::Ready
        );

        coordinator
            .reload(config(ConnectMode::Always, &[42, 7]))
            .await
            .unwrap();
        assert_eq!(broker.disconnects(), 1);
        wait_ready(&coordinator, PrinterId(42)).await;
        wait_ready(&coordinator, PrinterId(7)).await;
        assert_eq!(coordinator.printer_ids(), vec![PrinterId(7), PrinterId(42)]);
        assert_eq!(broker.attempts().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_every_session() {
        let (coordinator, _, _) = start(config(ConnectMode::Always, &[42, 7])).await;
        let mut coordinator = coordinator.unwrap();
        wait_ready(&coordinator, PrinterId(42)).await;
        wait_ready(&coordinator, PrinterId(7)).await;

        coordinator.shutdown().await;
        assert!(coordinator.session_status(PrinterId(42)).is_none());
        assert_eq!(
            coordinator
                .send_command(PrinterId(42), PrinterCommand::QueryStatus)
                .await,
            Err(CommandError::UnknownPrinter(PrinterId(42)))
        );
    }
}
