//! Per-printer MQTT session with statum state machine
//!
//! Every configured printer gets one session task. The task owns the broker
//! link, feeds inbound frames through the topic router into the state cache and
//! publishes commands handed to it by its [`SessionHandle`].
//!
//! # State Machine
//!
//! ```text
//!                 ┌──────────── idle window elapsed ◄───────────┐
//!                 ▼                                             │
//! Disconnected ──► Connecting ──► Authenticating ──► Subscribing ──► Ready ──► Disconnecting
//!      ▲               │                │                 │           │              │
//!      │               └────────────────┴─────────────────┴───────────┤              │
//!      │                                   (any failure)               ▼              │
//!      └───────────────────────────── backoff ◄──────────────── Reconnecting          │
//!      └──────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `Disconnected` without a teardown request is the idle-closed phase: the
//! session polls the cloud for a coarse status every scan interval and opens
//! the link again once the lifecycle policy wants it open.

use chrono::{DateTime, Local};
use statum::{machine, state};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument, Span};

use super::command_publisher::{CommandOutcome, PendingCommands};
use super::commands::PrinterCommand;
use super::config::SessionTimings;
use super::error::{DecodeError, PublishError, SessionError};
use super::topic;
use super::topic_router;
use super::transport::{ConnAck, LinkClient, LinkEvent, MqttConnector, MqttLink};
use crate::cloud::CloudAuthClient;
use crate::coordinator::lifecycle_policy::{self, ConnectMode, LifecycleAction};
use crate::printer::{PrinterId, PrinterState, PrinterStateCache};

const REQUEST_CAPACITY: usize = 32;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Authenticating,
    Subscribing,
    Ready,
    Disconnecting,
    Reconnecting,
}

/// Session health as published to consumers.
#[derive(Clone, Debug, Default)]
pub struct SessionStatus {
    pub connection_state: ConnectionState,
    /// Consecutive expected updates that did not arrive.
    pub failed_update_count: u32,
    /// Data is stale or the link is failing; consumers show the printer as unavailable.
    pub degraded: bool,
    pub messages_received: usize,
    pub messages_sent: usize,
    pub last_activity: Option<DateTime<Local>>,
    pub last_error: Option<String>,
}

/// Reconnect delays: short for the first attempts, then the long delay.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    short: Duration,
    long: Duration,
    short_attempts: u32,
    failures: u32,
}

impl ReconnectBackoff {
    pub fn new(timings: &SessionTimings) -> Self {
        Self {
            short: timings.reconnect_short,
            long: timings.reconnect_long,
            short_attempts: timings.reconnect_short_attempts,
            failures: 0,
        }
    }

    /// Record a failure and return the delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        if self.failures <= self.short_attempts {
            self.short
        } else {
            self.long
        }
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[derive(Debug)]
enum SessionRequest {
    Publish {
        correlation_id: String,
        command: PrinterCommand,
    },
    Reconnect,
}

/// Everything a session task is started with.
#[derive(Clone)]
pub struct SessionParams {
    pub printer_id: PrinterId,
    pub mode: ConnectMode,
    pub scan_interval: Duration,
    pub timings: SessionTimings,
    pub cloud: Arc<dyn CloudAuthClient>,
    pub connector: Arc<dyn MqttConnector>,
    pub cache: PrinterStateCache,
}

struct SessionContext {
    params: SessionParams,
    pending: PendingCommands,
    status: watch::Sender<SessionStatus>,
    requests: mpsc::Receiver<SessionRequest>,
    cancel: CancellationToken,
    backoff: ReconnectBackoff,
    last_activity: Instant,
    received_since_tick: bool,
}

impl SessionContext {
    fn printer_id(&self) -> PrinterId {
        self.params.printer_id
    }

    fn set_state(&self, state: ConnectionState) {
        debug!("Printer {} session -> {:?}", self.printer_id(), state);
        self.status.send_modify(|status| status.connection_state = state);
    }

    fn printer_state(&self) -> PrinterState {
        self.params
            .cache
            .get(self.printer_id())
            .unwrap_or_else(|| PrinterState::new(self.printer_id(), None))
    }

    fn tick_interval(&self) -> Duration {
        lifecycle_policy::tick_interval(
            &self.printer_state(),
            self.params.scan_interval,
            self.params.timings.high_frequency_interval,
        )
    }

    fn touch_activity(&mut self) {
        self.last_activity = Instant::now();
        self.status
            .send_modify(|status| status.last_activity = Some(Local::now()));
    }

    fn record_update(&self) {
        self.status.send_modify(|status| {
            status.failed_update_count = 0;
            status.degraded = false;
        });
    }

    fn record_missed_update(&self) {
        let max = self.params.timings.max_failed_updates;
        let printer_id = self.printer_id();
        self.status.send_modify(|status| {
            status.failed_update_count = status.failed_update_count.saturating_add(1);
            if status.failed_update_count > max && !status.degraded {
                status.degraded = true;
                warn!(
                    "Printer {} missed {} expected updates, data is stale",
                    printer_id, status.failed_update_count
                );
            }
        });
    }

    fn record_failure(&self, error: &SessionError) {
        self.status.send_modify(|status| {
            status.degraded = true;
            status.last_error = Some(error.to_string());
        });
    }

    /// Route one inbound frame. Bad frames are logged and leave everything untouched.
    async fn handle_inbound(&mut self, topic: &str, payload: &[u8]) {
        let event = match topic_router::route(topic, payload) {
            Ok(event) => event,
            Err(DecodeError::UnknownTopic(topic)) => {
                debug!("Ignoring frame on unknown topic {}", topic);
                return;
            }
            Err(e) => {
                warn!("Dropping frame on {}: {}", topic, e);
                return;
            }
        };

        if !self.params.cache.apply(self.printer_id(), &event) {
            return;
        }
        if let Some(correlation_id) = self.pending.resolve(&event).await {
            debug!("Frame on {} resolved command {}", topic, correlation_id);
        }

        self.received_since_tick = true;
        self.status
            .send_modify(|status| status.messages_received += 1);
        self.record_update();
        self.touch_activity();
    }

    async fn publish(
        &mut self,
        client: &dyn LinkClient,
        correlation_id: &str,
        command: PrinterCommand,
    ) -> Result<(), SessionError> {
        if !self.pending.contains(correlation_id).await {
            debug!("Command {} resolved before publishing, skipped", correlation_id);
            return Ok(());
        }

        let task_id = self.printer_state().job.task_id;
        let command = command.with_task_id(task_id.as_deref());
        let topic = topic::publish_topic(self.printer_id(), command.kind().as_str());
        let payload = command.to_json(correlation_id).to_string().into_bytes();

        match client.publish(&topic, payload).await {
            Ok(()) => {
                debug!("Published {} {} as {}", topic, command.action(), correlation_id);
                self.status.send_modify(|status| status.messages_sent += 1);
                self.touch_activity();
                Ok(())
            }
            Err(e) => {
                self.pending
                    .fail(correlation_id, PublishError::NotConnected)
                    .await;
                Err(e)
            }
        }
    }

    /// Answer a request that arrived while no link is usable.
    async fn reject(&self, request: SessionRequest) {
        if let SessionRequest::Publish { correlation_id, .. } = request {
            self.pending
                .fail(&correlation_id, PublishError::NotConnected)
                .await;
        }
    }

    /// Poll the cloud while idle-closed. `None` when the poll failed or teardown started.
    async fn poll_cloud(&mut self) -> Option<LifecycleAction> {
        let cloud = self.params.cloud.clone();
        let printer_id = self.printer_id();
        let polled = tokio::select! {
            _ = self.cancel.cancelled() => return None,
            polled = cloud.printer_info(printer_id) => polled,
        };

        match polled {
            Ok(snapshot) => {
                self.params.cache.apply_snapshot(printer_id, &snapshot);
                self.record_update();
                let action = lifecycle_policy::evaluate(self.params.mode, &self.printer_state());
                debug!("Printer {} cloud status {:?} -> {:?}", printer_id, snapshot, action);
                Some(action)
            }
            Err(e) => {
                warn!("Cloud status poll for printer {} failed: {}", printer_id, e);
                self.record_missed_update();
                None
            }
        }
    }

    /// Lifecycle tick while ready. Returns true when the session should close idle.
    async fn on_tick(&mut self) -> bool {
        let now = Instant::now();
        let purged = self.pending.purge_expired(now).await;
        if purged > 0 {
            debug!("Purged {} expired commands", purged);
        }

        let state = self.printer_state();
        if state.in_high_frequency_phase() && !self.received_since_tick {
            self.record_missed_update();
        }
        self.received_since_tick = false;

        let idle_for = now.saturating_duration_since(self.last_activity);
        idle_for >= self.params.timings.idle_disconnect
            && lifecycle_policy::evaluate(self.params.mode, &state)
                == LifecycleAction::AllowIdleDisconnect
    }
}

/// States for the printer session using statum
#[state]
#[derive(Debug, Clone)]
enum SessionPhase {
    Disconnected,
    Connecting,
    Authenticating,
    Subscribing,
    Ready,
    Disconnecting,
    Reconnecting,
}

#[machine]
struct PrinterSession<S: SessionPhase> {
    ctx: SessionContext,
    link: Option<MqttLink>,
    conn_ack: Option<ConnAck>,
}

type Failed = (PrinterSession<Reconnecting>, SessionError);

enum ServeOutcome {
    Idle(PrinterSession<Disconnecting>),
    Reconnect(PrinterSession<Disconnecting>),
    Teardown(PrinterSession<Disconnecting>),
    Lost(PrinterSession<Reconnecting>, SessionError),
}

impl<S: SessionPhase> PrinterSession<S> {
    /// Next handshake event before `deadline`; inbound frames are routed on the way.
    /// `Ok(None)` when the deadline passed.
    async fn next_link_event(&mut self, deadline: Instant) -> Result<Option<LinkEvent>, SessionError> {
        let Some(link) = self.link.as_mut() else {
            return Err(SessionError::Dropped("no broker link".to_string()));
        };
        loop {
            let event = tokio::select! {
                biased;
                _ = self.ctx.cancel.cancelled() => return Err(SessionError::Cancelled),
                event = link.events.recv() => event,
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            };
            match event {
                Some(LinkEvent::Message { topic, payload }) => {
                    self.ctx.handle_inbound(&topic, &payload).await
                }
                Some(LinkEvent::Dropped(reason)) => return Err(SessionError::Dropped(reason)),
                Some(event) => return Ok(Some(event)),
                None => return Err(SessionError::Dropped("broker link closed".to_string())),
            }
        }
    }
}

impl PrinterSession<Disconnected> {
    fn create(ctx: SessionContext) -> Self {
        Self::new(ctx, None, None)
    }

    /// Idle-closed phase. Returns false once teardown was requested.
    async fn wait_until_needed(&mut self, first_poll: Instant) -> bool {
        self.ctx.set_state(ConnectionState::Disconnected);
        let mut next_poll = first_poll;

        loop {
            tokio::select! {
                biased;
                _ = self.ctx.cancel.cancelled() => return false,
                request = self.ctx.requests.recv() => match request {
                    Some(SessionRequest::Reconnect) => {
                        info!("Reconnect requested for idle printer {}", self.ctx.printer_id());
                        return true;
                    }
                    Some(request) => self.ctx.reject(request).await,
                    None => {
                        self.ctx.cancel.cancel();
                        return false;
                    }
                },
                _ = tokio::time::sleep_until(next_poll) => {
                    next_poll = Instant::now() + self.ctx.params.scan_interval;
                    if self.ctx.poll_cloud().await == Some(LifecycleAction::KeepConnected) {
                        info!("Printer {} needs a live session", self.ctx.printer_id());
                        return true;
                    }
                }
            }
        }
    }

    async fn connect(mut self) -> Result<PrinterSession<Connecting>, Failed> {
        self.ctx.set_state(ConnectionState::Connecting);
        let cloud = self.ctx.params.cloud.clone();
        let connector = self.ctx.params.connector.clone();
        let printer_id = self.ctx.printer_id();

        let opened = tokio::select! {
            _ = self.ctx.cancel.cancelled() => Err(SessionError::Cancelled),
            opened = open_link(cloud.as_ref(), connector.as_ref(), printer_id) => opened,
        };

        match opened {
            Ok(link) => {
                self.link = Some(link);
                Ok(self.transition())
            }
            Err(e) => Err((self.transition(), e)),
        }
    }

    async fn finish(self) {
        let cancelled = self.ctx.pending.fail_all(PublishError::NotConnected).await;
        self.ctx.set_state(ConnectionState::Disconnected);
        info!(
            "Session for printer {} stopped, {} pending commands cancelled",
            self.ctx.printer_id(),
            cancelled
        );
    }
}

async fn open_link(
    cloud: &dyn CloudAuthClient,
    connector: &dyn MqttConnector,
    printer_id: PrinterId,
) -> Result<MqttLink, SessionError> {
    let credentials = cloud.check_credentials().await?;
    connector.connect(printer_id, &credentials).await
}

impl PrinterSession<Connecting> {
    /// Wait for the broker's CONNACK.
    async fn on_connected(mut self) -> Result<PrinterSession<Authenticating>, Failed> {
        let timeout = self.ctx.params.timings.message_timeout;
        let deadline = Instant::now() + timeout;

        loop {
            match self.next_link_event(deadline).await {
                Ok(Some(LinkEvent::ConnAck(ack))) => {
                    self.conn_ack = Some(ack);
                    self.ctx.set_state(ConnectionState::Authenticating);
                    return Ok(self.transition());
                }
                Ok(Some(other)) => debug!("Ignoring {:?} before CONNACK", other),
                Ok(None) => {
                    let error = SessionError::Connect(format!("no CONNACK within {:?}", timeout));
                    return Err((self.transition(), error));
                }
                Err(e) => return Err((self.transition(), e)),
            }
        }
    }
}

impl PrinterSession<Authenticating> {
    /// Check the CONNACK and request the printer's subscriptions.
    async fn on_authenticated(mut self) -> Result<PrinterSession<Subscribing>, Failed> {
        match self.conn_ack.take() {
            Some(ConnAck::Accepted) => {}
            Some(ConnAck::Refused(reason)) => {
                return Err((self.transition(), SessionError::Auth(reason)));
            }
            None => {
                let error = SessionError::Connect("CONNACK missing".to_string());
                return Err((self.transition(), error));
            }
        }

        let topics = topic::subscription_topics(self.ctx.printer_id());
        let requested = match self.link.as_ref() {
            Some(link) => link.client.subscribe(&topics).await,
            None => Err(SessionError::Dropped("no broker link".to_string())),
        };

        match requested {
            Ok(()) => {
                debug!("Subscribing to {:?}", topics);
                self.ctx.set_state(ConnectionState::Subscribing);
                Ok(self.transition())
            }
            Err(e) => Err((self.transition(), e)),
        }
    }
}

impl PrinterSession<Subscribing> {
    /// Wait for the SUBACK of both subscriptions.
    async fn on_subscribed(mut self) -> Result<PrinterSession<Ready>, Failed> {
        let timeout = self.ctx.params.timings.subscribe_timeout;
        let deadline = Instant::now() + timeout;

        loop {
            match self.next_link_event(deadline).await {
                Ok(Some(LinkEvent::SubAck { success: true })) => {
                    self.ctx.backoff.reset();
                    self.ctx.set_state(ConnectionState::Ready);
                    self.ctx.touch_activity();
                    return Ok(self.transition());
                }
                Ok(Some(LinkEvent::SubAck { success: false })) => {
                    let topics = topic::subscription_topics(self.ctx.printer_id()).join(", ");
                    return Err((self.transition(), SessionError::SubscribeRejected(topics)));
                }
                Ok(Some(other)) => debug!("Ignoring {:?} before SUBACK", other),
                Ok(None) => {
                    return Err((self.transition(), SessionError::SubscribeTimeout(timeout)));
                }
                Err(e) => return Err((self.transition(), e)),
            }
        }
    }
}

impl PrinterSession<Ready> {
    /// Main loop of a live session. Runs until the link is lost, the session
    /// goes idle, or a reconnect or teardown is requested.
    async fn serve(mut self) -> ServeOutcome {
        let printer_id = self.ctx.printer_id();
        info!("Session ready for printer {}", printer_id);

        let Some(mut link) = self.link.take() else {
            let error = SessionError::Dropped("no broker link".to_string());
            return ServeOutcome::Lost(self.transition(), error);
        };
        // A fresh session gets one tick of grace before updates count as missed.
        self.ctx.received_since_tick = true;
        let mut next_tick = Instant::now() + self.ctx.tick_interval();

        loop {
            tokio::select! {
                biased;
                _ = self.ctx.cancel.cancelled() => {
                    self.link = Some(link);
                    return ServeOutcome::Teardown(self.transition());
                }
                event = link.events.recv() => match event {
                    Some(LinkEvent::Message { topic, payload }) => {
                        self.ctx.handle_inbound(&topic, &payload).await;
                        next_tick = next_tick.min(Instant::now() + self.ctx.tick_interval());
                    }
                    Some(LinkEvent::Dropped(reason)) => {
                        return ServeOutcome::Lost(self.transition(), SessionError::Dropped(reason));
                    }
                    Some(other) => debug!("Ignoring {:?} while ready", other),
                    None => {
                        let error = SessionError::Dropped("broker link closed".to_string());
                        return ServeOutcome::Lost(self.transition(), error);
                    }
                },
                request = self.ctx.requests.recv() => match request {
                    Some(SessionRequest::Publish { correlation_id, command }) => {
                        if let Err(e) = self.ctx.publish(link.client.as_ref(), &correlation_id, command).await {
                            error!("Publishing to printer {} failed: {}", printer_id, e);
                            return ServeOutcome::Lost(self.transition(), e);
                        }
                    }
                    Some(SessionRequest::Reconnect) => {
                        info!("Reconnect requested for printer {}", printer_id);
                        self.link = Some(link);
                        return ServeOutcome::Reconnect(self.transition());
                    }
                    None => {
                        self.ctx.cancel.cancel();
                        self.link = Some(link);
                        return ServeOutcome::Teardown(self.transition());
                    }
                },
                _ = tokio::time::sleep_until(next_tick) => {
                    if self.ctx.on_tick().await {
                        info!(
                            "No activity for {:?} on printer {}, closing idle session",
                            self.ctx.params.timings.idle_disconnect, printer_id
                        );
                        self.link = Some(link);
                        return ServeOutcome::Idle(self.transition());
                    }
                    next_tick = Instant::now() + self.ctx.tick_interval();
                }
            }
        }
    }
}

impl PrinterSession<Disconnecting> {
    async fn close(mut self) -> PrinterSession<Disconnected> {
        self.ctx.set_state(ConnectionState::Disconnecting);
        if let Some(link) = self.link.take() {
            if let Err(e) = link.client.disconnect().await {
                debug!("Disconnect of printer {} failed: {}", self.ctx.printer_id(), e);
            }
        }
        self.ctx.pending.fail_all(PublishError::NotConnected).await;
        self.ctx.set_state(ConnectionState::Disconnected);
        self.transition()
    }
}

impl PrinterSession<Reconnecting> {
    /// Drop the link and sleep out the backoff. Cut short by teardown or an
    /// explicit reconnect request.
    async fn wait_backoff(mut self, error: SessionError) -> PrinterSession<Disconnected> {
        self.link = None;
        self.conn_ack = None;
        self.ctx.set_state(ConnectionState::Reconnecting);
        self.ctx.pending.fail_all(PublishError::NotConnected).await;

        if matches!(error, SessionError::Cancelled) {
            return self.transition();
        }

        let delay = self.ctx.backoff.next_delay();
        warn!(
            "Printer {} session failed ({}), attempt {} in {:?}",
            self.ctx.printer_id(),
            error,
            self.ctx.backoff.failures() + 1,
            delay
        );
        self.ctx.record_failure(&error);

        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                biased;
                _ = self.ctx.cancel.cancelled() => break,
                request = self.ctx.requests.recv() => match request {
                    Some(SessionRequest::Reconnect) => break,
                    Some(request) => self.ctx.reject(request).await,
                    None => {
                        self.ctx.cancel.cancel();
                        break;
                    }
                },
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }
        self.transition()
    }
}

async fn establish(session: PrinterSession<Disconnected>) -> Result<PrinterSession<Ready>, Failed> {
    session
        .connect()
        .await?
        .on_connected()
        .await?
        .on_authenticated()
        .await?
        .on_subscribed()
        .await
}

async fn run_session(ctx: SessionContext) {
    let mut connect_now = ctx.params.mode == ConnectMode::Always;
    let scan_interval = ctx.params.scan_interval;
    let mut first_poll = Instant::now();
    let mut session = PrinterSession::create(ctx);

    loop {
        if session.ctx.cancel.is_cancelled() {
            break;
        }
        if !connect_now && !session.wait_until_needed(first_poll).await {
            break;
        }

        session = match establish(session).await {
            Ok(ready) => match ready.serve().await {
                ServeOutcome::Idle(closing) => {
                    connect_now = false;
                    first_poll = Instant::now() + scan_interval;
                    closing.close().await
                }
                ServeOutcome::Reconnect(closing) | ServeOutcome::Teardown(closing) => {
                    connect_now = true;
                    closing.close().await
                }
                ServeOutcome::Lost(reconnecting, error) => {
                    connect_now = true;
                    reconnecting.wait_backoff(error).await
                }
            },
            Err((reconnecting, error)) => {
                connect_now = true;
                reconnecting.wait_backoff(error).await
            }
        };
    }

    session.finish().await;
}

/// Handle for one printer session running in a tokio task
///
/// Cloning is not supported; the coordinator owns exactly one handle per
/// printer. Dropping the handle ends the session as well.
#[derive(Debug)]
pub struct SessionHandle {
    pub printer_id: PrinterId,
    requests: mpsc::Sender<SessionRequest>,
    status: watch::Receiver<SessionStatus>,
    pending: PendingCommands,
    cancel: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Spawns the session task as a child of `parent`.
    pub fn spawn(params: SessionParams, parent: &Span) -> Self {
        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_CAPACITY);
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());
        let pending = PendingCommands::new(params.timings.message_timeout);
        let cancel = CancellationToken::new();
        let printer_id = params.printer_id;

        let ctx = SessionContext {
            backoff: ReconnectBackoff::new(&params.timings),
            params,
            pending: pending.clone(),
            status: status_tx,
            requests: requests_rx,
            cancel: cancel.clone(),
            last_activity: Instant::now(),
            received_since_tick: false,
        };

        let span = tracing::info_span!(parent: parent, "printer_session", %printer_id);
        let task_handle = tokio::spawn(run_session(ctx).instrument(span));
        info!("Session task spawned for printer {}", printer_id);

        Self {
            printer_id,
            requests: requests_tx,
            status: status_rx,
            pending,
            cancel,
            task_handle: Some(task_handle),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    pub fn is_available(&self) -> bool {
        !self.status.borrow().degraded
    }

    /// Publish `command` and wait for its acknowledgement.
    ///
    /// Fails right away with `NotConnected` unless the session is `Ready`, without
    /// leaving a pending entry behind.
    pub async fn publish(&self, command: PrinterCommand) -> CommandOutcome {
        let ready = self.status.borrow().connection_state == ConnectionState::Ready;
        if !ready || self.cancel.is_cancelled() {
            return Err(PublishError::NotConnected);
        }

        let ticket = self.pending.register(command.kind()).await;
        let request = SessionRequest::Publish {
            correlation_id: ticket.correlation_id.clone(),
            command,
        };
        if self.requests.send(request).await.is_err() {
            self.pending
                .fail(&ticket.correlation_id, PublishError::NotConnected)
                .await;
        }
        self.pending.wait(ticket).await
    }

    /// Drop the link and connect again right away.
    pub async fn reconnect(&self) -> Result<(), SessionError> {
        self.requests
            .send(SessionRequest::Reconnect)
            .await
            .map_err(|_| SessionError::Cancelled)
    }

    /// Tear the session down and wait for its task.
    pub async fn shutdown(&mut self) -> Result<(), SessionError> {
        debug!("Shutting down session for printer {}", self.printer_id);
        self.cancel.cancel();

        match self.task_handle.take() {
            Some(handle) => handle.await.map_err(|e| {
                error!("Session task for printer {} panicked: {}", self.printer_id, e);
                SessionError::Task(e.to_string())
            }),
            None => {
                debug!("Session already shut down: {}", self.printer_id);
                Ok(())
            }
        }
    }
}
