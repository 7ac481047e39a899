//! Acknowledgement tracking for outbound commands.
//!
//! Every published command owns one [`PendingCommand`] entry keyed by its
//! correlation id. Whoever removes the entry from the table delivers the
//! outcome: the acknowledgement path, the caller's own deadline, the session's
//! purge of abandoned entries, or teardown. Removal happens under the table
//! lock, so exactly one of them wins.
//!
//! Correlation is by `msgid` when the printer echoes it. Replies without a
//! `msgid` on the app direction resolve the oldest pending command of the same
//! kind; this is best effort and can pair a reply with the wrong command when
//! two commands of one kind are in flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::error::PublishError;
use super::payload::MessageKind;
use super::topic::TopicDirection;
use super::topic_router::DomainEvent;

pub type CommandOutcome = Result<Ack, PublishError>;

/// Acknowledgement frame matched to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub correlation_id: String,
    pub kind: MessageKind,
    pub action: Option<String>,
    pub state: Option<String>,
    pub code: Option<i64>,
    pub message: Option<String>,
}

impl Ack {
    /// Printer accepted the command. Frames without a code count as accepted.
    pub fn is_success(&self) -> bool {
        self.code.map_or(true, |code| code == 200)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Pending,
    Acked,
    TimedOut,
}

#[derive(Debug)]
pub struct PendingCommand {
    pub correlation_id: String,
    pub kind: MessageKind,
    pub sent_at: Instant,
    pub timeout_deadline: Instant,
    pub resolution: Resolution,
    responder: Option<oneshot::Sender<CommandOutcome>>,
}

impl PendingCommand {
    fn deliver(&mut self, resolution: Resolution, outcome: CommandOutcome) {
        self.resolution = resolution;
        if let Some(responder) = self.responder.take() {
            // Receiver gone means the caller stopped waiting.
            let _ = responder.send(outcome);
        }
    }
}

/// Registered command waiting for its outcome.
#[derive(Debug)]
pub struct PendingTicket {
    pub correlation_id: String,
    pub deadline: Instant,
    receiver: oneshot::Receiver<CommandOutcome>,
}

/// Pending-command table shared between the session task and command callers.
#[derive(Debug, Clone)]
pub struct PendingCommands {
    entries: Arc<Mutex<HashMap<String, PendingCommand>>>,
    timeout: Duration,
}

impl PendingCommands {
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    /// Record a command about to be published.
    pub async fn register(&self, kind: MessageKind) -> PendingTicket {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let sent_at = Instant::now();
        let deadline = sent_at + self.timeout;
        let (tx, rx) = oneshot::channel();

        self.entries.lock().await.insert(
            correlation_id.clone(),
            PendingCommand {
                correlation_id: correlation_id.clone(),
                kind,
                sent_at,
                timeout_deadline: deadline,
                resolution: Resolution::Pending,
                responder: Some(tx),
            },
        );
        debug!("Registered pending {:?} command {}", kind, correlation_id);

        PendingTicket {
            correlation_id,
            deadline,
            receiver: rx,
        }
    }

    /// Wait for the ticket's outcome; on deadline the entry is removed and
    /// the caller gets `Timeout` unless another path removed it first.
    pub async fn wait(&self, ticket: PendingTicket) -> CommandOutcome {
        let PendingTicket {
            correlation_id,
            deadline,
            mut receiver,
        } = ticket;

        tokio::select! {
            biased;
            outcome = &mut receiver => outcome.unwrap_or(Err(PublishError::NotConnected)),
            _ = tokio::time::sleep_until(deadline) => {
                if self.expire(&correlation_id).await {
                    warn!("Command {} timed out after {:?}", correlation_id, self.timeout);
                    Err(PublishError::Timeout(self.timeout))
                } else {
                    // Resolved while the timer fired; the outcome is already sent.
                    receiver.await.unwrap_or(Err(PublishError::NotConnected))
                }
            }
        }
    }

    /// Remove the entry as timed out. False when it was already resolved.
    pub async fn expire(&self, correlation_id: &str) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.remove(correlation_id) {
            Some(mut entry) => {
                entry.deliver(Resolution::TimedOut, Err(PublishError::Timeout(self.timeout)));
                true
            }
            None => false,
        }
    }

    /// Resolve the pending command an inbound frame acknowledges, if any.
    /// Returns the correlation id of the resolved command.
    pub async fn resolve(&self, event: &DomainEvent) -> Option<String> {
        let mut entries = self.entries.lock().await;

        let key = match &event.correlation_id {
            Some(id) if entries.contains_key(id) => id.clone(),
            Some(id) => {
                debug!("No pending command for msgid {} (late or foreign ack)", id);
                return None;
            }
            None if event.direction == TopicDirection::App => entries
                .values()
                .filter(|entry| entry.kind == event.kind)
                .min_by_key(|entry| entry.sent_at)
                .map(|entry| entry.correlation_id.clone())?,
            None => return None,
        };

        let mut entry = entries.remove(&key)?;
        let ack = Ack {
            correlation_id: key.clone(),
            kind: event.kind,
            action: event.action.clone(),
            state: event.state.clone(),
            code: event.code,
            message: event.message.clone(),
        };
        entry.deliver(Resolution::Acked, Ok(ack));
        debug!("Command {} acknowledged", key);
        Some(key)
    }

    /// Drop entries whose caller stopped waiting and whose deadline passed.
    pub async fn purge_expired(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock().await;
        let expired: Vec<String> = entries
            .values()
            .filter(|entry| entry.timeout_deadline <= now)
            .map(|entry| entry.correlation_id.clone())
            .collect();
        for id in &expired {
            if let Some(mut entry) = entries.remove(id) {
                entry.deliver(Resolution::TimedOut, Err(PublishError::Timeout(self.timeout)));
            }
        }
        expired.len()
    }

    /// Resolve everything with `error` (teardown, failed publish).
    pub async fn fail_all(&self, error: PublishError) -> usize {
        let mut entries = self.entries.lock().await;
        let count = entries.len();
        for (_, mut entry) in entries.drain() {
            entry.deliver(Resolution::TimedOut, Err(error.clone()));
        }
        count
    }

    /// Resolve one entry with `error`. False when it was already resolved.
    pub async fn fail(&self, correlation_id: &str, error: PublishError) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.remove(correlation_id) {
            Some(mut entry) => {
                entry.deliver(Resolution::TimedOut, Err(error));
                true
            }
            None => false,
        }
    }

    pub async fn contains(&self, correlation_id: &str) -> bool {
        self.entries.lock().await.contains_key(correlation_id)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
