//! # MQTT Session Module
//!
//! Everything between the vendor's cloud broker and the printer state cache:
//! one long-lived, state-machine-driven session per printer, the decoding of
//! inbound frames and the command path with acknowledgement tracking.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs             - Broker endpoint, protocol timeouts, rumqttc options
//! ├── error.rs              - Session, decode and publish errors
//! ├── topic.rs              - Topic namespace, parsing and builders
//! ├── payload.rs            - JSON frame model and decoding into state updates
//! ├── topic_router.rs       - Frame -> DomainEvent
//! ├── commands.rs           - Outbound printer commands
//! ├── command_publisher.rs  - Pending-command table and ack correlation
//! ├── transport.rs          - Connector seam and the rumqttc implementation
//! └── mqtt_handler.rs       - Session state machine, task and handle
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! rumqttc EventLoop ──► LinkEvent ──► session task ──► topic_router::route ──► PrinterStateCache
//!                                          │                    │
//!                                          │                    └──► PendingCommands::resolve ──► caller
//!                                          ▼
//! SessionHandle::publish ──► mpsc ──► AsyncClient::publish
//! ```
//!
//! Decode errors never leave this module: the session logs and drops the
//! frame. Connection errors are retried by the session; consumers only see
//! them through [`SessionStatus`](mqtt_handler::SessionStatus).

pub mod command_publisher;
pub mod commands;
pub mod config;
pub mod error;
pub mod mqtt_handler;
pub mod payload;
pub mod topic;
pub mod topic_router;
pub mod transport;

pub use command_publisher::{Ack, CommandOutcome};
pub use commands::{DryingPreset, PrinterCommand};
pub use error::{DecodeError, PublishError, SessionError};
pub use mqtt_handler::{ConnectionState, SessionHandle, SessionParams, SessionStatus};
pub use transport::{MqttConnector, RumqttcConnector};
