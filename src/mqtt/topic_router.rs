//! Pure mapping from an inbound frame to a typed [`DomainEvent`].
//!
//! The router never touches session or cache state. Callers log and drop the
//! [`DecodeError`]s it returns; a bad frame never affects the connection.

use super::error::DecodeError;
use super::payload::{MessageKind, ReportPayload};
use super::topic::{TopicDirection, TopicMessage};
use crate::printer::{PrinterId, StateUpdate};

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainEvent {
    pub printer_id: PrinterId,
    pub direction: TopicDirection,
    pub kind: MessageKind,
    /// `msgid` of the command this frame answers, if the firmware echoed it.
    pub correlation_id: Option<String>,
    pub action: Option<String>,
    pub state: Option<String>,
    pub code: Option<i64>,
    pub message: Option<String>,
    pub update: StateUpdate,
}

pub fn route(topic: &str, payload: &[u8]) -> Result<DomainEvent, DecodeError> {
    let message = TopicMessage::parse(topic, payload)
        .ok_or_else(|| DecodeError::UnknownTopic(topic.to_string()))?;
    let kind = MessageKind::from_topic_kind(message.kind)
        .ok_or_else(|| DecodeError::UnknownTopic(topic.to_string()))?;

    let report = ReportPayload::from_slice(message.payload)?;
    let update = report.state_update(kind)?;

    Ok(DomainEvent {
        printer_id: message.printer_id,
        direction: message.direction,
        kind,
        correlation_id: report.msgid.filter(|id| !id.is_empty()),
        action: report.action,
        state: report.state,
        code: report.code,
        message: report.msg,
        update,
    })
}
