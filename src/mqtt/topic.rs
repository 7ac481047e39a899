//! Topic namespace of the cloud broker.
//!
//! Every topic is `<root><direction prefix><printer id>/<kind>` with an optional
//! trailing `/report` on frames sent by the printer.

use std::fmt;

use crate::printer::PrinterId;

pub const MQTT_ROOT: &str = "anycubic/anycubicCloud/v1/";
pub const MQTT_ROOT_TOPIC_PLUS: &str = "anycubic/anycubicCloud/v1/+/public/";
pub const MQTT_ROOT_TOPIC_PRINTER: &str = "anycubic/anycubicCloud/v1/printer/app/";
pub const MQTT_ROOT_TOPIC_PUBLISH: &str = "anycubic/anycubicCloud/v1/app/";
pub const MQTT_ROOT_TOPIC_PUBLISH_PRINTER: &str = "anycubic/anycubicCloud/v1/printer/public/";
pub const MQTT_ROOT_TOPIC_SERVER: &str = "anycubic/anycubicCloud/v1/server/app/";

const REPORT_SUFFIX: &str = "report";

/// Direction prefixes below [`MQTT_ROOT`], longest first.
const DIRECTION_PREFIXES: [(&str, TopicDirection); 4] = [
    ("printer/public/", TopicDirection::Printer),
    ("printer/app/", TopicDirection::App),
    ("server/app/", TopicDirection::Server),
    ("app/", TopicDirection::App),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicDirection {
    /// Frames addressed to (or sent by) the app.
    App,
    Printer,
    Server,
}

impl fmt::Display for TopicDirection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TopicDirection::App => write!(f, "app"),
            TopicDirection::Printer => write!(f, "printer"),
            TopicDirection::Server => write!(f, "server"),
        }
    }
}

/// One inbound frame with its topic taken apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMessage<'a> {
    /// Root plus direction prefix the topic matched.
    pub root: String,
    pub printer_id: PrinterId,
    pub direction: TopicDirection,
    pub kind: &'a str,
    pub payload: &'a [u8],
}

impl<'a> TopicMessage<'a> {
    /// Split a topic into its parts. `None` when the topic is not in the namespace.
    pub fn parse(topic: &'a str, payload: &'a [u8]) -> Option<Self> {
        let rest = topic.strip_prefix(MQTT_ROOT)?;

        let (prefix, direction, suffix) = DIRECTION_PREFIXES
            .iter()
            .find_map(|(prefix, direction)| {
                rest.strip_prefix(prefix)
                    .map(|suffix| (prefix.to_string(), *direction, suffix))
            })
            .or_else(|| broadcast_prefix(rest))?;

        let mut segments = suffix.split('/');
        let printer_id = segments.next()?.parse::<PrinterId>().ok()?;
        let kind = segments.next().filter(|kind| !kind.is_empty())?;
        match (segments.next(), segments.next()) {
            (None, None) | (Some(REPORT_SUFFIX), None) => {}
            _ => return None,
        }

        Some(Self {
            root: format!("{MQTT_ROOT}{prefix}"),
            printer_id,
            direction,
            kind,
            payload,
        })
    }
}

/// `<segment>/public/...` frames published to the shared broadcast prefix.
fn broadcast_prefix(rest: &str) -> Option<(String, TopicDirection, &str)> {
    let (segment, after) = rest.split_once('/')?;
    let suffix = after.strip_prefix("public/")?;
    if segment.is_empty() || segment == "+" || segment == "#" {
        return None;
    }
    let direction = if segment == "server" {
        TopicDirection::Server
    } else {
        TopicDirection::Printer
    };
    Some((format!("{segment}/public/"), direction, suffix))
}

/// Topics a printer session subscribes to: the public broadcast and its app direction.
pub fn subscription_topics(printer_id: PrinterId) -> Vec<String> {
    vec![
        format!("{MQTT_ROOT_TOPIC_PLUS}{printer_id}/#"),
        format!("{MQTT_ROOT_TOPIC_PRINTER}{printer_id}/#"),
    ]
}

/// Topic an outbound command of `kind` is published on.
pub fn publish_topic(printer_id: PrinterId, kind: &str) -> String {
    format!("{MQTT_ROOT_TOPIC_PUBLISH}{printer_id}/{kind}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_direction() {
        let cases = [
            ("anycubic/anycubicCloud/v1/printer/public/42/print/report", TopicDirection::Printer),
            ("anycubic/anycubicCloud/v1/printer/app/42/print/report", TopicDirection::App),
            ("anycubic/anycubicCloud/v1/server/app/42/status", TopicDirection::Server),
            ("anycubic/anycubicCloud/v1/app/42/print", TopicDirection::App),
            ("anycubic/anycubicCloud/v1/server/public/42/status", TopicDirection::Server),
            ("anycubic/anycubicCloud/v1/slicer/public/42/status", TopicDirection::Printer),
        ];
        for (topic, direction) in cases {
            let message = TopicMessage::parse(topic, b"{}").unwrap();
            assert_eq!(message.direction, direction, "{topic}");
            assert_eq!(message.printer_id, PrinterId(42));
        }
    }

    #[test]
    fn longest_prefix_wins_over_broadcast() {
        let message =
            TopicMessage::parse("anycubic/anycubicCloud/v1/printer/public/9/fan", b"").unwrap();
        assert_eq!(message.root, MQTT_ROOT_TOPIC_PUBLISH_PRINTER);
        assert_eq!(message.kind, "fan");
    }

    #[test]
    fn rejects_topics_outside_namespace() {
        let topics = [
            "other/root/printer/public/42/print",
            "anycubic/anycubicCloud/v1/printer/public/",
            "anycubic/anycubicCloud/v1/printer/public/abc/print",
            "anycubic/anycubicCloud/v1/printer/public/42",
            "anycubic/anycubicCloud/v1/printer/public/42/print/extra",
            "anycubic/anycubicCloud/v1/printer/public/42/print/report/x",
            "anycubic/anycubicCloud/v1/unknown/42/print",
        ];
        for topic in topics {
            assert!(TopicMessage::parse(topic, b"").is_none(), "{topic}");
        }
    }

    #[test]
    fn builds_session_topics() {
        assert_eq!(
            subscription_topics(PrinterId(42)),
            vec![
                "anycubic/anycubicCloud/v1/+/public/42/#".to_string(),
                "anycubic/anycubicCloud/v1/printer/app/42/#".to_string(),
            ]
        );
        assert_eq!(
            publish_topic(PrinterId(42), "multiColorBox"),
            "anycubic/anycubicCloud/v1/app/42/multiColorBox"
        );
    }
}
