//! Printer commands.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::payload::MessageKind;

/// Drying program for a filament box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DryingPreset {
    /// Duration in minutes.
    pub duration_min: u32,
    /// Target temperature (°C).
    pub temperature: u32,
}

/// Command to send to the printer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrinterCommand {
    /// Ask the printer to report its current status.
    QueryStatus,
    /// Pause the running job.
    PausePrint {
        /// Cloud task id of the job, when known.
        task_id: Option<String>,
    },
    /// Resume a paused job.
    ResumePrint {
        /// Cloud task id of the job, when known.
        task_id: Option<String>,
    },
    /// Stop the running job.
    StopPrint {
        /// Cloud task id of the job, when known.
        task_id: Option<String>,
    },
    /// Start drying the filament in a multi color box.
    StartDrying {
        /// Box index.
        box_id: u32,
        /// Program to run.
        preset: DryingPreset,
    },
    /// Stop a drying cycle.
    StopDrying {
        /// Box index.
        box_id: u32,
    },
    /// Set part cooling fan speed (0-100 %).
    SetFanSpeed(u8),
    /// Switch the chamber light.
    SetLight(bool),
}

impl PrinterCommand {
    /// Message kind the command is published and acknowledged under.
    pub fn kind(&self) -> MessageKind {
        match self {
            PrinterCommand::QueryStatus => MessageKind::Status,
            PrinterCommand::PausePrint { .. }
            | PrinterCommand::ResumePrint { .. }
            | PrinterCommand::StopPrint { .. } => MessageKind::Print,
            PrinterCommand::StartDrying { .. } | PrinterCommand::StopDrying { .. } => {
                MessageKind::MultiColorBox
            }
            PrinterCommand::SetFanSpeed(_) => MessageKind::Fan,
            PrinterCommand::SetLight(_) => MessageKind::Light,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            PrinterCommand::QueryStatus => "query",
            PrinterCommand::PausePrint { .. } => "pause",
            PrinterCommand::ResumePrint { .. } => "resume",
            PrinterCommand::StopPrint { .. } => "stop",
            PrinterCommand::StartDrying { .. } => "setDry",
            PrinterCommand::StopDrying { .. } => "setDry",
            PrinterCommand::SetFanSpeed(_) => "control",
            PrinterCommand::SetLight(_) => "control",
        }
    }

    /// Fill in the job's task id for print commands that were sent without one.
    pub fn with_task_id(self, current: Option<&str>) -> Self {
        let fill = |task_id: Option<String>| task_id.or_else(|| current.map(str::to_string));
        match self {
            PrinterCommand::PausePrint { task_id } => PrinterCommand::PausePrint {
                task_id: fill(task_id),
            },
            PrinterCommand::ResumePrint { task_id } => PrinterCommand::ResumePrint {
                task_id: fill(task_id),
            },
            PrinterCommand::StopPrint { task_id } => PrinterCommand::StopPrint {
                task_id: fill(task_id),
            },
            other => other,
        }
    }

    fn data(&self) -> Value {
        match self {
            PrinterCommand::QueryStatus => Value::Null,
            PrinterCommand::PausePrint { task_id }
            | PrinterCommand::ResumePrint { task_id }
            | PrinterCommand::StopPrint { task_id } => match task_id {
                Some(task_id) => json!({ "taskid": task_id }),
                None => Value::Null,
            },
            PrinterCommand::StartDrying { box_id, preset } => json!({
                "id": box_id,
                "status": 1,
                "target_temp": preset.temperature,
                "duration": preset.duration_min,
            }),
            PrinterCommand::StopDrying { box_id } => json!({
                "id": box_id,
                "status": 0,
            }),
            PrinterCommand::SetFanSpeed(pct) => json!({ "fan_speed_pct": (*pct).min(100) }),
            PrinterCommand::SetLight(on) => json!({
                "type": 2,
                "status": if *on { 1 } else { 0 },
                "brightness": if *on { 100 } else { 0 },
            }),
        }
    }

    /// Full JSON envelope, tagged with the correlation id.
    pub fn to_json(&self, msgid: &str) -> Value {
        json!({
            "type": self.kind().as_str(),
            "action": self.action(),
            "msgid": msgid,
            "timestamp": chrono::Utc::now().timestamp_millis(),
            "data": self.data(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_drying_envelope() {
        let command = PrinterCommand::StartDrying {
            box_id: 0,
            preset: DryingPreset {
                duration_min: 240,
                temperature: 55,
            },
        };
        let payload = command.to_json("corr-1");
        assert_eq!(payload["type"], "multiColorBox");
        assert_eq!(payload["action"], "setDry");
        assert_eq!(payload["msgid"], "corr-1");
        assert_eq!(payload["data"]["target_temp"], 55);
        assert_eq!(payload["data"]["duration"], 240);
    }

    #[test]
    fn print_commands_carry_task_id() {
        let payload = PrinterCommand::PausePrint {
            task_id: Some("t-9".to_string()),
        }
        .to_json("x");
        assert_eq!(payload["type"], "print");
        assert_eq!(payload["data"]["taskid"], "t-9");

        let payload = PrinterCommand::StopPrint { task_id: None }.to_json("y");
        assert!(payload["data"].is_null());
    }

    #[test]
    fn cached_task_id_fills_missing_one() {
        let command = PrinterCommand::StopPrint { task_id: None }.with_task_id(Some("t-1"));
        assert_eq!(
            command,
            PrinterCommand::StopPrint {
                task_id: Some("t-1".to_string())
            }
        );
        let explicit = PrinterCommand::PausePrint {
            task_id: Some("mine".to_string()),
        }
        .with_task_id(Some("t-1"));
        assert_eq!(
            explicit,
            PrinterCommand::PausePrint {
                task_id: Some("mine".to_string())
            }
        );
        assert_eq!(
            PrinterCommand::SetLight(true).with_task_id(Some("t-1")),
            PrinterCommand::SetLight(true)
        );
    }
}
