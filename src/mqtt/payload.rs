//! JSON body of broker frames and its decoding into [`StateUpdate`]s.

use serde::Deserialize;
use serde_json::Value;

use super::error::DecodeError;
use crate::printer::{DryingState, JobStatus, JobUpdate, StateUpdate, Temperatures};

/// Actions sent by [`PrinterCommand`](super::commands::PrinterCommand)s; frames
/// carrying one answer a command.
const COMMAND_ACTIONS: &[&str] = &["pause", "resume", "stop", "setDry", "control"];

/// Message kinds understood on the wire (last topic segment before `/report`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Status,
    Print,
    Temperature,
    MultiColorBox,
    Fan,
    Light,
}

impl MessageKind {
    pub fn from_topic_kind(kind: &str) -> Option<Self> {
        match kind {
            "status" => Some(Self::Status),
            "print" => Some(Self::Print),
            // firmware spells it without the "er"
            "tempature" | "temperature" => Some(Self::Temperature),
            "multiColorBox" => Some(Self::MultiColorBox),
            "fan" => Some(Self::Fan),
            "light" => Some(Self::Light),
            _ => None,
        }
    }

    /// Topic segment used when publishing.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Print => "print",
            Self::Temperature => "tempature",
            Self::MultiColorBox => "multiColorBox",
            Self::Fan => "fan",
            Self::Light => "light",
        }
    }
}

/// Common envelope of every frame.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportPayload {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub action: Option<String>,
    /// Correlation id echoed from the command that caused this frame.
    pub msgid: Option<String>,
    pub state: Option<String>,
    pub code: Option<i64>,
    pub msg: Option<String>,
    pub timestamp: Option<i64>,
    pub data: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct PrintData {
    progress: Option<u8>,
    remain_time: Option<u32>,
    print_time: Option<u32>,
    curr_layer: Option<u32>,
    total_layers: Option<u32>,
    filename: Option<String>,
    taskid: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct TemperatureData {
    curr_nozzle_temp: Option<f64>,
    target_nozzle_temp: Option<f64>,
    curr_hotbed_temp: Option<f64>,
    target_hotbed_temp: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct MultiColorBoxData {
    #[serde(default)]
    multi_color_box: Vec<ColorBox>,
}

#[derive(Debug, Deserialize)]
struct ColorBox {
    id: u32,
    drying_status: Option<DryingStatus>,
}

#[derive(Debug, Deserialize)]
struct DryingStatus {
    status: u8,
    target_temp: Option<u32>,
    duration: Option<u32>,
    remain_time: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct FanData {
    fan_speed_pct: Option<u8>,
}

impl ReportPayload {
    pub fn from_slice(payload: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(payload).map_err(|e| DecodeError::Malformed(e.to_string()))
    }

    fn data_as<T: for<'de> Deserialize<'de> + Default>(&self) -> Result<T, DecodeError> {
        match &self.data {
            None | Some(Value::Null) => Ok(T::default()),
            Some(data) => T::deserialize(data).map_err(|e| DecodeError::Malformed(e.to_string())),
        }
    }

    /// Frame answering a command rather than reporting state on its own.
    pub fn is_acknowledgement(&self) -> bool {
        self.msgid.as_deref().is_some_and(|id| !id.is_empty())
            || self
                .action
                .as_deref()
                .is_some_and(|action| COMMAND_ACTIONS.contains(&action))
    }

    /// Job status of a print frame. The `state` of an acknowledgement is the
    /// command result when it reads like one, and never a job status then.
    fn job_status(&self) -> Option<JobStatus> {
        let state = self.state.as_deref()?;
        if self.is_acknowledgement() && is_command_result(state) {
            return None;
        }
        Some(JobStatus::from_report_state(state))
    }

    /// Decode the state carried by a frame of `kind`.
    pub fn state_update(&self, kind: MessageKind) -> Result<StateUpdate, DecodeError> {
        match kind {
            MessageKind::Status => Ok(match self.state.as_deref() {
                Some("offline") => StateUpdate::Online(false),
                Some(_) => StateUpdate::Online(true),
                None => StateUpdate::None,
            }),
            MessageKind::Print => {
                let data: PrintData = self.data_as()?;
                let job = JobUpdate {
                    status: self.job_status(),
                    progress_pct: data.progress,
                    remaining_min: data.remain_time,
                    elapsed_min: data.print_time,
                    current_layer: data.curr_layer,
                    total_layers: data.total_layers,
                    filename: data.filename,
                    task_id: data.taskid.as_ref().and_then(task_id_string),
                };
                if job == JobUpdate::default() {
                    return Ok(StateUpdate::None);
                }
                Ok(StateUpdate::Job(job))
            }
            MessageKind::Temperature => {
                let data: TemperatureData = self.data_as()?;
                Ok(StateUpdate::Temperatures(Temperatures {
                    nozzle: data.curr_nozzle_temp,
                    nozzle_target: data.target_nozzle_temp,
                    hotbed: data.curr_hotbed_temp,
                    hotbed_target: data.target_hotbed_temp,
                }))
            }
            MessageKind::MultiColorBox => {
                let data: MultiColorBoxData = self.data_as()?;
                let boxes = &data.multi_color_box;
                let chosen = boxes
                    .iter()
                    .find(|b| b.drying_status.as_ref().is_some_and(|s| s.status == 1))
                    .or_else(|| boxes.iter().find(|b| b.drying_status.is_some()));
                Ok(match chosen {
                    Some(ColorBox {
                        id,
                        drying_status: Some(status),
                    }) => StateUpdate::Drying(Some(DryingState {
                        box_id: *id,
                        active: status.status == 1,
                        target_temp: status.target_temp,
                        duration_min: status.duration,
                        remaining_min: status.remain_time,
                    })),
                    // Acks and slot-only reports say nothing about drying.
                    _ => StateUpdate::None,
                })
            }
            MessageKind::Fan => {
                let data: FanData = self.data_as()?;
                Ok(data
                    .fan_speed_pct
                    .map(|pct| StateUpdate::FanSpeed(pct.min(100)))
                    .unwrap_or(StateUpdate::None))
            }
            MessageKind::Light => Ok(StateUpdate::None),
        }
    }
}

fn is_command_result(state: &str) -> bool {
    matches!(
        state.to_lowercase().as_str(),
        "done" | "ok" | "success" | "failed" | "fail" | "error" | "timeout"
    )
}

fn task_id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
