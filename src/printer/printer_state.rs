//! Decoded printer snapshot and the partial updates that are folded into it.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Cloud-assigned printer id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrinterId(pub u64);

impl fmt::Display for PrinterId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PrinterId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(PrinterId)
    }
}

/// Printer as listed by the cloud account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterIdentity {
    pub id: PrinterId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JobStatus {
    Idle,
    Preheating,
    Printing,
    Paused,
    Finished,
    Cancelled,
    Failed,
    #[default]
    Unknown,
}

impl JobStatus {
    /// Parse the `state` field of a print report.
    pub fn from_report_state(state: &str) -> Self {
        match state.to_lowercase().as_str() {
            "free" | "idle" | "standby" | "ready" => Self::Idle,
            "preheating" | "downloading" | "checking" | "updated" => Self::Preheating,
            "printing" | "busy" | "resuming" | "resumed" => Self::Printing,
            "pausing" | "paused" => Self::Paused,
            "finished" | "complete" | "done" => Self::Finished,
            "stoping" | "stopping" | "stoped" | "stopped" | "cancelled" => Self::Cancelled,
            s if s.contains("fail") || s.contains("error") => Self::Failed,
            _ => Self::Unknown,
        }
    }

    /// A job occupies the printer (heating, printing or paused mid-print).
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Preheating | Self::Printing | Self::Paused)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub status: JobStatus,
    pub progress_pct: u8,
    pub remaining_min: Option<u32>,
    pub elapsed_min: Option<u32>,
    pub current_layer: Option<u32>,
    pub total_layers: Option<u32>,
    pub filename: Option<String>,
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Temperatures {
    pub nozzle: Option<f64>,
    pub nozzle_target: Option<f64>,
    pub hotbed: Option<f64>,
    pub hotbed_target: Option<f64>,
}

/// Drying cycle of a filament box.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DryingState {
    pub box_id: u32,
    pub active: bool,
    pub target_temp: Option<u32>,
    pub duration_min: Option<u32>,
    pub remaining_min: Option<u32>,
}

/// Field-level update for a job report. `None` keeps the cached value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress_pct: Option<u8>,
    pub remaining_min: Option<u32>,
    pub elapsed_min: Option<u32>,
    pub current_layer: Option<u32>,
    pub total_layers: Option<u32>,
    pub filename: Option<String>,
    pub task_id: Option<String>,
}

/// Decoded content of one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StateUpdate {
    Online(bool),
    Job(JobUpdate),
    Temperatures(Temperatures),
    /// Replaces the drying sub-object wholesale.
    Drying(Option<DryingState>),
    FanSpeed(u8),
    /// Frame carried nothing for the snapshot (acknowledgements, light state).
    None,
}

/// Coarse status returned by the cloud REST API, used while the MQTT session is closed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrinterSnapshot {
    pub online: bool,
    pub job_status: Option<JobStatus>,
    pub drying_active: Option<bool>,
}

/// Latest known state of one printer.
#[derive(Debug, Clone, PartialEq)]
pub struct PrinterState {
    pub printer_id: PrinterId,
    pub name: Option<String>,
    pub online: Option<bool>,
    pub job: JobState,
    pub temperatures: Temperatures,
    pub drying: Option<DryingState>,
    pub fan_speed_pct: Option<u8>,
    /// Monotonic receive time of the last decoded frame.
    pub last_message_at: Option<Instant>,
    /// Wall-clock time of the last change, for display.
    pub updated_at: Option<DateTime<Local>>,
}

impl PrinterState {
    pub fn new(printer_id: PrinterId, name: Option<String>) -> Self {
        Self {
            printer_id,
            name,
            online: None,
            job: JobState::default(),
            temperatures: Temperatures::default(),
            drying: None,
            fan_speed_pct: None,
            last_message_at: None,
            updated_at: None,
        }
    }

    pub fn is_printing(&self) -> bool {
        self.job.status.is_active()
    }

    pub fn is_drying(&self) -> bool {
        self.drying.as_ref().is_some_and(|d| d.active)
    }

    pub fn is_online(&self) -> bool {
        self.online.unwrap_or(false)
    }

    /// Job progress or drying produce a steady report stream.
    pub fn in_high_frequency_phase(&self) -> bool {
        self.is_printing() || self.is_drying()
    }

    /// No frame within `interval` of `now`. A printer that never reported is stale.
    pub fn is_stale(&self, now: Instant, interval: Duration) -> bool {
        match self.last_message_at {
            Some(at) => now.saturating_duration_since(at) > interval,
            None => true,
        }
    }

    /// Fold one decoded update into the snapshot.
    pub fn merge(&mut self, update: &StateUpdate, received_at: Instant) {
        match update {
            StateUpdate::Online(online) => self.online = Some(*online),
            StateUpdate::Job(job) => self.merge_job(job),
            StateUpdate::Temperatures(temps) => {
                let current = &mut self.temperatures;
                current.nozzle = temps.nozzle.or(current.nozzle);
                current.nozzle_target = temps.nozzle_target.or(current.nozzle_target);
                current.hotbed = temps.hotbed.or(current.hotbed);
                current.hotbed_target = temps.hotbed_target.or(current.hotbed_target);
            }
            StateUpdate::Drying(drying) => self.drying = drying.clone(),
            StateUpdate::FanSpeed(pct) => self.fan_speed_pct = Some(*pct),
            StateUpdate::None => {}
        }
        // A report from the printer implies it is reachable.
        if self.online.is_none() {
            self.online = Some(true);
        }
        self.last_message_at = Some(received_at);
        self.updated_at = Some(Local::now());
    }

    fn merge_job(&mut self, update: &JobUpdate) {
        let job = &mut self.job;
        if let Some(status) = update.status {
            // New job: forget counters of the previous one.
            if status.is_active() && !job.status.is_active() {
                *job = JobState::default();
            }
            job.status = status;
        }
        if let Some(pct) = update.progress_pct {
            job.progress_pct = pct.min(100);
        }
        job.remaining_min = update.remaining_min.or(job.remaining_min);
        job.elapsed_min = update.elapsed_min.or(job.elapsed_min);
        job.current_layer = update.current_layer.or(job.current_layer);
        job.total_layers = update.total_layers.or(job.total_layers);
        if update.filename.is_some() {
            job.filename = update.filename.clone();
        }
        if update.task_id.is_some() {
            job.task_id = update.task_id.clone();
        }
    }

    /// Merge a cloud poll. Does not touch `last_message_at`, which tracks MQTT traffic.
    pub fn merge_snapshot(&mut self, snapshot: &PrinterSnapshot) {
        self.online = Some(snapshot.online);
        if let Some(status) = snapshot.job_status {
            if status.is_active() && !self.job.status.is_active() {
                self.job = JobState::default();
            }
            self.job.status = status;
        }
        if let Some(active) = snapshot.drying_active {
            match &mut self.drying {
                Some(drying) => drying.active = active,
                None if active => {
                    self.drying = Some(DryingState {
                        active,
                        ..DryingState::default()
                    })
                }
                None => {}
            }
        }
        self.updated_at = Some(Local::now());
    }
}
