//! Connect-mode driven decision whether a printer's session must stay open.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::printer::PrinterState;

/// When the MQTT session of a printer should be held open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectMode {
    /// Only while a job is active.
    #[default]
    PrintingOnly,
    /// While a job or a drying cycle is active.
    PrintingAndDrying,
    /// While the printer reports itself online.
    DeviceOnline,
    /// Permanently, idle disconnect never fires.
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    KeepConnected,
    /// The idle timer may close the session. Not an immediate close.
    AllowIdleDisconnect,
}

pub fn evaluate(mode: ConnectMode, state: &PrinterState) -> LifecycleAction {
    let keep = match mode {
        ConnectMode::Always => true,
        ConnectMode::DeviceOnline => state.is_online(),
        ConnectMode::PrintingAndDrying => state.is_printing() || state.is_drying(),
        ConnectMode::PrintingOnly => state.is_printing(),
    };
    if keep {
        LifecycleAction::KeepConnected
    } else {
        LifecycleAction::AllowIdleDisconnect
    }
}

/// Period of the session's lifecycle tick for the printer's current phase.
pub fn tick_interval(
    state: &PrinterState,
    scan_interval: Duration,
    high_frequency_interval: Duration,
) -> Duration {
    if state.in_high_frequency_phase() {
        high_frequency_interval.min(scan_interval)
    } else {
        scan_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::printer::{DryingState, JobStatus, PrinterId};

    fn state(online: bool, job: JobStatus, drying: bool) -> PrinterState {
        let mut state = PrinterState::new(PrinterId(42), None);
        state.online = Some(online);
        state.job.status = job;
        if drying {
            state.drying = Some(DryingState {
                active: true,
                ..DryingState::default()
            });
        }
        state
    }

    #[test]
    fn decision_table() {
        use ConnectMode::*;
        use LifecycleAction::*;

        let idle_offline = state(false, JobStatus::Idle, false);
        let idle_online = state(true, JobStatus::Idle, false);
        let printing = state(true, JobStatus::Printing, false);
        let drying = state(true, JobStatus::Idle, true);

        let cases = [
            (Always, &idle_offline, KeepConnected),
            (Always, &printing, KeepConnected),
            (DeviceOnline, &idle_online, KeepConnected),
            (DeviceOnline, &idle_offline, AllowIdleDisconnect),
            (PrintingAndDrying, &printing, KeepConnected),
            (PrintingAndDrying, &drying, KeepConnected),
            (PrintingAndDrying, &idle_online, AllowIdleDisconnect),
            (PrintingOnly, &printing, KeepConnected),
            (PrintingOnly, &drying, AllowIdleDisconnect),
            (PrintingOnly, &idle_online, AllowIdleDisconnect),
        ];
        for (mode, state, expected) in cases {
            assert_eq!(evaluate(mode, state), expected, "{mode:?}");
        }
    }

    #[test]
    fn paused_job_keeps_session() {
        let paused = state(true, JobStatus::Paused, false);
        assert_eq!(
            evaluate(ConnectMode::PrintingOnly, &paused),
            LifecycleAction::KeepConnected
        );
    }

    #[test]
    fn tick_follows_phase() {
        let scan = Duration::from_secs(60);
        let fast = Duration::from_secs(5);
        assert_eq!(tick_interval(&state(true, JobStatus::Idle, false), scan, fast), scan);
        assert_eq!(tick_interval(&state(true, JobStatus::Printing, false), scan, fast), fast);
        assert_eq!(tick_interval(&state(true, JobStatus::Idle, true), scan, fast), fast);
    }

    #[test]
    fn mode_names_in_config() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: ConnectMode,
        }
        let wrapper: Wrapper = toml::from_str("mode = \"printing_and_drying\"").unwrap();
        assert_eq!(wrapper.mode, ConnectMode::PrintingAndDrying);
    }
}
