//! Printer state model and the per-printer latest-state cache.
//!
//! ```text
//! topic_router ──► StateUpdate ──► PrinterStateCache ──► watch::Receiver<PrinterState>
//!                                       ▲
//!                  cloud poll ──────────┘ (PrinterSnapshot, while idle-closed)
//! ```

pub mod printer_state;
pub mod state_cache;

pub use printer_state::{
    DryingState, JobState, JobStatus, JobUpdate, PrinterId, PrinterIdentity, PrinterSnapshot,
    PrinterState, StateUpdate, Temperatures,
};
pub use state_cache::PrinterStateCache;
