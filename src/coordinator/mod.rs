//! # Coordinator Module
//!
//! Owns the printer set of one account: decides when each printer's MQTT
//! session should be held open and exposes state and commands to consumers.
//!
//! ```text
//! coordinator/
//! ├── lifecycle_policy.rs    - Connect mode and keep/idle decision per printer
//! └── coordinator_handle.rs  - Setup, consumer API, reload and shutdown
//! ```

pub mod coordinator_handle;
pub mod lifecycle_policy;

pub use coordinator_handle::{CommandError, Coordinator, SetupError};
pub use lifecycle_policy::{ConnectMode, LifecycleAction};
