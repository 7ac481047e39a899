//! Bridge between the Anycubic cloud MQTT broker and local consumers.
//!
//! [`coordinator::Coordinator`] is the entry point: it validates the account,
//! runs one session per printer and keeps the latest state of each printer in
//! a [`printer::PrinterStateCache`].

pub mod cloud;
pub mod config;
pub mod coordinator;
pub mod mqtt;
pub mod printer;
