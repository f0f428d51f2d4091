//! OTA Core - update-orchestration state machine for dual-slot firmware devices
//!
//! This crate contains the update-sequencing logic of a device OTA subsystem:
//! a single-threaded, repeatedly-polled state machine that decides when to
//! download, verify, record and activate a firmware image. Hardware access
//! (transport, flash, filesystem ledger, cache control, reset line) sits
//! behind collaborator traits, so the whole machine runs and tests on the
//! host platform without device hardware.

pub mod config;
pub mod drivers;
pub mod ota;

pub use config::OtaConfig;
pub use ota::orchestrator::OtaOrchestrator;
pub use ota::{OtaResult, SysStatus};
