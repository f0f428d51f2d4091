// OTA (Over-The-Air) update orchestration

pub mod boot_control;
pub mod factory_reset;
pub mod orchestrator;
pub mod task;

pub use boot_control::{BootControlRecord, ImageStatus, ImageType};
pub use orchestrator::OtaOrchestrator;
pub use task::{OtaRequestParams, TaskId};

// Update flow:
// 1. start() opens the downloader and arms DOWNLOAD_IMAGE
// 2. tick() samples the transfer until it completes
// 3. Verify digest (and optional signature)
// 4. Record the image in the on-device ledger, set its status
// 5. Completion callback fires, machine returns to idle
// 6. commit_boot_control() later marks the image bootable and restarts

/// Coarse readiness status returned by every public entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysStatus {
    Uninitialized,
    Ready,
    Busy,
    Error,
}

/// Final outcome of an operation, delivered through the completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaResult {
    None,
    /// Transfer accepted and still running; the downloader stays open.
    ImageDownloadStart,
    ImageDownloaded,
    ImageDownloadFailed,
    ImageDigestVerifySuccess,
    ImageDigestVerifyFailed,
    ImageDbEntryFailed,
    ImageStatusSet,
    RollbackDone,
    FactoryResetSuccess,
    ImageErased,
    ImageEraseFailed,
    /// Patch application accepted and still running; the downloader stays open.
    PatchEventStart,
}
