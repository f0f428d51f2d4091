// Task identifiers and per-operation request state.

use anyhow::{bail, Result};

use super::boot_control::ImageStatus;
use super::factory_reset::FactoryResetFsm;

/// Capacity of the private digest copy.
pub const DIGEST_MAX: usize = 64;
/// Capacity of the private signature copy.
pub const SIGNATURE_MAX: usize = 96;
/// Capacity of the private server-URL copy.
pub const URL_MAX: usize = 256;

/// Top-level task of the orchestrator. `Idle` is the resting state; only an
/// entry point moves the machine out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskId {
    Init,
    Idle,
    DownloadImage,
    VerifyImageDigest,
    DatabaseEntry,
    SetImageStatus,
    FactoryReset,
    EraseImage,
    UpdateUser,
}

/// Transient request state for the in-flight operation. Populated when an
/// operation is accepted, stale once the machine returns to idle.
#[derive(Debug, Clone, Copy)]
pub struct TaskParams {
    pub slot: u32,
    pub version: u32,
    /// Cooperative cancellation flag. Present in the parameter block but not
    /// consulted by any transition; cancellation is unimplemented at this
    /// layer.
    pub abort: bool,
    /// Desired post-operation status for the image.
    pub image_status: ImageStatus,
    /// Desired post-operation status for the platform firmware manager.
    pub platform_status: ImageStatus,
}

impl Default for TaskParams {
    fn default() -> Self {
        Self {
            slot: 0,
            version: 0,
            abort: false,
            image_status: ImageStatus::Valid,
            platform_status: ImageStatus::Valid,
        }
    }
}

/// Caller-supplied request for `start()`. Borrowed; the orchestrator copies
/// what it needs into bounded private buffers.
#[derive(Debug, Clone, Copy)]
pub struct OtaRequestParams<'a> {
    pub url: &'a str,
    pub digest: &'a str,
    pub signature: Option<&'a str>,
    pub version: u32,
}

/// Private bounded copy of an accepted request, so the caller's buffers need
/// not outlive the `start()` call.
#[derive(Debug, Clone, Default)]
pub struct RequestCopy {
    pub url: heapless::String<URL_MAX>,
    pub digest: heapless::String<DIGEST_MAX>,
    pub signature: heapless::String<SIGNATURE_MAX>,
    pub version: u32,
}

impl RequestCopy {
    /// Captures the request. A field longer than its buffer fails the call
    /// outright; nothing is ever truncated.
    pub fn capture(params: &OtaRequestParams, with_signature: bool) -> Result<Self> {
        let mut copy = Self::default();
        if copy.url.push_str(params.url).is_err() {
            bail!("server URL exceeds {} bytes", URL_MAX);
        }
        if copy.digest.push_str(params.digest).is_err() {
            bail!("image digest exceeds {} bytes", DIGEST_MAX);
        }
        if with_signature {
            let signature = match params.signature {
                Some(signature) => signature,
                None => bail!("signature verification enabled but no signature supplied"),
            };
            if copy.signature.push_str(signature).is_err() {
                bail!("image signature exceeds {} bytes", SIGNATURE_MAX);
            }
        }
        copy.version = params.version;
        Ok(copy)
    }
}

/// Working state of whichever sub-state-machine is currently active.
///
/// Replaces a shared untyped scratch region with a tagged union: entering a
/// sub-task constructs its variant, leaving destroys it, and sizing is the
/// compiler's problem instead of an entry assertion.
#[derive(Debug)]
pub enum TaskContext {
    None,
    FactoryReset(FactoryResetFsm),
}
