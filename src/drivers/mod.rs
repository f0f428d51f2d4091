// Collaborator boundaries for the OTA core.
//
// The orchestrator never touches hardware directly; the transport, flash,
// filesystem ledger, cache controller, digest verifier and reset line all
// sit behind these traits so the state machine can be driven by scripted
// implementations on the host.

use anyhow::Result;

use crate::ota::boot_control::ImageStatus;

#[cfg(test)]
pub mod mock;

/// Status sampled from a collaborator once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Ready,
    Busy,
    Error,
}

/// Opaque session handle returned by `Downloader::open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadHandle(pub u32);

/// Byte counters reported by the downloader for progress display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadProgress {
    pub server_image_length: u32,
    pub total_data_downloaded: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    WriteBack,
    WriteThrough,
}

/// Network transport fetching image bytes.
pub trait Downloader {
    fn open(&mut self, url: &str) -> Result<DownloadHandle>;
    /// Advances all open sessions; called once per orchestrator tick,
    /// whatever the top-level state.
    fn tick(&mut self);
    fn status(&mut self, handle: DownloadHandle) -> PollStatus;
    fn progress(&self) -> DownloadProgress;
    fn close(&mut self, handle: DownloadHandle);
}

/// Non-volatile memory driver for the boot-control sector.
pub trait FlashDriver {
    fn open(&mut self) -> Result<()>;
    fn erase(&mut self, offset: u32, len: usize) -> Result<()>;
    fn write(&mut self, offset: u32, data: &[u8]) -> Result<()>;
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<()>;
    /// True while an erase or program cycle is still running.
    fn busy(&mut self) -> bool;
    fn close(&mut self);
}

/// On-device image database backed by the filesystem.
pub trait ImageLedger {
    /// Removes the image directory. Best effort during factory reset.
    fn remove_image_dir(&mut self) -> Result<()>;
    fn record_image(&mut self, slot: u32, version: u32, digest: &str) -> PollStatus;
    fn set_image_status(&mut self, version: u32, status: ImageStatus) -> PollStatus;
    fn erase_image(&mut self, version: u32) -> PollStatus;
    fn free_sectors(&mut self) -> Result<u32>;
    fn write_file(&mut self, name: &str, data: &[u8]) -> Result<()>;
}

/// Cache-coherency control, forced to write-through for the duration of a
/// TLS-backed download.
pub trait CacheControl {
    fn policy(&self) -> CachePolicy;
    fn set_policy(&mut self, policy: CachePolicy);
    fn flush(&mut self);
}

/// Cryptographic check that downloaded bytes match the expected digest (and
/// optionally a signature).
pub trait DigestVerifier {
    fn verify(&mut self, expected_digest: &str, signature: Option<&str>) -> PollStatus;
}

/// Device restart, triggered once a new boot-control record is committed.
pub trait SystemControl {
    fn restart(&mut self);
}

/// SHA-256 digest verifier over an in-memory image copy.
///
/// Signature verification is a platform concern; this implementation accepts
/// any signature once the digest matches.
pub struct Sha256Verifier {
    image: Vec<u8>,
}

impl Sha256Verifier {
    pub fn new(image: Vec<u8>) -> Self {
        Self { image }
    }
}

impl DigestVerifier for Sha256Verifier {
    fn verify(&mut self, expected_digest: &str, _signature: Option<&str>) -> PollStatus {
        use sha2::{Digest, Sha256};

        let digest = Sha256::digest(&self.image);
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            use std::fmt::Write;
            let _ = write!(hex, "{:02x}", byte);
        }

        if hex.eq_ignore_ascii_case(expected_digest) {
            PollStatus::Ready
        } else {
            log::warn!("digest mismatch: expected {}, computed {}", expected_digest, hex);
            PollStatus::Error
        }
    }
}
