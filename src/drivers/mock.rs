// Scripted collaborators for exercising the state machine on the host.
// Each mock records the calls it sees and answers from a short script,
// defaulting to the "everything fine" response when the script runs dry.

use std::collections::VecDeque;

use anyhow::{bail, Result};

use super::{
    CacheControl, CachePolicy, DigestVerifier, DownloadHandle, DownloadProgress, Downloader,
    FlashDriver, ImageLedger, PollStatus, SystemControl,
};
use crate::ota::boot_control::ImageStatus;

#[derive(Default)]
pub struct ScriptedDownloader {
    /// Statuses returned per `status()` call; `Busy` once exhausted.
    pub statuses: VecDeque<PollStatus>,
    pub fail_open: bool,
    pub progress: DownloadProgress,
    pub opened_urls: Vec<String>,
    pub open_count: u32,
    pub close_count: u32,
    pub tick_count: u32,
    next_handle: u32,
}

impl Downloader for ScriptedDownloader {
    fn open(&mut self, url: &str) -> Result<DownloadHandle> {
        if self.fail_open {
            bail!("downloader open refused");
        }
        self.opened_urls.push(url.to_string());
        self.open_count += 1;
        self.next_handle += 1;
        Ok(DownloadHandle(self.next_handle))
    }

    fn tick(&mut self) {
        self.tick_count += 1;
    }

    fn status(&mut self, _handle: DownloadHandle) -> PollStatus {
        self.statuses.pop_front().unwrap_or(PollStatus::Busy)
    }

    fn progress(&self) -> DownloadProgress {
        self.progress
    }

    fn close(&mut self, _handle: DownloadHandle) {
        self.close_count += 1;
    }
}

/// Flash emulated over a RAM buffer, with a configurable number of busy
/// polls after each erase/program.
pub struct RamFlash {
    data: Vec<u8>,
    open: bool,
    busy_polls: u32,
    /// Busy polls reported after every erase or write.
    pub busy_after_op: u32,
    pub erase_count: u32,
    pub write_count: u32,
    pub close_count: u32,
}

impl RamFlash {
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0xFF; size],
            open: false,
            busy_polls: 0,
            busy_after_op: 0,
            erase_count: 0,
            write_count: 0,
            close_count: 0,
        }
    }

    /// Places bytes into the backing store without going through the driver.
    pub fn preload(&mut self, offset: u32, data: &[u8]) {
        let offset = offset as usize;
        self.data[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

impl FlashDriver for RamFlash {
    fn open(&mut self) -> Result<()> {
        self.open = true;
        Ok(())
    }

    fn erase(&mut self, offset: u32, len: usize) -> Result<()> {
        let offset = offset as usize;
        if offset + len > self.data.len() {
            bail!("erase beyond end of flash");
        }
        self.data[offset..offset + len].fill(0xFF);
        self.erase_count += 1;
        self.busy_polls = self.busy_after_op;
        Ok(())
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<()> {
        let offset = offset as usize;
        if offset + data.len() > self.data.len() {
            bail!("write beyond end of flash");
        }
        self.data[offset..offset + data.len()].copy_from_slice(data);
        self.write_count += 1;
        self.busy_polls = self.busy_after_op;
        Ok(())
    }

    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<()> {
        let offset = offset as usize;
        if offset + buf.len() > self.data.len() {
            bail!("read beyond end of flash");
        }
        buf.copy_from_slice(&self.data[offset..offset + buf.len()]);
        Ok(())
    }

    fn busy(&mut self) -> bool {
        if self.busy_polls > 0 {
            self.busy_polls -= 1;
            true
        } else {
            false
        }
    }

    fn close(&mut self) {
        self.open = false;
        self.close_count += 1;
    }
}

pub struct ScriptedLedger {
    pub fail_remove_dir: bool,
    pub fail_free_query: bool,
    pub free_sectors: u32,
    /// Per-call results; `Ready` once exhausted.
    pub record_results: VecDeque<PollStatus>,
    pub status_results: VecDeque<PollStatus>,
    pub erase_results: VecDeque<PollStatus>,
    pub removed_dirs: u32,
    pub recorded_images: Vec<(u32, u32, String)>,
    pub status_updates: Vec<(u32, ImageStatus)>,
    pub erased_versions: Vec<u32>,
    pub files: Vec<(String, Vec<u8>)>,
}

impl Default for ScriptedLedger {
    fn default() -> Self {
        Self {
            fail_remove_dir: false,
            fail_free_query: false,
            free_sectors: 1000,
            record_results: VecDeque::new(),
            status_results: VecDeque::new(),
            erase_results: VecDeque::new(),
            removed_dirs: 0,
            recorded_images: Vec::new(),
            status_updates: Vec::new(),
            erased_versions: Vec::new(),
            files: Vec::new(),
        }
    }
}

impl ImageLedger for ScriptedLedger {
    fn remove_image_dir(&mut self) -> Result<()> {
        if self.fail_remove_dir {
            bail!("directory remove operation failed");
        }
        self.removed_dirs += 1;
        Ok(())
    }

    fn record_image(&mut self, slot: u32, version: u32, digest: &str) -> PollStatus {
        self.recorded_images.push((slot, version, digest.to_string()));
        self.record_results.pop_front().unwrap_or(PollStatus::Ready)
    }

    fn set_image_status(&mut self, version: u32, status: ImageStatus) -> PollStatus {
        self.status_updates.push((version, status));
        self.status_results.pop_front().unwrap_or(PollStatus::Ready)
    }

    fn erase_image(&mut self, version: u32) -> PollStatus {
        self.erased_versions.push(version);
        self.erase_results.pop_front().unwrap_or(PollStatus::Ready)
    }

    fn free_sectors(&mut self) -> Result<u32> {
        if self.fail_free_query {
            bail!("sector information get operation failed");
        }
        Ok(self.free_sectors)
    }

    fn write_file(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.files.push((name.to_string(), data.to_vec()));
        Ok(())
    }
}

pub struct RecordingCache {
    policy: CachePolicy,
    pub set_calls: Vec<CachePolicy>,
    pub flushes: u32,
}

impl Default for RecordingCache {
    fn default() -> Self {
        Self {
            policy: CachePolicy::WriteBack,
            set_calls: Vec::new(),
            flushes: 0,
        }
    }
}

impl CacheControl for RecordingCache {
    fn policy(&self) -> CachePolicy {
        self.policy
    }

    fn set_policy(&mut self, policy: CachePolicy) {
        self.policy = policy;
        self.set_calls.push(policy);
    }

    fn flush(&mut self) {
        self.flushes += 1;
    }
}

#[derive(Default)]
pub struct ScriptedVerifier {
    /// Per-call results; `Ready` once exhausted.
    pub results: VecDeque<PollStatus>,
    pub calls: Vec<(String, Option<String>)>,
}

impl DigestVerifier for ScriptedVerifier {
    fn verify(&mut self, expected_digest: &str, signature: Option<&str>) -> PollStatus {
        self.calls
            .push((expected_digest.to_string(), signature.map(str::to_string)));
        self.results.pop_front().unwrap_or(PollStatus::Ready)
    }
}

#[derive(Default)]
pub struct FakeSystem {
    pub restarts: u32,
}

impl SystemControl for FakeSystem {
    fn restart(&mut self) {
        self.restarts += 1;
    }
}
