// Top-level OTA task state machine.
//
// Single-threaded and non-blocking: an external scheduler calls `tick()` at
// a regular cadence and each call advances the active task by at most one
// step. At most one operation is ever in flight; every entry point checks
// for the idle state before arming a task, and the check and the state
// change share the same non-preemptible tick context, which is the sole
// mutual-exclusion mechanism.

use anyhow::Result;
use log::{debug, error, info, warn};

use super::boot_control::{self, BootControlRecord, ImageStatus, ImageType};
use super::factory_reset::FactoryResetFsm;
use super::task::{OtaRequestParams, RequestCopy, TaskContext, TaskId, TaskParams};
use super::{OtaResult, SysStatus};
use crate::config::OtaConfig;
use crate::drivers::{
    CacheControl, CachePolicy, DigestVerifier, DownloadHandle, DownloadProgress, Downloader,
    FlashDriver, ImageLedger, PollStatus, SystemControl,
};

/// Callback informing the caller of an operation's final result. Registered
/// once, invoked synchronously from the tick that finishes the operation.
pub type CompletionCallback = Box<dyn FnMut(OtaResult) + Send>;

pub struct OtaOrchestrator<D, F, L, C, V, S> {
    config: OtaConfig,
    downloader: D,
    flash: F,
    ledger: L,
    cache: C,
    verifier: V,
    system: S,

    current_task: TaskId,
    context: TaskContext,
    params: TaskParams,
    request: RequestCopy,
    status: SysStatus,
    last_result: OtaResult,
    callback: Option<CompletionCallback>,
    download_handle: Option<DownloadHandle>,
    boot_record: Option<BootControlRecord>,
    erase_version: u32,
    tls_request: bool,
    cache_backup: Option<CachePolicy>,
    new_image_downloaded: bool,
    rollback_initiated: bool,
    idle: bool,
}

impl<D, F, L, C, V, S> OtaOrchestrator<D, F, L, C, V, S>
where
    D: Downloader,
    F: FlashDriver,
    L: ImageLedger,
    C: CacheControl,
    V: DigestVerifier,
    S: SystemControl,
{
    pub fn new(
        config: OtaConfig,
        downloader: D,
        flash: F,
        ledger: L,
        cache: C,
        verifier: V,
        system: S,
    ) -> Self {
        Self {
            config,
            downloader,
            flash,
            ledger,
            cache,
            verifier,
            system,
            current_task: TaskId::Init,
            context: TaskContext::None,
            params: TaskParams::default(),
            request: RequestCopy::default(),
            status: SysStatus::Uninitialized,
            last_result: OtaResult::None,
            callback: None,
            download_handle: None,
            boot_record: None,
            erase_version: 0,
            tls_request: false,
            cache_backup: None,
            new_image_downloaded: false,
            rollback_initiated: false,
            idle: false,
        }
    }

    // ---- entry points ------------------------------------------------

    /// Begins an image download. Returns `Error` when another operation is
    /// active or a precondition fails; the operation's outcome arrives
    /// through the completion callback.
    pub fn start(&mut self, params: &OtaRequestParams) -> SysStatus {
        if self.current_task != TaskId::Idle {
            return SysStatus::Error;
        }
        if self.config.check_free_sectors && self.disk_full() {
            warn!("OTA: no free sectors, download not possible");
            return SysStatus::Error;
        }

        let tls = is_tls_request(params.url);
        if self.config.enforce_tls && !tls {
            warn!("OTA: rejecting non-TLS download URL");
            return SysStatus::Error;
        }

        let request = match RequestCopy::capture(params, self.config.signature_verification) {
            Ok(request) => request,
            Err(e) => {
                warn!("OTA: rejecting request: {:?}", e);
                return SysStatus::Error;
            }
        };

        let handle = match self.downloader.open(params.url) {
            Ok(handle) => handle,
            Err(e) => {
                error!("OTA: downloader open failed: {:?}", e);
                return SysStatus::Error;
            }
        };

        self.tls_request = tls;
        if tls {
            // Force write-through for the life of the transfer so the
            // TLS stack and DMA see coherent memory.
            self.cache_backup = Some(self.cache.policy());
            self.cache.flush();
            self.cache.set_policy(CachePolicy::WriteThrough);
        }

        self.params.version = request.version;
        self.params.image_status = ImageStatus::Downloaded;
        self.params.platform_status = ImageStatus::Disabled;
        self.params.abort = false;
        self.request = request;
        self.download_handle = Some(handle);
        self.current_task = TaskId::DownloadImage;
        self.status = SysStatus::Busy;
        self.idle = false;
        SysStatus::Ready
    }

    /// Disables the currently running image so the bootloader falls back to
    /// the previous one. A no-op success when the device is already on the
    /// factory image.
    pub fn rollback(&mut self) -> SysStatus {
        if self.current_task != TaskId::Idle {
            return SysStatus::Error;
        }
        if let Some(record) = &self.boot_record {
            if record.image_type == ImageType::FactoryReset {
                return SysStatus::Ready;
            }
            self.params.version = record.version;
        }
        self.params.image_status = ImageStatus::Disabled;
        self.params.platform_status = ImageStatus::Disabled;
        self.params.abort = false;
        self.rollback_initiated = true;
        self.current_task = TaskId::SetImageStatus;
        self.status = SysStatus::Busy;
        self.idle = false;
        SysStatus::Ready
    }

    /// Wipes all downloaded images back to factory state.
    pub fn factory_reset(&mut self) -> SysStatus {
        if self.current_task != TaskId::Idle {
            debug!("OTA: factory reset refused, task active: {:?}", self.current_task);
            return SysStatus::Error;
        }
        self.context = TaskContext::FactoryReset(FactoryResetFsm::new());
        self.current_task = TaskId::FactoryReset;
        self.status = SysStatus::Ready;
        self.idle = false;
        SysStatus::Ready
    }

    /// Erases one downloaded image version from the ledger.
    pub fn erase_image(&mut self, version: u32) -> SysStatus {
        if self.current_task != TaskId::Idle {
            debug!("OTA: erase refused, task active: {:?}", self.current_task);
            return SysStatus::Error;
        }
        self.erase_version = version;
        self.current_task = TaskId::EraseImage;
        self.status = SysStatus::Busy;
        self.idle = false;
        SysStatus::Ready
    }

    /// Registers the completion callback. Succeeds exactly once; later calls
    /// fail and leave the existing registration intact.
    pub fn register_callback(&mut self, callback: CompletionCallback) -> SysStatus {
        if self.callback.is_some() {
            return SysStatus::Error;
        }
        self.callback = Some(callback);
        SysStatus::Ready
    }

    pub fn is_idle(&self) -> bool {
        self.idle
    }

    pub fn status(&self) -> SysStatus {
        self.status
    }

    pub fn last_result(&self) -> OtaResult {
        self.last_result
    }

    pub fn current_task(&self) -> TaskId {
        self.current_task
    }

    pub fn boot_record(&self) -> Option<&BootControlRecord> {
        self.boot_record.as_ref()
    }

    pub fn download_status(&self) -> DownloadProgress {
        self.downloader.progress()
    }

    /// Stores the factory image signature file in the ledger directory.
    pub fn store_factory_image_signature(&mut self, signature: &str) -> Result<()> {
        info!("OTA: storing factory image signature");
        let name = format!("{}/factory_image_sign.txt", self.config.image_dir);
        self.ledger.write_file(&name, signature.as_bytes())
    }

    /// Marks the downloaded image bootable and restarts the device. The one
    /// irreversible step; call it only after the download has been verified
    /// and recorded.
    pub fn commit_boot_control(&mut self) -> Result<()> {
        self.params.image_status = ImageStatus::Downloaded;
        self.params.platform_status = ImageStatus::Valid;
        boot_control::commit(
            &mut self.flash,
            &mut self.system,
            self.config.boot_ctl_region,
            self.request.version,
            self.config.boot_address,
        )
    }

    // ---- state machine -----------------------------------------------

    /// Scheduler entry point; advances the active task by at most one step.
    pub fn tick(&mut self) {
        match self.current_task {
            TaskId::Init => {
                self.current_task = TaskId::SetImageStatus;
                self.init_from_boot_record();
            }
            TaskId::SetImageStatus => {
                self.idle = false;
                let status = self
                    .ledger
                    .set_image_status(self.params.version, self.params.image_status);
                if status != PollStatus::Busy {
                    self.last_result = OtaResult::None;
                    if self.new_image_downloaded {
                        self.last_result = OtaResult::ImageStatusSet;
                    }
                    if self.rollback_initiated {
                        self.last_result = OtaResult::RollbackDone;
                    }
                    debug!("OTA: image status update done");
                    self.current_task = TaskId::UpdateUser;
                }
            }
            TaskId::UpdateUser => {
                self.idle = false;
                match self.last_result {
                    OtaResult::ImageDownloaded => {
                        self.current_task = TaskId::VerifyImageDigest;
                    }
                    OtaResult::ImageDigestVerifySuccess => {
                        self.current_task = TaskId::DatabaseEntry;
                    }
                    _ => {
                        self.current_task = TaskId::Idle;
                        self.idle = true;
                        self.finish_operation();
                    }
                }
            }
            TaskId::Idle => {
                self.idle = true;
            }
            TaskId::DownloadImage => {
                self.idle = false;
                let status = match self.download_handle {
                    Some(handle) => self.downloader.status(handle),
                    None => PollStatus::Error,
                };
                match status {
                    PollStatus::Ready => {
                        self.restore_cache_policy();
                        info!("OTA: image downloaded");
                        self.last_result = OtaResult::ImageDownloaded;
                        self.current_task = TaskId::UpdateUser;
                    }
                    PollStatus::Error => {
                        self.restore_cache_policy();
                        error!("OTA: download error");
                        self.last_result = OtaResult::ImageDownloadFailed;
                        self.current_task = TaskId::UpdateUser;
                    }
                    PollStatus::Busy => {}
                }
            }
            TaskId::VerifyImageDigest => {
                self.idle = false;
                let signature = if self.config.signature_verification {
                    Some(self.request.signature.as_str())
                } else {
                    None
                };
                match self.verifier.verify(self.request.digest.as_str(), signature) {
                    PollStatus::Ready => {
                        info!("OTA: image digest verified");
                        self.last_result = OtaResult::ImageDigestVerifySuccess;
                        self.new_image_downloaded = true;
                        self.current_task = TaskId::UpdateUser;
                    }
                    PollStatus::Error => {
                        error!("OTA: image verification error");
                        self.last_result = OtaResult::ImageDigestVerifyFailed;
                        self.current_task = TaskId::UpdateUser;
                    }
                    PollStatus::Busy => {}
                }
            }
            TaskId::DatabaseEntry => {
                self.idle = false;
                let status = self.ledger.record_image(
                    self.params.slot,
                    self.params.version,
                    self.request.digest.as_str(),
                );
                match status {
                    PollStatus::Ready => {
                        debug!("OTA: database entry recorded");
                        self.current_task = TaskId::SetImageStatus;
                    }
                    PollStatus::Error => {
                        error!("OTA: database entry error");
                        self.last_result = OtaResult::ImageDbEntryFailed;
                        self.current_task = TaskId::UpdateUser;
                    }
                    PollStatus::Busy => {}
                }
            }
            TaskId::FactoryReset => {
                self.idle = false;
                let status = match &mut self.context {
                    TaskContext::FactoryReset(fsm) => {
                        fsm.poll(&mut self.ledger, &mut self.flash, self.config.boot_ctl_region)
                    }
                    TaskContext::None => {
                        error!("OTA: factory reset armed without context");
                        PollStatus::Error
                    }
                };
                if status != PollStatus::Busy {
                    self.context = TaskContext::None;
                    self.last_result = OtaResult::FactoryResetSuccess;
                    self.current_task = TaskId::UpdateUser;
                }
            }
            TaskId::EraseImage => {
                self.idle = false;
                match self.ledger.erase_image(self.erase_version) {
                    PollStatus::Ready => {
                        info!("OTA: image version {} erased", self.erase_version);
                        self.last_result = OtaResult::ImageErased;
                        self.current_task = TaskId::UpdateUser;
                    }
                    PollStatus::Error => {
                        error!("OTA: image erase error");
                        self.last_result = OtaResult::ImageEraseFailed;
                        self.current_task = TaskId::UpdateUser;
                    }
                    PollStatus::Busy => {}
                }
            }
        }
        // In-flight transfers keep making progress whatever the top-level
        // state is.
        self.downloader.tick();
    }

    // ---- internals ----------------------------------------------------

    /// First-tick setup: populate the parameter block from the boot-control
    /// record the bootloader left behind. A factory-reset-typed record routes
    /// straight to the user update so the caller learns the device is back on
    /// the factory image.
    fn init_from_boot_record(&mut self) {
        match BootControlRecord::read(&mut self.flash, self.config.boot_ctl_region) {
            Ok(record) => {
                info!("OTA: booted image version {}", record.version);
                self.params.version = record.version;
                self.params.image_status = ImageStatus::Valid;
                self.params.platform_status = ImageStatus::Valid;
                self.params.abort = false;
                if record.image_type == ImageType::FactoryReset {
                    self.current_task = TaskId::UpdateUser;
                    self.status = SysStatus::Ready;
                }
                self.boot_record = Some(record);
            }
            Err(e) => {
                warn!("OTA: boot-control record unreadable: {:?}", e);
                self.boot_record = None;
            }
        }
    }

    /// Terminal step of every operation: release the downloader session
    /// (unless the result only marks a started transfer), report readiness
    /// and fire the completion callback once.
    fn finish_operation(&mut self) {
        let keep_open = matches!(
            self.last_result,
            OtaResult::ImageDownloadStart | OtaResult::PatchEventStart
        );
        if !keep_open {
            if let Some(handle) = self.download_handle.take() {
                self.downloader.close(handle);
            }
        }
        self.status = SysStatus::Ready;
        // One operation's flags must not leak into the next.
        self.new_image_downloaded = false;
        self.rollback_initiated = false;
        self.tls_request = false;
        if let Some(callback) = self.callback.as_mut() {
            callback(self.last_result);
        }
    }

    /// Restores the caller's cache policy after a TLS download, exactly once
    /// per transfer whatever the outcome.
    fn restore_cache_policy(&mut self) {
        if !self.tls_request {
            return;
        }
        if let Some(policy) = self.cache_backup.take() {
            self.cache.flush();
            self.cache.set_policy(policy);
        }
    }

    fn disk_full(&mut self) -> bool {
        match self.ledger.free_sectors() {
            Ok(free) => {
                debug!("OTA: free sectors: {}", free);
                free <= self.config.min_free_sectors
            }
            Err(e) => {
                warn!("OTA: free-sector query failed: {:?}", e);
                false
            }
        }
    }
}

/// Classifies the download URL by scheme prefix. Unknown schemes count as
/// plaintext.
fn is_tls_request(url: &str) -> bool {
    if url.starts_with("https:") {
        debug!("OTA: TLS request");
        return true;
    }
    if url.starts_with("http:") {
        debug!("OTA: non-TLS request");
    }
    false
}
