// Factory reset: disable downloaded images and invalidate the boot-control
// record so the external bootloader falls back to the factory image.

use log::{debug, warn};

use super::boot_control::BOOT_CTL_BLOCK_SIZE;
use crate::drivers::{FlashDriver, ImageLedger, PollStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    DisableImage,
    InvalidateBootCtl,
    Done,
}

/// Nested state machine driven from the top-level `FactoryReset` task, one
/// step per tick.
#[derive(Debug)]
pub struct FactoryResetFsm {
    state: State,
}

impl FactoryResetFsm {
    pub fn new() -> Self {
        Self { state: State::Init }
    }

    /// Advances one step. Returns `Busy` until the boot-control erase has
    /// settled, then `Ready`.
    pub fn poll<L, F>(&mut self, ledger: &mut L, flash: &mut F, boot_ctl_region: u32) -> PollStatus
    where
        L: ImageLedger,
        F: FlashDriver,
    {
        match self.state {
            State::Init => {
                self.state = State::DisableImage;
                PollStatus::Busy
            }
            State::DisableImage => {
                debug!("factory reset: removing image directory");
                if let Err(e) = ledger.remove_image_dir() {
                    // Best-effort cleanup; the reset proceeds regardless.
                    warn!("factory reset: image directory removal failed: {:?}", e);
                }
                self.state = State::InvalidateBootCtl;
                PollStatus::Busy
            }
            State::InvalidateBootCtl => {
                if let Err(e) = flash.open() {
                    warn!("factory reset: flash open failed: {:?}", e);
                }
                if let Err(e) = flash.erase(boot_ctl_region, BOOT_CTL_BLOCK_SIZE) {
                    warn!("factory reset: boot-control erase failed: {:?}", e);
                }
                self.state = State::Done;
                PollStatus::Busy
            }
            State::Done => {
                // The machine's only busy-wait point: hold here until the
                // erase cycle completes.
                if flash.busy() {
                    return PollStatus::Busy;
                }
                flash.close();
                PollStatus::Ready
            }
        }
    }
}

impl Default for FactoryResetFsm {
    fn default() -> Self {
        Self::new()
    }
}
