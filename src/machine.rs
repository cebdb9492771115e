//! DFU protocol state machine.
//!
//! [`DfuStateMachine`] owns everything that changes while the bootloader
//! runs: state, status, the block being downloaded and the upload
//! cursor. Each DFU request maps to one method, invalid requests move the
//! machine to `dfuERROR` and return [`Rejected`].
//!
//! Flash work is never done inside `DFU_DNLOAD`. A received block only
//! moves the machine to `dfuDNLOAD-SYNC`; the following `DFU_GETSTATUS`
//! erases and programs it before the reply is built, so the reply always
//! carries the outcome. Manifestation is started the same way from
//! `dfuMANIFEST-SYNC`.

use core::cmp::min;

use embedded_storage::nor_flash::NorFlash;

use crate::block::TransferBlock;
use crate::flash::{FlashProgrammer, FlashRegion};
use crate::image;
use crate::memory::DfuMemIO;
use crate::status::{DfuState, DfuStatusCode, DfuStatusRecord, Rejected, MAX_POLL_TIMEOUT_MS};

/// DFU protocol state, the download pipeline and the user's [`DfuMemIO`].
///
/// `N` is the transfer size (`wTransferSize`).
pub struct DfuStateMachine<M: DfuMemIO, const N: usize> {
    state: DfuState,
    status: DfuStatusCode,
    poll_timeout: u32,
    block: TransferBlock<N>,
    upload_cursor: u32,
    // length of the last manifested image, uploads stop there
    image_len: Option<u32>,
    programmer: FlashProgrammer,
    // error reported after construction and after every USB reset
    boot_status: Option<DfuStatusCode>,
    mem: M,
}

impl<M: DfuMemIO, const N: usize> DfuStateMachine<M, N> {
    const LAYOUT_OK: () = {
        assert!(N > 0 && N <= u16::MAX as usize, "transfer size must fit in wTransferSize");
        assert!(
            N % <M::Flash as NorFlash>::WRITE_SIZE == 0,
            "transfer size must be a multiple of flash write size"
        );
        assert!(
            M::REGION_BASE as usize % <M::Flash as NorFlash>::ERASE_SIZE == 0,
            "region base must be page aligned"
        );
        assert!(
            M::REGION_SIZE as usize % <M::Flash as NorFlash>::ERASE_SIZE == 0,
            "region size must be a multiple of page size"
        );
    };

    /// Creates a state machine in `dfuIDLE` with status `OK`.
    pub fn new(mem: M) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::LAYOUT_OK;

        let region = FlashRegion::new(
            M::REGION_BASE,
            M::REGION_SIZE,
            <M::Flash as NorFlash>::ERASE_SIZE as u32,
        );

        Self {
            state: DfuState::DfuIdle,
            status: DfuStatusCode::Ok,
            poll_timeout: 0,
            block: TransferBlock::new(),
            upload_cursor: 0,
            image_len: None,
            programmer: FlashProgrammer::new(region),
            boot_status: None,
            mem,
        }
    }

    /// Current state.
    pub fn get_state(&self) -> DfuState {
        self.state
    }

    /// Current status.
    pub fn status(&self) -> DfuStatusCode {
        self.status
    }

    /// Current upload offset in the region.
    pub fn upload_cursor(&self) -> u32 {
        self.upload_cursor
    }

    /// Length of the image accepted by the last manifestation, if any.
    ///
    /// An upload returns this many bytes. Without a manifested image
    /// (after boot, or once a new download started) the whole region is
    /// uploaded.
    pub fn image_len(&self) -> Option<u32> {
        self.image_len
    }

    /// Memory/flash implementation.
    pub fn memory(&self) -> &M {
        &self.mem
    }

    /// Mutable memory/flash implementation.
    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.mem
    }

    /// Consume the state machine and return the memory implementation.
    pub fn release(self) -> M {
        self.mem
    }

    /// This function may be called just after `new()` to set DFU error state to
    /// "Device detected unexpected power on reset" instead of the usual `dfuIdle`.
    ///
    /// The error is kept across USB resets until the host clears it.
    pub fn set_unexpected_reset_state(&mut self) {
        self.set_boot_status(DfuStatusCode::ErrPOR);
    }

    /// This function may be called just after `new()` to set DFU error state to
    /// "Device’s firmware is corrupt. It cannot return to run-time (non-DFU) operations"
    /// instead of the usual `dfuIdle`.
    ///
    /// The error is kept across USB resets until the host clears it.
    pub fn set_firmware_corrupted_state(&mut self) {
        self.set_boot_status(DfuStatusCode::ErrFirmware);
    }

    fn set_boot_status(&mut self, status: DfuStatusCode) {
        self.boot_status = Some(status);
        self.new_state_status(DfuState::DfuError, status);
    }

    fn new_state_ok(&mut self, state: DfuState) {
        self.new_state_status(state, DfuStatusCode::Ok);
    }

    fn new_state_status(&mut self, state: DfuState, status: DfuStatusCode) {
        self.status = status;
        self.state = state;
    }

    fn end_session(&mut self) {
        self.block.clear();
        self.upload_cursor = 0;
        self.poll_timeout = 0;
    }

    fn enter_error(&mut self, status: DfuStatusCode) {
        warn!("{} -> dfuERROR, status {}", self.state, status);
        self.end_session();
        self.new_state_status(DfuState::DfuError, status);
    }

    fn reject(&mut self, status: DfuStatusCode) -> Rejected {
        self.enter_error(status);
        Rejected(status)
    }

    /// Handle a request that is not valid in the current state, or is malformed.
    ///
    /// Moves to `dfuERROR` with `errSTALLEDPKT`, the transfer must be stalled.
    pub fn protocol_violation(&mut self) -> Rejected {
        self.reject(DfuStatusCode::ErrStalledPkt)
    }

    // Drop the session; a download that programmed flash but was not
    // manifested leaves an invalidated image behind.
    fn discard_session(&mut self) -> Result<(), DfuStatusCode> {
        self.end_session();
        self.programmer
            .invalidate(self.mem.flash())
            .map_err(DfuStatusCode::from)
    }

    /// `DFU_DETACH`: return to `dfuIDLE` and let the device leave DFU mode.
    ///
    /// Valid in `dfuIDLE`, `dfuDNLOAD-IDLE` and `dfuUPLOAD-IDLE`.
    pub fn detach(&mut self, timeout_ms: u16) -> Result<(), Rejected> {
        match self.state {
            DfuState::DfuIdle | DfuState::DfuDnloadIdle | DfuState::DfuUploadIdle => {
                if let Err(e) = self.discard_session() {
                    return Err(self.reject(e));
                }
                self.new_state_ok(DfuState::DfuIdle);

                let timeout = min(timeout_ms, M::DETACH_TIMEOUT);
                info!("detach, timeout {} ms", timeout);
                self.mem.detach(timeout);
                Ok(())
            }
            _ => Err(self.protocol_violation()),
        }
    }

    /// `DFU_DNLOAD`: buffer a block, or end the download with an empty one.
    ///
    /// Valid in `dfuIDLE` (first block) and `dfuDNLOAD-IDLE`.
    pub fn dnload(&mut self, block_num: u16, data: &[u8]) -> Result<(), Rejected> {
        if !M::HAS_DOWNLOAD {
            return Err(self.protocol_violation());
        }

        match (self.state, data.is_empty()) {
            (DfuState::DfuIdle, false) => {
                debug!("download started");
                self.programmer.begin_session();
                self.block.begin(M::FIRST_BLOCK_NUMBER);
            }
            (DfuState::DfuDnloadIdle, false) => {}
            (DfuState::DfuDnloadIdle, true) => {
                debug!(
                    "download done, {} blocks, {} bytes",
                    self.block.blocks_accepted(),
                    self.block.bytes_accepted()
                );
                self.poll_timeout = 0;
                self.new_state_ok(DfuState::DfuManifestSync);
                return Ok(());
            }
            _ => return Err(self.protocol_violation()),
        }

        if let Err(e) = self.block.accept(block_num, data) {
            return Err(self.reject(e.into()));
        }

        let offset = self.block.target_offset();
        if !self.programmer.region().contains(offset, data.len()) {
            warn!("block {} at {} is outside of the region", block_num, offset);
            return Err(self.reject(DfuStatusCode::ErrAddress));
        }

        trace!("block {}, {} bytes", block_num, data.len());
        self.new_state_ok(DfuState::DfuDnloadSync);
        Ok(())
    }

    /// `DFU_UPLOAD`: read up to `length` bytes (at most `N`) at the upload cursor.
    ///
    /// Valid in `dfuIDLE` (starts from the beginning of the region) and
    /// `dfuUPLOAD-IDLE`. The upload ends with a reply shorter than requested,
    /// at the end of the manifested image or of the region, see
    /// [`image_len()`](Self::image_len).
    pub fn upload(&mut self, block_num: u16, length: usize) -> Result<&[u8], Rejected> {
        if !M::HAS_UPLOAD {
            return Err(self.reject(M::UPLOAD_UNSUPPORTED_STATUS));
        }

        match self.state {
            DfuState::DfuIdle => {
                debug!("upload started");
                self.upload_cursor = 0;
            }
            DfuState::DfuUploadIdle => {}
            _ => return Err(self.protocol_violation()),
        }

        let want = min(length, N);
        if want == 0 {
            return Err(self.protocol_violation());
        }

        let end = self.image_len.unwrap_or(M::REGION_SIZE);
        let len = min(want, end.saturating_sub(self.upload_cursor) as usize);

        let res = self.programmer.read(
            self.mem.flash(),
            self.upload_cursor,
            &mut self.block.buffer_mut()[..len],
        );

        match res {
            Ok(n) => {
                trace!("upload block {} at {}, {} bytes", block_num, self.upload_cursor, n);
                self.upload_cursor += n as u32;
                if n < want {
                    // short frame, back to idle
                    self.upload_cursor = 0;
                    self.new_state_ok(DfuState::DfuIdle);
                } else {
                    self.new_state_ok(DfuState::DfuUploadIdle);
                }
                Ok(&self.block.buffer()[..n])
            }
            Err(e) => Err(self.reject(e.into())),
        }
    }

    /// `DFU_GETSTATUS`: report status, running pending work first.
    ///
    /// Valid in every state.
    pub fn get_status(&mut self) -> DfuStatusRecord {
        match self.state {
            DfuState::DfuDnloadSync => self.program_pending_block(),
            DfuState::DfuDnBusy => {
                self.poll_timeout = 0;
                self.new_state_ok(DfuState::DfuDnloadIdle);
            }
            DfuState::DfuManifestSync => self.manifest(),
            DfuState::DfuManifest => {
                self.poll_timeout = 0;
                if M::MANIFESTATION_TOLERANT {
                    self.new_state_ok(DfuState::DfuIdle);
                } else {
                    self.new_state_ok(DfuState::DfuManifestWaitReset);
                }
            }
            _ => {
                self.poll_timeout = 0;
            }
        }

        DfuStatusRecord {
            status: self.status,
            poll_timeout: self.poll_timeout,
            state: self.state,
            string_index: 0,
        }
    }

    /// Poll timeout for programming `len` bytes at `offset`.
    fn expected_timeout(&self, offset: u32, len: usize) -> u32 {
        let pages = self.programmer.pages_to_erase(offset, len);
        M::BLOCK_PROGRAM_TIME_MS
            .saturating_add(pages.saturating_mul(M::PAGE_ERASE_TIME_MS))
            .min(MAX_POLL_TIMEOUT_MS)
    }

    fn program_pending_block(&mut self) {
        if !self.block.is_pending() {
            self.new_state_ok(DfuState::DfuDnloadIdle);
            return;
        }

        let offset = self.block.target_offset();
        let timeout = self.expected_timeout(offset, self.block.len());
        let data = self.block.padded(<M::Flash as NorFlash>::WRITE_SIZE);
        // the previous image is being overwritten
        self.image_len = None;

        let res =
            self.programmer
                .write_block(self.mem.flash(), offset, data, M::VERIFY_AFTER_PROGRAM);

        match res {
            Ok(()) => {
                self.block.commit();
                self.poll_timeout = timeout;
                self.new_state_ok(DfuState::DfuDnBusy);
            }
            Err(e) => {
                error!("block at {} failed: {}", offset, e);
                self.enter_error(e.into());
            }
        }
    }

    fn manifest(&mut self) {
        let image_len = self.block.bytes_accepted();

        let checked = if M::CHECK_IMAGE_TRAILER {
            image::check_image(self.mem.flash(), M::REGION_BASE, image_len).map(|_| ())
        } else {
            Ok(())
        };

        match checked.and_then(|()| self.mem.manifestation(image_len)) {
            Ok(()) => {
                info!("manifestation done, {} bytes", image_len);
                self.image_len = Some(image_len);
                self.programmer.mark_clean();
                self.end_session();
                self.poll_timeout = min(M::MANIFESTATION_TIME_MS, MAX_POLL_TIMEOUT_MS);
                self.new_state_ok(DfuState::DfuManifest);
            }
            Err(e) => {
                error!("manifestation failed: {}", e);
                self.enter_error(e.into());
            }
        }
    }

    /// `DFU_CLRSTATUS`: leave `dfuERROR`.
    pub fn clear_status(&mut self) -> Result<(), Rejected> {
        match self.state {
            DfuState::DfuError => {
                self.end_session();
                self.boot_status = None;
                self.new_state_ok(DfuState::DfuIdle);
                Ok(())
            }
            _ => Err(self.protocol_violation()),
        }
    }

    /// `DFU_ABORT`: drop the current download or upload, back to `dfuIDLE`.
    ///
    /// Valid in `dfuIDLE`, `dfuDNLOAD-SYNC`, `dfuDNLOAD-IDLE` and `dfuUPLOAD-IDLE`.
    pub fn abort(&mut self) -> Result<(), Rejected> {
        match self.state {
            DfuState::DfuIdle
            | DfuState::DfuUploadIdle
            | DfuState::DfuDnloadIdle
            | DfuState::DfuDnloadSync => {
                if let Err(e) = self.discard_session() {
                    return Err(self.reject(e));
                }
                self.new_state_ok(DfuState::DfuIdle);
                Ok(())
            }
            _ => Err(self.protocol_violation()),
        }
    }

    /// USB reset: back to the initial state from any state.
    ///
    /// The initial state is `dfuIDLE`/`OK`, or the error set by
    /// [`set_unexpected_reset_state()`](Self::set_unexpected_reset_state) or
    /// [`set_firmware_corrupted_state()`](Self::set_firmware_corrupted_state)
    /// if the host did not clear it yet.
    ///
    /// [`DfuMemIO::usb_reset`] is called first and may not return. Queued
    /// work is dropped and an image left partially programmed is invalidated.
    pub fn usb_reset(&mut self) {
        // may not return
        self.mem.usb_reset(self.state);

        if self.state != DfuState::DfuIdle {
            info!("USB reset in {}", self.state);
        }

        if let Err(e) = self.discard_session() {
            warn!("image invalidation failed: {}", e);
        }
        match self.boot_status {
            Some(status) => self.new_state_status(DfuState::DfuError, status),
            None => self.new_state_ok(DfuState::DfuIdle),
        }
    }
}
