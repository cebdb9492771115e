use embedded_storage::nor_flash::NorFlash;

use crate::status::{DfuManifestationError, DfuState, DfuStatusCode};

/// Trait that describes the device's flash and the bootloader configuration.
///
/// [`DfuStateMachine`](crate::machine::DfuStateMachine) will erase, program and
/// read flash through [`flash()`](DfuMemIO::flash), and will use the provided
/// constants to tailor DFU features and the time interval values reported
/// to the host.
///
/// # Interrupted downloads
///
/// Blocks are programmed as they arrive. Abort, detach or a USB reset in the
/// middle of a download erase the first page of the region, but after a power
/// loss the region holds the start of the new image followed by older data.
/// Boot code must check the image before it starts the application, for
/// example by saving `image_len` in [`manifestation()`](DfuMemIO::manifestation)
/// and passing it to [`image::check_image()`](crate::image::check_image).
pub trait DfuMemIO {
    /// Flash driver, only erase/write/read of address ranges is needed.
    type Flash: NorFlash;

    /// Offset of the application region in [`Flash`](DfuMemIO::Flash).
    ///
    /// Must be a multiple of the flash erase size.
    const REGION_BASE: u32;

    /// Size of the application region in bytes.
    ///
    /// Must be a multiple of the flash erase size.
    const REGION_SIZE: u32;

    /// Specifies USB interface descriptor string. It should describe a memory region this interface works with.
    ///
    /// The string is formatted as follows:
    ///
    /// @ *name*/*address*/*area*[,*area*...]
    ///
    /// > *name* - Region name, e.g. "Flash"
    ///
    /// > *address* - Memory address of a regions, e.g. "0x08000000"
    ///
    /// > *area* - count of pages, page size, and supported operations for the region, e.g. 8*1Ke - 8 pages of 1024 bytes, available for reading and writing.
    ///
    /// For example:
    /// ```text
    /// @Flash/0x08004000/112*1Kg
    /// ```
    const MEM_INFO_STRING: &'static str;

    /// If set, DFU descriptor will have *bitCanDnload* bit set. Default is `true`.
    ///
    /// If not set, every `DFU_DNLOAD` request is stalled.
    const HAS_DOWNLOAD: bool = true;

    /// If set, DFU descriptor will have *bitCanUpload* bit set. Default is `true`.
    ///
    /// If not set, `DFU_UPLOAD` moves the device to `dfuERROR` with
    /// [`UPLOAD_UNSUPPORTED_STATUS`](DfuMemIO::UPLOAD_UNSUPPORTED_STATUS).
    const HAS_UPLOAD: bool = true;

    /// Status reported when `DFU_UPLOAD` is received and upload is not supported.
    /// Default is [`DfuStatusCode::ErrUnknown`].
    const UPLOAD_UNSUPPORTED_STATUS: DfuStatusCode = DfuStatusCode::ErrUnknown;

    /// If set, DFU descriptor will have *bitManifestationTolerant* bit set. Default is `true`.
    ///
    /// A tolerant device returns to `dfuIDLE` after manifestation, otherwise it
    /// waits for a USB reset in `dfuMANIFEST-WAIT-RESET`.
    const MANIFESTATION_TOLERANT: bool = true;

    /// If set, DFU descriptor will have *bitWillDetach* bit set. Default is `true`.
    ///
    /// The device generates a detach-attach sequence itself on `DFU_DETACH`,
    /// see [`detach()`](DfuMemIO::detach).
    const WILL_DETACH: bool = true;

    /// wDetachTimeOut field in DFU descriptor. Default value: `250` ms.
    ///
    /// Upper bound of the timeout passed to [`detach()`](DfuMemIO::detach).
    const DETACH_TIMEOUT: u16 = 250;

    /// Block number of the first `DFU_DNLOAD` of a download. Default is `0`.
    const FIRST_BLOCK_NUMBER: u16 = 0;

    /// Read back every programmed block and compare it with the received data.
    /// Default is `true`.
    const VERIFY_AFTER_PROGRAM: bool = true;

    /// Check the CRC trailer (see [`image`](crate::image)) of the downloaded
    /// image before manifestation. Default is `false`.
    const CHECK_IMAGE_TRAILER: bool = false;

    /// Time in milliseconds host must wait before issuing the next command after
    /// a block program request, erase excluded.
    ///
    /// This is the time that program of one block of transfer size bytes takes.
    const BLOCK_PROGRAM_TIME_MS: u32;

    /// Time in milliseconds one page erase takes. It's added to the reported
    /// poll timeout for every page a block reaches that was not erased yet.
    const PAGE_ERASE_TIME_MS: u32;

    /// Time in milliseconds host must wait after the final `DFU_GETSTATUS` that
    /// started manifestation. Default is `1` ms.
    const MANIFESTATION_TIME_MS: u32 = 1;

    /// Access the flash driver.
    fn flash(&mut self) -> &mut Self::Flash;

    /// Finish writing firmware to a persistent storage, and optionally activate it.
    ///
    /// Called with the number of downloaded bytes once all blocks are
    /// programmed (and the trailer checked, if enabled). An error moves
    /// the device to `dfuERROR`. Default implementation accepts the image.
    fn manifestation(&mut self, image_len: u32) -> Result<(), DfuManifestationError> {
        let _ = image_len;
        Ok(())
    }

    /// Called on an accepted `DFU_DETACH`, with the timeout requested by the
    /// host limited to [`DETACH_TIMEOUT`](DfuMemIO::DETACH_TIMEOUT).
    ///
    /// If [`WILL_DETACH`](DfuMemIO::WILL_DETACH) is `true`, the device should
    /// reset itself within the timeout.
    fn detach(&mut self, timeout_ms: u16) {
        let _ = timeout_ms;
    }

    /// Called every time when USB is reset, with the state the device was in.
    ///
    /// In [`DfuState::DfuManifestWaitReset`] the new firmware is ready: switch
    /// to it, this function does not need to return.
    ///
    /// Handler will need to distinguish between actual host resets and
    /// when the device connects the first time at startup to avoid
    /// device reset and revert to main firmware at boot.
    fn usb_reset(&mut self, state: DfuState) {
        let _ = state;
    }
}
