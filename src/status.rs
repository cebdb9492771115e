//! DFU states, status codes and the `DFU_GETSTATUS` reply.

/// DFU device state, as reported in `bState` of `DFU_GETSTATUS`
/// and by `DFU_GETSTATE`.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DfuState {
    /// Device is running its normal application.
    AppIdle = 0,
    /// Device is running its normal application, has received the DFU_DETACH request, and is waiting for a USB reset.
    AppDetach = 1,
    /// Device is operating in the DFU mode and is waiting for requests.
    DfuIdle = 2,
    /// Device has received a block and is waiting for the host to solicit the status via DFU_GETSTATUS.
    DfuDnloadSync = 3,
    /// Device is programming a control-write block into its nonvolatile memories.
    DfuDnBusy = 4,
    /// Device is processing a download operation. Expecting DFU_DNLOAD requests.
    DfuDnloadIdle = 5,
    /// Device has received the final block of firmware from the host and is waiting for receipt of DFU_GETSTATUS to begin the Manifestation phase.
    DfuManifestSync = 6,
    /// Device is in the Manifestation phase.
    DfuManifest = 7,
    /// Device has programmed its memories and is waiting for a USB reset or a power on reset.
    DfuManifestWaitReset = 8,
    /// The device is processing an upload operation. Expecting DFU_UPLOAD requests.
    DfuUploadIdle = 9,
    /// An error has occurred. Awaiting the DFU_CLRSTATUS request.
    DfuError = 10,
}

/// Status of the last operation, `bStatus` field of `DFU_GETSTATUS`.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DfuStatusCode {
    /// No error condition is present.
    Ok = 0x00,
    /// File is not targeted for use by this device.
    ErrTarget = 0x01,
    /// File is for this device but fails some vendor-specific verification test.
    ErrFile = 0x02,
    /// Device is unable to write memory.
    ErrWrite = 0x03,
    /// Memory erase function failed.
    ErrErase = 0x04,
    /// Memory erase check failed.
    ErrCheckErased = 0x05,
    /// Program memory function failed.
    ErrProg = 0x06,
    /// Programmed memory failed verification.
    ErrVerify = 0x07,
    /// Cannot program memory due to received address that is out of range.
    ErrAddress = 0x08,
    /// Received DFU_DNLOAD with wLength = 0, but device does not think it has all of the data yet.
    ErrNotdone = 0x09,
    /// Device’s firmware is corrupt. It cannot return to run-time (non-DFU) operations.
    ErrFirmware = 0x0A,
    /// iString indicates a vendor-specific error.
    ErrVendor = 0x0B,
    /// Device detected unexpected USB reset signaling.
    ErrUsbr = 0x0C,
    /// Device detected unexpected power on reset.
    ErrPOR = 0x0D,
    /// Something went wrong, but the device does not know what it was.
    ErrUnknown = 0x0E,
    /// Device stalled an unexpected request.
    ErrStalledPkt = 0x0F,
}

/// Errors that may happen when working with the memory
/// (reading, erasing, writing). These will be translated
/// to a corresponding error codes in DFU protocol.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DfuMemError {
    /// File is not targeted for use by this device.
    Target = DfuStatusCode::ErrTarget as u8,
    /// File is for this device but fails some vendor-specific verification test.
    File = DfuStatusCode::ErrFile as u8,
    /// Device is unable to write memory.
    Write = DfuStatusCode::ErrWrite as u8,
    /// Memory erase function failed.
    Erase = DfuStatusCode::ErrErase as u8,
    /// Memory erase check failed.
    CheckErased = DfuStatusCode::ErrCheckErased as u8,
    /// Program memory function failed.
    Prog = DfuStatusCode::ErrProg as u8,
    /// Programmed memory failed verification.
    Verify = DfuStatusCode::ErrVerify as u8,
    /// Something went wrong, but the device does not know what it was.
    Unknown = DfuStatusCode::ErrUnknown as u8,
    /// Cannot program memory due to received address that is out of range.
    Address = DfuStatusCode::ErrAddress as u8,
    /// A vendor-specific error. iString in DFU_GETSTATUS reply will always be 0.
    ErrVendor = DfuStatusCode::ErrVendor as u8,
}

/// Errors that may happen when device enter Manifestation phase
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DfuManifestationError {
    /// File is not targeted for use by this device.
    Target = DfuStatusCode::ErrTarget as u8,
    /// File is for this device but fails some vendor-specific verification test.
    File = DfuStatusCode::ErrFile as u8,
    /// Received DFU_DNLOAD with wLength = 0, but device does not think it has all of the data yet.
    NotDone = DfuStatusCode::ErrNotdone as u8,
    /// Device’s firmware is corrupt. It cannot return to run-time (non-DFU) operations.
    Firmware = DfuStatusCode::ErrFirmware as u8,
    /// A vendor-specific error. iString in DFU_GETSTATUS reply will always be 0.
    ErrVendor = DfuStatusCode::ErrVendor as u8,
    /// Something went wrong, but the device does not know what it was.
    Unknown = DfuStatusCode::ErrUnknown as u8,
}

impl From<DfuMemError> for DfuStatusCode {
    fn from(e: DfuMemError) -> Self {
        match e {
            DfuMemError::File => DfuStatusCode::ErrFile,
            DfuMemError::Target => DfuStatusCode::ErrTarget,
            DfuMemError::Address => DfuStatusCode::ErrAddress,
            DfuMemError::CheckErased => DfuStatusCode::ErrCheckErased,
            DfuMemError::Erase => DfuStatusCode::ErrErase,
            DfuMemError::Write => DfuStatusCode::ErrWrite,
            DfuMemError::Prog => DfuStatusCode::ErrProg,
            DfuMemError::Verify => DfuStatusCode::ErrVerify,
            DfuMemError::Unknown => DfuStatusCode::ErrUnknown,
            DfuMemError::ErrVendor => DfuStatusCode::ErrVendor,
        }
    }
}

impl From<DfuManifestationError> for DfuStatusCode {
    fn from(e: DfuManifestationError) -> Self {
        match e {
            DfuManifestationError::NotDone => DfuStatusCode::ErrNotdone,
            DfuManifestationError::Firmware => DfuStatusCode::ErrFirmware,
            DfuManifestationError::Unknown => DfuStatusCode::ErrUnknown,
            DfuManifestationError::ErrVendor => DfuStatusCode::ErrVendor,
            DfuManifestationError::File => DfuStatusCode::ErrFile,
            DfuManifestationError::Target => DfuStatusCode::ErrTarget,
        }
    }
}

/// A request was refused.
///
/// The state machine has already moved to [`DfuState::DfuError`] with
/// the contained status; the transport must stall the control endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Rejected(pub DfuStatusCode);

/// Largest value `bwPollTimeout` can carry.
pub const MAX_POLL_TIMEOUT_MS: u32 = 0x00ff_ffff;

/// Reply to `DFU_GETSTATUS`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DfuStatusRecord {
    /// Status of the last operation.
    pub status: DfuStatusCode,
    /// Time in milliseconds the host must wait before the next request.
    pub poll_timeout: u32,
    /// State the device enters right after this reply.
    pub state: DfuState,
    /// Index of status description in string table. Always `0`.
    pub string_index: u8,
}

impl From<DfuStatusRecord> for [u8; 6] {
    fn from(rec: DfuStatusRecord) -> Self {
        let timeout = rec.poll_timeout.min(MAX_POLL_TIMEOUT_MS);
        [
            // bStatus
            rec.status as u8,
            // bwPollTimeout
            (timeout & 0xff) as u8,
            ((timeout >> 8) & 0xff) as u8,
            ((timeout >> 16) & 0xff) as u8,
            // bState
            rec.state as u8,
            // iString
            rec.string_index,
        ]
    }
}
