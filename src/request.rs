//! DFU class requests.

use usb_device::control::Request;
use usb_device::UsbDirection;

/// `DFU_DETACH` bRequest code.
pub const DFU_DETACH: u8 = 0x00;
/// `DFU_DNLOAD` bRequest code.
pub const DFU_DNLOAD: u8 = 0x01;
/// `DFU_UPLOAD` bRequest code.
pub const DFU_UPLOAD: u8 = 0x02;
/// `DFU_GETSTATUS` bRequest code.
pub const DFU_GETSTATUS: u8 = 0x03;
/// `DFU_CLRSTATUS` bRequest code.
pub const DFU_CLRSTATUS: u8 = 0x04;
/// `DFU_GETSTATE` bRequest code.
pub const DFU_GETSTATE: u8 = 0x05;
/// `DFU_ABORT` bRequest code.
pub const DFU_ABORT: u8 = 0x06;

/// One of the seven DFU class requests, decoded from a setup packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DfuRequest {
    /// Leave DFU mode within `timeout_ms`.
    Detach {
        /// wValue
        timeout_ms: u16,
    },
    /// Host to device block transfer, `length == 0` ends the download.
    Dnload {
        /// wValue
        block_num: u16,
        /// wLength
        length: u16,
    },
    /// Device to host block transfer.
    Upload {
        /// wValue
        block_num: u16,
        /// wLength
        length: u16,
    },
    /// Query the 6 byte status record, may start pending work.
    GetStatus {
        /// wLength
        length: u16,
    },
    /// Leave `dfuERROR`.
    ClrStatus,
    /// Query the state, 1 byte.
    GetState {
        /// wLength
        length: u16,
    },
    /// Cancel the current download or upload.
    Abort,
}

impl DfuRequest {
    /// Decode a class request, `None` for an unknown `bRequest`.
    pub fn parse(req: &Request) -> Option<Self> {
        let r = match req.request {
            DFU_DETACH => DfuRequest::Detach {
                timeout_ms: req.value,
            },
            DFU_DNLOAD => DfuRequest::Dnload {
                block_num: req.value,
                length: req.length,
            },
            DFU_UPLOAD => DfuRequest::Upload {
                block_num: req.value,
                length: req.length,
            },
            DFU_GETSTATUS => DfuRequest::GetStatus { length: req.length },
            DFU_CLRSTATUS => DfuRequest::ClrStatus,
            DFU_GETSTATE => DfuRequest::GetState { length: req.length },
            DFU_ABORT => DfuRequest::Abort,
            _ => return None,
        };
        Some(r)
    }

    /// Direction of the data stage this request must use.
    pub fn direction(&self) -> UsbDirection {
        match self {
            DfuRequest::Upload { .. }
            | DfuRequest::GetStatus { .. }
            | DfuRequest::GetState { .. } => UsbDirection::In,
            DfuRequest::Detach { .. }
            | DfuRequest::Dnload { .. }
            | DfuRequest::ClrStatus
            | DfuRequest::Abort => UsbDirection::Out,
        }
    }
}
