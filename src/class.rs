use core::marker::PhantomData;
use usb_device::{class_prelude::*, control::Request};

use crate::machine::DfuStateMachine;
use crate::memory::DfuMemIO;
use crate::request::DfuRequest;
use crate::status::{DfuState, DfuStatusCode};

const USB_CLASS_APPLICATION_SPECIFIC: u8 = 0xFE;
const USB_SUBCLASS_DFU: u8 = 0x01;
const USB_PROTOCOL_DFU_MODE: u8 = 0x02;

const DESC_DESCTYPE_DFU: u8 = 0x21;

/// DFU 1.1a
const BCD_DFU_VERSION: u16 = 0x011a;

/// DFU protocol USB class implementation for usb-device library.
///
/// Decodes DFU class requests addressed to its interface and forwards them
/// to a [`DfuStateMachine`]. `N` is the transfer size.
///
/// **Warning**: `N` must be less or equal to `usb-device`'s control endpoint
/// buffer size (`128` bytes unless the `control-buffer-256` feature is enabled),
/// otherwise data transfers may fail for no obvious reason.
pub struct DfuClass<B: UsbBus, M: DfuMemIO, const N: usize> {
    if_num: InterfaceNumber,
    interface_string: StringIndex,
    _bus: PhantomData<B>,
    machine: DfuStateMachine<M, N>,
}

impl<B: UsbBus, M: DfuMemIO, const N: usize> UsbClass<B> for DfuClass<B, M, N> {
    fn get_configuration_descriptors(
        &self,
        writer: &mut DescriptorWriter,
    ) -> usb_device::Result<()> {
        writer.interface_alt(
            self.if_num,
            0,
            USB_CLASS_APPLICATION_SPECIFIC,
            USB_SUBCLASS_DFU,
            USB_PROTOCOL_DFU_MODE,
            Some(self.interface_string),
        )?;

        let transfer_size = N as u16;

        // DFU Functional descriptor
        writer.write(
            DESC_DESCTYPE_DFU,
            &[
                // bmAttributes
                // Bit 7: bitAcceleratedST, Bit 4-6: Reserved
                // Bit 3: bitWillDetach
                (if M::WILL_DETACH {0x8} else {0}) |
                    // Bit 2: bitManifestationTolerant
                    (if M::MANIFESTATION_TOLERANT {0x4} else {0}) |
                    // Bit 1: bitCanUpload
                    (if M::HAS_UPLOAD {0x2} else {0}) |
                    // Bit 0: bitCanDnload
                    (if M::HAS_DOWNLOAD {0x1} else {0}),
                // wDetachTimeOut
                (M::DETACH_TIMEOUT & 0xff) as u8,
                (M::DETACH_TIMEOUT >> 8) as u8,
                // wTransferSize
                (transfer_size & 0xff) as u8,
                (transfer_size >> 8) as u8,
                // bcdDFUVersion
                (BCD_DFU_VERSION & 0xff) as u8,
                (BCD_DFU_VERSION >> 8) as u8,
            ],
        )?;

        Ok(())
    }

    fn get_string(&self, index: StringIndex, lang_id: LangID) -> Option<&str> {
        if index == self.interface_string && (lang_id == LangID::EN_US || u16::from(lang_id) == 0)
        {
            return Some(M::MEM_INFO_STRING);
        }
        None
    }

    // Handle control requests to the host.
    fn control_in(&mut self, xfer: ControlIn<B>) {
        let req = *xfer.request();

        if !self.is_for_us(&req) {
            return;
        }

        match Self::parse(&req) {
            Some(DfuRequest::Upload { block_num, length }) => {
                match self.machine.upload(block_num, length as usize) {
                    Ok(data) => {
                        xfer.accept_with(data).ok();
                    }
                    Err(_) => {
                        xfer.reject().ok();
                    }
                }
            }
            Some(DfuRequest::GetStatus { length }) if length >= 6 => {
                let v: [u8; 6] = self.machine.get_status().into();
                xfer.accept_with(&v).ok();
            }
            Some(DfuRequest::GetState { length }) if length >= 1 => {
                // return current state, without any state transition
                let v = self.machine.get_state() as u8;
                xfer.accept_with(&[v]).ok();
            }
            other => {
                debug!("stall IN request {}: {}", req.request, other);
                self.machine.protocol_violation();
                xfer.reject().ok();
            }
        }
    }

    // Handle a control request from the host.
    fn control_out(&mut self, xfer: ControlOut<B>) {
        let req = *xfer.request();

        if !self.is_for_us(&req) {
            return;
        }

        let res = match Self::parse(&req) {
            Some(DfuRequest::Detach { timeout_ms }) => self.machine.detach(timeout_ms),
            Some(DfuRequest::Dnload { block_num, .. }) => {
                self.machine.dnload(block_num, xfer.data())
            }
            Some(DfuRequest::ClrStatus) => self.machine.clear_status(),
            Some(DfuRequest::Abort) => self.machine.abort(),
            other => {
                debug!("stall OUT request {}: {}", req.request, other);
                Err(self.machine.protocol_violation())
            }
        };

        match res {
            Ok(()) => xfer.accept().ok(),
            Err(_) => xfer.reject().ok(),
        };
    }

    fn reset(&mut self) {
        self.machine.usb_reset();
    }
}

impl<B: UsbBus, M: DfuMemIO, const N: usize> DfuClass<B, M, N> {
    /// Creates a new DfuClass with the provided UsbBus and
    /// DfuMemIO
    pub fn new(alloc: &UsbBusAllocator<B>, mem: M) -> Self {
        Self {
            if_num: alloc.interface(),
            interface_string: alloc.string(),
            _bus: PhantomData,
            machine: DfuStateMachine::new(mem),
        }
    }

    fn is_for_us(&self, req: &Request) -> bool {
        req.request_type == control::RequestType::Class
            && req.recipient == control::Recipient::Interface
            && req.index == u8::from(self.if_num) as u16
    }

    // Known request with a data stage in the direction it was sent.
    fn parse(req: &Request) -> Option<DfuRequest> {
        DfuRequest::parse(req).filter(|r| r.direction() == req.direction)
    }

    /// This function may be called just after `DfuClass::new()` to
    /// set DFU error state to "Device detected unexpected power on reset"
    /// instead of the usual `dfuIdle`.
    pub fn set_unexpected_reset_state(&mut self) {
        self.machine.set_unexpected_reset_state();
    }

    /// This function may be called just after `DfuClass::new()` to
    /// set DFU error state to "Device’s firmware is corrupt. It cannot return to run-time (non-DFU) operations"
    /// instead of the usual `dfuIdle`.
    pub fn set_firmware_corrupted_state(&mut self) {
        self.machine.set_firmware_corrupted_state();
    }

    /// Current DFU state.
    pub fn state(&self) -> DfuState {
        self.machine.get_state()
    }

    /// Current DFU status.
    pub fn status(&self) -> DfuStatusCode {
        self.machine.status()
    }

    /// The underlying state machine.
    pub fn state_machine(&self) -> &DfuStateMachine<M, N> {
        &self.machine
    }

    /// Memory/flash implementation.
    pub fn memory(&self) -> &M {
        self.machine.memory()
    }

    /// Mutable memory/flash implementation.
    pub fn memory_mut(&mut self) -> &mut M {
        self.machine.memory_mut()
    }

    /// Destroy the class and return the memory implementation.
    pub fn release(self) -> M {
        self.machine.release()
    }
}
