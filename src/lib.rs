#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
//!
//! DFU 1.1a bootloader core for a `usb-device` device.
//!
//! ## About
//!
//! A device that is upgraded with DFU usually carries two firmwares:
//! a large main application, and a small bootloader that either starts
//! the application or stays in "firmware update" mode. This crate is the
//! protocol and programming part of such a bootloader:
//!
//! * [`DfuClass`] decodes DFU class requests on the control endpoint,
//! * [`DfuStateMachine`] implements DFU states and transitions,
//! * [`TransferBlock`](block::TransferBlock) collects downloaded blocks
//!   and checks that they arrive in order,
//! * [`FlashProgrammer`](flash::FlashProgrammer) erases, programs and
//!   verifies a flash region through [`embedded_storage::nor_flash::NorFlash`].
//!
//! The library user provides the flash driver and the board specific hooks
//! (manifestation, detach, reset) by implementing [`DfuMemIO`].
//!
//! ### Supported operations
//!
//! * Download (host to device) of an image into the application region,
//!   block `n` is programmed at `n * N` bytes from the start of the region.
//! * Upload (device to host) of the application region.
//! * Optional CRC-32 check of the downloaded image, see [`image`].
//! * Detach, abort, and error recovery with `DFU_CLRSTATUS`.
//!
//! ### Limitations
//!
//! * Erase, program and manifestation run inside `DFU_GETSTATUS`, while
//!   `usb_dev.poll()` is executing. A slow flash blocks the USB stack for
//!   the duration of one block.
//!
//! * Maximum transfer size is limited to what `usb-device` supports
//!   for control endpoint transfers, which is `128` bytes by default.
//!
//! * iString field in `DFU_GETSTATUS` is always `0`.
//!
//! * A power loss during a download leaves a partial image in flash, see
//!   [`DfuMemIO`] for the check boot code has to make.
//!
//! ## Logging
//!
//! With the `defmt` feature enabled, state changes, errors and flash
//! operations are logged with `defmt`.
//!
//! ## Example
//!
//! The example below focuses on [`DfuClass`], target controller
//! initialization (USB, clocks, interrupts) is not in the scope of the example.
//!
//! ```no_run
//! use embedded_storage::nor_flash::{
//!     ErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash,
//! };
//! use usb_device::bus::{UsbBus, UsbBusAllocator};
//! use usb_device::prelude::*;
//! use usbd_dfu_boot::*;
//!
//! // A flash driver, usually provided by a HAL.
//! struct Flash {
//!     mem: [u8; 16 * 1024],
//! }
//!
//! impl ErrorType for Flash {
//!     type Error = NorFlashErrorKind;
//! }
//!
//! impl ReadNorFlash for Flash {
//!     const READ_SIZE: usize = 1;
//!
//!     fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
//!         let start = offset as usize;
//!         let src = self
//!             .mem
//!             .get(start..start + bytes.len())
//!             .ok_or(NorFlashErrorKind::OutOfBounds)?;
//!         bytes.copy_from_slice(src);
//!         Ok(())
//!     }
//!
//!     fn capacity(&self) -> usize {
//!         self.mem.len()
//!     }
//! }
//!
//! impl NorFlash for Flash {
//!     const WRITE_SIZE: usize = 4;
//!     const ERASE_SIZE: usize = 1024;
//!
//!     fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
//!         let dst = self
//!             .mem
//!             .get_mut(from as usize..to as usize)
//!             .ok_or(NorFlashErrorKind::OutOfBounds)?;
//!         dst.fill(0xff);
//!         Ok(())
//!     }
//!
//!     fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
//!         let start = offset as usize;
//!         let dst = self
//!             .mem
//!             .get_mut(start..start + bytes.len())
//!             .ok_or(NorFlashErrorKind::OutOfBounds)?;
//!         dst.iter_mut().zip(bytes).for_each(|(d, s)| *d &= *s);
//!         Ok(())
//!     }
//! }
//!
//! // The application lives after a 4K bootloader.
//! struct Bootloader {
//!     flash: Flash,
//! }
//!
//! impl DfuMemIO for Bootloader {
//!     type Flash = Flash;
//!
//!     const REGION_BASE: u32 = 4 * 1024;
//!     const REGION_SIZE: u32 = 12 * 1024;
//!     const MEM_INFO_STRING: &'static str = "@Flash/0x08001000/12*1Kg";
//!     const BLOCK_PROGRAM_TIME_MS: u32 = 8;
//!     const PAGE_ERASE_TIME_MS: u32 = 50;
//!
//!     fn flash(&mut self) -> &mut Flash {
//!         &mut self.flash
//!     }
//!
//!     fn manifestation(&mut self, _image_len: u32) -> Result<(), DfuManifestationError> {
//!         // Nothing to do to activate the image
//!         Ok(())
//!     }
//! }
//!
//! fn run<B: UsbBus>(usb_bus_alloc: &UsbBusAllocator<B>) -> ! {
//!     let mem = Bootloader {
//!         flash: Flash { mem: [0xff; 16 * 1024] },
//!     };
//!
//!     // 128 byte blocks
//!     let mut dfu: DfuClass<B, Bootloader, 128> = DfuClass::new(usb_bus_alloc, mem);
//!
//!     let mut usb_dev = UsbDeviceBuilder::new(usb_bus_alloc, UsbVidPid(0x1209, 0x0001))
//!         .build();
//!
//!     loop {
//!         // usb_dev.poll() must be called periodically, usually from USB
//!         // interrupt handlers. Flash work happens inside.
//!         usb_dev.poll(&mut [&mut dfu]);
//!     }
//! }
//! ```
//!
//! ## DFU utilities
//!
//! * [dfu-util](http://dfu-util.sourceforge.net/)
//! * [dfu-programmer](https://dfu-programmer.github.io/)
//! * [dfu](https://crates.io/crates/dfu)
//!

#[macro_use]
mod fmt;

pub mod block;
/// DFU protocol USB class
pub mod class;
pub mod flash;
pub mod image;
pub mod machine;
/// Device memory and bootloader configuration
pub mod memory;
pub mod request;
pub mod status;

#[doc(inline)]
pub use crate::class::DfuClass;
#[doc(inline)]
pub use crate::machine::DfuStateMachine;
#[doc(inline)]
pub use crate::memory::DfuMemIO;
#[doc(inline)]
pub use crate::status::{
    DfuManifestationError, DfuMemError, DfuState, DfuStatusCode, DfuStatusRecord, Rejected,
};
