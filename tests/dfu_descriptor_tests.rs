mod helpers;
use helpers::ramflash::*;
use helpers::*;

use usbd_class_tester::prelude::*;

use usb_device::bus::UsbBusAllocator;
use usbd_dfu_boot::*;

const DESC_CONFIGURATION: u8 = 2;
const DESC_STRING: u8 = 3;
const LANG_EN_US: u16 = 0x409;

pub struct FullMem(Board);

impl DfuMemIO for FullMem {
    type Flash = RamFlash;

    const REGION_BASE: u32 = 0x1000;
    const REGION_SIZE: u32 = 0x2000;
    const MEM_INFO_STRING: &'static str = "@Flash/0x08001000/8*1Kg";
    const DETACH_TIMEOUT: u16 = 0x1122;
    const BLOCK_PROGRAM_TIME_MS: u32 = 5;
    const PAGE_ERASE_TIME_MS: u32 = 20;

    fn flash(&mut self) -> &mut RamFlash {
        &mut self.0.flash
    }
}

/// Download only, must be reset after manifestation
pub struct MinimalMem(Board);

impl DfuMemIO for MinimalMem {
    type Flash = RamFlash;

    const REGION_BASE: u32 = 0;
    const REGION_SIZE: u32 = 0x4000;
    const MEM_INFO_STRING: &'static str = "@Flash/0x08000000/16*1Kf";
    const HAS_UPLOAD: bool = false;
    const MANIFESTATION_TOLERANT: bool = false;
    const WILL_DETACH: bool = false;
    const DETACH_TIMEOUT: u16 = 1000;
    const BLOCK_PROGRAM_TIME_MS: u32 = 5;
    const PAGE_ERASE_TIME_MS: u32 = 20;

    fn flash(&mut self) -> &mut RamFlash {
        &mut self.0.flash
    }
}

struct MkFull {}

impl UsbDeviceCtx for MkFull {
    type C<'c> = DfuClass<EmulatedUsbBus, FullMem, 64>;
    const EP0_SIZE: u8 = 32;

    fn create_class<'a>(
        &mut self,
        alloc: &'a UsbBusAllocator<EmulatedUsbBus>,
    ) -> AnyResult<DfuClass<EmulatedUsbBus, FullMem, 64>> {
        Ok(DfuClass::new(alloc, FullMem(Board::new(16 * 1024))))
    }
}

struct MkMinimal {}

impl UsbDeviceCtx for MkMinimal {
    type C<'c> = DfuClass<EmulatedUsbBus, MinimalMem, 128>;
    const EP0_SIZE: u8 = 32;

    fn create_class<'a>(
        &mut self,
        alloc: &'a UsbBusAllocator<EmulatedUsbBus>,
    ) -> AnyResult<DfuClass<EmulatedUsbBus, MinimalMem, 128>> {
        Ok(DfuClass::new(alloc, MinimalMem(Board::new(16 * 1024))))
    }
}

#[test]
fn test_get_configuration() {
    MkFull {}
        .with_usb(|mut dfu, mut dev| {
            let vec = dev
                .device_get_descriptor(&mut dfu, DESC_CONFIGURATION, 0, 0, 255)
                .expect("vec");

            assert_eq!(vec.len(), 27);

            // Interface
            assert_eq!(
                &vec[9..18],
                &[
                    9,    // bLength
                    4,    // bDescriptorType
                    0,    // bInterfaceNumber
                    0,    // bAlternateSetting
                    0,    // bNumEndpoints
                    0xfe, // bInterfaceClass
                    0x01, // bInterfaceSubClass
                    0x02, // bInterfaceProtocol: DFU mode
                    4,    // iInterface
                ]
            );

            // DFU functional
            assert_eq!(
                &vec[18..27],
                &[
                    9,    // bLength
                    0x21, // bDescriptorType
                    0x0f, // bmAttributes: detach, tolerant, upload, download
                    0x22, // wDetachTimeOut
                    0x11,
                    64, // wTransferSize
                    0,
                    0x1a, // bcdDFUVersion
                    0x01,
                ]
            );
        })
        .expect("with_usb");
}

#[test]
fn test_get_configuration_minimal() {
    MkMinimal {}
        .with_usb(|mut dfu, mut dev| {
            let vec = dev
                .device_get_descriptor(&mut dfu, DESC_CONFIGURATION, 0, 0, 255)
                .expect("vec");

            assert_eq!(vec.len(), 27);
            assert_eq!(&vec[18..27], &[9, 0x21, 0x01, 0xe8, 0x03, 128, 0, 0x1a, 0x01]);
        })
        .expect("with_usb");
}

#[test]
fn test_interface_string() {
    MkFull {}
        .with_usb(|mut dfu, mut dev| {
            let vec = dev
                .device_get_descriptor(&mut dfu, DESC_STRING, 4, LANG_EN_US, 255)
                .expect("vec");

            assert_eq!(vec.len(), 2 + FullMem::MEM_INFO_STRING.len() * 2);
            assert_eq!(&vec[0..2], &[vec.len() as u8, DESC_STRING]);

            let u16v: Vec<u16> = vec[2..]
                .chunks(2)
                .map(|v| (v[0] as u16) | ((v[1] as u16) << 8))
                .collect();
            let istr = String::from_utf16(&u16v).expect("utf16");

            assert_eq!(istr, FullMem::MEM_INFO_STRING);
        })
        .expect("with_usb");
}
