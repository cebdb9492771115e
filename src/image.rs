//! CRC trailer appended to downloaded images.
//!
//! An image checked during manifestation is laid out as the payload
//! followed by an 8 byte trailer:
//!
//! | offset          | size | field                                  |
//! |-----------------|------|----------------------------------------|
//! | 0               | len  | payload                                |
//! | len             | 4    | payload length, little endian          |
//! | len + 4         | 4    | CRC-32/ISO-HDLC of payload, little endian |
//!
//! The same CRC is produced by `crc32` of zlib, so host tools can append
//! the trailer with any standard library.

use crc::{Crc, CRC_32_ISO_HDLC};
use embedded_storage::nor_flash::ReadNorFlash;

use crate::status::DfuManifestationError;

/// Size of [`ImageTrailer`] in bytes.
pub const TRAILER_LEN: usize = 8;

const IMAGE_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

const READ_CHUNK: usize = 64;

/// Length and checksum of an image payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImageTrailer {
    /// Payload length in bytes, trailer excluded.
    pub payload_len: u32,
    /// CRC-32/ISO-HDLC of the payload.
    pub crc32: u32,
}

impl ImageTrailer {
    /// Compute the trailer for `payload`.
    pub fn for_payload(payload: &[u8]) -> Self {
        Self {
            payload_len: payload.len() as u32,
            crc32: IMAGE_CRC.checksum(payload),
        }
    }

    /// Decode a trailer.
    pub fn from_bytes(b: [u8; TRAILER_LEN]) -> Self {
        Self {
            payload_len: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            crc32: u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
        }
    }

    /// Encode a trailer.
    pub fn to_bytes(&self) -> [u8; TRAILER_LEN] {
        let l = self.payload_len.to_le_bytes();
        let c = self.crc32.to_le_bytes();
        [l[0], l[1], l[2], l[3], c[0], c[1], c[2], c[3]]
    }
}

/// Check the image of `image_len` bytes (trailer included) stored at
/// `base` in `flash`.
///
/// Fails with [`DfuManifestationError::Firmware`] if the image is too short to
/// hold a trailer, the trailer length disagrees with `image_len`, the CRC
/// does not match, or flash can't be read.
pub fn check_image<F: ReadNorFlash>(
    flash: &mut F,
    base: u32,
    image_len: u32,
) -> Result<ImageTrailer, DfuManifestationError> {
    if (image_len as usize) < TRAILER_LEN {
        return Err(DfuManifestationError::Firmware);
    }
    let payload_len = image_len - TRAILER_LEN as u32;

    let mut raw = [0u8; TRAILER_LEN];
    flash
        .read(base + payload_len, &mut raw)
        .map_err(|_| DfuManifestationError::Firmware)?;
    let trailer = ImageTrailer::from_bytes(raw);

    if trailer.payload_len != payload_len {
        warn!(
            "trailer length {} does not match image length {}",
            trailer.payload_len,
            payload_len
        );
        return Err(DfuManifestationError::Firmware);
    }

    let mut digest = IMAGE_CRC.digest();
    let mut chunk = [0u8; READ_CHUNK];
    let mut pos = 0;
    while pos < payload_len {
        let n = READ_CHUNK.min((payload_len - pos) as usize);
        flash
            .read(base + pos, &mut chunk[..n])
            .map_err(|_| DfuManifestationError::Firmware)?;
        digest.update(&chunk[..n]);
        pos += n as u32;
    }

    let crc = digest.finalize();
    if crc != trailer.crc32 {
        warn!("image crc {} expected {}", crc, trailer.crc32);
        return Err(DfuManifestationError::Firmware);
    }

    Ok(trailer)
}
