//! Erase-aligned, block-granular programming of a flash region.
//!
//! [`FlashProgrammer`] keeps track of which part of the region was erased
//! during the current download session and how far it has been programmed.
//! A program request is only forwarded to the flash driver when the whole
//! target range lies in pages erased since they were last written, so
//! flash bits are never programmed twice without an erase in between.
//!
//! All offsets taken by the methods here are relative to the start
//! of the [`FlashRegion`].

use embedded_storage::nor_flash::{NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash};

use crate::status::DfuMemError;

/// Value of an erased flash byte.
pub const ERASED_BYTE: u8 = 0xff;

// Size of the stack buffer used for read-back checks.
const CHECK_CHUNK: usize = 32;

/// Part of a flash device that holds the application image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashRegion {
    /// Offset of the region in the flash device.
    pub base: u32,
    /// Region size in bytes.
    pub size: u32,
    /// Erase granularity (page size) in bytes.
    pub erase_size: u32,
}

impl FlashRegion {
    /// Describe a region of `size` bytes at `base` with `erase_size` pages.
    pub const fn new(base: u32, size: u32, erase_size: u32) -> Self {
        Self {
            base,
            size,
            erase_size,
        }
    }

    /// Returns `true` if `len` bytes at region offset `offset` are inside the region.
    pub fn contains(&self, offset: u32, len: usize) -> bool {
        offset as u64 + len as u64 <= self.size as u64
    }

    fn align_down(&self, offset: u32) -> u32 {
        offset - offset % self.erase_size
    }

    fn align_up(&self, offset: u32) -> u32 {
        match offset % self.erase_size {
            0 => offset,
            r => offset + (self.erase_size - r),
        }
    }
}

/// Programs blocks into a [`FlashRegion`], erasing pages on demand.
#[derive(Debug)]
pub struct FlashProgrammer {
    region: FlashRegion,
    // pages in [erased_start, erased_end) were erased in this session
    erased_start: u32,
    erased_end: u32,
    // bytes below written_end (and above erased_start) are programmed
    written_end: u32,
    // something was programmed that has not been manifested yet
    dirty: bool,
}

impl FlashProgrammer {
    /// Create a programmer for `region`. Nothing is considered erased.
    pub const fn new(region: FlashRegion) -> Self {
        Self {
            region,
            erased_start: 0,
            erased_end: 0,
            written_end: 0,
            dirty: false,
        }
    }

    /// Region this programmer writes to.
    pub fn region(&self) -> &FlashRegion {
        &self.region
    }

    /// Forget the erased window, a new download starts from scratch.
    pub fn begin_session(&mut self) {
        self.erased_start = 0;
        self.erased_end = 0;
        self.written_end = 0;
    }

    /// Returns `true` if data was programmed since the last
    /// [`mark_clean()`](FlashProgrammer::mark_clean) or
    /// [`invalidate()`](FlashProgrammer::invalidate).
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// End of the programmed area of the current session, relative to the
    /// start of the region.
    pub fn bytes_written(&self) -> u32 {
        self.written_end
    }

    /// The programmed image was accepted, it must not be invalidated anymore.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Number of pages that [`write_block()`](FlashProgrammer::write_block)
    /// will have to erase before `len` bytes can be programmed at `offset`.
    pub fn pages_to_erase(&self, offset: u32, len: usize) -> u32 {
        if !self.region.contains(offset, len) || len == 0 {
            return 0;
        }
        let end = self.region.align_up(offset + len as u32);
        let from = self.erase_from(offset);
        if end <= from {
            0
        } else {
            (end - from) / self.region.erase_size
        }
    }

    // First byte that still needs erasing for a write at `offset`.
    fn erase_from(&self, offset: u32) -> u32 {
        if self.erased_start <= offset && offset <= self.erased_end && self.erased_end > 0 {
            self.erased_end
        } else {
            self.region.align_down(offset)
        }
    }

    /// Erase all pages covering `len` bytes at `offset`, then check that
    /// they read back as erased.
    pub fn erase_region<F: NorFlash>(
        &mut self,
        flash: &mut F,
        offset: u32,
        len: usize,
    ) -> Result<(), DfuMemError> {
        if !self.region.contains(offset, len) {
            return Err(DfuMemError::Address);
        }
        if len == 0 {
            return Ok(());
        }

        let start = self.region.align_down(offset);
        let end = self.region.align_up(offset + len as u32);
        if end > self.region.size {
            return Err(DfuMemError::Address);
        }

        trace!("erase {}..{}", start, end);

        flash
            .erase(self.region.base + start, self.region.base + end)
            .map_err(erase_error)?;

        if start == self.erased_end && self.erased_end > 0 {
            self.erased_end = end;
        } else {
            self.erased_start = start;
            self.erased_end = end;
            self.written_end = start;
        }

        self.check_erased(flash, start, end)
    }

    fn check_erased<F: ReadNorFlash>(
        &self,
        flash: &mut F,
        start: u32,
        end: u32,
    ) -> Result<(), DfuMemError> {
        let mut chunk = [0u8; CHECK_CHUNK];
        let mut pos = start;

        while pos < end {
            let n = CHECK_CHUNK.min((end - pos) as usize);
            flash
                .read(self.region.base + pos, &mut chunk[..n])
                .map_err(|_| DfuMemError::CheckErased)?;
            if chunk[..n].iter().any(|b| *b != ERASED_BYTE) {
                warn!("page at {} is not erased", self.region.align_down(pos));
                return Err(DfuMemError::CheckErased);
            }
            pos += n as u32;
        }
        Ok(())
    }

    /// Program `bytes` at `offset`.
    ///
    /// `bytes.len()` must be a multiple of `F::WRITE_SIZE`. The whole range must be
    /// erased and not programmed since, otherwise the request fails with
    /// [`DfuMemError::Prog`] and flash is not touched.
    pub fn program<F: NorFlash>(
        &mut self,
        flash: &mut F,
        offset: u32,
        bytes: &[u8],
    ) -> Result<(), DfuMemError> {
        if !self.region.contains(offset, bytes.len()) {
            return Err(DfuMemError::Address);
        }
        if bytes.len() % F::WRITE_SIZE != 0 || offset as usize % F::WRITE_SIZE != 0 {
            return Err(DfuMemError::Prog);
        }

        let end = offset + bytes.len() as u32;
        if offset < self.erased_start || offset < self.written_end || end > self.erased_end {
            warn!("program {}..{} outside of erased area", offset, end);
            return Err(DfuMemError::Prog);
        }

        // Bits may be cleared even when the write fails.
        self.dirty = true;
        flash
            .write(self.region.base + offset, bytes)
            .map_err(program_error)?;
        self.written_end = end;
        Ok(())
    }

    /// Compare flash contents at `offset` with `bytes`.
    pub fn verify<F: ReadNorFlash>(
        &self,
        flash: &mut F,
        offset: u32,
        bytes: &[u8],
    ) -> Result<bool, DfuMemError> {
        if !self.region.contains(offset, bytes.len()) {
            return Err(DfuMemError::Address);
        }

        let mut chunk = [0u8; CHECK_CHUNK];
        for (i, expected) in bytes.chunks(CHECK_CHUNK).enumerate() {
            let pos = offset + (i * CHECK_CHUNK) as u32;
            let actual = &mut chunk[..expected.len()];
            flash
                .read(self.region.base + pos, actual)
                .map_err(|_| DfuMemError::Verify)?;
            if actual != expected {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Write one downloaded block: erase the pages it reaches that are
    /// not erased yet, program it and optionally read it back.
    pub fn write_block<F: NorFlash>(
        &mut self,
        flash: &mut F,
        offset: u32,
        bytes: &[u8],
        verify: bool,
    ) -> Result<(), DfuMemError> {
        if !self.region.contains(offset, bytes.len()) {
            return Err(DfuMemError::Address);
        }

        let from = self.erase_from(offset);
        let end = offset + bytes.len() as u32;
        if from < end {
            self.erase_region(flash, from, (end - from) as usize)?;
        }

        self.program(flash, offset, bytes)?;

        if verify && !self.verify(flash, offset, bytes)? {
            warn!("verify failed at {}", offset);
            return Err(DfuMemError::Verify);
        }
        Ok(())
    }

    /// Read up to `buf.len()` bytes at `offset`, stopping at the end of the region.
    ///
    /// Returns the number of bytes read, `0` past the end of the region.
    pub fn read<F: ReadNorFlash>(
        &self,
        flash: &mut F,
        offset: u32,
        buf: &mut [u8],
    ) -> Result<usize, DfuMemError> {
        if offset >= self.region.size {
            return Ok(0);
        }
        let len = buf.len().min((self.region.size - offset) as usize);
        flash
            .read(self.region.base + offset, &mut buf[..len])
            .map_err(read_error)?;
        Ok(len)
    }

    /// Make a partially programmed image unbootable by erasing the first
    /// page of the region. Does nothing if no data was programmed.
    pub fn invalidate<F: NorFlash>(&mut self, flash: &mut F) -> Result<(), DfuMemError> {
        if !self.dirty {
            return Ok(());
        }
        info!("invalidating partially written image");
        self.begin_session();
        let page = self.region.erase_size.min(self.region.size) as usize;
        self.erase_region(flash, 0, page)?;
        self.dirty = false;
        self.begin_session();
        Ok(())
    }
}

fn erase_error<E: NorFlashError>(e: E) -> DfuMemError {
    match e.kind() {
        NorFlashErrorKind::NotAligned | NorFlashErrorKind::OutOfBounds => DfuMemError::Address,
        _ => DfuMemError::Erase,
    }
}

fn program_error<E: NorFlashError>(e: E) -> DfuMemError {
    match e.kind() {
        NorFlashErrorKind::OutOfBounds => DfuMemError::Address,
        _ => DfuMemError::Prog,
    }
}

fn read_error<E: NorFlashError>(e: E) -> DfuMemError {
    match e.kind() {
        NorFlashErrorKind::NotAligned | NorFlashErrorKind::OutOfBounds => DfuMemError::Address,
        _ => DfuMemError::Unknown,
    }
}
