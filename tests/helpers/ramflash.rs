use embedded_storage::nor_flash::{ErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash};

pub const PAGE_SIZE: usize = 1024;
pub const WRITE_SIZE: usize = 4;

/// NOR flash emulated in RAM: erase sets bytes to `0xff`, write can only
/// clear bits.
pub struct RamFlash {
    pub mem: Vec<u8>,
    pub writes: usize,
    pub erases: usize,
    pub erased_pages: Vec<u32>,
    /// `write()` fails with `Other`.
    pub fail_write: bool,
    /// `write()` succeeds, but the first byte is stored with a bit flipped.
    pub corrupt_write: bool,
    /// `erase()` fails with `Other`.
    pub fail_erase: bool,
    /// `erase()` succeeds without changing memory.
    pub stuck_erase: bool,
}

impl RamFlash {
    /// Flash of `size` bytes filled with [`pattern()`].
    pub fn new(size: usize) -> Self {
        Self {
            mem: (0..size).map(pattern).collect(),
            writes: 0,
            erases: 0,
            erased_pages: Vec::new(),
            fail_write: false,
            corrupt_write: false,
            fail_erase: false,
            stuck_erase: false,
        }
    }

    pub fn page(&self, offset: usize) -> &[u8] {
        &self.mem[offset..offset + PAGE_SIZE]
    }
}

// Memory initialized as: [0,0, 1,0, 2,0, ... 255,0, 0,1, ...]
pub fn pattern(i: usize) -> u8 {
    if i & 1 == 1 {
        ((i >> 9) & 0xff) as u8
    } else {
        ((i >> 1) & 0xff) as u8
    }
}

impl ErrorType for RamFlash {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for RamFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let start = offset as usize;
        let src = self
            .mem
            .get(start..start + bytes.len())
            .ok_or(NorFlashErrorKind::OutOfBounds)?;
        bytes.copy_from_slice(src);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.mem.len()
    }
}

impl NorFlash for RamFlash {
    const WRITE_SIZE: usize = WRITE_SIZE;
    const ERASE_SIZE: usize = PAGE_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        let (from, to) = (from as usize, to as usize);
        if from % PAGE_SIZE != 0 || to % PAGE_SIZE != 0 || from > to {
            return Err(NorFlashErrorKind::NotAligned);
        }
        if to > self.mem.len() {
            return Err(NorFlashErrorKind::OutOfBounds);
        }
        if self.fail_erase {
            return Err(NorFlashErrorKind::Other);
        }

        self.erases += 1;
        self.erased_pages
            .extend((from..to).step_by(PAGE_SIZE).map(|p| p as u32));
        if !self.stuck_erase {
            self.mem[from..to].fill(0xff);
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let start = offset as usize;
        if start % WRITE_SIZE != 0 || bytes.len() % WRITE_SIZE != 0 {
            return Err(NorFlashErrorKind::NotAligned);
        }
        if start + bytes.len() > self.mem.len() {
            return Err(NorFlashErrorKind::OutOfBounds);
        }
        if self.fail_write {
            return Err(NorFlashErrorKind::Other);
        }

        self.writes += 1;
        for (m, b) in self.mem[start..start + bytes.len()].iter_mut().zip(bytes) {
            // emulate flash write - set bits to 0 only
            *m &= *b;
        }
        if self.corrupt_write && !bytes.is_empty() {
            self.mem[start] ^= 0x01;
        }
        Ok(())
    }
}
